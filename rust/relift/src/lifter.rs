//! Instruction lifter: resolves, materializes, updates the program counter,
//! brackets atomics and emits the semantics call.

use tracing::{debug, error, trace};

use crate::arch::{Arch, HostCapabilities};
use crate::error::{FaultKind, LiftFault};
use crate::instruction::{DecodedInstruction, Operand};
use crate::ir::{Builder, CallPrefix, Function, Intrinsic};
use crate::operand::OperandMaterializer;
use crate::registry::{Resolution, SemanticsRegistry};

/// What happened to one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftOutcome {
    /// Lifted with its own semantics.
    Lifted,
    /// Lifted as a call to the invalid or unsupported placeholder.
    Placeholder,
    /// Nothing registered could stand in for it; no IR was emitted.
    Unresolved,
}

/// Counters for a run over many instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiftStats {
    pub lifted: usize,
    pub placeholders: usize,
    /// Addresses of instructions for which nothing was emitted.
    pub unresolved: Vec<u64>,
}

impl LiftStats {
    pub fn total(&self) -> usize {
        self.lifted + self.placeholders + self.unresolved.len()
    }
}

/// Lifts decoded instructions for one architecture. Holds no mutable state,
/// so a single lifter can be shared by workers lifting disjoint blocks.
#[derive(Debug, Clone)]
pub struct InstructionLifter<'a> {
    arch: &'a Arch,
    registry: &'a SemanticsRegistry,
    operands: OperandMaterializer,
}

impl<'a> InstructionLifter<'a> {
    pub fn new(arch: &'a Arch, registry: &'a SemanticsRegistry) -> Self {
        Self {
            arch,
            registry,
            operands: OperandMaterializer::new(arch),
        }
    }

    /// Override the host capabilities taken from the architecture.
    pub fn with_host(mut self, host: HostCapabilities) -> Self {
        self.operands = self.operands.with_host(host);
        self
    }

    pub fn arch(&self) -> &'a Arch {
        self.arch
    }

    pub fn registry(&self) -> &'a SemanticsRegistry {
        self.registry
    }

    /// Lift `inst` at the end of the builder's block.
    ///
    /// Returns `Ok(false)` when neither the instruction's own semantics nor
    /// the applicable placeholder is registered; the block is left as it
    /// was. An `Err` means a registry entry or the decoder is broken.
    pub fn lift_into_block(
        &self,
        inst: &DecodedInstruction,
        b: &mut Builder<'_>,
    ) -> Result<bool, LiftFault> {
        Ok(self.lift(inst, b)? != LiftOutcome::Unresolved)
    }

    /// Like [`lift_into_block`](Self::lift_into_block), but reports which
    /// implementation kind was used.
    pub fn lift(
        &self,
        inst: &DecodedInstruction,
        b: &mut Builder<'_>,
    ) -> Result<LiftOutcome, LiftFault> {
        let resolution = self.registry.resolve(inst);
        let Some(entry) = resolution.entry() else {
            return Ok(LiftOutcome::Unresolved);
        };
        let operands: &[Operand] = if resolution.keeps_operands() {
            &inst.operands
        } else {
            &[]
        };

        let params = &entry.signature.params;
        if operands.len() != params.len() {
            return Err(fault(
                inst,
                None,
                FaultKind::ArityMismatch {
                    implementation: entry.implementation.clone(),
                    params: params.len(),
                    operands: operands.len(),
                },
            ));
        }

        let mut args = Vec::with_capacity(operands.len());
        for (index, (op, param)) in operands.iter().zip(params).enumerate() {
            let value = self
                .operands
                .materialize(b, op, param)
                .map_err(|kind| fault(inst, Some(op), kind))?;
            let actual = b.value_type(value);
            if actual != &param.ty {
                let kind = FaultKind::OperandTypeMismatch {
                    index,
                    expected: param.ty.clone(),
                    actual: actual.clone(),
                };
                return Err(fault(inst, Some(op), kind));
            }
            args.push(value);
        }

        // Stored before the call so control-flow semantics can overwrite it.
        let pc_slot = b.func().pc_slot();
        let pc = b
            .load(pc_slot)
            .ok_or_else(|| fault(inst, None, FaultKind::NotAPointer(b.value_type(pc_slot).clone())))?;
        let len = b.iconst(self.arch.word_bits(), u64::from(inst.num_bytes), false);
        let next_pc = b.add(pc, len);
        b.store(pc_slot, next_pc);

        let memory_slot = b.func().memory_slot();
        let state = b.func().state_pointer();
        let mut memory = b.load(memory_slot).ok_or_else(|| {
            fault(inst, None, FaultKind::NotAPointer(b.value_type(memory_slot).clone()))
        })?;

        if inst.is_atomic_read_modify_write {
            memory = b.intrinsic(Intrinsic::AtomicBegin, memory);
            b.store(memory_slot, memory);
        }

        let memory = b.call(&entry.implementation, CallPrefix { memory, state }, args);
        b.store(memory_slot, memory);

        if inst.is_atomic_read_modify_write {
            let memory = b.intrinsic(Intrinsic::AtomicEnd, memory);
            b.store(memory_slot, memory);
        }

        trace!(
            pc = format_args!("{:#x}", inst.pc),
            implementation = %entry.implementation,
            "lifted instruction",
        );

        Ok(match resolution {
            Resolution::Exact(_) => LiftOutcome::Lifted,
            _ => LiftOutcome::Placeholder,
        })
    }

    /// Lift a straight-line sequence at the builder's insertion point.
    /// Unresolved instructions are skipped and recorded; the first fault
    /// aborts the run.
    pub fn lift_instructions(
        &self,
        insts: &[DecodedInstruction],
        b: &mut Builder<'_>,
    ) -> Result<LiftStats, LiftFault> {
        let mut stats = LiftStats::default();
        for inst in insts {
            match self.lift(inst, b) {
                Ok(LiftOutcome::Lifted) => stats.lifted += 1,
                Ok(LiftOutcome::Placeholder) => stats.placeholders += 1,
                Ok(LiftOutcome::Unresolved) => stats.unresolved.push(inst.pc),
                Err(fault) => {
                    error!(%fault, "aborting lift");
                    return Err(fault);
                }
            }
        }
        debug!(
            lifted = stats.lifted,
            placeholders = stats.placeholders,
            unresolved = stats.unresolved.len(),
            "lifted instruction sequence",
        );
        Ok(stats)
    }

    /// Lift a straight-line sequence into a fresh `(state*, mem) -> mem`
    /// function that returns the final memory token.
    pub fn lift_function(
        &self,
        name: impl Into<String>,
        insts: &[DecodedInstruction],
    ) -> Result<(Function, LiftStats), LiftFault> {
        let mut func = Function::new(name, self.arch);
        let entry = func.entry_block();
        let mut b = func.builder(entry);
        let memory_slot = b.func().memory_slot();
        let memory = b.func().initial_memory();
        b.store(memory_slot, memory);
        let stats = self.lift_instructions(insts, &mut b)?;
        b.ret();
        Ok((func, stats))
    }
}

fn fault(inst: &DecodedInstruction, operand: Option<&Operand>, kind: FaultKind) -> LiftFault {
    LiftFault {
        address: inst.pc,
        instruction: inst.to_string(),
        operand: operand.map(ToString::to_string),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Action, Operand, Register};
    use crate::ir::Op;
    use crate::registry::{Signature, INVALID_INSTRUCTION, UNSUPPORTED_INSTRUCTION};
    use crate::types::Type;

    fn arch() -> Arch {
        Arch::builder("t", 64)
            .register("RAX", Type::Int(64))
            .sub_register("EAX", Type::Int(32), "RAX", 0)
            .register("RIP", Type::Int(64))
            .pc("RIP")
            .build()
            .unwrap()
    }

    fn registry(fallbacks: bool) -> SemanticsRegistry {
        let mut b = SemanticsRegistry::builder(64);
        b.define(
            "MOV_32",
            "mov32",
            Signature::new([Type::ptr(Type::Int(32)), Type::Int(64)]),
        )
        .unwrap();
        if fallbacks {
            b.define(INVALID_INSTRUCTION, "invalid", Signature::default())
                .unwrap()
                .define(UNSUPPORTED_INSTRUCTION, "unsupported", Signature::default())
                .unwrap();
        }
        b.build()
    }

    fn mov() -> DecodedInstruction {
        DecodedInstruction::new(0x1000, 5, "MOV_32")
            .with_operand(Operand::register(Register::new("EAX", 32), Action::Write))
            .with_operand(Operand::immediate(32, 7))
    }

    fn calls(func: &Function) -> Vec<String> {
        func.block_insts(func.entry_block())
            .iter()
            .filter_map(|&i| match &func.inst(i).op {
                Op::Call { implementation, .. } => Some(implementation.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn lifts_with_exact_semantics() {
        let arch = arch();
        let reg = registry(true);
        let lifter = InstructionLifter::new(&arch, &reg);
        let mut func = Function::new("f", &arch);
        let entry = func.entry_block();
        let mut b = func.builder(entry);
        assert!(lifter.lift_into_block(&mov(), &mut b).unwrap());
        assert_eq!(calls(&func), ["mov32"]);
    }

    #[test]
    fn unknown_instruction_becomes_placeholder_without_operands() {
        let arch = arch();
        let reg = registry(true);
        let lifter = InstructionLifter::new(&arch, &reg);
        let mut func = Function::new("f", &arch);
        let entry = func.entry_block();
        let mut b = func.builder(entry);
        let mut inst = mov();
        inst.function = "FOO_32".to_string();
        assert_eq!(lifter.lift(&inst, &mut b).unwrap(), LiftOutcome::Placeholder);
        assert_eq!(calls(&func), ["unsupported"]);
    }

    #[test]
    fn unresolved_instruction_appends_nothing() {
        let arch = arch();
        let reg = registry(false);
        let lifter = InstructionLifter::new(&arch, &reg);
        let mut func = Function::new("f", &arch);
        let entry = func.entry_block();
        let mut b = func.builder(entry);
        let inst = DecodedInstruction::new(0x1000, 4, "FOO_32");
        assert!(!lifter.lift_into_block(&inst, &mut b).unwrap());
        assert_eq!(func.inst_count(), 0);
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let arch = arch();
        let reg = registry(true);
        let lifter = InstructionLifter::new(&arch, &reg);
        let mut func = Function::new("f", &arch);
        let entry = func.entry_block();
        let mut b = func.builder(entry);
        let inst = mov().with_operand(Operand::immediate(32, 1));
        let fault = lifter.lift_into_block(&inst, &mut b).unwrap_err();
        assert_eq!(fault.address, 0x1000);
        assert!(matches!(
            fault.kind,
            FaultKind::ArityMismatch {
                params: 2,
                operands: 3,
                ..
            }
        ));
    }

    #[test]
    fn operand_fault_names_the_operand() {
        let arch = arch();
        let reg = registry(true);
        let lifter = InstructionLifter::new(&arch, &reg);
        let mut func = Function::new("f", &arch);
        let entry = func.entry_block();
        let mut b = func.builder(entry);
        let inst = DecodedInstruction::new(0x2000, 5, "MOV_32")
            .with_operand(Operand::immediate(32, 7))
            .with_operand(Operand::immediate(32, 7));
        let fault = lifter.lift_into_block(&inst, &mut b).unwrap_err();
        assert_eq!(fault.operand.as_deref(), Some("(READ_OP (IMM_32 0x7))"));
        assert!(matches!(fault.kind, FaultKind::ImmediateParameter { .. }));
    }

    #[test]
    fn lift_function_threads_memory_and_returns() {
        let arch = arch();
        let reg = registry(false);
        let lifter = InstructionLifter::new(&arch, &reg);
        let insts = [mov(), DecodedInstruction::new(0x1005, 1, "NOP")];
        let (func, stats) = lifter.lift_function("block_1000", &insts).unwrap();
        assert_eq!(stats.lifted, 1);
        assert_eq!(stats.unresolved, [0x1005]);
        assert_eq!(stats.total(), 2);
        assert!(func.is_terminated(func.entry_block()));
    }
}
