//! Lifted-IR-to-Cranelift IR lowering.
//!
//! A lifted function `(state*, mem) -> mem` becomes a native function with
//! the same shape: the state reference and the memory token are both
//! pointer-sized arguments, and the token is returned.
//!
//! Entry values are materialized in the entry block before anything else:
//! register addresses are `state + offset` from the architecture's layout,
//! and the memory slot is a stack slot. Constants are emitted at each use.
//!
//! Semantics calls import `implementation(mem, state*, operands...) -> mem`
//! by name; runtime intrinsics import `__relift_<intrinsic>(mem) -> mem`.

use std::collections::HashMap;

use cranelift_codegen::ir::{
    AbiParam, Block as ClifBlock, FuncRef, InstBuilder, MemFlags, StackSlotData, StackSlotKind,
    Type as ClifType, UserFuncName, Value as ClifValue,
};
use cranelift_codegen::ir::types;
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{FuncId, Linkage, Module};
use cranelift_object::ObjectModule;
use tracing::debug;

use relift::ir::{BinaryOp, CastOp, EntryValue, Intrinsic, Op, Value, ValueDef};
use relift::{Arch, Function};

use crate::emit::CodegenError;
use crate::types::lifted_type_to_cl_type;

pub struct LoweredFunction {
    pub name: String,
    pub func_id: FuncId,
}

/// Symbol a runtime intrinsic is imported under.
pub fn intrinsic_symbol(intrinsic: Intrinsic) -> String {
    format!("__relift_{intrinsic}")
}

/// Lower several lifted functions into `module`. All of them are declared
/// before any body is defined.
pub fn lower_functions(
    module: &mut ObjectModule,
    funcs: &[Function],
    arch: &Arch,
    pointer_type: ClifType,
) -> Result<Vec<LoweredFunction>, CodegenError> {
    let mut ids = Vec::with_capacity(funcs.len());
    for func in funcs {
        ids.push(declare_lifted(module, func.name(), pointer_type)?);
    }

    let mut fb_ctx = FunctionBuilderContext::new();
    let mut lowered = Vec::with_capacity(funcs.len());
    for (func, func_id) in funcs.iter().zip(ids) {
        define_lifted(module, func, arch, pointer_type, func_id, &mut fb_ctx)?;
        lowered.push(LoweredFunction {
            name: func.name().to_string(),
            func_id,
        });
    }
    Ok(lowered)
}

/// Lower one lifted function into `module` as an exported symbol.
pub fn lower_function(
    module: &mut ObjectModule,
    func: &Function,
    arch: &Arch,
    pointer_type: ClifType,
) -> Result<FuncId, CodegenError> {
    let func_id = declare_lifted(module, func.name(), pointer_type)?;
    let mut fb_ctx = FunctionBuilderContext::new();
    define_lifted(module, func, arch, pointer_type, func_id, &mut fb_ctx)?;
    Ok(func_id)
}

fn declare_lifted(
    module: &mut ObjectModule,
    name: &str,
    pointer_type: ClifType,
) -> Result<FuncId, CodegenError> {
    let sig = lifted_signature(module, pointer_type);
    module
        .declare_function(name, Linkage::Export, &sig)
        .map_err(|e| CodegenError::LoweringError(format!("declare_function({name}): {e}")))
}

fn lifted_signature(module: &ObjectModule, pointer_type: ClifType) -> cranelift_codegen::ir::Signature {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(pointer_type));
    sig.params.push(AbiParam::new(pointer_type));
    sig.returns.push(AbiParam::new(pointer_type));
    sig
}

fn define_lifted(
    module: &mut ObjectModule,
    func: &Function,
    arch: &Arch,
    pointer_type: ClifType,
    func_id: FuncId,
    fb_ctx: &mut FunctionBuilderContext,
) -> Result<(), CodegenError> {
    let sig = lifted_signature(module, pointer_type);
    let mut clif_func = cranelift_codegen::ir::Function::with_name_signature(
        UserFuncName::user(0, func_id.as_u32()),
        sig,
    );

    // `declare_func_in_func` needs the function before the builder borrows it.
    let imports = declare_imports(module, func, pointer_type, &mut clif_func)?;

    let mut builder = FunctionBuilder::new(&mut clif_func, fb_ctx);
    let mut lowering = Lowering {
        builder: &mut builder,
        func,
        pointer_type,
        values: vec![None; func.value_count()],
        blocks: Vec::new(),
        imports,
    };
    lowering.run(arch)?;
    builder.seal_all_blocks();
    builder.finalize();

    let mut ctx = Context::for_function(clif_func);
    module.define_function(func_id, &mut ctx).map_err(|e| {
        CodegenError::LoweringError(format!("define_function({}): {e}", func.name()))
    })?;
    debug!(function = func.name(), ops = func.inst_count(), "lowered lifted function");
    Ok(())
}

/// Import every semantics implementation and intrinsic `func` calls.
///
/// Argument types come from the call sites, so two variants sharing an
/// implementation must agree on its native signature; the module rejects
/// the second declaration otherwise.
fn declare_imports(
    module: &mut ObjectModule,
    func: &Function,
    pointer_type: ClifType,
    clif_func: &mut cranelift_codegen::ir::Function,
) -> Result<HashMap<String, FuncRef>, CodegenError> {
    let mut imports = HashMap::new();
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            let (name, params) = match &func.inst(inst).op {
                Op::Call {
                    implementation,
                    args,
                    ..
                } => {
                    let mut params = vec![pointer_type, pointer_type];
                    for &arg in args {
                        params.push(lifted_type_to_cl_type(func.value_type(arg), pointer_type)?);
                    }
                    (implementation.clone(), params)
                }
                Op::Intrinsic { intrinsic, .. } => (intrinsic_symbol(*intrinsic), vec![pointer_type]),
                _ => continue,
            };
            if imports.contains_key(&name) {
                continue;
            }
            let mut sig = module.make_signature();
            sig.params.extend(params.into_iter().map(AbiParam::new));
            sig.returns.push(AbiParam::new(pointer_type));
            let func_id = module
                .declare_function(&name, Linkage::Import, &sig)
                .map_err(|e| CodegenError::LoweringError(format!("import `{name}`: {e}")))?;
            let func_ref = module.declare_func_in_func(func_id, clif_func);
            imports.insert(name, func_ref);
        }
    }
    Ok(imports)
}

struct Lowering<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    func: &'a Function,
    pointer_type: ClifType,
    values: Vec<Option<ClifValue>>,
    blocks: Vec<ClifBlock>,
    imports: HashMap<String, FuncRef>,
}

impl Lowering<'_, '_> {
    fn run(&mut self, arch: &Arch) -> Result<(), CodegenError> {
        let func = self.func;
        for _ in func.blocks() {
            let block = self.builder.create_block();
            self.blocks.push(block);
        }

        let entry = self.blocks[func.entry_block().index()];
        self.builder.append_block_params_for_function_params(entry);
        self.builder.switch_to_block(entry);
        let state = self.builder.block_params(entry)[0];
        let memory = self.builder.block_params(entry)[1];
        self.define_entry_values(arch, state, memory)?;

        for block in func.blocks() {
            if !func.is_terminated(block) {
                return Err(CodegenError::LoweringError(format!(
                    "{block} of `{}` does not end in a jump or return",
                    func.name()
                )));
            }
            if block != func.entry_block() {
                self.builder.switch_to_block(self.blocks[block.index()]);
            }
            for &inst in func.block_insts(block) {
                let data = func.inst(inst);
                let result = self.lower_op(&data.op)?;
                if let (Some(value), Some(result)) = (data.result, result) {
                    self.values[value.index()] = Some(result);
                }
            }
        }
        Ok(())
    }

    fn define_entry_values(
        &mut self,
        arch: &Arch,
        state: ClifValue,
        memory: ClifValue,
    ) -> Result<(), CodegenError> {
        let func = self.func;
        for value in func.values() {
            let ValueDef::Entry(entry) = func.value_def(value) else {
                continue;
            };
            let lowered = match entry {
                EntryValue::State => state,
                EntryValue::Memory => memory,
                EntryValue::MemorySlot => {
                    let size = self.pointer_type.bytes();
                    let slot = self.builder.create_sized_stack_slot(StackSlotData::new(
                        StackSlotKind::ExplicitSlot,
                        size,
                        size.trailing_zeros() as u8,
                    ));
                    self.builder.ins().stack_addr(self.pointer_type, slot, 0)
                }
                EntryValue::Register(name) => {
                    let reg = arch.register(name).ok_or_else(|| {
                        CodegenError::LoweringError(format!(
                            "register `{name}` is not in the {} register file",
                            arch.name()
                        ))
                    })?;
                    self.builder.ins().iadd_imm(state, reg.offset as i64)
                }
            };
            self.values[value.index()] = Some(lowered);
        }
        Ok(())
    }

    fn lower_op(&mut self, op: &Op) -> Result<Option<ClifValue>, CodegenError> {
        let result = match op {
            Op::Load { addr } => {
                let ty = self.pointee_cl_type(*addr)?;
                let addr = self.use_value(*addr)?;
                Some(self.builder.ins().load(ty, MemFlags::trusted(), addr, 0))
            }
            Op::Store { addr, value } => {
                let addr = self.use_value(*addr)?;
                let value = self.use_value(*value)?;
                self.builder.ins().store(MemFlags::trusted(), value, addr, 0);
                None
            }
            Op::Binary { op, lhs, rhs } => {
                let lhs = self.use_value(*lhs)?;
                let rhs = self.use_value(*rhs)?;
                let ins = self.builder.ins();
                Some(match op {
                    BinaryOp::Add => ins.iadd(lhs, rhs),
                    BinaryOp::Sub => ins.isub(lhs, rhs),
                    BinaryOp::Mul => ins.imul(lhs, rhs),
                    BinaryOp::Shl => ins.ishl(lhs, rhs),
                    BinaryOp::LShr => ins.ushr(lhs, rhs),
                    BinaryOp::AShr => ins.sshr(lhs, rhs),
                    BinaryOp::And => ins.band(lhs, rhs),
                    BinaryOp::Or => ins.bor(lhs, rhs),
                })
            }
            Op::Cast { op, value, to } => {
                let from = self.value_cl_type(*value)?;
                let to = lifted_type_to_cl_type(to, self.pointer_type)?;
                let value = self.use_value(*value)?;
                Some(self.cast(*op, value, from, to))
            }
            Op::Call {
                implementation,
                prefix,
                args,
            } => {
                let callee = self.imported(implementation)?;
                let mut call_args = Vec::with_capacity(args.len() + 2);
                call_args.push(self.use_value(prefix.memory)?);
                call_args.push(self.use_value(prefix.state)?);
                for &arg in args {
                    call_args.push(self.use_value(arg)?);
                }
                let call = self.builder.ins().call(callee, &call_args);
                Some(self.builder.inst_results(call)[0])
            }
            Op::Intrinsic { intrinsic, memory } => {
                let callee = self.imported(&intrinsic_symbol(*intrinsic))?;
                let memory = self.use_value(*memory)?;
                let call = self.builder.ins().call(callee, &[memory]);
                Some(self.builder.inst_results(call)[0])
            }
            Op::Jump { target } => {
                let target = self.blocks[target.index()];
                self.builder.ins().jump(target, &[]);
                None
            }
            Op::Return { memory } => {
                let memory = self.use_value(*memory)?;
                self.builder.ins().return_(&[memory]);
                None
            }
        };
        Ok(result)
    }

    fn cast(&mut self, op: CastOp, value: ClifValue, from: ClifType, to: ClifType) -> ClifValue {
        // Pointer casts and same-width reinterpretations are free.
        if from == to {
            return value;
        }
        let ins = self.builder.ins();
        match op {
            CastOp::ZExt => ins.uextend(to, value),
            CastOp::SExt => ins.sextend(to, value),
            CastOp::Trunc => ins.ireduce(to, value),
            CastOp::FpExt => ins.fpromote(to, value),
            CastOp::FpTrunc => ins.fdemote(to, value),
            CastOp::BitCast => ins.bitcast(to, MemFlags::new(), value),
            CastOp::PtrToInt if to.bits() > from.bits() => ins.uextend(to, value),
            CastOp::PtrToInt => ins.ireduce(to, value),
        }
    }

    /// Native value for `value`, emitting constants at the use site.
    fn use_value(&mut self, value: Value) -> Result<ClifValue, CodegenError> {
        if let Some(lowered) = self.values[value.index()] {
            return Ok(lowered);
        }
        let ValueDef::Const(bits) = *self.func.value_def(value) else {
            return Err(CodegenError::LoweringError(format!(
                "value {} of `{}` is used before it is defined",
                value.index(),
                self.func.name()
            )));
        };
        let ty = self.value_cl_type(value)?;
        if ty == types::I128 {
            let lo = self.builder.ins().iconst(types::I64, bits as u64 as i64);
            let hi = self.builder.ins().iconst(types::I64, (bits >> 64) as u64 as i64);
            Ok(self.builder.ins().iconcat(lo, hi))
        } else {
            Ok(self.builder.ins().iconst(ty, bits as u64 as i64))
        }
    }

    fn value_cl_type(&self, value: Value) -> Result<ClifType, CodegenError> {
        lifted_type_to_cl_type(self.func.value_type(value), self.pointer_type)
    }

    fn pointee_cl_type(&self, addr: Value) -> Result<ClifType, CodegenError> {
        let ty = self.func.value_type(addr);
        let pointee = ty.pointee().ok_or_else(|| {
            CodegenError::LoweringError(format!("load through non-pointer of type {ty}"))
        })?;
        lifted_type_to_cl_type(pointee, self.pointer_type)
    }

    fn imported(&self, name: &str) -> Result<FuncRef, CodegenError> {
        self.imports
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::LoweringError(format!("`{name}` was not imported")))
    }
}
