//! Turn one decoded operand into one correctly typed call argument.
//!
//! Every path either returns a value the caller can compare against the
//! parameter type, or a [`FaultKind`] describing which decoder or registry
//! invariant was broken.

use crate::arch::{Arch, HostCapabilities};
use crate::coerce::coerce;
use crate::error::FaultKind;
use crate::instruction::{
    Action, Address, ExtendOp, Immediate, Operand, OperandKind, Register, ShiftOp, ShiftRegister,
};
use crate::ir::{Builder, CastOp, Value};
use crate::numeric::{low_ones_mask, rotate_complement};
use crate::registry::Param;
use crate::types::Type;

/// Materializes operands against one architecture's machine word.
#[derive(Debug, Clone)]
pub struct OperandMaterializer {
    word: Type,
    word_bits: u32,
    host: HostCapabilities,
}

impl OperandMaterializer {
    pub fn new(arch: &Arch) -> Self {
        Self {
            word: arch.word_type(),
            word_bits: arch.word_bits(),
            host: arch.host(),
        }
    }

    /// Override the host capabilities taken from the architecture.
    pub fn with_host(mut self, host: HostCapabilities) -> Self {
        self.host = host;
        self
    }

    pub fn word_type(&self) -> &Type {
        &self.word
    }

    pub fn materialize(
        &self,
        b: &mut Builder<'_>,
        op: &Operand,
        param: &Param,
    ) -> Result<Value, FaultKind> {
        match &op.kind {
            OperandKind::Invalid => Err(FaultKind::InvalidOperand),
            OperandKind::ShiftRegister(sr) => {
                if op.action != Action::Read {
                    return Err(FaultKind::ShiftRegisterWrite);
                }
                self.shift_register(b, op.size, sr, &param.ty)
            }
            OperandKind::Register(reg) => {
                if op.size != reg.size {
                    return Err(FaultKind::RegisterSizeMismatch {
                        name: reg.name.clone(),
                        operand: op.size,
                        register: reg.size,
                    });
                }
                self.register(b, reg, param)
            }
            OperandKind::Immediate(imm) => self.immediate(b, op.size, imm, &param.ty),
            OperandKind::Address(addr) => {
                if param.ty != self.word {
                    return Err(FaultKind::AddressParameter {
                        argument: param.ty.clone(),
                        word: self.word.clone(),
                    });
                }
                self.address(b, addr)
            }
        }
    }

    /// Parameter type to reason about: on hosts that flatten pointer
    /// wrappers into integers, the pointer type the implementation recovers.
    fn effective_param<'p>(&self, param: &'p Param) -> &'p Type {
        match &param.intended {
            Some(intended) if self.host.integer_pointer_params && param.ty.is_int() => intended,
            _ => &param.ty,
        }
    }

    fn register(&self, b: &mut Builder<'_>, reg: &Register, param: &Param) -> Result<Value, FaultKind> {
        let real = &param.ty;
        let arg = self.effective_param(param);
        let addr = register_address(b, &reg.name)?;

        if arg.is_pointer() {
            return coerce(b, addr, real);
        }
        if !arg.is_int() && !arg.is_float() {
            return Err(FaultKind::UnsupportedParameter(arg.clone()));
        }

        let reg_ty = b.value_type(addr).pointee().cloned().unwrap_or(Type::State);
        if reg_ty.is_int() != arg.is_int() || reg_ty.is_float() != arg.is_float() {
            return Err(FaultKind::NumericDomainMismatch {
                register: reg.name.clone(),
                register_type: reg_ty,
                argument: arg.clone(),
            });
        }

        let mut val = load(b, addr)?;
        let val_bits = reg_ty.scalar_bits().unwrap_or(0);
        let arg_bits = arg.scalar_bits().unwrap_or(0);

        if val_bits < arg_bits {
            if arg.is_int() {
                self.require_word_sized(arg)?;
                val = b.zext(val, self.word.clone());
            } else {
                val = b.cast(CastOp::FpExt, val, arg.clone());
            }
        } else if val_bits > arg_bits {
            if arg.is_int() {
                self.require_word_sized(arg)?;
                val = b.trunc(val, arg.clone());
            } else {
                val = b.cast(CastOp::FpTrunc, val, arg.clone());
            }
        }

        coerce(b, val, real)
    }

    fn require_word_sized(&self, arg: &Type) -> Result<(), FaultKind> {
        if arg.is_int_of(self.word_bits) {
            Ok(())
        } else {
            Err(FaultKind::ArgumentNotWordSized {
                argument: arg.clone(),
                word: self.word_bits,
            })
        }
    }

    /// Load, extract, extend, then shift at the operand width `size`, and
    /// widen the result to the machine word.
    fn shift_register(
        &self,
        b: &mut Builder<'_>,
        size: u32,
        sr: &ShiftRegister,
        param: &Type,
    ) -> Result<Value, FaultKind> {
        if !param.is_int() {
            return Err(FaultKind::ShiftRegisterParam(param.clone()));
        }

        let addr = register_address(b, &sr.reg.name)?;
        let reg_ty = b.value_type(addr).pointee().cloned().unwrap_or(Type::State);
        if !reg_ty.is_int() {
            return Err(FaultKind::NumericDomainMismatch {
                register: sr.reg.name.clone(),
                register_type: reg_ty,
                argument: param.clone(),
            });
        }
        let reg_bits = reg_ty.scalar_bits().unwrap_or(0);
        let op_ty = Type::Int(size);

        let mut val = load(b, addr)?;
        let mut curr = reg_bits;

        if let Some(extract) = sr.extract_size {
            if extract > reg_bits {
                return Err(FaultKind::ExtractTooWide {
                    extract,
                    register: reg_bits,
                });
            }
            if extract < reg_bits {
                val = b.trunc(val, Type::Int(extract));
                curr = extract;
            }
            if size > extract {
                match sr.extend_op {
                    ExtendOp::Signed => {
                        val = b.sext(val, op_ty.clone());
                        curr = size;
                    }
                    ExtendOp::Unsigned => {
                        val = b.zext(val, op_ty.clone());
                        curr = size;
                    }
                    ExtendOp::None => {}
                }
            }
        }

        if curr > size {
            return Err(FaultKind::ShiftSourceTooWide {
                source_bits: curr,
                operand: size,
            });
        }
        if curr < size {
            val = b.zext(val, op_ty.clone());
        }

        if sr.shift_op != ShiftOp::None {
            let amount = sr.shift_size;
            if amount >= size {
                return Err(FaultKind::ShiftTooWide {
                    amount,
                    width: size,
                });
            }
            let shift = b.iconst(size, u64::from(amount), false);
            val = match sr.shift_op {
                ShiftOp::None => val,
                ShiftOp::LeftWithZeroes => b.shl(val, shift),
                ShiftOp::LeftWithOnes => {
                    let shifted = b.shl(val, shift);
                    let ones = b.iconst(size, low_ones_mask(amount, size) as u64, false);
                    b.or(shifted, ones)
                }
                ShiftOp::UnsignedRight => b.lshr(val, shift),
                ShiftOp::SignedRight => b.ashr(val, shift),
                ShiftOp::LeftAround => {
                    let back = rotate_complement(amount, size);
                    let back = b.iconst(size, u64::from(back), false);
                    let high = b.lshr(val, back);
                    let low = b.shl(val, shift);
                    b.or(high, low)
                }
                ShiftOp::RightAround => {
                    let back = rotate_complement(amount, size);
                    let back = b.iconst(size, u64::from(back), false);
                    let low = b.lshr(val, shift);
                    let high = b.shl(val, back);
                    b.or(low, high)
                }
            };
        }

        if self.word_bits > size {
            val = b.zext(val, self.word.clone());
        } else if self.word_bits != size {
            return Err(FaultKind::OperandNotWordSized {
                operand: size,
                word: self.word_bits,
            });
        }
        Ok(val)
    }

    fn immediate(
        &self,
        b: &mut Builder<'_>,
        size: u32,
        imm: &Immediate,
        param: &Type,
    ) -> Result<Value, FaultKind> {
        if size > self.word_bits {
            if !param.is_int_of(size) {
                return Err(FaultKind::ImmediateParameter {
                    bits: size,
                    argument: param.clone(),
                });
            }
            if size > 64 {
                return Err(FaultKind::ImmediateTooWide(size));
            }
            Ok(b.iconst(size, imm.value, imm.is_signed))
        } else {
            if !param.is_int_of(self.word_bits) {
                return Err(FaultKind::ImmediateParameter {
                    bits: size,
                    argument: param.clone(),
                });
            }
            Ok(b.iconst(self.word_bits, imm.value, imm.is_signed))
        }
    }

    /// `segment + base + index * scale +/- displacement`, wrapped to the
    /// address width when that is narrower than the machine word.
    fn address(&self, b: &mut Builder<'_>, addr: &Address) -> Result<Value, FaultKind> {
        let mut address = self.word_or_zero(b, addr.base_reg.as_ref())?;

        if let Some(index_reg) = present(addr.index_reg.as_ref()) {
            let index = self.word_or_zero(b, Some(index_reg))?;
            let scale = b.iconst(self.word_bits, addr.scale as u64, true);
            let scaled = b.mul(index, scale);
            address = b.add(address, scaled);
        }

        if addr.displacement > 0 {
            let disp = b.iconst(self.word_bits, addr.displacement as u64, false);
            address = b.add(address, disp);
        } else if addr.displacement < 0 {
            let disp = b.iconst(self.word_bits, addr.displacement.unsigned_abs(), false);
            address = b.sub(address, disp);
        }

        if let Some(segment_reg) = present(addr.segment_base_reg.as_ref()) {
            let segment = self.word_or_zero(b, Some(segment_reg))?;
            address = b.add(address, segment);
        }

        if addr.address_size < self.word_bits {
            let narrow = b.trunc(address, Type::Int(addr.address_size));
            address = b.zext(narrow, self.word.clone());
        }

        Ok(address)
    }

    /// Value of an integer register widened to the machine word, or a zero
    /// constant when the register is absent.
    fn word_or_zero(&self, b: &mut Builder<'_>, reg: Option<&Register>) -> Result<Value, FaultKind> {
        let Some(reg) = present(reg) else {
            return Ok(b.iconst(self.word_bits, 0, false));
        };
        let addr = register_address(b, &reg.name)?;
        let ty = b.value_type(addr).pointee().cloned().unwrap_or(Type::State);
        let bits = match ty.scalar_bits() {
            Some(bits) if ty.is_int() && bits <= self.word_bits => bits,
            _ => {
                return Err(FaultKind::AddressRegister {
                    register: reg.name.clone(),
                    ty,
                    word: self.word_bits,
                })
            }
        };
        let val = load(b, addr)?;
        if bits < self.word_bits {
            Ok(b.zext(val, self.word.clone()))
        } else {
            Ok(val)
        }
    }
}

/// Decoders leave unused register slots with an empty name.
fn present(reg: Option<&Register>) -> Option<&Register> {
    reg.filter(|r| !r.name.is_empty())
}

fn load(b: &mut Builder<'_>, addr: Value) -> Result<Value, FaultKind> {
    b.load(addr)
        .ok_or_else(|| FaultKind::NotAPointer(b.value_type(addr).clone()))
}

fn register_address(b: &Builder<'_>, name: &str) -> Result<Value, FaultKind> {
    b.func()
        .register_address(name)
        .ok_or_else(|| FaultKind::UnknownRegister(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Function, Op};

    fn arch(host: HostCapabilities) -> Arch {
        Arch::builder("t", 64)
            .register("X0", Type::Int(64))
            .sub_register("W0", Type::Int(32), "X0", 0)
            .register("X1", Type::Int(64))
            .register("D0", Type::Float(64))
            .sub_register("S0", Type::Float(32), "D0", 0)
            .register("WIDE", Type::Int(128))
            .register("PC", Type::Int(64))
            .host(host)
            .build()
            .unwrap()
    }

    fn lift(op: &Operand, param: Param) -> (Function, Result<Value, FaultKind>) {
        lift_on(HostCapabilities::default(), op, param)
    }

    fn lift_on(
        host: HostCapabilities,
        op: &Operand,
        param: Param,
    ) -> (Function, Result<Value, FaultKind>) {
        let arch = arch(host);
        let mut func = Function::new("f", &arch);
        let entry = func.entry_block();
        let m = OperandMaterializer::new(&arch);
        let mut b = func.builder(entry);
        let out = m.materialize(&mut b, op, &param);
        (func, out)
    }

    fn ops(func: &Function) -> Vec<Op> {
        let entry = func.entry_block();
        func.block_insts(entry)
            .iter()
            .map(|&i| func.inst(i).op.clone())
            .collect()
    }

    #[test]
    fn write_register_passes_storage_address() {
        let op = Operand::register(Register::new("W0", 32), Action::Write);
        let (func, out) = lift(&op, Param::new(Type::ptr(Type::Int(32))));
        let out = out.unwrap();
        assert_eq!(Some(out), func.register_address("W0"));
        assert!(ops(&func).is_empty());
    }

    #[test]
    fn narrow_register_widens_to_word() {
        let op = Operand::register(Register::new("W0", 32), Action::Read);
        let (func, out) = lift(&op, Param::new(Type::Int(64)));
        assert_eq!(func.value_type(out.unwrap()), &Type::Int(64));
        let ops = ops(&func);
        assert!(matches!(ops[1], Op::Cast { op: CastOp::ZExt, .. }));
    }

    #[test]
    fn widening_into_non_word_parameter_is_fatal() {
        let op = Operand::register(Register::new("W0", 32), Action::Read);
        let (_, out) = lift(&op, Param::new(Type::Int(128)));
        assert!(matches!(out, Err(FaultKind::ArgumentNotWordSized { .. })));
    }

    #[test]
    fn float_registers_use_float_conversions() {
        let op = Operand::register(Register::new("S0", 32), Action::Read);
        let (func, out) = lift(&op, Param::new(Type::Float(64)));
        assert_eq!(func.value_type(out.unwrap()), &Type::Float(64));
        assert!(matches!(ops(&func)[1], Op::Cast { op: CastOp::FpExt, .. }));

        let op = Operand::register(Register::new("D0", 64), Action::Read);
        let (func, out) = lift(&op, Param::new(Type::Float(32)));
        assert_eq!(func.value_type(out.unwrap()), &Type::Float(32));
    }

    #[test]
    fn numeric_domain_mismatch_is_fatal() {
        let op = Operand::register(Register::new("D0", 64), Action::Read);
        let (_, out) = lift(&op, Param::new(Type::Int(64)));
        assert!(matches!(out, Err(FaultKind::NumericDomainMismatch { .. })));
    }

    #[test]
    fn register_size_must_match_operand() {
        let mut op = Operand::register(Register::new("W0", 32), Action::Read);
        op.size = 64;
        let (_, out) = lift(&op, Param::new(Type::Int(64)));
        assert!(matches!(out, Err(FaultKind::RegisterSizeMismatch { .. })));
    }

    #[test]
    fn unknown_register_is_fatal() {
        let op = Operand::register(Register::new("R99", 64), Action::Read);
        let (_, out) = lift(&op, Param::new(Type::Int(64)));
        assert_eq!(out, Err(FaultKind::UnknownRegister("R99".to_string())));
    }

    #[test]
    fn integer_pointer_hosts_recover_intended_pointer() {
        let op = Operand::register(Register::new("X0", 64), Action::Write);
        let param = Param::with_intended(Type::Int(64), Type::ptr(Type::Int(64)));
        let host = HostCapabilities {
            integer_pointer_params: true,
        };
        let (func, out) = lift_on(host, &op, param.clone());
        assert_eq!(func.value_type(out.unwrap()), &Type::Int(64));
        assert!(matches!(ops(&func)[0], Op::Cast { op: CastOp::PtrToInt, .. }));

        // Without the capability the parameter is taken at face value.
        let (func, out) = lift(&op, param);
        assert_eq!(func.value_type(out.unwrap()), &Type::Int(64));
        assert!(matches!(ops(&func)[0], Op::Load { .. }));
    }

    #[test]
    fn shift_register_rejects_writes_and_wide_shifts() {
        let sr = ShiftRegister::new(Register::new("W0", 32)).shift(ShiftOp::LeftWithZeroes, 32);
        let (_, out) = lift(&Operand::shift_register(32, sr.clone()), Param::new(Type::Int(64)));
        assert_eq!(
            out,
            Err(FaultKind::ShiftTooWide {
                amount: 32,
                width: 32
            })
        );

        let mut op = Operand::shift_register(32, sr);
        op.action = Action::Write;
        let (_, out) = lift(&op, Param::new(Type::Int(64)));
        assert_eq!(out, Err(FaultKind::ShiftRegisterWrite));
    }

    #[test]
    fn shift_register_extract_wider_than_register_is_fatal() {
        let sr = ShiftRegister::new(Register::new("W0", 32)).extract(64, ExtendOp::Signed);
        let (_, out) = lift(&Operand::shift_register(64, sr), Param::new(Type::Int(64)));
        assert!(matches!(out, Err(FaultKind::ExtractTooWide { extract: 64, register: 32 })));
    }

    #[test]
    fn shift_register_source_wider_than_operand_is_fatal() {
        let sr = ShiftRegister::new(Register::new("X0", 64));
        let (_, out) = lift(&Operand::shift_register(32, sr), Param::new(Type::Int(64)));
        assert!(matches!(out, Err(FaultKind::ShiftSourceTooWide { .. })));
    }

    #[test]
    fn shift_register_result_is_word_sized() {
        let sr = ShiftRegister::new(Register::new("X0", 64))
            .extract(16, ExtendOp::Signed)
            .shift(ShiftOp::LeftWithZeroes, 4);
        let (func, out) = lift(&Operand::shift_register(32, sr), Param::new(Type::Int(64)));
        assert_eq!(func.value_type(out.unwrap()), &Type::Int(64));
        let ops = ops(&func);
        assert!(matches!(ops[1], Op::Cast { op: CastOp::Trunc, .. }));
        assert!(matches!(ops[2], Op::Cast { op: CastOp::SExt, .. }));
        assert!(matches!(ops[3], Op::Binary { .. }));
        assert!(matches!(ops[4], Op::Cast { op: CastOp::ZExt, .. }));
    }

    #[test]
    fn immediates_are_constants() {
        let (func, out) = lift(&Operand::signed_immediate(8, -1), Param::new(Type::Int(64)));
        assert_eq!(func.const_value(out.unwrap()), Some(u128::from(u64::MAX)));
        assert!(ops(&func).is_empty());

        let (_, out) = lift(&Operand::immediate(8, 1), Param::new(Type::Int(8)));
        assert!(matches!(out, Err(FaultKind::ImmediateParameter { .. })));
    }

    #[test]
    fn address_needs_word_parameter_and_integer_registers() {
        let addr = Address::new(64).base(Register::new("X0", 64));
        let op = Operand::address(64, addr, Action::Read);
        let (_, out) = lift(&op, Param::new(Type::Int(32)));
        assert!(matches!(out, Err(FaultKind::AddressParameter { .. })));

        let addr = Address::new(64).base(Register::new("WIDE", 128));
        let op = Operand::address(64, addr, Action::Read);
        let (_, out) = lift(&op, Param::new(Type::Int(64)));
        assert!(matches!(out, Err(FaultKind::AddressRegister { .. })));
    }

    #[test]
    fn address_without_index_skips_multiply() {
        let addr = Address::new(64)
            .base(Register::new("X0", 64))
            .displacement(-8);
        let op = Operand::address(64, addr, Action::Read);
        let (func, out) = lift(&op, Param::new(Type::Int(64)));
        assert_eq!(func.value_type(out.unwrap()), &Type::Int(64));
        let ops = ops(&func);
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[1], Op::Binary { op: BinaryOp::Sub, .. }));
    }

    #[test]
    fn invalid_operand_is_fatal() {
        let op = Operand {
            size: 64,
            action: Action::Read,
            kind: OperandKind::Invalid,
        };
        let (_, out) = lift(&op, Param::new(Type::Int(64)));
        assert_eq!(out, Err(FaultKind::InvalidOperand));
    }
}
