//! Property tests: lifted operands agree bit-for-bit with reference
//! arithmetic on native integers.

mod common;

use common::{amd64, amd64_with, calls, run};
use proptest::prelude::*;
use relift::instruction::{Action, Address, ExtendOp, Register, ShiftOp, ShiftRegister};
use relift::interp::Val;
use relift::{Arch, DecodedInstruction, Operand, SemanticsRegistry};

const SHIFTED: &str = r#"
[semantics.ADD_SHIFTED_32]
implementation = "ADD_SHIFTED"
params = ["i32*", "i64", "i64"]
"#;

/// Value the shift-register operand `sr` materializes to when EBX = `x`.
fn materialize(arch: &Arch, registry: &SemanticsRegistry, x: u32, sr: ShiftRegister) -> u128 {
    let inst = DecodedInstruction::new(0x1000, 4, "ADD_SHIFTED_32")
        .with_operand(Operand::register(Register::new("EAX", 32), Action::Write))
        .with_operand(Operand::register(Register::new("ECX", 32), Action::Read))
        .with_operand(Operand::shift_register(32, sr));
    let (m, _) = run(arch, registry, &[inst], |m| {
        m.set_int("RBX", u128::from(x) | 0xaaaa_aaaa_0000_0000).unwrap();
    });
    match &calls(&m, "ADD_SHIFTED")[0][2] {
        Val::Int { bits: 64, value } => *value,
        other => panic!("unexpected argument {other:?}"),
    }
}

fn ebx() -> Register {
    Register::new("EBX", 32)
}

fn reference(op: ShiftOp, x: u32, s: u32) -> u32 {
    match op {
        ShiftOp::None => x,
        ShiftOp::LeftWithZeroes => x << s,
        ShiftOp::LeftWithOnes => ((u64::from(x) << s) | ((1u64 << s) - 1)) as u32,
        ShiftOp::UnsignedRight => x >> s,
        ShiftOp::SignedRight => ((x as i32) >> s) as u32,
        ShiftOp::LeftAround => x.rotate_left(s),
        ShiftOp::RightAround => x.rotate_right(s),
    }
}

fn shift_ops() -> impl Strategy<Value = ShiftOp> {
    prop::sample::select(vec![
        ShiftOp::None,
        ShiftOp::LeftWithZeroes,
        ShiftOp::LeftWithOnes,
        ShiftOp::UnsignedRight,
        ShiftOp::SignedRight,
        ShiftOp::LeftAround,
        ShiftOp::RightAround,
    ])
}

fn lea(address: Address) -> DecodedInstruction {
    DecodedInstruction::new(0x1000, 4, "LEA_GPRv_AGEN_64")
        .with_operand(Operand::register(Register::new("RAX", 64), Action::Write))
        .with_operand(Operand::address(64, address, Action::Read))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn register_read_is_zero_extended(rbx: u64) {
        let (arch, registry) = amd64();
        let add = DecodedInstruction::new(0x1000, 2, "ADD_GPRv_GPRv_32")
            .with_operand(Operand::register(Register::new("EAX", 32), Action::Write))
            .with_operand(Operand::register(ebx(), Action::Read))
            .with_operand(Operand::register(Register::new("ECX", 32), Action::Read));
        let (m, _) = run(&arch, &registry, &[add], |m| m.set_int("RBX", rbx.into()).unwrap());
        prop_assert_eq!(
            &calls(&m, "ADD_32")[0][1],
            &Val::Int { bits: 64, value: u128::from(rbx & 0xffff_ffff) }
        );
    }

    #[test]
    fn shifts_match_native_arithmetic(x: u32, s in 0u32..32, op in shift_ops()) {
        let (arch, registry) = amd64_with(SHIFTED);
        let got = materialize(&arch, &registry, x, ShiftRegister::new(ebx()).shift(op, s));
        prop_assert_eq!(got, u128::from(reference(op, x, s)));
    }

    #[test]
    fn lifted_rotate_right_undoes_rotate_left(x: u32, s in 0u32..32) {
        let (arch, registry) = amd64_with(SHIFTED);
        let left = materialize(&arch, &registry, x, ShiftRegister::new(ebx()).shift(ShiftOp::LeftAround, s));
        let back = materialize(
            &arch,
            &registry,
            left as u32,
            ShiftRegister::new(ebx()).shift(ShiftOp::RightAround, s),
        );
        prop_assert_eq!(back, u128::from(x));
    }

    #[test]
    fn lifted_left_one_fill_sets_low_bits(x: u32, s in 0u32..32) {
        let (arch, registry) = amd64_with(SHIFTED);
        let got = materialize(&arch, &registry, x, ShiftRegister::new(ebx()).shift(ShiftOp::LeftWithOnes, s));
        let expected = (u64::from(x) << s) as u32 | ((1u64 << s) - 1) as u32;
        prop_assert_eq!(got, u128::from(expected));
    }

    #[test]
    fn extract_then_extend(x: u32, k in 1u32..=32, signed: bool) {
        let (arch, registry) = amd64_with(SHIFTED);
        let mode = if signed { ExtendOp::Signed } else { ExtendOp::Unsigned };
        let got = materialize(&arch, &registry, x, ShiftRegister::new(ebx()).extract(k, mode));
        let low = u64::from(x) & ((1u64 << k) - 1);
        let expected = if signed && k < 32 && low >> (k - 1) & 1 == 1 {
            (low | !((1u64 << k) - 1)) as u32
        } else {
            low as u32
        };
        prop_assert_eq!(got, u128::from(expected));
    }

    #[test]
    fn address_arithmetic_wraps_at_the_address_width(
        base: u64,
        index: u64,
        scale in prop::sample::select(vec![1i64, 2, 4, 8]),
        displacement in any::<i32>(),
        narrow: bool,
    ) {
        let (arch, registry) = amd64();
        let size = if narrow { 32 } else { 64 };
        let address = Address::new(size)
            .base(Register::new("RBX", 64))
            .index(Register::new("RCX", 64), scale)
            .displacement(i64::from(displacement));
        let (m, _) = run(&arch, &registry, &[lea(address)], |m| {
            m.set_int("RBX", base.into()).unwrap();
            m.set_int("RCX", index.into()).unwrap();
        });
        let mut expected = base
            .wrapping_add(index.wrapping_mul(scale as u64))
            .wrapping_add(i64::from(displacement) as u64);
        if narrow {
            expected &= 0xffff_ffff;
        }
        prop_assert_eq!(m.int("RAX").unwrap(), u128::from(expected));
    }

    #[test]
    fn signed_immediates_are_sign_extended(imm: i8) {
        let (arch, registry) = amd64();
        let add = DecodedInstruction::new(0x1000, 4, "ADD_GPRv_GPRv_64")
            .with_operand(Operand::register(Register::new("RAX", 64), Action::Write))
            .with_operand(Operand::register(Register::new("RBX", 64), Action::Read))
            .with_operand(Operand::signed_immediate(8, imm.into()));
        let (m, _) = run(&arch, &registry, &[add], |_| {});
        prop_assert_eq!(
            &calls(&m, "ADD_64")[0][2],
            &Val::Int { bits: 64, value: u128::from(i64::from(imm) as u64) }
        );
    }

    #[test]
    fn program_counter_advances_by_length(pc in 0u64..u64::MAX / 2, len in 1u32..16) {
        let (arch, registry) = amd64();
        let nop = DecodedInstruction::new(pc, len, "NOP");
        let (m, _) = run(&arch, &registry, &[nop], |m| m.set_pc(pc).unwrap());
        prop_assert_eq!(m.pc().unwrap(), pc + u64::from(len));
    }
}
