//! Decoded instruction records.
//!
//! These are produced by an external decoder and consumed read-only by the
//! lifter. The textual form produced by `Display` is an s-expression that
//! shows up in fault diagnostics; the serde form is for decoders that hand
//! records over as JSON or similar.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::Display as StrumDisplay;

/// A named architectural register as seen by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    /// Width in bits.
    pub size: u32,
}

impl Register {
    pub fn new(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(REG_{} {})", self.size, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[strum(serialize = "READ_OP")]
    Read,
    #[strum(serialize = "WRITE_OP")]
    Write,
}

/// How an extracted shift-register value is widened.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, StrumDisplay,
)]
#[serde(rename_all = "snake_case")]
pub enum ExtendOp {
    #[default]
    #[strum(serialize = "NOEXT")]
    None,
    #[strum(serialize = "SEXT")]
    Signed,
    #[strum(serialize = "ZEXT")]
    Unsigned,
}

/// Shift applied to a shift-register operand after extension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, StrumDisplay,
)]
#[serde(rename_all = "snake_case")]
pub enum ShiftOp {
    #[default]
    #[strum(serialize = "NOSHIFT")]
    None,
    /// `x << s`
    #[strum(serialize = "LSL")]
    LeftWithZeroes,
    /// `(x << s) | ((1 << s) - 1)`
    #[strum(serialize = "MSL")]
    LeftWithOnes,
    /// Logical shift right.
    #[strum(serialize = "LSR")]
    UnsignedRight,
    /// Arithmetic shift right.
    #[strum(serialize = "ASR")]
    SignedRight,
    #[strum(serialize = "ROL")]
    LeftAround,
    #[strum(serialize = "ROR")]
    RightAround,
}

/// A register that is extracted, extended and shifted before use, as in
/// `add x0, x1, w2, sxtw #2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftRegister {
    pub reg: Register,
    /// Number of low bits taken from `reg` before extension.
    #[serde(default)]
    pub extract_size: Option<u32>,
    #[serde(default)]
    pub extend_op: ExtendOp,
    #[serde(default)]
    pub shift_op: ShiftOp,
    #[serde(default)]
    pub shift_size: u32,
}

impl ShiftRegister {
    pub fn new(reg: Register) -> Self {
        Self {
            reg,
            extract_size: None,
            extend_op: ExtendOp::None,
            shift_op: ShiftOp::None,
            shift_size: 0,
        }
    }

    pub fn extract(mut self, bits: u32, extend_op: ExtendOp) -> Self {
        self.extract_size = Some(bits);
        self.extend_op = extend_op;
        self
    }

    pub fn shift(mut self, shift_op: ShiftOp, amount: u32) -> Self {
        self.shift_op = shift_op;
        self.shift_size = amount;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immediate {
    /// Raw 64-bit encoding. Signed immediates are stored sign-extended.
    pub value: u64,
    pub is_signed: bool,
}

/// A memory operand: `segment_base + base + index * scale + displacement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub base_reg: Option<Register>,
    #[serde(default)]
    pub index_reg: Option<Register>,
    #[serde(default = "default_scale")]
    pub scale: i64,
    #[serde(default)]
    pub displacement: i64,
    #[serde(default)]
    pub segment_base_reg: Option<Register>,
    /// Width of the effective address in bits.
    pub address_size: u32,
}

fn default_scale() -> i64 {
    1
}

impl Address {
    pub fn new(address_size: u32) -> Self {
        Self {
            base_reg: None,
            index_reg: None,
            scale: 1,
            displacement: 0,
            segment_base_reg: None,
            address_size,
        }
    }

    pub fn base(mut self, reg: Register) -> Self {
        self.base_reg = Some(reg);
        self
    }

    pub fn index(mut self, reg: Register, scale: i64) -> Self {
        self.index_reg = Some(reg);
        self.scale = scale;
        self
    }

    pub fn displacement(mut self, displacement: i64) -> Self {
        self.displacement = displacement;
        self
    }

    pub fn segment(mut self, reg: Register) -> Self {
        self.segment_base_reg = Some(reg);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperandKind {
    Register(Register),
    ShiftRegister(ShiftRegister),
    Immediate(Immediate),
    Address(Address),
    /// Placeholder left behind by a decoder that could not classify an operand.
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    /// Width in bits.
    pub size: u32,
    pub action: Action,
    pub kind: OperandKind,
}

impl Operand {
    pub fn register(reg: Register, action: Action) -> Self {
        Self {
            size: reg.size,
            action,
            kind: OperandKind::Register(reg),
        }
    }

    pub fn shift_register(size: u32, shift: ShiftRegister) -> Self {
        Self {
            size,
            action: Action::Read,
            kind: OperandKind::ShiftRegister(shift),
        }
    }

    pub fn immediate(size: u32, value: u64) -> Self {
        Self {
            size,
            action: Action::Read,
            kind: OperandKind::Immediate(Immediate {
                value,
                is_signed: false,
            }),
        }
    }

    pub fn signed_immediate(size: u32, value: i64) -> Self {
        Self {
            size,
            action: Action::Read,
            kind: OperandKind::Immediate(Immediate {
                value: value as u64,
                is_signed: true,
            }),
        }
    }

    /// An address operand; `size` is the width of the accessed value.
    pub fn address(size: u32, address: Address, action: Action) -> Self {
        Self {
            size,
            action,
            kind: OperandKind::Address(address),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} ", self.action)?;
        match &self.kind {
            OperandKind::Register(reg) => write!(f, "{reg}")?,
            OperandKind::ShiftRegister(sr) => {
                write!(f, "(SHIFT_{} {}", self.size, sr.reg)?;
                if let Some(bits) = sr.extract_size {
                    write!(f, " (EXTRACT {bits})")?;
                }
                if sr.extend_op != ExtendOp::None {
                    write!(f, " ({})", sr.extend_op)?;
                }
                if sr.shift_op != ShiftOp::None {
                    write!(f, " ({} {})", sr.shift_op, sr.shift_size)?;
                }
                write!(f, ")")?;
            }
            OperandKind::Immediate(imm) if imm.is_signed => {
                write!(f, "(SIMM_{} {})", self.size, imm.value as i64)?
            }
            OperandKind::Immediate(imm) => write!(f, "(IMM_{} {:#x})", self.size, imm.value)?,
            OperandKind::Address(addr) => {
                write!(f, "(ADDR_{} (SIZE {})", self.size, addr.address_size)?;
                if let Some(seg) = &addr.segment_base_reg {
                    write!(f, " (SEGMENT {seg})")?;
                }
                if let Some(base) = &addr.base_reg {
                    write!(f, " (BASE {base})")?;
                }
                if let Some(index) = &addr.index_reg {
                    write!(f, " (INDEX {index}) (SCALE {})", addr.scale)?;
                }
                if addr.displacement != 0 {
                    write!(f, " (DISP {})", addr.displacement)?;
                }
                write!(f, ")")?;
            }
            OperandKind::Invalid => write!(f, "(INVALID)")?,
        }
        write!(f, ")")
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInstruction {
    /// Address of the first byte.
    pub pc: u64,
    /// Encoded length in bytes.
    pub num_bytes: u32,
    /// Name of the semantics variant, e.g. `ADD_GPRv_IMMz_32`.
    pub function: String,
    #[serde(default)]
    pub operands: Vec<Operand>,
    #[serde(default = "default_valid")]
    pub is_valid: bool,
    #[serde(default)]
    pub is_atomic_read_modify_write: bool,
}

fn default_valid() -> bool {
    true
}

impl DecodedInstruction {
    pub fn new(pc: u64, num_bytes: u32, function: impl Into<String>) -> Self {
        Self {
            pc,
            num_bytes,
            function: function.into(),
            operands: Vec::new(),
            is_valid: true,
            is_atomic_read_modify_write: false,
        }
    }

    /// A record for bytes the decoder could not make sense of.
    pub fn invalid(pc: u64, num_bytes: u32) -> Self {
        Self {
            is_valid: false,
            ..Self::new(pc, num_bytes, "")
        }
    }

    pub fn with_operand(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn atomic(mut self) -> Self {
        self.is_atomic_read_modify_write = true;
        self
    }

    /// Address of the next sequential instruction.
    pub fn next_pc(&self) -> u64 {
        self.pc.wrapping_add(u64::from(self.num_bytes))
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid {
            return write!(f, "(INVALID {:#x} {})", self.pc, self.num_bytes);
        }
        write!(f, "({} {:#x} {}", self.function, self.pc, self.num_bytes)?;
        if self.is_atomic_read_modify_write {
            write!(f, " ATOMIC")?;
        }
        for op in &self.operands {
            write!(f, " {op}")?;
        }
        write!(f, ")")
    }
}
