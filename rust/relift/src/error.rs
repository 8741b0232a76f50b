//! Error taxonomy.
//!
//! Lifting has two tiers. An instruction that cannot be resolved to any
//! semantics (not even a placeholder) is reported as `Ok(false)` by the
//! lifter and is *not* an error type. Everything here that comes out of the
//! lifter is a [`LiftFault`]: a broken registry entry or a decoder invariant
//! violation, after which the translation unit must not be trusted.

use thiserror::Error;

use crate::types::Type;

/// Fatal internal-consistency failure while lifting one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot lift `{instruction}` at {address:#x}: {kind}{}", operand_suffix(.operand))]
pub struct LiftFault {
    /// Address of the offending instruction.
    pub address: u64,
    /// Textual serialization of the instruction.
    pub instruction: String,
    /// Textual serialization of the operand involved, if any.
    pub operand: Option<String>,
    pub kind: FaultKind,
}

fn operand_suffix(operand: &Option<String>) -> String {
    match operand {
        Some(op) => format!(" (operand {op})"),
        None => String::new(),
    }
}

/// What exactly was inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultKind {
    #[error("`{implementation}` takes {params} operand(s) but the instruction has {operands}")]
    ArityMismatch {
        implementation: String,
        params: usize,
        operands: usize,
    },

    #[error("lifted operand {index} has type {actual}, expected {expected}")]
    OperandTypeMismatch {
        index: usize,
        expected: Type,
        actual: Type,
    },

    #[error("invalid operand")]
    InvalidOperand,

    #[error("unknown register `{0}`")]
    UnknownRegister(String),

    #[error("operand size {operand} does not match size {register} of register `{name}`")]
    RegisterSizeMismatch {
        name: String,
        operand: u32,
        register: u32,
    },

    #[error("shift register operands cannot be written")]
    ShiftRegisterWrite,

    #[error("shift register operand needs an integer parameter, got {0}")]
    ShiftRegisterParam(Type),

    #[error("cannot extract {extract} bits from a {register}-bit register")]
    ExtractTooWide { extract: u32, register: u32 },

    #[error("shift register source is {source_bits} bits, wider than the {operand}-bit operand")]
    ShiftSourceTooWide { source_bits: u32, operand: u32 },

    #[error("shift amount {amount} is not smaller than the operand width {width}")]
    ShiftTooWide { amount: u32, width: u32 },

    #[error("operand is {operand} bits but the machine word is {word} bits")]
    OperandNotWordSized { operand: u32, word: u32 },

    #[error("integer argument must be machine word sized ({word} bits), got {argument}")]
    ArgumentNotWordSized { argument: Type, word: u32 },

    #[error("register `{register}` of type {register_type} cannot feed a {argument} parameter")]
    NumericDomainMismatch {
        register: String,
        register_type: Type,
        argument: Type,
    },

    #[error("register operand cannot be passed as {0}")]
    UnsupportedParameter(Type),

    #[error("immediate operand of {0} bits is wider than 64 bits")]
    ImmediateTooWide(u32),

    #[error("cannot load through a value of non-pointer type {0}")]
    NotAPointer(Type),

    #[error("immediate operand of {bits} bits cannot be passed as {argument}")]
    ImmediateParameter { bits: u32, argument: Type },

    #[error("memory operand must be passed as the machine word type {word}, got {argument}")]
    AddressParameter { argument: Type, word: Type },

    #[error("address register `{register}` has type {ty}, expected an integer no wider than {word} bits")]
    AddressRegister {
        register: String,
        ty: Type,
        word: u32,
    },

    #[error("cannot convert a value of type {from} to {to}")]
    NotConvertible { from: Type, to: Type },
}

/// Malformed textual type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeParseError {
    #[error("unknown type `{0}`")]
    Unknown(String),
    #[error("zero-width type `{0}`")]
    ZeroWidth(String),
    #[error("integer type `{0}` is wider than 128 bits")]
    TooWide(String),
    #[error("unsupported float width in `{0}`")]
    BadFloatWidth(String),
}

/// Problems building an architecture or registry from a description.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid type: {0}")]
    Type(#[from] TypeParseError),

    #[error("invalid host triple `{0}`")]
    Triple(String),

    #[error("machine word must be 16, 32 or 64 bits, got {0}")]
    WordSize(u32),

    #[error("register `{0}` is defined twice")]
    DuplicateRegister(String),

    #[error("register `{name}` refers to unknown parent `{parent}`")]
    UnknownParent { name: String, parent: String },

    #[error("register `{name}` does not fit inside its parent `{parent}`")]
    SubRegisterOutOfBounds { name: String, parent: String },

    #[error("register `{0}` must be an integer or float")]
    RegisterType(String),

    #[error("register `{name}` is {bits} bits wide, at most 128 are supported")]
    RegisterTooWide { name: String, bits: u32 },

    #[error("program counter register `{0}` is not defined")]
    UnknownPc(String),

    #[error("program counter register `{name}` has type {ty}, expected the machine word")]
    PcType { name: String, ty: Type },

    #[error("semantics variant `{0}` is defined twice")]
    DuplicateSemantics(String),
}
