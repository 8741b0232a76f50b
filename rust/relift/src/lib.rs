//! Relift: lifts decoded machine instructions into calls against an
//! abstract machine state.
//!
//! Each instruction becomes one call to the semantics implementation
//! registered for its variant, with every operand materialized into a value
//! of exactly the parameter type the implementation declares.

pub mod arch;
pub mod coerce;
pub mod config;
pub mod error;
pub mod instruction;
pub mod interp;
pub mod ir;
pub mod lifter;
pub mod numeric;
pub mod operand;
pub mod registry;
pub mod types;

pub use arch::{Arch, HostCapabilities};
pub use config::ArchConfig;
pub use error::{ConfigError, FaultKind, LiftFault};
pub use instruction::{DecodedInstruction, Operand};
pub use ir::{Builder, Function};
pub use lifter::{InstructionLifter, LiftOutcome, LiftStats};
pub use registry::{SemanticsRegistry, Signature, INVALID_INSTRUCTION, UNSUPPORTED_INSTRUCTION};
pub use types::Type;
