//! Native re-emission of lifted functions via Cranelift.
//!
//! Lowers [`relift::Function`]s to machine code in an object file. Semantics
//! implementations and runtime intrinsics become imported symbols, so the
//! object links against whatever library provides them.

pub mod context;
pub mod emit;
pub mod lower;
pub mod types;

pub use context::CodegenContext;
pub use emit::{compile_lifted, emit_object, emit_to_file, CodegenError};
pub use lower::{intrinsic_symbol, lower_function, lower_functions, LoweredFunction};
