//! Turning a module of lowered lifted functions into an object file.
//!
//! The object exports one symbol per lifted function and leaves every
//! semantics implementation and `__relift_*` intrinsic undefined, to be
//! resolved at link time.

use std::path::Path;

use cranelift_object::ObjectModule;
use relift::{Arch, Function};
use thiserror::Error;
use tracing::debug;

use crate::context::CodegenContext;
use crate::lower::lower_functions;

/// Errors raised while re-emitting lifted code.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// The target triple or its ISA flags were rejected.
    #[error("target error: {0}")]
    TargetError(String),

    /// A register or value has a width no native type carries.
    #[error("no native type for `{0}`")]
    UnsupportedType(String),

    /// The lifted function could not be translated, e.g. it is unterminated
    /// or two call sites disagree on an import's signature.
    #[error("lowering error: {0}")]
    LoweringError(String),

    #[error("emission error: {0}")]
    EmissionError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Lower `funcs` into the context's module and return the finished object.
pub fn compile_lifted(
    mut ctx: CodegenContext,
    funcs: &[Function],
    arch: &Arch,
) -> Result<Vec<u8>, CodegenError> {
    let pointer_type = ctx.pointer_type();
    let lowered = lower_functions(&mut ctx.module, funcs, arch, pointer_type)?;
    debug!(
        arch = arch.name(),
        target = %ctx.triple(),
        functions = lowered.len(),
        "lowered lifted functions",
    );
    emit_object(ctx.module)
}

/// Finish the module and return the raw object bytes.
pub fn emit_object(module: ObjectModule) -> Result<Vec<u8>, CodegenError> {
    let bytes = module
        .finish()
        .emit()
        .map_err(|e| CodegenError::EmissionError(format!("object write failed: {e}")))?;
    debug!(bytes = bytes.len(), "emitted relift object");
    Ok(bytes)
}

pub fn emit_to_file(module: ObjectModule, path: &Path) -> Result<(), CodegenError> {
    let bytes = emit_object(module)?;
    std::fs::write(path, &bytes)?;
    debug!(path = %path.display(), "wrote relift object");
    Ok(())
}
