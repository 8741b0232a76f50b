//! Mapping from lifted IR types to Cranelift IR types.

use cranelift_codegen::ir::types;
use cranelift_codegen::ir::Type as ClifType;
use relift::Type as LiftedType;

use crate::emit::CodegenError;

/// Convert a lifted type to the Cranelift type that carries it.
///
/// Integers and floats need a native width. Pointers, the memory token and
/// the state reference are all pointer-sized.
pub fn lifted_type_to_cl_type(
    ty: &LiftedType,
    pointer_type: ClifType,
) -> Result<ClifType, CodegenError> {
    match ty {
        LiftedType::Int(8) => Ok(types::I8),
        LiftedType::Int(16) => Ok(types::I16),
        LiftedType::Int(32) => Ok(types::I32),
        LiftedType::Int(64) => Ok(types::I64),
        LiftedType::Int(128) => Ok(types::I128),
        LiftedType::Float(32) => Ok(types::F32),
        LiftedType::Float(64) => Ok(types::F64),
        LiftedType::Ptr(_) | LiftedType::Memory | LiftedType::State => Ok(pointer_type),
        other => Err(CodegenError::UnsupportedType(other.to_string())),
    }
}
