//! Compilation context: ISA lookup, module creation, and settings.

use std::sync::Arc;

use cranelift_codegen::isa::{self, TargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_object::{ObjectBuilder, ObjectModule};
use target_lexicon::Triple;

use relift::HostCapabilities;

use crate::emit::CodegenError;

/// Cranelift state for one object file.
pub struct CodegenContext {
    pub isa: Arc<dyn TargetIsa>,
    pub module: ObjectModule,
    triple: Triple,
}

impl CodegenContext {
    /// Context targeting the host platform.
    pub fn new() -> Result<Self, CodegenError> {
        Self::new_with_triple(Triple::host())
    }

    /// Context for cross-compilation to the given target triple string.
    pub fn new_with_target(triple_str: &str) -> Result<Self, CodegenError> {
        let triple: Triple = triple_str
            .parse()
            .map_err(|e| CodegenError::TargetError(format!("invalid target triple: {e}")))?;
        Self::new_with_triple(triple)
    }

    fn new_with_triple(triple: Triple) -> Result<Self, CodegenError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| CodegenError::TargetError(format!("failed to set opt_level: {e}")))?;
        flag_builder
            .set("is_pic", "true")
            .map_err(|e| CodegenError::TargetError(format!("failed to set is_pic: {e}")))?;

        let isa_builder = isa::lookup(triple.clone())
            .map_err(|e| CodegenError::TargetError(format!("unsupported target {triple}: {e}")))?;

        let flags = settings::Flags::new(flag_builder);
        let isa = isa_builder
            .finish(flags)
            .map_err(|e| CodegenError::TargetError(format!("failed to build ISA: {e}")))?;

        let obj_builder = ObjectBuilder::new(
            isa.clone(),
            "relift_module",
            cranelift_module::default_libcall_names(),
        )
        .map_err(|e| CodegenError::TargetError(format!("failed to create ObjectBuilder: {e}")))?;

        let module = ObjectModule::new(obj_builder);

        Ok(Self {
            isa,
            module,
            triple,
        })
    }

    pub fn triple(&self) -> &Triple {
        &self.triple
    }

    /// Pointer type of the target (e.g. I64 on 64-bit).
    pub fn pointer_type(&self) -> cranelift_codegen::ir::Type {
        self.isa.pointer_type()
    }

    /// Calling-convention capabilities the lifter should assume when the
    /// lifted code is compiled for this target.
    pub fn host_capabilities(&self) -> HostCapabilities {
        HostCapabilities::for_triple(&self.triple)
    }
}
