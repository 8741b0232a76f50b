//! Semantics registry: variant name -> implementation + signature.
//!
//! The registry is built once per architecture and then only read. Every
//! semantics call has an implicit prefix (memory token, state reference)
//! that is not part of [`Signature`]; the signature lists one parameter per
//! operand of the variant, in operand order.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::ConfigError;
use crate::instruction::DecodedInstruction;
use crate::types::Type;

/// Placeholder for bytes that failed to decode.
pub const INVALID_INSTRUCTION: &str = "INVALID_INSTRUCTION";

/// Placeholder for decoded instructions with no registered semantics.
pub const UNSUPPORTED_INSTRUCTION: &str = "UNSUPPORTED_INSTRUCTION";

/// One operand parameter of a semantics implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Type at the call boundary.
    pub ty: Type,
    /// Pointer type the implementation converts an integer `ty` back into.
    /// Only consulted on hosts that pass pointer wrappers as integers.
    pub intended: Option<Type>,
}

impl Param {
    pub fn new(ty: Type) -> Self {
        Self { ty, intended: None }
    }

    pub fn with_intended(ty: Type, intended: Type) -> Self {
        Self {
            ty,
            intended: Some(intended),
        }
    }
}

impl From<Type> for Param {
    fn from(ty: Type) -> Self {
        Param::new(ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub params: Vec<Param>,
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = impl Into<Param>>) -> Self {
        Self {
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Binding of a variant name to the implementation that encodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticsEntry {
    /// Variant name, e.g. `ADD_GPRv_GPRv_32`.
    pub name: String,
    /// Symbol of the implementation. Several variants may share one.
    pub implementation: String,
    pub signature: Signature,
}

/// Outcome of looking up the semantics for an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'r> {
    /// The instruction's own variant.
    Exact(&'r SemanticsEntry),
    /// The decode-failure placeholder. Operands are dropped.
    Invalid(&'r SemanticsEntry),
    /// The unsupported-instruction placeholder. Operands are dropped.
    Unsupported(&'r SemanticsEntry),
    /// Nothing usable is registered, not even the named placeholder.
    Unresolved { fallback: &'static str },
}

impl<'r> Resolution<'r> {
    pub fn entry(&self) -> Option<&'r SemanticsEntry> {
        match *self {
            Resolution::Exact(e) | Resolution::Invalid(e) | Resolution::Unsupported(e) => Some(e),
            Resolution::Unresolved { .. } => None,
        }
    }

    /// `true` if the instruction's operands are passed to the implementation.
    pub fn keeps_operands(&self) -> bool {
        matches!(self, Resolution::Exact(_))
    }
}

/// Frozen, read-only registry.
#[derive(Debug, Clone, Default)]
pub struct SemanticsRegistry {
    entries: HashMap<String, Arc<SemanticsEntry>>,
}

impl SemanticsRegistry {
    pub fn builder(word_bits: u32) -> RegistryBuilder {
        RegistryBuilder {
            word_bits,
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SemanticsEntry> {
        self.entries.get(name).map(|e| e.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Pick the implementation for `inst`: its own variant when it decoded
    /// and is registered, otherwise the matching placeholder.
    pub fn resolve(&self, inst: &DecodedInstruction) -> Resolution<'_> {
        if !inst.is_valid {
            debug!(pc = format_args!("{:#x}", inst.pc), "cannot decode instruction bytes");
            return match self.get(INVALID_INSTRUCTION) {
                Some(entry) => Resolution::Invalid(entry),
                None => {
                    error!("{INVALID_INSTRUCTION} is not registered");
                    Resolution::Unresolved {
                        fallback: INVALID_INSTRUCTION,
                    }
                }
            };
        }

        if let Some(entry) = self.get(&inst.function) {
            return Resolution::Exact(entry);
        }

        warn!(
            pc = format_args!("{:#x}", inst.pc),
            function = %inst.function,
            instruction = %inst,
            "no semantics registered for instruction",
        );
        match self.get(UNSUPPORTED_INSTRUCTION) {
            Some(entry) => Resolution::Unsupported(entry),
            None => {
                error!(
                    function = %inst.function,
                    "{UNSUPPORTED_INSTRUCTION} is not registered; cannot stand in for the instruction",
                );
                Resolution::Unresolved {
                    fallback: UNSUPPORTED_INSTRUCTION,
                }
            }
        }
    }
}

/// Populates a registry. Consumed by [`RegistryBuilder::build`].
#[derive(Debug)]
pub struct RegistryBuilder {
    word_bits: u32,
    entries: HashMap<String, Arc<SemanticsEntry>>,
}

impl RegistryBuilder {
    /// Register one variant.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        implementation: impl Into<String>,
        signature: Signature,
    ) -> Result<&mut Self, ConfigError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(ConfigError::DuplicateSemantics(name));
        }
        let entry = SemanticsEntry {
            name: name.clone(),
            implementation: implementation.into(),
            signature,
        };
        self.entries.insert(name, Arc::new(entry));
        Ok(self)
    }

    /// Register `NAME_8`, `NAME_16`, `NAME_32` and `NAME_64`, each bound to
    /// `implementation_<bits>` with the signature `signature(bits)` produces.
    pub fn isel_all(
        &mut self,
        name: &str,
        implementation: &str,
        signature: impl Fn(u32) -> Result<Signature, ConfigError>,
    ) -> Result<&mut Self, ConfigError> {
        for bits in [8, 16, 32, 64] {
            self.define(
                format!("{name}_{bits}"),
                format!("{implementation}_{bits}"),
                signature(bits)?,
            )?;
        }
        Ok(self)
    }

    /// Register only the machine-word variant (`NAME_16`, `NAME_32` or
    /// `NAME_64`).
    pub fn isel_word(
        &mut self,
        name: &str,
        implementation: &str,
        signature: impl Fn(u32) -> Result<Signature, ConfigError>,
    ) -> Result<&mut Self, ConfigError> {
        let bits = self.word_bits;
        if !matches!(bits, 16 | 32 | 64) {
            return Err(ConfigError::WordSize(bits));
        }
        self.define(
            format!("{name}_{bits}"),
            format!("{implementation}_{bits}"),
            signature(bits)?,
        )
    }

    pub fn build(self) -> SemanticsRegistry {
        SemanticsRegistry {
            entries: self.entries,
        }
    }
}
