//! Architecture descriptions in TOML.
//!
//! One file describes a register file and the semantics registered for it:
//!
//! ```toml
//! [arch]
//! name = "amd64"
//! word_bits = 64
//! pc = "RIP"
//!
//! [[registers]]
//! name = "RAX"
//! type = "i64"
//!
//! [[registers]]
//! name = "EAX"
//! type = "i32"
//! parent = "RAX"
//!
//! [semantics.MOV_GPRv_IMMz_32]
//! implementation = "MOV"
//! params = ["i32*", "i64"]
//!
//! [[families]]
//! name = "INC_GPRv"
//! implementation = "INC"
//! widths = "all"
//! params = ["i{bits}*"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use target_lexicon::Triple;
use tracing::debug;

use crate::arch::{Arch, HostCapabilities};
use crate::error::ConfigError;
use crate::registry::{Param, RegistryBuilder, SemanticsRegistry, Signature};
use crate::types::Type;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchConfig {
    pub arch: ArchSection,
    #[serde(default)]
    pub registers: Vec<RegisterSpec>,
    /// Variant name -> implementation.
    #[serde(default)]
    pub semantics: BTreeMap<String, SemanticsSpec>,
    /// Width-templated groups of variants.
    #[serde(default)]
    pub families: Vec<FamilySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchSection {
    pub name: String,
    pub word_bits: u32,
    #[serde(default = "default_pc")]
    pub pc: String,
    /// Target triple the semantics were compiled for. Defaults to the
    /// machine running the lifter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

fn default_pc() -> String {
    "PC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Byte offset inside `parent`.
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticsSpec {
    /// Defaults to the variant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec {
    /// `"i64"`
    Type(String),
    /// `{ type = "i64", intended = "i64*" }`
    Detailed {
        #[serde(rename = "type")]
        ty: String,
        intended: String,
    },
}

/// Which widths a family expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Widths {
    /// 8, 16, 32 and 64 bits.
    All,
    /// The machine word only.
    Word,
}

/// `NAME_<bits>` bound to `IMPLEMENTATION_<bits>`; `{bits}` in a parameter
/// type is replaced by the width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilySpec {
    pub name: String,
    pub implementation: String,
    pub widths: Widths,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl FromStr for ArchConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

impl ArchConfig {
    /// Load a description from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = content.parse()?;
        debug!(path = %path.display(), "loaded architecture description");
        Ok(config)
    }

    pub fn host(&self) -> Result<HostCapabilities, ConfigError> {
        match &self.arch.host {
            Some(triple) => {
                let triple =
                    Triple::from_str(triple).map_err(|_| ConfigError::Triple(triple.clone()))?;
                Ok(HostCapabilities::for_triple(&triple))
            }
            None => Ok(HostCapabilities::host()),
        }
    }

    pub fn build_arch(&self) -> Result<Arch, ConfigError> {
        let mut builder = Arch::builder(&self.arch.name, self.arch.word_bits)
            .pc(&self.arch.pc)
            .host(self.host()?);
        for reg in &self.registers {
            let ty: Type = reg.ty.parse()?;
            builder = match &reg.parent {
                Some(parent) => builder.sub_register(&reg.name, ty, parent, reg.offset),
                None => builder.register(&reg.name, ty),
            };
        }
        builder.build()
    }

    pub fn build_registry(&self) -> Result<SemanticsRegistry, ConfigError> {
        if !matches!(self.arch.word_bits, 16 | 32 | 64) {
            return Err(ConfigError::WordSize(self.arch.word_bits));
        }
        let mut builder = SemanticsRegistry::builder(self.arch.word_bits);
        for (name, spec) in &self.semantics {
            let implementation = spec.implementation.as_deref().unwrap_or(name);
            let signature = signature(&spec.params, None)?;
            builder.define(name, implementation, signature)?;
        }
        for family in &self.families {
            define_family(&mut builder, family)?;
        }
        let registry = builder.build();
        debug!(
            arch = %self.arch.name,
            variants = registry.len(),
            "built semantics registry",
        );
        Ok(registry)
    }

    pub fn build(&self) -> Result<(Arch, SemanticsRegistry), ConfigError> {
        Ok((self.build_arch()?, self.build_registry()?))
    }
}

fn define_family(builder: &mut RegistryBuilder, family: &FamilySpec) -> Result<(), ConfigError> {
    let lookup = |bits: u32| signature(&family.params, Some(bits));
    match family.widths {
        Widths::All => builder.isel_all(&family.name, &family.implementation, lookup)?,
        Widths::Word => builder.isel_word(&family.name, &family.implementation, lookup)?,
    };
    Ok(())
}

fn signature(params: &[ParamSpec], bits: Option<u32>) -> Result<Signature, ConfigError> {
    let ty = |s: &str| -> Result<Type, ConfigError> {
        let s = match bits {
            Some(bits) => s.replace("{bits}", &bits.to_string()),
            None => s.to_string(),
        };
        Ok(s.parse()?)
    };
    let params = params
        .iter()
        .map(|p| match p {
            ParamSpec::Type(t) => Ok(Param::new(ty(t)?)),
            ParamSpec::Detailed { ty: t, intended } => Ok(Param::with_intended(ty(t)?, ty(intended)?)),
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    Ok(Signature { params })
}
