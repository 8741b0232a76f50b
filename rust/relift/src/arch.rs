//! Architecture description: register file layout and machine word.
//!
//! Registers live at byte offsets inside an opaque state structure. A
//! sub-register (`EAX` inside `RAX`, `AH` at byte 1 of `RAX`) shares its
//! parent's storage, so writes through one are visible through the other.

use std::collections::HashMap;

use target_lexicon::{Architecture, Triple};

use crate::error::ConfigError;
use crate::types::Type;

/// Facts about the machine the lifted code's semantics were compiled for
/// that change how parameters are passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostCapabilities {
    /// Semantics compiled for this host receive pointer wrapper arguments
    /// (register write operands, vector references) as plain integers. The
    /// parameter's intended pointer type must be consulted instead of its
    /// ABI type.
    pub integer_pointer_params: bool,
}

impl HostCapabilities {
    pub fn for_triple(triple: &Triple) -> Self {
        Self {
            integer_pointer_params: matches!(triple.architecture, Architecture::Aarch64(_)),
        }
    }

    /// Capabilities of the machine this process runs on.
    pub fn host() -> Self {
        Self::for_triple(&Triple::host())
    }
}

/// One register slot in the machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInfo {
    pub name: String,
    pub ty: Type,
    /// Byte offset inside the state structure.
    pub offset: u64,
    /// Name of the register this one aliases, if it is a sub-register.
    pub parent: Option<String>,
}

impl RegisterInfo {
    /// Width in bits.
    pub fn bits(&self) -> u32 {
        self.ty.scalar_bits().unwrap_or(0)
    }
}

/// A built, validated architecture.
#[derive(Debug, Clone)]
pub struct Arch {
    name: String,
    word_bits: u32,
    pc: String,
    registers: Vec<RegisterInfo>,
    index: HashMap<String, usize>,
    state_size: u64,
    host: HostCapabilities,
}

impl Arch {
    pub fn builder(name: impl Into<String>, word_bits: u32) -> ArchBuilder {
        ArchBuilder {
            name: name.into(),
            word_bits,
            pc: None,
            registers: Vec::new(),
            host: HostCapabilities::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn word_bits(&self) -> u32 {
        self.word_bits
    }

    /// The machine word as an IR type.
    pub fn word_type(&self) -> Type {
        Type::Int(self.word_bits)
    }

    /// Name of the program counter register.
    pub fn pc_register(&self) -> &str {
        &self.pc
    }

    pub fn register(&self, name: &str) -> Option<&RegisterInfo> {
        self.index.get(name).map(|&i| &self.registers[i])
    }

    pub fn registers(&self) -> &[RegisterInfo] {
        &self.registers
    }

    /// Total size of the state structure in bytes.
    pub fn state_size(&self) -> u64 {
        self.state_size
    }

    pub fn host(&self) -> HostCapabilities {
        self.host
    }
}

enum PendingRegister {
    Top { name: String, ty: Type },
    Sub { name: String, ty: Type, parent: String, byte_offset: u64 },
}

/// Incrementally describes an architecture; `build` validates it.
pub struct ArchBuilder {
    name: String,
    word_bits: u32,
    pc: Option<String>,
    registers: Vec<PendingRegister>,
    host: HostCapabilities,
}

impl ArchBuilder {
    /// A register with its own storage.
    pub fn register(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.registers.push(PendingRegister::Top {
            name: name.into(),
            ty,
        });
        self
    }

    /// A register aliasing `byte_offset` bytes into `parent`.
    pub fn sub_register(
        mut self,
        name: impl Into<String>,
        ty: Type,
        parent: impl Into<String>,
        byte_offset: u64,
    ) -> Self {
        self.registers.push(PendingRegister::Sub {
            name: name.into(),
            ty,
            parent: parent.into(),
            byte_offset,
        });
        self
    }

    pub fn pc(mut self, name: impl Into<String>) -> Self {
        self.pc = Some(name.into());
        self
    }

    pub fn host(mut self, host: HostCapabilities) -> Self {
        self.host = host;
        self
    }

    pub fn build(self) -> Result<Arch, ConfigError> {
        if !matches!(self.word_bits, 16 | 32 | 64) {
            return Err(ConfigError::WordSize(self.word_bits));
        }

        let mut registers: Vec<RegisterInfo> = Vec::with_capacity(self.registers.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut next_offset = 0u64;

        for pending in self.registers {
            let info = match pending {
                PendingRegister::Top { name, ty } => {
                    check_register_type(&name, &ty)?;
                    let size = ty.byte_size(self.word_bits);
                    let align = size.next_power_of_two().min(16);
                    let offset = next_offset.next_multiple_of(align);
                    next_offset = offset + size;
                    RegisterInfo {
                        name,
                        ty,
                        offset,
                        parent: None,
                    }
                }
                PendingRegister::Sub {
                    name,
                    ty,
                    parent,
                    byte_offset,
                } => {
                    check_register_type(&name, &ty)?;
                    let Some(&pi) = index.get(&parent) else {
                        return Err(ConfigError::UnknownParent { name, parent });
                    };
                    let parent_info = &registers[pi];
                    let parent_size = parent_info.ty.byte_size(self.word_bits);
                    if byte_offset + ty.byte_size(self.word_bits) > parent_size {
                        return Err(ConfigError::SubRegisterOutOfBounds { name, parent });
                    }
                    RegisterInfo {
                        name,
                        ty,
                        offset: parent_info.offset + byte_offset,
                        parent: Some(parent),
                    }
                }
            };
            if index.contains_key(&info.name) {
                return Err(ConfigError::DuplicateRegister(info.name));
            }
            index.insert(info.name.clone(), registers.len());
            registers.push(info);
        }

        let pc = self.pc.unwrap_or_else(|| "PC".to_string());
        let Some(&pci) = index.get(&pc) else {
            return Err(ConfigError::UnknownPc(pc));
        };
        if !registers[pci].ty.is_int_of(self.word_bits) {
            return Err(ConfigError::PcType {
                name: pc,
                ty: registers[pci].ty.clone(),
            });
        }

        Ok(Arch {
            name: self.name,
            word_bits: self.word_bits,
            pc,
            registers,
            index,
            state_size: next_offset.next_multiple_of(16),
            host: self.host,
        })
    }
}

fn check_register_type(name: &str, ty: &Type) -> Result<(), ConfigError> {
    match ty {
        Type::Int(bits) | Type::Float(bits) if *bits > 128 => Err(ConfigError::RegisterTooWide {
            name: name.to_string(),
            bits: *bits,
        }),
        Type::Int(_) | Type::Float(_) => Ok(()),
        _ => Err(ConfigError::RegisterType(name.to_string())),
    }
}
