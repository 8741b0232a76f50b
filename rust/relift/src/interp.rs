//! Reference interpreter for lifted functions.
//!
//! Executes a [`Function`] against a byte image of the machine state.
//! Semantics calls dispatch to handlers registered by name; every call and
//! atomic bracket is recorded together with the memory tokens it consumed
//! and produced, so the token threading can be checked after a run.

use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use crate::arch::Arch;
use crate::ir::{BinaryOp, CastOp, EntryValue, Function, Intrinsic, Op, Value, ValueDef};
use crate::numeric::{ashr, lshr, shl, sign_extend, truncate};
use crate::types::Type;

/// Address the state image is mapped at when a pointer into it is
/// converted to an integer.
pub const DEFAULT_STATE_BASE: u64 = 0x7000_0000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterpError {
    #[error("value %v{0} is used before it is defined")]
    Undefined(usize),
    #[error("expected {expected}, got {actual:?}")]
    Unexpected { expected: &'static str, actual: Val },
    #[error("type {0} cannot be stored in the state image")]
    UnsupportedType(Type),
    #[error("access of {len} byte(s) at offset {offset} is outside the state image")]
    OutOfBounds { offset: u64, len: u64 },
    #[error("unknown register `{0}`")]
    UnknownRegister(String),
    #[error("address {0:#x} is not inside the state image")]
    BadAddress(u64),
    #[error("{0} fell off its end without a terminator")]
    Unterminated(String),
    #[error("semantics handler for `{implementation}` failed: {message}")]
    Handler {
        implementation: String,
        message: String,
    },
}

/// Storage a pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place {
    /// Byte offset into the state image.
    State(u64),
    /// The function's memory-token slot.
    MemorySlot,
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Int { bits: u32, value: u128 },
    Float { bits: u32, value: f64 },
    Ptr { place: Place, pointee: Type },
    Memory(u64),
}

impl Val {
    pub fn int(bits: u32, value: u128) -> Self {
        Val::Int {
            bits,
            value: truncate(value, bits),
        }
    }

    pub fn as_int(&self) -> Result<u128, InterpError> {
        match self {
            Val::Int { value, .. } => Ok(*value),
            other => Err(InterpError::Unexpected {
                expected: "an integer",
                actual: other.clone(),
            }),
        }
    }

    pub fn as_memory(&self) -> Result<u64, InterpError> {
        match self {
            Val::Memory(token) => Ok(*token),
            other => Err(InterpError::Unexpected {
                expected: "a memory token",
                actual: other.clone(),
            }),
        }
    }
}

/// Something observable that happened during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Call {
        implementation: String,
        memory_in: u64,
        memory_out: u64,
        args: Vec<Val>,
    },
    AtomicBegin { memory_in: u64, memory_out: u64 },
    AtomicEnd { memory_in: u64, memory_out: u64 },
}

/// Machine state a lifted function runs against.
#[derive(Debug, Clone)]
pub struct Machine {
    state: Vec<u8>,
    registers: HashMap<String, (u64, Type)>,
    pc: String,
    state_base: u64,
    next_token: u64,
    memory_slot: Option<u64>,
    events: Vec<Event>,
}

impl Machine {
    pub fn new(arch: &Arch) -> Self {
        Self {
            state: vec![0; arch.state_size() as usize],
            registers: arch
                .registers()
                .iter()
                .map(|r| (r.name.clone(), (r.offset, r.ty.clone())))
                .collect(),
            pc: arch.pc_register().to_string(),
            state_base: DEFAULT_STATE_BASE,
            next_token: 1,
            memory_slot: None,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn state_base(&self) -> u64 {
        self.state_base
    }

    pub fn pc(&self) -> Result<u64, InterpError> {
        let pc = self.pc.clone();
        Ok(self.int(&pc)? as u64)
    }

    pub fn set_pc(&mut self, value: u64) -> Result<(), InterpError> {
        let pc = self.pc.clone();
        self.set_int(&pc, u128::from(value))
    }

    pub fn int(&self, name: &str) -> Result<u128, InterpError> {
        let (offset, ty) = self.register(name)?;
        self.read(offset, &ty)?.as_int()
    }

    pub fn set_int(&mut self, name: &str, value: u128) -> Result<(), InterpError> {
        let (offset, ty) = self.register(name)?;
        let bits = ty.scalar_bits().unwrap_or(0);
        self.write(offset, &Val::int(bits, value))
    }

    pub fn float(&self, name: &str) -> Result<f64, InterpError> {
        let (offset, ty) = self.register(name)?;
        match self.read(offset, &ty)? {
            Val::Float { value, .. } => Ok(value),
            other => Err(InterpError::Unexpected {
                expected: "a float",
                actual: other,
            }),
        }
    }

    pub fn set_float(&mut self, name: &str, value: f64) -> Result<(), InterpError> {
        let (offset, ty) = self.register(name)?;
        let bits = ty.scalar_bits().unwrap_or(0);
        self.write(offset, &Val::Float { bits, value })
    }

    /// Pointer to a register's storage, as a semantics handler would get it.
    pub fn register_pointer(&self, name: &str) -> Result<Val, InterpError> {
        let (offset, ty) = self.register(name)?;
        Ok(Val::Ptr {
            place: Place::State(offset),
            pointee: ty,
        })
    }

    /// Recover a state pointer from its integer form.
    pub fn pointer_from_int(&self, address: u64, pointee: Type) -> Result<Val, InterpError> {
        let offset = address
            .checked_sub(self.state_base)
            .filter(|&o| o < self.state.len() as u64)
            .ok_or(InterpError::BadAddress(address))?;
        Ok(Val::Ptr {
            place: Place::State(offset),
            pointee,
        })
    }

    /// Value behind a pointer.
    pub fn load(&self, ptr: &Val) -> Result<Val, InterpError> {
        match ptr {
            Val::Ptr {
                place: Place::State(offset),
                pointee,
            } => self.read(*offset, pointee),
            Val::Ptr {
                place: Place::MemorySlot,
                ..
            } => Ok(Val::Memory(self.memory_slot.unwrap_or(0))),
            other => Err(InterpError::Unexpected {
                expected: "a pointer",
                actual: other.clone(),
            }),
        }
    }

    /// Write through a pointer. Integers are resized to the pointee width.
    pub fn store(&mut self, ptr: &Val, value: &Val) -> Result<(), InterpError> {
        match ptr {
            Val::Ptr {
                place: Place::State(offset),
                pointee,
            } => {
                let value = match (pointee, value) {
                    (Type::Int(bits), Val::Int { value, .. }) => Val::int(*bits, *value),
                    _ => value.clone(),
                };
                self.write(*offset, &value)
            }
            Val::Ptr {
                place: Place::MemorySlot,
                ..
            } => {
                self.memory_slot = Some(value.as_memory()?);
                Ok(())
            }
            other => Err(InterpError::Unexpected {
                expected: "a pointer",
                actual: other.clone(),
            }),
        }
    }

    fn register(&self, name: &str) -> Result<(u64, Type), InterpError> {
        self.registers
            .get(name)
            .cloned()
            .ok_or_else(|| InterpError::UnknownRegister(name.to_string()))
    }

    fn bytes(&self, offset: u64, len: u64) -> Result<&[u8], InterpError> {
        let start = offset as usize;
        let end = start + len as usize;
        self.state
            .get(start..end)
            .ok_or(InterpError::OutOfBounds { offset, len })
    }

    fn bytes_mut(&mut self, offset: u64, len: u64) -> Result<&mut [u8], InterpError> {
        let start = offset as usize;
        let end = start + len as usize;
        self.state
            .get_mut(start..end)
            .ok_or(InterpError::OutOfBounds { offset, len })
    }

    fn read(&self, offset: u64, ty: &Type) -> Result<Val, InterpError> {
        match ty {
            Type::Int(bits) if *bits <= 128 => {
                let len = u64::from(bits.div_ceil(8));
                let mut value = 0u128;
                for (i, byte) in self.bytes(offset, len)?.iter().enumerate() {
                    value |= u128::from(*byte) << (8 * i);
                }
                Ok(Val::int(*bits, value))
            }
            Type::Float(32) => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(self.bytes(offset, 4)?);
                Ok(Val::Float {
                    bits: 32,
                    value: f64::from(f32::from_le_bytes(raw)),
                })
            }
            Type::Float(64) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.bytes(offset, 8)?);
                Ok(Val::Float {
                    bits: 64,
                    value: f64::from_le_bytes(raw),
                })
            }
            other => Err(InterpError::UnsupportedType(other.clone())),
        }
    }

    fn write(&mut self, offset: u64, value: &Val) -> Result<(), InterpError> {
        match value {
            Val::Int { bits, .. } if *bits > 128 => {
                Err(InterpError::UnsupportedType(Type::Int(*bits)))
            }
            Val::Int { bits, value } => {
                let len = u64::from(bits.div_ceil(8));
                let bytes = value.to_le_bytes();
                self.bytes_mut(offset, len)?
                    .copy_from_slice(&bytes[..len as usize]);
                Ok(())
            }
            Val::Float { bits: 32, value } => {
                let bytes = (*value as f32).to_le_bytes();
                self.bytes_mut(offset, 4)?.copy_from_slice(&bytes);
                Ok(())
            }
            Val::Float { bits: 64, value } => {
                let bytes = value.to_le_bytes();
                self.bytes_mut(offset, 8)?.copy_from_slice(&bytes);
                Ok(())
            }
            Val::Float { bits, .. } => Err(InterpError::UnsupportedType(Type::Float(*bits))),
            other => Err(InterpError::Unexpected {
                expected: "an integer or float",
                actual: other.clone(),
            }),
        }
    }

    fn fresh_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }
}

type Handler = Box<dyn Fn(&mut Machine, &[Val]) -> Result<(), InterpError> + Send + Sync>;

/// Runs lifted functions, dispatching semantics calls to named handlers.
/// Calls without a handler only record their event.
pub struct Interpreter {
    handlers: HashMap<String, Handler>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(
        mut self,
        implementation: impl Into<String>,
        handler: impl Fn(&mut Machine, &[Val]) -> Result<(), InterpError> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(implementation.into(), Box::new(handler));
        self
    }

    /// Run `func` from its entry block and return the final memory token.
    /// The function is entered with memory token 0.
    pub fn run(&self, func: &Function, machine: &mut Machine) -> Result<u64, InterpError> {
        let mut values: Vec<Option<Val>> = vec![None; func.value_count()];
        for value in func.values() {
            values[value.index()] = entry_value(func, machine, value)?;
        }
        machine.memory_slot = Some(0);

        let mut block = func.entry_block();
        loop {
            let mut next = None;
            for &inst in func.block_insts(block) {
                let data = func.inst(inst);
                let get = |v: Value| -> Result<Val, InterpError> {
                    values[v.index()].clone().ok_or(InterpError::Undefined(v.index()))
                };
                let result = match &data.op {
                    Op::Load { addr } => Some(machine.load(&get(*addr)?)?),
                    Op::Store { addr, value } => {
                        machine.store(&get(*addr)?, &get(*value)?)?;
                        None
                    }
                    Op::Binary { op, lhs, rhs } => Some(binary(*op, &get(*lhs)?, &get(*rhs)?)?),
                    Op::Cast { op, value, to } => {
                        Some(cast(*op, get(*value)?, to, machine.state_base)?)
                    }
                    Op::Call {
                        implementation,
                        prefix,
                        args,
                    } => {
                        let memory_in = get(prefix.memory)?.as_memory()?;
                        let args = args.iter().map(|&a| get(a)).collect::<Result<Vec<_>, _>>()?;
                        if let Some(handler) = self.handlers.get(implementation) {
                            handler(&mut *machine, &args).map_err(|e| InterpError::Handler {
                                implementation: implementation.clone(),
                                message: e.to_string(),
                            })?;
                        }
                        let memory_out = machine.fresh_token();
                        trace!(%implementation, memory_in, memory_out, "semantics call");
                        machine.events.push(Event::Call {
                            implementation: implementation.clone(),
                            memory_in,
                            memory_out,
                            args,
                        });
                        Some(Val::Memory(memory_out))
                    }
                    Op::Intrinsic { intrinsic, memory } => {
                        let memory_in = get(*memory)?.as_memory()?;
                        let memory_out = machine.fresh_token();
                        machine.events.push(match intrinsic {
                            Intrinsic::AtomicBegin => Event::AtomicBegin {
                                memory_in,
                                memory_out,
                            },
                            Intrinsic::AtomicEnd => Event::AtomicEnd {
                                memory_in,
                                memory_out,
                            },
                        });
                        Some(Val::Memory(memory_out))
                    }
                    Op::Jump { target } => {
                        next = Some(*target);
                        None
                    }
                    Op::Return { memory } => return get(*memory)?.as_memory(),
                };
                if let (Some(out), Some(val)) = (data.result, result) {
                    values[out.index()] = Some(val);
                }
                if next.is_some() {
                    break;
                }
            }
            match next {
                Some(target) => block = target,
                None => return Err(InterpError::Unterminated(block.to_string())),
            }
        }
    }
}

fn entry_value(func: &Function, machine: &Machine, value: Value) -> Result<Option<Val>, InterpError> {
    Ok(match func.value_def(value) {
        ValueDef::Entry(EntryValue::State) => Some(Val::Ptr {
            place: Place::State(0),
            pointee: Type::State,
        }),
        ValueDef::Entry(EntryValue::Memory) => Some(Val::Memory(0)),
        ValueDef::Entry(EntryValue::MemorySlot) => Some(Val::Ptr {
            place: Place::MemorySlot,
            pointee: Type::Memory,
        }),
        ValueDef::Entry(EntryValue::Register(name)) => Some(machine.register_pointer(name)?),
        ValueDef::Const(bits) => {
            let width = func.value_type(value).scalar_bits().unwrap_or(64);
            Some(Val::int(width, *bits))
        }
        ValueDef::Result(_) => None,
    })
}

fn binary(op: BinaryOp, lhs: &Val, rhs: &Val) -> Result<Val, InterpError> {
    let (bits, a) = match lhs {
        Val::Int { bits, value } => (*bits, *value),
        other => {
            return Err(InterpError::Unexpected {
                expected: "an integer",
                actual: other.clone(),
            })
        }
    };
    let b = rhs.as_int()?;
    let amount = u32::try_from(b).unwrap_or(u32::MAX);
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Shl => shl(a, amount, bits),
        BinaryOp::LShr => lshr(a, amount, bits),
        BinaryOp::AShr => ashr(a, amount, bits),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
    };
    Ok(Val::int(bits, value))
}

fn cast(op: CastOp, value: Val, to: &Type, state_base: u64) -> Result<Val, InterpError> {
    let to_bits = to.scalar_bits().unwrap_or(0);
    Ok(match (op, value) {
        (CastOp::ZExt | CastOp::Trunc, Val::Int { value, .. }) => Val::int(to_bits, value),
        (CastOp::SExt, Val::Int { bits, value }) => {
            Val::int(to_bits, sign_extend(value, bits, to_bits))
        }
        (CastOp::FpExt, Val::Float { value, .. }) => Val::Float {
            bits: to_bits,
            value,
        },
        (CastOp::FpTrunc, Val::Float { value, .. }) => Val::Float {
            bits: to_bits,
            value: if to_bits == 32 {
                f64::from(value as f32)
            } else {
                value
            },
        },
        (CastOp::BitCast, Val::Ptr { place, .. }) => Val::Ptr {
            place,
            pointee: to.pointee().cloned().unwrap_or(Type::State),
        },
        (CastOp::PtrToInt, Val::Ptr {
            place: Place::State(offset),
            ..
        }) => Val::int(to_bits, u128::from(state_base + offset)),
        (_, other) => {
            return Err(InterpError::Unexpected {
                expected: "an operand matching the cast",
                actual: other,
            })
        }
    })
}
