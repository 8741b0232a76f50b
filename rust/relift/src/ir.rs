//! Host IR that lifted instructions are emitted into.
//!
//! A [`Function`] owns the abstract machine state it is lifted against: the
//! state reference, the memory token (kept in a slot and threaded through
//! every semantics call), and one storage address per architectural
//! register, one of which is the program counter slot. Operations are only
//! ever appended at the end of a block through a [`Builder`].
//!
//! Constants are values without a defining operation, the way LLVM treats
//! them, so an instruction that only needs constants emits nothing extra.

use std::collections::HashMap;
use std::fmt;

use strum::Display as StrumDisplay;

use crate::arch::Arch;
use crate::numeric::{const_bits, mask};
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);

impl Value {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);

impl Block {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);

/// Values that exist on entry to a lifted function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryValue {
    /// Reference to the machine state.
    State,
    /// Memory token passed in by the caller.
    Memory,
    /// Slot holding the current memory token.
    MemorySlot,
    /// Storage address of the named register inside the state.
    Register(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDef {
    Entry(EntryValue),
    /// Integer constant; the bits are already truncated to the value's width.
    Const(u128),
    Result(Inst),
}

#[derive(Debug, Clone)]
struct ValueData {
    ty: Type,
    def: ValueDef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Shl,
    LShr,
    AShr,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
    FpExt,
    FpTrunc,
    BitCast,
    PtrToInt,
}

/// Operations provided by the lifting runtime rather than by a semantics
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum Intrinsic {
    /// Opens an indivisible read-modify-write region.
    AtomicBegin,
    /// Closes the region opened by `AtomicBegin`.
    AtomicEnd,
}

/// Arguments every semantics call receives ahead of its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPrefix {
    pub memory: Value,
    pub state: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Load {
        addr: Value,
    },
    Store {
        addr: Value,
        value: Value,
    },
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        op: CastOp,
        value: Value,
        to: Type,
    },
    /// Call into a semantics implementation; produces the next memory token.
    Call {
        implementation: String,
        prefix: CallPrefix,
        args: Vec<Value>,
    },
    /// Consumes a memory token and produces the next one.
    Intrinsic {
        intrinsic: Intrinsic,
        memory: Value,
    },
    Jump {
        target: Block,
    },
    Return {
        memory: Value,
    },
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Jump { .. } | Op::Return { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstData {
    pub op: Op,
    pub result: Option<Value>,
}

/// A lifted function: `(state*, mem) -> mem`.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    word: Type,
    values: Vec<ValueData>,
    insts: Vec<InstData>,
    blocks: Vec<Vec<Inst>>,
    state: Value,
    memory: Value,
    memory_slot: Value,
    pc_slot: Value,
    registers: HashMap<String, Value>,
}

impl Function {
    /// Create an empty function with an entry block, lifted against `arch`.
    pub fn new(name: impl Into<String>, arch: &Arch) -> Self {
        let mut func = Self {
            name: name.into(),
            word: arch.word_type(),
            values: Vec::new(),
            insts: Vec::new(),
            blocks: vec![Vec::new()],
            state: Value(0),
            memory: Value(0),
            memory_slot: Value(0),
            pc_slot: Value(0),
            registers: HashMap::with_capacity(arch.registers().len()),
        };

        func.state = func.push_value(Type::ptr(Type::State), ValueDef::Entry(EntryValue::State));
        func.memory = func.push_value(Type::Memory, ValueDef::Entry(EntryValue::Memory));
        func.memory_slot = func.push_value(
            Type::ptr(Type::Memory),
            ValueDef::Entry(EntryValue::MemorySlot),
        );

        let pc = arch.pc_register();
        func.pc_slot = func.push_value(
            Type::ptr(arch.word_type()),
            ValueDef::Entry(EntryValue::Register(pc.to_string())),
        );
        func.registers.insert(pc.to_string(), func.pc_slot);

        for reg in arch.registers() {
            if reg.name == pc {
                continue;
            }
            let addr = func.push_value(
                Type::ptr(reg.ty.clone()),
                ValueDef::Entry(EntryValue::Register(reg.name.clone())),
            );
            func.registers.insert(reg.name.clone(), addr);
        }

        func
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn word_type(&self) -> &Type {
        &self.word
    }

    pub fn entry_block(&self) -> Block {
        Block(0)
    }

    pub fn create_block(&mut self) -> Block {
        self.blocks.push(Vec::new());
        Block((self.blocks.len() - 1) as u32)
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        (0..self.blocks.len()).map(|i| Block(i as u32))
    }

    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.blocks[block.index()]
    }

    /// `true` once the block ends in a jump or return.
    pub fn is_terminated(&self, block: Block) -> bool {
        self.blocks[block.index()]
            .last()
            .is_some_and(|&inst| self.inst(inst).op.is_terminator())
    }

    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst.0 as usize]
    }

    /// Number of operations across all blocks.
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn value_type(&self, value: Value) -> &Type {
        &self.values[value.index()].ty
    }

    pub fn value_def(&self, value: Value) -> &ValueDef {
        &self.values[value.index()].def
    }

    /// Bits of a constant value.
    pub fn const_value(&self, value: Value) -> Option<u128> {
        match self.value_def(value) {
            ValueDef::Const(bits) => Some(*bits),
            _ => None,
        }
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.values.len()).map(|i| Value(i as u32))
    }

    /// Reference to the machine state.
    pub fn state_pointer(&self) -> Value {
        self.state
    }

    /// Memory token the function was entered with.
    pub fn initial_memory(&self) -> Value {
        self.memory
    }

    /// Slot that holds the current memory token.
    pub fn memory_slot(&self) -> Value {
        self.memory_slot
    }

    /// Storage address of the program counter.
    pub fn pc_slot(&self) -> Value {
        self.pc_slot
    }

    /// Storage address of a named register.
    pub fn register_address(&self, name: &str) -> Option<Value> {
        self.registers.get(name).copied()
    }

    /// Builder appending to the end of `block`.
    pub fn builder(&mut self, block: Block) -> Builder<'_> {
        Builder { func: self, block }
    }

    fn push_value(&mut self, ty: Type, def: ValueDef) -> Value {
        self.values.push(ValueData { ty, def });
        Value((self.values.len() - 1) as u32)
    }

    fn iconst_bits(&mut self, bits: u32, raw: u128) -> Value {
        self.push_value(Type::Int(bits), ValueDef::Const(raw & mask(bits)))
    }

    fn display_value(&self, value: Value) -> String {
        let data = &self.values[value.index()];
        match &data.def {
            ValueDef::Entry(EntryValue::State) => "%state".to_string(),
            ValueDef::Entry(EntryValue::Memory) => "%memory".to_string(),
            ValueDef::Entry(EntryValue::MemorySlot) => "%memory.slot".to_string(),
            ValueDef::Entry(EntryValue::Register(name)) => format!("%{name}"),
            ValueDef::Const(bits) => format!("{} {bits:#x}", data.ty),
            ValueDef::Result(_) => format!("%v{}", value.0),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fn @{}(%state: state*, %memory: mem) -> mem {{", self.name)?;
        for block in self.blocks() {
            writeln!(f, "{block}:")?;
            for &inst in self.block_insts(block) {
                let data = self.inst(inst);
                write!(f, "  ")?;
                if let Some(result) = data.result {
                    write!(f, "{} = ", self.display_value(result))?;
                }
                let v = |value: Value| self.display_value(value);
                match &data.op {
                    Op::Load { addr } => {
                        let ty = self.value_type(*addr).pointee().cloned().unwrap_or(Type::State);
                        write!(f, "load {ty}, {}", v(*addr))?;
                    }
                    Op::Store { addr, value } => write!(f, "store {}, {}", v(*value), v(*addr))?,
                    Op::Binary { op, lhs, rhs } => {
                        write!(f, "{op} {} {}, {}", self.value_type(*lhs), v(*lhs), v(*rhs))?
                    }
                    Op::Cast { op, value, to } => write!(
                        f,
                        "{op} {} {} to {to}",
                        self.value_type(*value),
                        v(*value)
                    )?,
                    Op::Call {
                        implementation,
                        prefix,
                        args,
                    } => {
                        write!(
                            f,
                            "call @{implementation}({}, {}",
                            v(prefix.memory),
                            v(prefix.state)
                        )?;
                        let args: Vec<String> = args.iter().map(|&a| v(a)).collect();
                        write!(f, "; {})", args.join(", "))?;
                    }
                    Op::Intrinsic { intrinsic, memory } => {
                        write!(f, "{intrinsic} {}", v(*memory))?
                    }
                    Op::Jump { target } => write!(f, "jump {target}")?,
                    Op::Return { memory } => write!(f, "ret {}", v(*memory))?,
                }
                writeln!(f)?;
            }
        }
        write!(f, "}}")
    }
}

/// Insertion point: appends operations to the end of one block.
pub struct Builder<'f> {
    func: &'f mut Function,
    block: Block,
}

impl Builder<'_> {
    pub fn block(&self) -> Block {
        self.block
    }

    pub fn func(&self) -> &Function {
        &*self.func
    }

    pub fn switch_to_block(&mut self, block: Block) {
        self.block = block;
    }

    pub fn value_type(&self, value: Value) -> &Type {
        self.func.value_type(value)
    }

    /// `bits`-wide integer constant built from a 64-bit encoding. Signed
    /// encodings are sign-extended before being truncated to the width.
    pub fn iconst(&mut self, bits: u32, value: u64, is_signed: bool) -> Value {
        self.func.iconst_bits(bits, const_bits(value, is_signed))
    }

    /// Load the pointee of `addr`, or `None` when `addr` is not a pointer.
    pub fn load(&mut self, addr: Value) -> Option<Value> {
        let ty = self.func.value_type(addr).pointee()?.clone();
        self.push(Op::Load { addr }, Some(ty))
    }

    pub fn store(&mut self, addr: Value, value: Value) {
        self.push(Op::Store { addr, value }, None);
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.func.value_type(lhs).clone();
        self.push(Op::Binary { op, lhs, rhs }, Some(ty)).unwrap_or(lhs)
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn shl(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Shl, lhs, rhs)
    }

    pub fn lshr(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::LShr, lhs, rhs)
    }

    pub fn ashr(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::AShr, lhs, rhs)
    }

    pub fn and(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::And, lhs, rhs)
    }

    pub fn or(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Or, lhs, rhs)
    }

    pub fn cast(&mut self, op: CastOp, value: Value, to: Type) -> Value {
        self.push(
            Op::Cast {
                op,
                value,
                to: to.clone(),
            },
            Some(to),
        )
        .unwrap_or(value)
    }

    pub fn zext(&mut self, value: Value, to: Type) -> Value {
        self.cast(CastOp::ZExt, value, to)
    }

    pub fn sext(&mut self, value: Value, to: Type) -> Value {
        self.cast(CastOp::SExt, value, to)
    }

    pub fn trunc(&mut self, value: Value, to: Type) -> Value {
        self.cast(CastOp::Trunc, value, to)
    }

    /// Semantics call; returns the memory token it produces.
    pub fn call(&mut self, implementation: &str, prefix: CallPrefix, args: Vec<Value>) -> Value {
        self.push(
            Op::Call {
                implementation: implementation.to_string(),
                prefix,
                args,
            },
            Some(Type::Memory),
        )
        .unwrap_or(prefix.memory)
    }

    pub fn intrinsic(&mut self, intrinsic: Intrinsic, memory: Value) -> Value {
        self.push(Op::Intrinsic { intrinsic, memory }, Some(Type::Memory))
            .unwrap_or(memory)
    }

    pub fn jump(&mut self, target: Block) {
        self.push(Op::Jump { target }, None);
    }

    /// Return the current memory token.
    pub fn ret(&mut self) {
        let slot = self.func.memory_slot();
        let memory = self
            .push(Op::Load { addr: slot }, Some(Type::Memory))
            .unwrap_or(slot);
        self.push(Op::Return { memory }, None);
    }

    fn push(&mut self, op: Op, result_ty: Option<Type>) -> Option<Value> {
        let inst = Inst(self.func.insts.len() as u32);
        let result = result_ty.map(|ty| self.func.push_value(ty, ValueDef::Result(inst)));
        self.func.insts.push(InstData { op, result });
        self.func.blocks[self.block.index()].push(inst);
        result
    }
}
