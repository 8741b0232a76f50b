//! Shared fixtures: the bundled amd64 description and an interpreter with
//! stub semantics for the variants it declares.

#![allow(dead_code)]

use relift::interp::{Event, InterpError, Interpreter, Machine, Val};
use relift::{Arch, ArchConfig, DecodedInstruction, InstructionLifter, SemanticsRegistry};

pub const AMD64: &str = include_str!("../../arch/amd64.toml");

pub fn amd64() -> (Arch, SemanticsRegistry) {
    amd64_with("")
}

/// The amd64 description with extra TOML appended.
pub fn amd64_with(extra: &str) -> (Arch, SemanticsRegistry) {
    let source = format!("{AMD64}\n{extra}");
    let config: ArchConfig = source.parse().expect("valid description");
    config.build().expect("buildable description")
}

fn store(m: &mut Machine, args: &[Val]) -> Result<(), InterpError> {
    m.store(&args[0], &args[1])
}

fn add(m: &mut Machine, args: &[Val]) -> Result<(), InterpError> {
    let sum = args[1].as_int()? + args[2].as_int()?;
    m.store(&args[0], &Val::int(64, sum))
}

fn jump(m: &mut Machine, args: &[Val]) -> Result<(), InterpError> {
    m.set_pc(args[0].as_int()? as u64)
}

pub fn interpreter() -> Interpreter {
    let mut interp = Interpreter::new()
        .with_handler("MOV_32", store)
        .with_handler("LEA_64", store)
        .with_handler("CVTSS2SD", store)
        .with_handler("ADD_SHIFTED", add)
        .with_handler("JMP", jump);
    for bits in [8, 16, 32, 64] {
        interp = interp.with_handler(format!("ADD_{bits}"), add);
    }
    interp
}

/// Lift `insts` into one function and run it on a fresh machine prepared
/// by `setup`. Returns the machine and the final memory token.
pub fn run(
    arch: &Arch,
    registry: &SemanticsRegistry,
    insts: &[DecodedInstruction],
    setup: impl FnOnce(&mut Machine),
) -> (Machine, u64) {
    let lifter = InstructionLifter::new(arch, registry);
    let (func, _) = lifter.lift_function("test", insts).expect("lift");
    let mut machine = Machine::new(arch);
    setup(&mut machine);
    let token = interpreter().run(&func, &mut machine).expect("run");
    (machine, token)
}

/// Operand arguments of every call to `implementation`, in order.
pub fn calls(machine: &Machine, implementation: &str) -> Vec<Vec<Val>> {
    machine
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::Call {
                implementation: name,
                args,
                ..
            } if name == implementation => Some(args.clone()),
            _ => None,
        })
        .collect()
}
