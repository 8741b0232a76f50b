//! Decoder records arriving as JSON, and lifting from several threads.

mod common;

use std::thread;

use common::{amd64, calls, interpreter, run};
use relift::instruction::{Action, OperandKind, Register};
use relift::interp::{Machine, Val};
use relift::{DecodedInstruction, Function, InstructionLifter, LiftOutcome};

const BLOCK: &str = r#"[
  {
    "pc": 4096,
    "num_bytes": 2,
    "function": "ADD_GPRv_GPRv_32",
    "operands": [
      { "size": 32, "action": "write", "kind": { "type": "register", "name": "EAX", "size": 32 } },
      { "size": 32, "action": "read", "kind": { "type": "register", "name": "EBX", "size": 32 } },
      { "size": 32, "action": "read", "kind": { "type": "register", "name": "ECX", "size": 32 } }
    ]
  },
  {
    "pc": 4098,
    "num_bytes": 4,
    "function": "LEA_GPRv_AGEN_64",
    "operands": [
      { "size": 64, "action": "write", "kind": { "type": "register", "name": "RDX", "size": 64 } },
      {
        "size": 64,
        "action": "read",
        "kind": {
          "type": "address",
          "base_reg": { "name": "RAX", "size": 64 },
          "displacement": -8,
          "address_size": 64
        }
      }
    ]
  },
  { "pc": 4102, "num_bytes": 1, "function": "", "is_valid": false }
]"#;

#[test]
fn records_deserialize_with_defaults() {
    let insts: Vec<DecodedInstruction> = serde_json::from_str(BLOCK).unwrap();
    assert_eq!(insts.len(), 3);
    assert!(insts[0].is_valid);
    assert!(!insts[0].is_atomic_read_modify_write);
    assert_eq!(
        insts[0].operands[1].kind,
        OperandKind::Register(Register::new("EBX", 32))
    );
    assert_eq!(insts[0].operands[0].action, Action::Write);

    let OperandKind::Address(addr) = &insts[1].operands[1].kind else {
        panic!("expected an address operand");
    };
    assert_eq!(addr.scale, 1);
    assert_eq!(addr.index_reg, None);
    assert_eq!(addr.displacement, -8);

    assert!(!insts[2].is_valid);
    assert!(insts[2].operands.is_empty());
}

#[test]
fn records_round_trip_through_json() {
    let insts: Vec<DecodedInstruction> = serde_json::from_str(BLOCK).unwrap();
    let text = serde_json::to_string(&insts).unwrap();
    let again: Vec<DecodedInstruction> = serde_json::from_str(&text).unwrap();
    assert_eq!(insts, again);
}

#[test]
fn deserialized_block_lifts_and_runs() {
    let (arch, registry) = amd64();
    let insts: Vec<DecodedInstruction> = serde_json::from_str(BLOCK).unwrap();
    let (m, token) = run(&arch, &registry, &insts, |m| {
        m.set_pc(0x1000).unwrap();
        m.set_int("RBX", 40).unwrap();
        m.set_int("RCX", 2).unwrap();
    });

    assert_eq!(m.int("RAX").unwrap(), 42);
    assert_eq!(m.int("RDX").unwrap(), 34);
    assert_eq!(calls(&m, "HandleInvalidInstruction"), vec![Vec::<Val>::new()]);
    assert_eq!(m.pc().unwrap(), 0x1007);
    assert_eq!(token, 3);
}

#[test]
fn unknown_operand_type_is_rejected() {
    let text = r#"{ "size": 8, "action": "read", "kind": { "type": "vector" } }"#;
    assert!(serde_json::from_str::<relift::Operand>(text).is_err());
}

#[test]
fn one_lifter_serves_many_threads() {
    let (arch, registry) = amd64();
    let lifter = InstructionLifter::new(&arch, &registry);

    let funcs: Vec<Function> = thread::scope(|s| {
        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                let lifter = &lifter;
                s.spawn(move || {
                    let pc = 0x1000 * (i + 1);
                    let insts = [
                        DecodedInstruction::new(pc, 5, "NOP"),
                        DecodedInstruction::new(pc + 5, 5, "NOP"),
                    ];
                    let mut func = Function::new(format!("block_{i}"), lifter.arch());
                    let entry = func.entry_block();
                    let mut b = func.builder(entry);
                    let memory_slot = b.func().memory_slot();
                    let memory = b.func().initial_memory();
                    b.store(memory_slot, memory);
                    for inst in &insts {
                        assert_eq!(lifter.lift(inst, &mut b).unwrap(), LiftOutcome::Lifted);
                    }
                    b.ret();
                    func
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (i, func) in funcs.iter().enumerate() {
        let pc = 0x1000 * (i as u64 + 1);
        let mut m = Machine::new(&arch);
        m.set_pc(pc).unwrap();
        let token = interpreter().run(func, &mut m).unwrap();
        assert_eq!(token, 2);
        assert_eq!(m.pc().unwrap(), pc + 10);
    }
}
