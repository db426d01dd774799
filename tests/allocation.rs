use bumpalo::Bump;
use exprjit::ir::ArgType;
use exprjit::trace::Event;
use exprjit::x64::{CallingConvention, SCRATCH};
use exprjit::{
    compile_tree, AsmReg, CompilationSession, CompiledTree, ExprOp, ExprTree, JitResult, RecordingEmitter, RegClass,
    TilerOptions, TreeContext, ValueState, SYSV,
};

const SPILL_BASE: i32 = 64;

fn compile(tree: &ExprTree, recorder: &mut RecordingEmitter) -> JitResult<CompiledTree> {
    let _ = env_logger::builder().is_test(true).try_init();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let options = TilerOptions::default();
    let ctx = TreeContext {
        conv: &SYSV,
        tiler: &options,
        label_offset: 0,
        spill_base: SPILL_BASE,
    };
    compile_tree(tree, &ctx, &session, recorder)
}

fn work_load(tree: &mut ExprTree, offset: i32) -> usize {
    let local = tree.local();
    let addr = tree.addr(local, offset);
    tree.load(addr, 8)
}

fn work_store(tree: &mut ExprTree, offset: i32, value: usize) -> usize {
    let local = tree.local();
    let addr = tree.addr(local, offset);
    tree.store(addr, value, 8)
}

/// Sum of `n` loads, nested to the right so every load is live at once.
fn wide_sum(n: usize) -> ExprTree {
    let mut tree = ExprTree::new();
    let loads: Vec<_> = (0..n).map(|i| work_load(&mut tree, i as i32 * 8)).collect();
    let mut sum = loads[n - 1];
    for &load in loads[..n - 1].iter().rev() {
        sum = tree.binary(ExprOp::Add, load, sum);
    }
    let store = work_store(&mut tree, 512, sum);
    tree.add_root(store);
    tree
}

#[test]
fn registers_stay_within_bounds() {
    for n in [2, 10, 11, 16] {
        let mut recorder = RecordingEmitter::new();
        let compiled = compile(&wide_sum(n), &mut recorder).unwrap();
        assert!(compiled.summary.peak[RegClass::Gpr.index()] <= 10);
        assert_eq!(compiled.summary.spills, n.saturating_sub(10) as u32);
        assert_eq!(compiled.summary.reloads, compiled.summary.spills);

        let allocatable = SYSV.allocatable();
        for reg in recorder.defined_registers() {
            assert!(allocatable.contains(reg) || reg == SCRATCH, "{reg} written");
        }
    }
}

#[test]
fn every_register_value_ends_dead() {
    let mut recorder = RecordingEmitter::new();
    let compiled = compile(&wide_sum(13), &mut recorder).unwrap();
    let values = compiled.tree.values();
    let scheduled: Vec<_> = values
        .iter()
        .filter(|v| v.class().is_some() && v.first_created > 0)
        .collect();
    assert!(scheduled.len() >= 13);
    for value in scheduled {
        assert_eq!(value.state, ValueState::Dead, "{value:?}");
        assert!(value.last_use >= value.first_created);
    }
}

#[test]
fn spilled_values_come_back_from_their_slot() {
    let mut recorder = RecordingEmitter::new();
    compile(&wide_sum(12), &mut recorder).unwrap();
    let events = recorder.events();
    let stores: Vec<_> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match *e {
            Event::Store { offset, .. } => Some((i, offset)),
            _ => None,
        })
        .collect();
    assert_eq!(stores.len(), 2);
    for (at, offset) in stores {
        assert!(offset >= SPILL_BASE);
        let reload = events[at..]
            .iter()
            .position(|e| matches!(*e, Event::Load { offset: o, .. } if o == offset));
        assert!(reload.is_some(), "slot {offset} never reloaded");
    }
}

#[test]
fn add_takes_over_dying_left_operand() {
    let mut tree = ExprTree::new();
    let x = work_load(&mut tree, 0);
    let y = work_load(&mut tree, 8);
    let keep = tree.binary(ExprOp::Add, x, y);
    let again = tree.binary(ExprOp::Sub, keep, x);
    let store = work_store(&mut tree, 16, again);
    tree.add_root(store);

    let mut recorder = RecordingEmitter::new();
    compile(&tree, &mut recorder).unwrap();
    let binaries: Vec<_> = recorder
        .events()
        .iter()
        .filter_map(|e| match *e {
            Event::Binary { dst, lhs, rhs, .. } => Some((dst, lhs, rhs)),
            _ => None,
        })
        .collect();
    assert_eq!(binaries.len(), 2);
    // x is still needed by the sub, so the add gets a fresh register
    let (dst, lhs, rhs) = binaries[0];
    assert_ne!(dst, lhs);
    assert_ne!(dst, rhs);
    // the add result dies at the sub and is reused
    let (dst, lhs, _) = binaries[1];
    assert_eq!(dst, lhs);
}

#[test]
fn call_arguments_follow_sysv_order() {
    let mut tree = ExprTree::new();
    let func = tree.constant(0x1000, 8);
    let args: Vec<_> = (0..8).map(|i| (work_load(&mut tree, i * 8), ArgType::Int)).collect();
    let call = tree.call(ExprOp::Call, func, &args);
    let store = work_store(&mut tree, 64, call);
    tree.add_root(store);

    let mut recorder = RecordingEmitter::new();
    let compiled = compile(&tree, &mut recorder).unwrap();
    // arguments were spilled before the call and die in their slots
    for &(arg, _) in &args {
        assert_eq!(compiled.tree.value(arg).state, ValueState::Dead);
    }
    let events = recorder.events();
    let call_at = events
        .iter()
        .position(|e| matches!(e, Event::CallIndirect(_)))
        .unwrap();
    let last_spill = events[..call_at]
        .iter()
        .rposition(|e| matches!(e, Event::Store { .. }))
        .unwrap();

    let arg_regs = SYSV.arg_registers(RegClass::Gpr);
    let placed: Vec<AsmReg> = events[last_spill..call_at]
        .iter()
        .filter_map(|e| match *e {
            Event::Load { reg, .. } if arg_regs.contains(&reg) => Some(reg),
            Event::Move { dst, .. } if arg_regs.contains(&dst) => Some(dst),
            _ => None,
        })
        .collect();
    assert_eq!(placed, arg_regs);

    let stack: Vec<i32> = events[last_spill..call_at]
        .iter()
        .filter_map(|e| match *e {
            Event::StackArg { offset, .. } => Some(offset),
            _ => None,
        })
        .collect();
    assert_eq!(stack, vec![0, 8]);
    assert_eq!(events[call_at], Event::CallIndirect(SCRATCH));
}

#[test]
fn live_values_survive_a_call() {
    let mut tree = ExprTree::new();
    let local = tree.local();
    let src = tree.addr(local, 0);
    let num = tree.load_num(src);
    let count = work_load(&mut tree, 8);
    let func = tree.constant(0x2000, 8);
    let tc = tree.tc();
    let call = tree.call(ExprOp::CallVoid, func, &[(tc, ArgType::Int)]);
    let twice = tree.binary(ExprOp::AddNum, num, num);
    let dst = tree.addr(local, 16);
    let store_num = tree.store_num(dst, twice);
    let one = tree.constant(1, 8);
    let next = tree.binary(ExprOp::Add, count, one);
    let store = work_store(&mut tree, 24, next);
    tree.add_root(num);
    tree.add_root(count);
    tree.add_root(call);
    tree.add_root(store_num);
    tree.add_root(store);

    let mut recorder = RecordingEmitter::new();
    let compiled = compile(&tree, &mut recorder).unwrap();
    let events = recorder.events();
    let call_at = events
        .iter()
        .position(|e| matches!(e, Event::CallIndirect(_)))
        .unwrap();

    for class in RegClass::ALL {
        let spills: Vec<i32> = events[..call_at]
            .iter()
            .filter_map(|e| match *e {
                Event::Store { offset, reg, .. } if reg.class == class => Some(offset),
                _ => None,
            })
            .collect();
        assert!(!spills.is_empty(), "no {class:?} spill before the call");
        let reloaded = events[call_at..].iter().any(|e| {
            matches!(*e, Event::Load { offset, reg, .. } if spills.contains(&offset) && reg.class == class)
        });
        assert!(reloaded, "no {class:?} reload after the call");
    }
    assert_eq!(compiled.tree.value(num).state, ValueState::Dead);
    assert_eq!(compiled.tree.value(count).state, ValueState::Dead);
}
