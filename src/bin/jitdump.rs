//! Compile a built-in demo graph and show what came out.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use exprjit::ir::ArgType;
use exprjit::{
    dump, CodeObject, ExprOp, ExprTree, Graph, GraphNode, JitConfig, JitInstance, RecordingEmitter, TargetAbi,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Demo {
    /// work[2] = work[0] + work[1]
    Add,
    /// work[2] = callee(work[0], work[1])
    Call,
    /// count work[0] down to zero
    Loop,
}

#[derive(Parser)]
#[command(name = "jitdump")]
#[command(about = "Compile a demo graph with exprjit and dump the machine code")]
struct Args {
    #[arg(value_enum, default_value_t = Demo::Add)]
    demo: Demo,

    /// Print emitter events instead of machine code
    #[arg(long)]
    trace: bool,

    /// Look binary operators up with the left child's state
    #[arg(long)]
    mirror_left_state: bool,

    /// Write an ELF object with the code to this path
    #[arg(long)]
    elf: Option<PathBuf>,

    /// Append diagnostics to this file
    #[arg(long)]
    log: Option<PathBuf>,
}

extern "C" fn demo_callee(a: i64, b: i64) -> i64 {
    a * 10 + b
}

fn load_slot(tree: &mut ExprTree, slot: i32) -> usize {
    let local = tree.local();
    let addr = tree.addr(local, slot * 8);
    tree.load(addr, 8)
}

fn store_slot(tree: &mut ExprTree, slot: i32, value: usize) -> usize {
    let local = tree.local();
    let addr = tree.addr(local, slot * 8);
    tree.store(addr, value, 8)
}

fn demo_graph(demo: Demo) -> Graph {
    let mut graph = Graph::new(3, 0);
    let start = graph.new_label();
    let mut tree = ExprTree::new();
    match demo {
        Demo::Add => {
            let a = load_slot(&mut tree, 0);
            let b = load_slot(&mut tree, 1);
            let sum = tree.binary(ExprOp::Add, a, b);
            let store = store_slot(&mut tree, 2, sum);
            tree.add_root(store);
        }
        Demo::Call => {
            let a = load_slot(&mut tree, 0);
            let b = load_slot(&mut tree, 1);
            let func = tree.constant(demo_callee as usize as i64, 8);
            let call = tree.call(ExprOp::Call, func, &[(a, ArgType::Int), (b, ArgType::Int)]);
            let store = store_slot(&mut tree, 2, call);
            tree.add_root(store);
        }
        Demo::Loop => {
            let top = tree.new_label();
            let label = tree.label(top);
            let count = load_slot(&mut tree, 0);
            let one = tree.constant(1, 8);
            let next = tree.binary(ExprOp::Sub, count, one);
            let store = store_slot(&mut tree, 0, next);
            let again = load_slot(&mut tree, 0);
            let test = tree.unary(ExprOp::Nz, again);
            let branch = tree.cond_branch(test, top);
            tree.add_root(label);
            tree.add_root(store);
            tree.add_root(branch);
        }
    }
    graph.push(GraphNode::Label(start)).push(GraphNode::ExprTree(tree));
    graph
}

fn print_code(code: &CodeObject) {
    println!("seq {}: {} bytes, spill area {} bytes", code.seq_nr, code.size(), code.spill_size);
    for label in 0..code.num_labels() {
        match code.label_offset(label) {
            Some(offset) => println!("label {label}: +{offset:#x}"),
            None => println!("label {label}: unresolved"),
        }
    }
    for (row, chunk) in code.as_bytes().chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("{:06x}  {}", row * 16, hex.join(" "));
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = JitConfig::from_env();
    config.abi = TargetAbi::SysV;
    config.tiler.mirror_left_state |= args.mirror_left_state;
    if args.log.is_some() {
        config.log_path = args.log.clone();
    }

    let jit = JitInstance::new(config).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    let graph = demo_graph(args.demo);

    if args.trace {
        let mut recorder = RecordingEmitter::new();
        if let Err(e) = jit.compile_with(&mut recorder, &graph) {
            eprintln!("Compilation error: {e}");
            std::process::exit(1);
        }
        for event in recorder.events() {
            println!("{event}");
        }
        return;
    }

    let code = jit.compile(&graph).unwrap_or_else(|e| {
        eprintln!("Compilation error: {e}");
        std::process::exit(1);
    });
    print_code(&code);

    if let Some(path) = args.elf {
        let written = dump::write_elf(&code, &format!("jit_code_{}", code.seq_nr))
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(&path, bytes).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("Error writing '{}': {e}", path.display());
            std::process::exit(1);
        }
        println!("wrote {}", path.display());
    }
}
