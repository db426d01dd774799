// This module provides JitInstance, the long-lived owner of everything that outlives a single
// compilation: the configuration, the calling convention selected from it, the sequence counter
// stamped into every code object and the optional append-only diagnostic log. Compilation state
// itself (arena, session, dispatcher, emitter, allocator) is created per call, so one instance can
// be shared by reference between threads and used to compile concurrently; the counter is atomic
// and the log sink sits behind a parking_lot mutex. Writes to the log and raw-code dumps are best
// effort: a failure is reported through the log facade and never turns into a compile error.

//! JIT instance and compile entry points.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use bumpalo::Bump;
use parking_lot::Mutex;

use crate::compiler::JitCompiler;
use crate::core::config::JitConfig;
use crate::core::emitter::Emitter;
use crate::core::error::{oops, JitResult};
use crate::core::session::CompilationSession;
use crate::dump;
use crate::ir::graph::Graph;
use crate::x64::{select, CallingConvention, X64Emitter};

use super::code::CodeObject;

pub struct JitInstance {
    config: JitConfig,
    conv: &'static dyn CallingConvention,
    seq: AtomicU64,
    log: Option<Mutex<BufWriter<File>>>,
}

impl JitInstance {
    pub fn new(config: JitConfig) -> JitResult<Self> {
        let conv = select(config.abi)?;
        let log = match &config.log_path {
            Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(Mutex::new(BufWriter::new(file))),
                Err(err) => {
                    log::warn!("cannot open JIT log {}: {err}", path.display());
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            config,
            conv,
            seq: AtomicU64::new(0),
            log,
        })
    }

    pub fn from_env() -> JitResult<Self> {
        Self::new(JitConfig::from_env())
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn calling_convention(&self) -> &'static dyn CallingConvention {
        self.conv
    }

    /// Sequence number the next code object will get.
    pub fn next_seq_nr(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Append a line to the diagnostic log, if one is configured.
    pub fn log(&self, line: &str) {
        let Some(sink) = &self.log else {
            return;
        };
        let mut sink = sink.lock();
        if let Err(err) = writeln!(sink, "{line}").and_then(|()| sink.flush()) {
            log::warn!("JIT log write failed: {err}");
        }
    }

    /// Compile `graph` to x86-64 machine code.
    pub fn compile(&self, graph: &Graph) -> JitResult<CodeObject> {
        let mut emitter = X64Emitter::new(self.conv)?;
        self.compile_with(&mut emitter, graph)
    }

    /// Compile through an arbitrary emitter backend.
    pub fn compile_with(&self, emitter: &mut dyn Emitter, graph: &Graph) -> JitResult<CodeObject> {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let summary = {
            let mut compiler = JitCompiler::new(&mut *emitter, self.conv, self.config.tiler.clone(), &session);
            compiler.compile_graph(graph)?
        };
        let code = CodeObject::assemble(emitter, graph, summary.spill_size, &self.seq)?;
        session.record_code_size(code.size());
        log::debug!("{}", session.stats());

        self.log(&format!(
            "seq {}: {} bytes, {} trees, {} tiles, {} spills",
            code.seq_nr,
            code.size(),
            summary.trees,
            summary.tiles,
            summary.spills
        ));
        for label in code.unresolved_labels() {
            self.log(&format!("seq {}: label {label} unresolved", code.seq_nr));
        }
        self.dump(&code);
        Ok(code)
    }

    /// Compile, treating any failure as a fatal internal error.
    pub fn compile_or_abort(&self, graph: &Graph) -> CodeObject {
        self.compile(graph).unwrap_or_else(|err| oops(err))
    }

    fn dump(&self, code: &CodeObject) {
        let Some(dir) = &self.config.dump_dir else {
            return;
        };
        let name = format!("jit_code_{}", code.seq_nr);
        let path = dir.join(format!("{name}.o"));
        let written = dump::write_elf(code, &name)
            .and_then(|bytes| fs::create_dir_all(dir).and_then(|()| fs::write(&path, bytes)).map_err(Into::into));
        match written {
            Ok(()) => log::debug!("dumped {}", path.display()),
            Err(err) => log::warn!("dump of {} failed: {err}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TargetAbi;
    use crate::core::error::JitError;
    use crate::ir::graph::{ControlNode, GraphNode, Primitive};
    use crate::trace::RecordingEmitter;

    fn graph() -> Graph {
        let mut graph = Graph::new(1, 0);
        let start = graph.new_label();
        graph
            .push(GraphNode::Label(start))
            .push(GraphNode::Primitive(Primitive::IncI { dst: 0 }))
            .push(GraphNode::Control(ControlNode::Exit));
        graph
    }

    #[test]
    fn test_win64_rejected() {
        let config = JitConfig {
            abi: TargetAbi::Win64,
            ..Default::default()
        };
        assert!(matches!(JitInstance::new(config), Err(JitError::Unimplemented { .. })));
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let jit = JitInstance::new(JitConfig::default()).unwrap();
        let first = jit.compile_with(&mut RecordingEmitter::new(), &graph()).unwrap();
        let second = jit.compile_with(&mut RecordingEmitter::new(), &graph()).unwrap();
        assert_eq!((first.seq_nr, second.seq_nr), (0, 1));
        assert_eq!(jit.next_seq_nr(), 2);
    }

    #[test]
    fn test_log_and_dump_written() {
        let dir = std::env::temp_dir().join(format!("exprjit-instance-{}", std::process::id()));
        let config = JitConfig {
            log_path: Some(dir.join("jit.log")),
            dump_dir: Some(dir.clone()),
            ..Default::default()
        };
        fs::create_dir_all(&dir).unwrap();
        let jit = JitInstance::new(config).unwrap();
        let code = jit.compile(&graph()).unwrap();
        let log = fs::read_to_string(dir.join("jit.log")).unwrap();
        assert!(log.contains(&format!("seq {}: {} bytes", code.seq_nr, code.size())));
        assert!(dir.join("jit_code_0.o").exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
