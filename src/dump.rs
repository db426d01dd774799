//! ELF dumps of compiled code.
//!
//! A dump is a relocatable x86-64 ELF object with the code in `.text`, one
//! function symbol covering all of it and one local label symbol per
//! resolved graph label, so `objdump -d` shows where each label landed.

use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

use crate::core::error::{JitError, JitResult};
use crate::runtime::code::CodeObject;

pub fn write_elf(code: &CodeObject, name: &str) -> JitResult<Vec<u8>> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    let base = obj.append_section_data(text, code.as_bytes(), 16);

    obj.add_symbol(Symbol {
        name: name.as_bytes().to_vec(),
        value: base,
        size: code.size() as u64,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });
    for label in 0..code.num_labels() {
        let Some(offset) = code.label_offset(label) else {
            continue;
        };
        obj.add_symbol(Symbol {
            name: format!("{name}.label_{label}").into_bytes(),
            value: base + offset as u64,
            size: 0,
            kind: SymbolKind::Label,
            scope: SymbolScope::Compilation,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
    }

    obj.write().map_err(|e| JitError::Encode { reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use object::{Object as _, ObjectSection, ObjectSymbol};

    use super::*;
    use crate::core::emitter::Emitter;
    use crate::ir::graph::Graph;
    use crate::trace::RecordingEmitter;

    #[test]
    fn test_dump_has_code_and_labels() {
        let mut graph = Graph::new(0, 0);
        let first = graph.new_label();
        let second = graph.new_label();
        let _never = graph.new_label();
        let mut emitter = RecordingEmitter::new();
        emitter.reserve_labels(graph.num_labels());
        emitter.emit_prologue().unwrap();
        emitter.emit_label(first).unwrap();
        emitter.emit_label(second).unwrap();
        emitter.emit_epilogue().unwrap();
        let code = CodeObject::assemble(&mut emitter, &graph, 0, &AtomicU64::new(0)).unwrap();

        let bytes = write_elf(&code, "jit_code_0").unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        assert_eq!(text.data().unwrap(), code.as_bytes());

        let func = file.symbol_by_name("jit_code_0").unwrap();
        assert_eq!(func.size(), code.size() as u64);
        assert_eq!(file.symbol_by_name("jit_code_0.label_1").unwrap().address(), 2);
        assert!(file.symbol_by_name("jit_code_0.label_2").is_none());
    }
}
