//! Cross-crate consistency tests: the assembler's emitter, the image
//! writer/reader, and the disassembler's decoder must agree on every
//! byte they exchange.

use std::path::PathBuf;

use viua_arch::image::{section_name, Image, RelocKind};
use viua_arch::{encoding, Opcode, RegisterAccess, GREEDY, WORD_SIZE};
use viua_asm::assemble;
use viua_dis::{decode, disassemble, format, Operands};

fn assemble_image(source: &str) -> (viua_asm::AssembledModule, Image) {
    let module = assemble(source, &PathBuf::from("test.asm")).expect("assembly failed");
    let image = Image::load(&module.to_image_bytes("viua-vm", "cross-module test"))
        .expect("written image must load");
    (module, image)
}

#[test]
fn emitted_words_decode_back_to_their_mnemonics() {
    let (module, _) = assemble_image(
        r#"
        .function: [[entry_point]] main
            addi $1, void, 7
            add $2, $1, $1
            bitxor $3, $2, $1
            eq $4, $2, $3
            not $5, $4
            delete $5
            ebreak
            halt
        .end
        "#,
    );

    let expected = [
        "halt", // guard word at offset 0
        "addi", "add", "bitxor", "eq", "not", "delete", "ebreak", "halt",
    ];
    for (word, mnemonic) in module.text.iter().zip(expected) {
        let decoded = decode(*word).expect("emitted word must decode");
        assert_eq!(decoded.opcode.mnemonic(), mnemonic);
    }
}

#[test]
fn image_roundtrip_preserves_text_symbols_and_entry() {
    let (module, image) = assemble_image(
        r#"
        .string: msg "hello"

        .function: helper
            return void
        .end

        .function: [[entry_point]] main
            call void, helper
            halt
        .end
        "#,
    );

    assert_eq!(image.text_words().unwrap(), module.text);
    assert_eq!(image.entry_point(), module.entry_value());
    assert_eq!(
        image.find_fragment(section_name::RODATA).unwrap().data,
        module.rodata
    );

    let loaded = image.symbols().unwrap();
    assert_eq!(loaded.len(), module.symbols.len());
    for (on_disk, in_memory) in loaded.iter().zip(&module.symbols) {
        assert_eq!(on_disk.name, in_memory.name);
        assert_eq!(on_disk.info, in_memory.info);
        assert_eq!(on_disk.value, in_memory.value);
        assert_eq!(on_disk.size, in_memory.size);
    }

    let names: Vec<String> = loaded
        .iter()
        .map(|sym| image.symbol_name(sym).unwrap())
        .collect();
    assert!(names.contains(&"helper".to_string()));
    assert!(names.contains(&"main".to_string()));
    assert!(names.contains(&"msg".to_string()));
}

#[test]
fn relocations_agree_with_the_symbol_table() {
    let (module, image) = assemble_image(
        r#"
        .atom: state 'running'

        .function: helper
            return void
        .end

        .function: [[entry_point]] main
            atom $1, state
            call $2, helper
            halt
        .end
        "#,
    );

    let relocations = image.relocations().unwrap();
    assert_eq!(relocations.len(), module.relocations.len());
    assert_eq!(relocations.len(), 2);

    let symbols = image.symbols().unwrap();
    for relocation in &relocations {
        assert_eq!(relocation.offset % 8, 0);
        let symbol = symbols[relocation.symbol() as usize];
        match relocation.kind().unwrap() {
            RelocKind::JumpSlot => assert!(symbol.is_function()),
            RelocKind::Object => assert!(symbol.is_object()),
        }

        // The carrier pair recorded in .text really does hold the
        // symbol index the relocation names.
        let at = relocation.offset as usize / WORD_SIZE;
        let hi = match decode(module.text[at]).unwrap().operands {
            Operands::F(f) => f.immediate as u64,
            other => panic!("expected an F word, got {:?}", other),
        };
        let lo = match decode(module.text[at + 1]).unwrap().operands {
            Operands::F(f) => f.immediate as u64,
            other => panic!("expected an F word, got {:?}", other),
        };
        assert_eq!(((hi << 32) | lo) as u32, relocation.symbol());
    }
}

#[test]
fn function_symbols_stay_inside_text() {
    let (_, image) = assemble_image(
        r#"
        .function: one
            noop
            return void
        .end

        .function: two
            noop
            noop
            return void
        .end

        .function: [[entry_point]] main
            halt
        .end
        "#,
    );

    let text_size = image.find_fragment(section_name::TEXT).unwrap().data.len() as u64;
    for (offset, (name, size)) in image.function_table().unwrap() {
        assert!(
            offset + size <= text_size,
            "{} spills out of .text: {}+{} > {}",
            name,
            offset,
            size,
            text_size
        );
        assert_eq!(offset % 8, 0, "{} is misaligned", name);
    }
}

#[test]
fn disassembly_of_assembled_image_is_stable() {
    let (_, image) = assemble_image(
        r#"
        .function: [[entry_point]] main
            li $1, 42
            ebreak
            halt
        .end
        "#,
    );
    let listing = disassemble(&image).unwrap();
    assert!(listing.contains("; function main"));
    assert!(listing.contains("addi $1, void, 42"));
}

#[test]
fn formatter_and_vm_renderer_agree() {
    use viua_arch::R;
    let word = R {
        opcode: GREEDY | Opcode::Addiu.to_u16(),
        out: RegisterAccess::local(1),
        input: RegisterAccess::void(),
        immediate: 42,
    }
    .encode();
    assert!(encoding::is_greedy(word));
    assert_eq!(
        format(&decode(word).unwrap()),
        viua_vm::render_instruction(word)
    );
}
