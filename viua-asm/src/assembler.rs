//! # Assembler pipeline
//!
//! The pure pipeline: source text in, assembled module out. No terminal
//! output happens here; diagnostics are returned as values and rendered
//! by [`crate::report`].

use std::collections::HashMap;
use std::path::Path;

use viua_arch::image::{self, section_index, symbol_type, Relocation, Symbol};
use viua_arch::Word;

use crate::error::{Cause, Diagnostic, Location, Result};
use crate::lexer;
use crate::parser;
use crate::stages;

/// Everything the assembler produced for one source module.
#[derive(Clone, Debug)]
pub struct AssembledModule {
    pub text: Vec<Word>,
    pub rodata: Vec<u8>,
    pub symbols: Vec<Symbol>,
    pub relocations: Vec<Relocation>,
    pub string_table: Vec<u8>,
    /// Symbol-table index of the entry function, if the module has one.
    pub entry_symbol: Option<usize>,
}

impl AssembledModule {
    /// Byte offset of the entry point within `.text`.
    pub fn entry_value(&self) -> Option<u64> {
        self.entry_symbol.map(|index| self.symbols[index].value)
    }

    /// Serialize into the on-disk object-image container.
    pub fn to_image_bytes(&self, interpreter: &str, comment: &str) -> Vec<u8> {
        image::write_image(&image::ImageParams {
            text: &self.text,
            rodata: &self.rodata,
            symbols: &self.symbols,
            relocations: Some(&self.relocations),
            string_table: &self.string_table,
            entry: self.entry_value(),
            interpreter,
            comment,
        })
    }
}

/// Run the full pipeline over one source file.
pub fn assemble(source: &str, source_path: &Path) -> Result<AssembledModule> {
    if source.trim().is_empty() {
        return Err(Diagnostic::new(Location::default(), Cause::EmptySource));
    }

    let lexemes = lexer::lexical_analysis(source)?;
    let lexemes = lexer::remove_noise(lexemes);
    let mut nodes = parser::parse(&lexemes)?;

    let mut rodata: Vec<u8> = Vec::new();
    let mut symbol_table: Vec<Symbol> = Vec::new();
    let mut symbol_map: HashMap<String, usize> = HashMap::new();

    // The first byte of every string table is zero, and the first
    // symbol is the reserved null symbol. A FILE symbol naming the
    // source module follows it.
    let mut string_table: Vec<u8> = vec![0];
    symbol_table.push(Symbol::null());
    {
        let name_off = stages::save_string(&mut string_table, &source_path.to_string_lossy());
        let mut file_sym = Symbol::new(name_off, image::binding::LOCAL, symbol_type::FILE);
        file_sym.shndx = section_index::ABS;
        symbol_table.push(file_sym);
    }

    stages::load_function_labels(&nodes, &mut string_table, &mut symbol_table, &mut symbol_map)?;
    stages::load_value_labels(
        &nodes,
        &mut rodata,
        &mut string_table,
        &mut symbol_table,
        &mut symbol_map,
    )?;

    stages::cook_long_immediates(&mut nodes, &symbol_map)?;

    // The last byte of the string table is zero as well.
    string_table.push(0);

    stages::expand_pseudoinstructions(&mut nodes)?;

    let entry_name = stages::find_entry_point(&nodes)?;

    let text = stages::emit_bytecode(&nodes, &mut symbol_table, &symbol_map)?;
    let relocations = stages::make_reloc_table(&text);

    let entry_symbol = entry_name.map(|name| symbol_map[&name]);

    Ok(AssembledModule {
        text,
        rodata,
        symbols: symbol_table,
        relocations,
        string_table,
        entry_symbol,
    })
}
