//! # Loader
//!
//! Maps an on-disk object image into directly runnable form: the `.text`
//! payload as instruction words, `.rodata`, the symbol table, and the
//! function table. Images without an entry point are relocatable and
//! rejected for direct execution.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use viua_arch::image::{section_name, Image, Symbol};
use viua_arch::{Word, WORD_SIZE};

use crate::error::{Result, RuntimeError};

/// A program ready for the dispatch loop.
#[derive(Debug)]
pub struct LoadedProgram {
    /// Immutable after load; shared by reference from then on.
    pub text: Vec<Word>,
    pub rodata: Vec<u8>,
    /// Entry point as a word index into `text`.
    pub entry: u64,
    /// `.text` byte offset → (name, size) of every function symbol.
    pub functions: BTreeMap<u64, (String, u64)>,
    pub symbols: Vec<Symbol>,
    /// Display name used by the trace stream.
    pub module: String,
}

impl LoadedProgram {
    /// Build a runnable program from a parsed image.
    pub fn from_image(image: &Image, module: String) -> Result<LoadedProgram> {
        let entry_bytes = image.entry_point().ok_or_else(|| RuntimeError::NotExecutable {
            path: module.clone(),
        })?;
        if entry_bytes % WORD_SIZE as u64 != 0 {
            return Err(RuntimeError::UnalignedOffset {
                offset: entry_bytes,
            });
        }

        let text = image.text_words()?;
        let functions = image.function_table()?;
        if !functions.contains_key(&entry_bytes) {
            return Err(RuntimeError::EntryNotFunction {
                offset: entry_bytes,
            });
        }

        let rodata = image
            .find_fragment(section_name::RODATA)
            .map(|fragment| fragment.data.clone())
            .unwrap_or_default();

        Ok(LoadedProgram {
            text,
            rodata,
            entry: entry_bytes / WORD_SIZE as u64,
            functions,
            symbols: image.symbols()?,
            module,
        })
    }

    /// Read and map an image from disk.
    pub fn from_file(path: &Path) -> Result<LoadedProgram> {
        let bytes = fs::read(path)?;
        let image = Image::load(&bytes)?;
        LoadedProgram::from_image(&image, path.display().to_string())
    }

    /// The function covering a given `.text` byte offset, if any.
    pub fn function_at(&self, offset: u64) -> Option<(&str, u64)> {
        self.functions
            .range(..=offset)
            .next_back()
            .filter(|(&start, &(_, size))| offset < start + size)
            .map(|(_, (name, size))| (name.as_str(), *size))
    }
}
