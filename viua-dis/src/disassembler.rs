//! # Image disassembly
//!
//! Walks a loaded image's `.text` payload and renders one line per
//! word, grouping instructions under the function symbols that cover
//! them. Unknown words render as `.word` directives instead of failing
//! the whole listing.

use viua_arch::image::Image;
use viua_arch::{Word, WORD_SIZE};

use crate::decoder::decode;
use crate::error::Result;
use crate::formatter::format;

/// Disassemble a raw word sequence.
pub fn disassemble_words(words: &[Word]) -> String {
    let mut out = String::new();
    for (i, &word) in words.iter().enumerate() {
        let rendered = match decode(word) {
            Ok(instruction) => format(&instruction),
            Err(_) => format!(".word {:#018x}", word),
        };
        out.push_str(&format!(
            "{:08x}  {}\n",
            i * WORD_SIZE,
            rendered
        ));
    }
    out
}

/// Disassemble a whole image, labeling function entry points.
pub fn disassemble(image: &Image) -> Result<String> {
    let words = image.text_words()?;
    let functions = image.function_table()?;

    let mut out = String::new();
    out.push_str(&format!(
        "; {} instruction(s) of .text\n",
        words.len()
    ));

    for (i, &word) in words.iter().enumerate() {
        let offset = (i * WORD_SIZE) as u64;
        if let Some((name, size)) = functions.get(&offset) {
            out.push_str(&format!("\n; function {} ({} bytes)\n", name, size));
        }
        let rendered = match decode(word) {
            Ok(instruction) => format(&instruction),
            Err(_) => format!(".word {:#018x}", word),
        };
        out.push_str(&format!("{:08x}  {}\n", offset, rendered));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use viua_asm::assemble;

    fn image_of(source: &str) -> Image {
        let module = assemble(source, &PathBuf::from("test.asm")).unwrap();
        Image::load(&module.to_image_bytes("viua-vm", "test")).unwrap()
    }

    #[test]
    fn listing_contains_function_labels_and_mnemonics() {
        let image = image_of(
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
        assert!(listing.contains("ebreak"));
        assert!(listing.contains("halt"));
    }

    #[test]
    fn greedy_expansion_products_carry_the_prefix() {
        let image = image_of(
            r#"
            .function: [[entry_point]] main
                li $1, 0xdeadbeefdeadbeef
                halt
            .end
            "#,
        );
        let listing = disassemble(&image).unwrap();
        assert!(listing.contains("g.luiu $1,"));
        assert!(listing.contains("g.mul $2, $2, $3"));
        // The final combine is not greedy.
        assert!(listing.contains("add $1, $1, $2"));
    }

    #[test]
    fn unknown_words_render_as_word_directives() {
        let listing = disassemble_words(&[0x7abc]);
        assert!(listing.contains(".word 0x0000000000007abc"));
    }
}
