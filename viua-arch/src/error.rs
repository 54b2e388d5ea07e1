//! # Error types for the ISA crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchError {
    // Object-image format errors
    #[error("invalid image magic: expected 7f 'VIUA' 00 00 00")]
    InvalidMagic,

    #[error("unsupported file class: expected 64-bit (2), got {0}")]
    BadFileClass(u8),

    #[error("unsupported byte order: expected little-endian (1), got {0}")]
    BadByteOrder(u8),

    #[error("image truncated: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("missing section: {0}")]
    MissingSection(String),

    #[error("malformed section {section}: {detail}")]
    MalformedSection { section: String, detail: String },

    #[error("symbol {index} has no name terminator in the string table")]
    UnterminatedSymbolName { index: usize },

    #[error("unaligned text payload: {0} bytes is not a multiple of 8")]
    UnalignedText(usize),

    // I/O errors
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ArchError::BadFileClass(1).to_string(),
            "unsupported file class: expected 64-bit (2), got 1"
        );
        assert_eq!(
            ArchError::UnalignedText(13).to_string(),
            "unaligned text payload: 13 bytes is not a multiple of 8"
        );
    }
}
