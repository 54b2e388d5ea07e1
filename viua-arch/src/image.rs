//! # Object-image container
//!
//! Reader and writer for the on-disk object format produced by the
//! assembler and consumed by the loader. The container is ELF-shaped: a
//! file header, segment headers, section headers, and a contiguous data
//! region holding the interpreter name, an optional relocation table,
//! `.text`, `.rodata`, a comment, the symbol table, and two string
//! tables.
//!
//! Every integer in the file is little-endian. The first byte of the
//! image is the magic marker, and the first segment header (type NULL)
//! carries a copy of the magic in its offset field so external
//! file-type recognizers can match on it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ArchError, Result};
use crate::{Word, WORD_SIZE};

// ============================================================================
// Format constants
// ============================================================================

/// 8-byte magic marker: 0x7f "VIUA" and three zero bytes.
pub const MAGIC: [u8; 8] = [0x7f, b'V', b'I', b'U', b'A', 0x00, 0x00, 0x00];

/// Identification block size at the start of the file header.
pub const IDENT_SIZE: usize = 16;

/// File class marker: 64-bit.
pub const CLASS_64: u8 = 2;

/// Byte-order marker: little-endian.
pub const DATA_LITTLE_ENDIAN: u8 = 1;

/// Container format version.
pub const VERSION: u8 = 1;

/// OS/ABI marker: standalone.
pub const OSABI_STANDALONE: u8 = 0xff;

/// File types.
pub mod file_type {
    /// Relocatable module: no entry point, meant for a linker.
    pub const RELOCATABLE: u16 = 1;
    /// Executable module: entry point present.
    pub const EXECUTABLE: u16 = 2;
}

/// Segment types.
pub mod segment_type {
    pub const NULL: u32 = 0;
    pub const LOAD: u32 = 1;
    pub const INTERP: u32 = 3;
}

/// Segment permission flags.
pub mod segment_flags {
    pub const X: u32 = 1;
    pub const W: u32 = 2;
    pub const R: u32 = 4;
}

/// Section types.
pub mod section_type {
    pub const NULL: u32 = 0;
    pub const PROGBITS: u32 = 1;
    pub const SYMTAB: u32 = 2;
    pub const STRTAB: u32 = 3;
    pub const NOBITS: u32 = 8;
    pub const REL: u32 = 9;
}

/// Section flags.
pub mod section_flags {
    pub const ALLOC: u64 = 0x2;
    pub const EXECINSTR: u64 = 0x4;
    pub const STRINGS: u64 = 0x20;
    pub const INFO_LINK: u64 = 0x40;
}

/// Symbol bindings.
pub mod binding {
    pub const LOCAL: u8 = 0;
    pub const GLOBAL: u8 = 1;
}

/// Symbol types.
pub mod symbol_type {
    pub const NOTYPE: u8 = 0;
    pub const OBJECT: u8 = 1;
    pub const FUNC: u8 = 2;
    pub const FILE: u8 = 4;
}

/// Special section indexes for symbols.
pub mod section_index {
    pub const UNDEF: u16 = 0;
    pub const ABS: u16 = 0xfff1;
}

/// Canonical section names.
pub mod section_name {
    pub const MAGIC: &str = ".viua.magic";
    pub const INTERP: &str = ".interp";
    pub const REL: &str = ".rel";
    pub const TEXT: &str = ".text";
    pub const RODATA: &str = ".rodata";
    pub const COMMENT: &str = ".comment";
    pub const SYMTAB: &str = ".symtab";
    pub const STRTAB: &str = ".strtab";
    pub const SHSTRTAB: &str = ".shstrtab";
}

// ============================================================================
// On-disk records
// ============================================================================

/// File header: 64 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub ident: [u8; IDENT_SIZE],
    pub ftype: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl FileHeader {
    pub const SIZE: usize = 64;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..16].copy_from_slice(&self.ident);
        buf[16..18].copy_from_slice(&self.ftype.to_le_bytes());
        buf[18..20].copy_from_slice(&self.machine.to_le_bytes());
        buf[20..24].copy_from_slice(&self.version.to_le_bytes());
        buf[24..32].copy_from_slice(&self.entry.to_le_bytes());
        buf[32..40].copy_from_slice(&self.phoff.to_le_bytes());
        buf[40..48].copy_from_slice(&self.shoff.to_le_bytes());
        buf[48..52].copy_from_slice(&self.flags.to_le_bytes());
        buf[52..54].copy_from_slice(&self.ehsize.to_le_bytes());
        buf[54..56].copy_from_slice(&self.phentsize.to_le_bytes());
        buf[56..58].copy_from_slice(&self.phnum.to_le_bytes());
        buf[58..60].copy_from_slice(&self.shentsize.to_le_bytes());
        buf[60..62].copy_from_slice(&self.shnum.to_le_bytes());
        buf[62..64].copy_from_slice(&self.shstrndx.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<FileHeader> {
        if buf.len() < Self::SIZE {
            return Err(ArchError::Truncated {
                offset: 0,
                needed: Self::SIZE,
                available: buf.len(),
            });
        }
        let mut ident = [0u8; IDENT_SIZE];
        ident.copy_from_slice(&buf[0..16]);
        Ok(FileHeader {
            ident,
            ftype: u16::from_le_bytes([buf[16], buf[17]]),
            machine: u16::from_le_bytes([buf[18], buf[19]]),
            version: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
            entry: read_u64(buf, 24),
            phoff: read_u64(buf, 32),
            shoff: read_u64(buf, 40),
            flags: u32::from_le_bytes([buf[48], buf[49], buf[50], buf[51]]),
            ehsize: u16::from_le_bytes([buf[52], buf[53]]),
            phentsize: u16::from_le_bytes([buf[54], buf[55]]),
            phnum: u16::from_le_bytes([buf[56], buf[57]]),
            shentsize: u16::from_le_bytes([buf[58], buf[59]]),
            shnum: u16::from_le_bytes([buf[60], buf[61]]),
            shstrndx: u16::from_le_bytes([buf[62], buf[63]]),
        })
    }
}

/// Loadable-segment header: 56 bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentHeader {
    pub stype: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

impl SegmentHeader {
    pub const SIZE: usize = 56;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.stype.to_le_bytes());
        buf[4..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.vaddr.to_le_bytes());
        buf[24..32].copy_from_slice(&self.paddr.to_le_bytes());
        buf[32..40].copy_from_slice(&self.filesz.to_le_bytes());
        buf[40..48].copy_from_slice(&self.memsz.to_le_bytes());
        buf[48..56].copy_from_slice(&self.align.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<SegmentHeader> {
        if buf.len() < Self::SIZE {
            return Err(ArchError::Truncated {
                offset: 0,
                needed: Self::SIZE,
                available: buf.len(),
            });
        }
        Ok(SegmentHeader {
            stype: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            flags: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            offset: read_u64(buf, 8),
            vaddr: read_u64(buf, 16),
            paddr: read_u64(buf, 24),
            filesz: read_u64(buf, 32),
            memsz: read_u64(buf, 40),
            align: read_u64(buf, 48),
        })
    }
}

/// Section header: 64 bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: u32,
    pub stype: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

impl SectionHeader {
    pub const SIZE: usize = 64;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.name.to_le_bytes());
        buf[4..8].copy_from_slice(&self.stype.to_le_bytes());
        buf[8..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..24].copy_from_slice(&self.addr.to_le_bytes());
        buf[24..32].copy_from_slice(&self.offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.size.to_le_bytes());
        buf[40..44].copy_from_slice(&self.link.to_le_bytes());
        buf[44..48].copy_from_slice(&self.info.to_le_bytes());
        buf[48..56].copy_from_slice(&self.addralign.to_le_bytes());
        buf[56..64].copy_from_slice(&self.entsize.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<SectionHeader> {
        if buf.len() < Self::SIZE {
            return Err(ArchError::Truncated {
                offset: 0,
                needed: Self::SIZE,
                available: buf.len(),
            });
        }
        Ok(SectionHeader {
            name: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            stype: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            flags: read_u64(buf, 8),
            addr: read_u64(buf, 16),
            offset: read_u64(buf, 24),
            size: read_u64(buf, 32),
            link: u32::from_le_bytes([buf[40], buf[41], buf[42], buf[43]]),
            info: u32::from_le_bytes([buf[44], buf[45], buf[46], buf[47]]),
            addralign: read_u64(buf, 48),
            entsize: read_u64(buf, 56),
        })
    }
}

/// Symbol-table entry: 24 bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Byte offset of the name in `.strtab`.
    pub name: u32,
    /// Binding and type, packed.
    pub info: u8,
    pub other: u8,
    /// Section index: `.text` for functions, `.rodata` for objects.
    pub shndx: u16,
    /// Byte offset within the symbol's section.
    pub value: u64,
    /// Byte length of the symbol's data.
    pub size: u64,
}

impl Symbol {
    pub const SIZE: usize = 24;

    /// The reserved null symbol that opens every symbol table.
    pub fn null() -> Symbol {
        Symbol::default()
    }

    pub fn new(name: u32, bind: u8, stype: u8) -> Symbol {
        Symbol {
            name,
            info: Symbol::pack_info(bind, stype),
            other: 0,
            shndx: section_index::UNDEF,
            value: 0,
            size: 0,
        }
    }

    #[inline]
    pub const fn pack_info(bind: u8, stype: u8) -> u8 {
        (bind << 4) | (stype & 0x0f)
    }

    #[inline]
    pub const fn binding(&self) -> u8 {
        self.info >> 4
    }

    #[inline]
    pub const fn symbol_type(&self) -> u8 {
        self.info & 0x0f
    }

    pub fn is_function(&self) -> bool {
        self.symbol_type() == symbol_type::FUNC
    }

    pub fn is_object(&self) -> bool {
        self.symbol_type() == symbol_type::OBJECT
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.name.to_le_bytes());
        buf[4] = self.info;
        buf[5] = self.other;
        buf[6..8].copy_from_slice(&self.shndx.to_le_bytes());
        buf[8..16].copy_from_slice(&self.value.to_le_bytes());
        buf[16..24].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Symbol> {
        if buf.len() < Self::SIZE {
            return Err(ArchError::Truncated {
                offset: 0,
                needed: Self::SIZE,
                available: buf.len(),
            });
        }
        Ok(Symbol {
            name: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            info: buf[4],
            other: buf[5],
            shndx: u16::from_le_bytes([buf[6], buf[7]]),
            value: read_u64(buf, 8),
            size: read_u64(buf, 16),
        })
    }
}

/// Relocation kind.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelocKind {
    /// Call target: patch a CALL carrier pair.
    JumpSlot = 1,
    /// Data address: patch an ATOM or literal carrier pair.
    Object = 2,
}

impl RelocKind {
    pub fn from_u8(value: u8) -> Option<RelocKind> {
        match value {
            1 => Some(RelocKind::JumpSlot),
            2 => Some(RelocKind::Object),
            _ => None,
        }
    }
}

/// Relocation-table entry: 16 bytes.
///
/// `info` packs the symbol-table index in the high 32 bits and the kind
/// in the low bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    /// Byte offset within `.text`, always on an 8-byte boundary.
    pub offset: u64,
    pub info: u64,
}

impl Relocation {
    pub const SIZE: usize = 16;

    pub fn new(offset: u64, symbol: u32, kind: RelocKind) -> Relocation {
        Relocation {
            offset,
            info: ((symbol as u64) << 32) | (kind as u64),
        }
    }

    #[inline]
    pub const fn symbol(&self) -> u32 {
        (self.info >> 32) as u32
    }

    pub fn kind(&self) -> Option<RelocKind> {
        RelocKind::from_u8((self.info & 0xff) as u8)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.info.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Relocation> {
        if buf.len() < Self::SIZE {
            return Err(ArchError::Truncated {
                offset: 0,
                needed: Self::SIZE,
                available: buf.len(),
            });
        }
        Ok(Relocation {
            offset: read_u64(buf, 0),
            info: read_u64(buf, 8),
        })
    }
}

#[inline]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

// ============================================================================
// Writer
// ============================================================================

/// Everything the writer needs to lay out an image.
pub struct ImageParams<'a> {
    /// Encoded instruction words.
    pub text: &'a [Word],
    /// Read-only data payload.
    pub rodata: &'a [u8],
    /// Symbol table, null symbol first. Section indexes of function and
    /// object symbols are patched by the writer.
    pub symbols: &'a [Symbol],
    /// Relocation table, if one should be emitted.
    pub relocations: Option<&'a [Relocation]>,
    /// Symbol-name string table. First and last byte must be zero.
    pub string_table: &'a [u8],
    /// Entry symbol's value (byte offset within `.text`), if any. With
    /// no entry the image is written as relocatable.
    pub entry: Option<u64>,
    /// Interpreter name recorded in `.interp`.
    pub interpreter: &'a str,
    /// Toolchain identification recorded in `.comment`.
    pub comment: &'a str,
}

/// Serialize an object image.
///
/// Layout order: file header, segment headers, section headers,
/// interpreter string, relocation table, `.text`, `.rodata`, comment,
/// symbol table, symbol string table, section-name string table.
pub fn write_image(params: &ImageParams) -> Vec<u8> {
    let mut shstr: Vec<u8> = vec![0];
    let mut save_name = |name: &str| -> u32 {
        let at = shstr.len() as u32;
        shstr.extend_from_slice(name.as_bytes());
        shstr.push(0);
        at
    };

    let text_size = (params.text.len() * WORD_SIZE) as u64;
    let reloc_count = params.relocations.map(|r| r.len()).unwrap_or(0);

    let mut headers: Vec<(Option<SegmentHeader>, SectionHeader)> = Vec::new();

    // Mandatory void section; it has no segment and stays all zeroes.
    headers.push((None, SectionHeader::default()));

    // Magic carrier. The first segment header has type NULL and holds a
    // copy of the magic in its offset field; the NOBITS section points
    // straight at that field.
    {
        let mut seg = SegmentHeader {
            stype: segment_type::NULL,
            filesz: MAGIC.len() as u64,
            ..SegmentHeader::default()
        };
        seg.offset = u64::from_le_bytes(MAGIC);

        let sec = SectionHeader {
            name: save_name(section_name::MAGIC),
            stype: section_type::NOBITS,
            offset: (FileHeader::SIZE + 8) as u64,
            size: MAGIC.len() as u64,
            ..SectionHeader::default()
        };
        headers.push((Some(seg), sec));
    }

    // Interpreter name, mostly for external inspection tools.
    {
        let seg = SegmentHeader {
            stype: segment_type::INTERP,
            flags: segment_flags::R,
            filesz: (params.interpreter.len() + 1) as u64,
            memsz: (params.interpreter.len() + 1) as u64,
            ..SegmentHeader::default()
        };
        let sec = SectionHeader {
            name: save_name(section_name::INTERP),
            stype: section_type::PROGBITS,
            size: (params.interpreter.len() + 1) as u64,
            ..SectionHeader::default()
        };
        headers.push((Some(seg), sec));
    }

    let mut rel_ndx = 0usize;
    if params.relocations.is_some() {
        let sec = SectionHeader {
            name: save_name(section_name::REL),
            stype: section_type::REL,
            flags: section_flags::INFO_LINK,
            size: (reloc_count * Relocation::SIZE) as u64,
            entsize: Relocation::SIZE as u64,
            ..SectionHeader::default()
        };
        rel_ndx = headers.len();
        headers.push((None, sec));
    }

    let text_ndx;
    {
        let seg = SegmentHeader {
            stype: segment_type::LOAD,
            flags: segment_flags::R | segment_flags::X,
            filesz: text_size,
            memsz: text_size,
            align: WORD_SIZE as u64,
            ..SegmentHeader::default()
        };
        let sec = SectionHeader {
            name: save_name(section_name::TEXT),
            stype: section_type::PROGBITS,
            flags: section_flags::ALLOC | section_flags::EXECINSTR,
            size: text_size,
            ..SectionHeader::default()
        };
        text_ndx = headers.len();
        headers.push((Some(seg), sec));
    }

    let rodata_ndx;
    {
        let seg = SegmentHeader {
            stype: segment_type::LOAD,
            flags: segment_flags::R,
            filesz: params.rodata.len() as u64,
            memsz: params.rodata.len() as u64,
            align: WORD_SIZE as u64,
            ..SegmentHeader::default()
        };
        let sec = SectionHeader {
            name: save_name(section_name::RODATA),
            stype: section_type::PROGBITS,
            flags: section_flags::ALLOC,
            size: params.rodata.len() as u64,
            ..SectionHeader::default()
        };
        rodata_ndx = headers.len();
        headers.push((Some(seg), sec));
    }

    {
        let sec = SectionHeader {
            name: save_name(section_name::COMMENT),
            stype: section_type::PROGBITS,
            size: (params.comment.len() + 1) as u64,
            ..SectionHeader::default()
        };
        headers.push((None, sec));
    }

    let symtab_ndx = headers.len();
    {
        let sec = SectionHeader {
            name: save_name(section_name::SYMTAB),
            stype: section_type::SYMTAB,
            size: (params.symbols.len() * Symbol::SIZE) as u64,
            entsize: Symbol::SIZE as u64,
            ..SectionHeader::default()
        };
        headers.push((None, sec));
    }

    let strtab_ndx = headers.len();
    {
        let sec = SectionHeader {
            name: save_name(section_name::STRTAB),
            stype: section_type::STRTAB,
            flags: section_flags::STRINGS,
            size: params.string_table.len() as u64,
            ..SectionHeader::default()
        };
        headers.push((None, sec));
    }

    // Section-name strings must stay last: every name is saved by now,
    // so the size below is final.
    {
        let sec = SectionHeader {
            name: save_name(section_name::SHSTRTAB),
            stype: section_type::STRTAB,
            flags: section_flags::STRINGS,
            size: 0, // patched below, after the name of this section landed
            ..SectionHeader::default()
        };
        headers.push((None, sec));
    }
    let last = headers.len() - 1;
    headers[last].1.size = shstr.len() as u64;

    // Link .symtab to its string table, and .rel to .symtab and .text.
    headers[symtab_ndx].1.link = strtab_ndx as u32;
    if params.relocations.is_some() {
        headers[rel_ndx].1.link = symtab_ndx as u32;
        headers[rel_ndx].1.info = text_ndx as u32;
    }

    let phnum = headers.iter().filter(|(seg, _)| seg.is_some()).count();
    let shnum = headers.len();
    let header_size =
        FileHeader::SIZE + phnum * SegmentHeader::SIZE + shnum * SectionHeader::SIZE;

    // Backpatch data-region offsets for sections and their segments.
    let mut text_offset: Option<u64> = None;
    {
        let mut accumulator: u64 = 0;
        for (segment, section) in headers.iter_mut() {
            if let Some(seg) = segment {
                if seg.stype != segment_type::NULL {
                    if seg.flags == (segment_flags::R | segment_flags::X) && text_offset.is_none()
                    {
                        text_offset = Some(accumulator);
                    }
                    seg.offset = header_size as u64 + accumulator;
                }
            }
            if section.stype == section_type::NULL || section.stype == section_type::NOBITS {
                continue;
            }
            section.offset = header_size as u64 + accumulator;
            accumulator += section.size;
        }
    }

    let entry = match (params.entry, text_offset) {
        (Some(value), Some(text_off)) => header_size as u64 + text_off + value,
        _ => 0,
    };

    let mut ident = [0u8; IDENT_SIZE];
    ident[0..8].copy_from_slice(&MAGIC);
    ident[8] = CLASS_64;
    ident[9] = DATA_LITTLE_ENDIAN;
    ident[10] = VERSION;
    ident[11] = OSABI_STANDALONE;

    let file_header = FileHeader {
        ident,
        ftype: if params.entry.is_some() {
            file_type::EXECUTABLE
        } else {
            file_type::RELOCATABLE
        },
        machine: 0,
        version: VERSION as u32,
        entry,
        phoff: FileHeader::SIZE as u64,
        shoff: (FileHeader::SIZE + phnum * SegmentHeader::SIZE) as u64,
        flags: 0,
        ehsize: FileHeader::SIZE as u16,
        phentsize: SegmentHeader::SIZE as u16,
        phnum: phnum as u16,
        shentsize: SectionHeader::SIZE as u16,
        shnum: shnum as u16,
        shstrndx: (shnum - 1) as u16,
    };

    // Patch section indexes of function and object symbols right before
    // the table is written out.
    let mut symbols = params.symbols.to_vec();
    for symbol in symbols.iter_mut() {
        if symbol.shndx == section_index::ABS {
            continue;
        }
        match symbol.symbol_type() {
            symbol_type::FUNC => symbol.shndx = text_ndx as u16,
            symbol_type::OBJECT => symbol.shndx = rodata_ndx as u16,
            _ => {}
        }
    }

    // Serialize. Segment and section headers cannot be interleaved, so
    // two passes over the header list.
    let mut out = Vec::with_capacity(header_size + shstr.len());
    out.extend_from_slice(&file_header.to_bytes());
    for (segment, _) in headers.iter() {
        if let Some(seg) = segment {
            out.extend_from_slice(&seg.to_bytes());
        }
    }
    for (_, section) in headers.iter() {
        out.extend_from_slice(&section.to_bytes());
    }

    out.extend_from_slice(params.interpreter.as_bytes());
    out.push(0);

    if let Some(relocations) = params.relocations {
        for relocation in relocations {
            out.extend_from_slice(&relocation.to_bytes());
        }
    }

    for word in params.text {
        out.extend_from_slice(&word.to_le_bytes());
    }

    out.extend_from_slice(params.rodata);

    out.extend_from_slice(params.comment.as_bytes());
    out.push(0);

    for symbol in symbols.iter() {
        out.extend_from_slice(&symbol.to_bytes());
    }

    out.extend_from_slice(params.string_table);
    out.extend_from_slice(&shstr);

    out
}

// ============================================================================
// Reader
// ============================================================================

/// One section of a loaded image, with its data and the loadable-segment
/// header that covers it, if any.
#[derive(Clone, Debug)]
pub struct Fragment {
    pub index: usize,
    pub segment: Option<SegmentHeader>,
    pub header: SectionHeader,
    pub data: Vec<u8>,
}

/// An object image mapped into memory.
#[derive(Clone, Debug)]
pub struct Image {
    pub header: FileHeader,
    pub fragments: Vec<(String, Fragment)>,
}

impl Image {
    /// Parse an image, validating the magic, the 64-bit file class, and
    /// the little-endian byte-order marker.
    pub fn load(bytes: &[u8]) -> Result<Image> {
        let header = FileHeader::from_bytes(bytes)?;
        if header.ident[0..8] != MAGIC {
            return Err(ArchError::InvalidMagic);
        }
        if header.ident[8] != CLASS_64 {
            return Err(ArchError::BadFileClass(header.ident[8]));
        }
        if header.ident[9] != DATA_LITTLE_ENDIAN {
            return Err(ArchError::BadByteOrder(header.ident[9]));
        }

        let mut segments = Vec::with_capacity(header.phnum as usize);
        for i in 0..header.phnum as usize {
            let at = header.phoff as usize + i * SegmentHeader::SIZE;
            segments.push(SegmentHeader::from_bytes(slice_at(
                bytes,
                at,
                SegmentHeader::SIZE,
            )?)?);
        }

        let mut sections = Vec::with_capacity(header.shnum as usize);
        for i in 0..header.shnum as usize {
            let at = header.shoff as usize + i * SectionHeader::SIZE;
            sections.push(SectionHeader::from_bytes(slice_at(
                bytes,
                at,
                SectionHeader::SIZE,
            )?)?);
        }

        let shstr = {
            let header = sections
                .get(header.shstrndx as usize)
                .ok_or_else(|| ArchError::MissingSection(section_name::SHSTRTAB.to_string()))?;
            slice_at(bytes, header.offset as usize, header.size as usize)?.to_vec()
        };

        let mut fragments = Vec::with_capacity(sections.len());
        for (index, section) in sections.iter().enumerate() {
            let name = string_at(&shstr, section.name as usize).unwrap_or_default();
            let data = match section.stype {
                section_type::NULL | section_type::NOBITS => Vec::new(),
                _ => slice_at(bytes, section.offset as usize, section.size as usize)?.to_vec(),
            };
            let segment = segments
                .iter()
                .find(|seg| {
                    seg.stype != segment_type::NULL
                        && seg.offset == section.offset
                        && seg.filesz == section.size
                })
                .copied();
            fragments.push((
                name,
                Fragment {
                    index,
                    segment,
                    header: *section,
                    data,
                },
            ));
        }

        Ok(Image { header, fragments })
    }

    /// Look up a fragment by section name.
    pub fn find_fragment(&self, name: &str) -> Option<&Fragment> {
        self.fragments
            .iter()
            .find(|(each, _)| each == name)
            .map(|(_, fragment)| fragment)
    }

    /// Byte offset of the entry point within `.text`, if the image has
    /// one.
    pub fn entry_point(&self) -> Option<u64> {
        if self.header.entry == 0 {
            return None;
        }
        let text = self.find_fragment(section_name::TEXT)?;
        self.header.entry.checked_sub(text.header.offset)
    }

    /// The `.text` payload as instruction words.
    pub fn text_words(&self) -> Result<Vec<Word>> {
        let text = self
            .find_fragment(section_name::TEXT)
            .ok_or_else(|| ArchError::MissingSection(section_name::TEXT.to_string()))?;
        if text.data.len() % WORD_SIZE != 0 {
            return Err(ArchError::UnalignedText(text.data.len()));
        }
        Ok(text
            .data
            .chunks_exact(WORD_SIZE)
            .map(|chunk| {
                let mut bytes = [0u8; WORD_SIZE];
                bytes.copy_from_slice(chunk);
                u64::from_le_bytes(bytes)
            })
            .collect())
    }

    /// Parse the symbol table.
    pub fn symbols(&self) -> Result<Vec<Symbol>> {
        let symtab = self
            .find_fragment(section_name::SYMTAB)
            .ok_or_else(|| ArchError::MissingSection(section_name::SYMTAB.to_string()))?;
        if symtab.data.len() % Symbol::SIZE != 0 {
            return Err(ArchError::MalformedSection {
                section: section_name::SYMTAB.to_string(),
                detail: format!("{} bytes is not a multiple of {}", symtab.data.len(), Symbol::SIZE),
            });
        }
        symtab
            .data
            .chunks_exact(Symbol::SIZE)
            .map(Symbol::from_bytes)
            .collect()
    }

    /// Parse the relocation table; an image without one yields an empty
    /// table.
    pub fn relocations(&self) -> Result<Vec<Relocation>> {
        let rel = match self.find_fragment(section_name::REL) {
            Some(fragment) => fragment,
            None => return Ok(Vec::new()),
        };
        if rel.data.len() % Relocation::SIZE != 0 {
            return Err(ArchError::MalformedSection {
                section: section_name::REL.to_string(),
                detail: format!(
                    "{} bytes is not a multiple of {}",
                    rel.data.len(),
                    Relocation::SIZE
                ),
            });
        }
        rel.data
            .chunks_exact(Relocation::SIZE)
            .map(Relocation::from_bytes)
            .collect()
    }

    /// Resolve a symbol's name through `.strtab`.
    pub fn symbol_name(&self, symbol: &Symbol) -> Result<String> {
        let strtab = self
            .find_fragment(section_name::STRTAB)
            .ok_or_else(|| ArchError::MissingSection(section_name::STRTAB.to_string()))?;
        string_at(&strtab.data, symbol.name as usize).ok_or(ArchError::UnterminatedSymbolName {
            index: symbol.name as usize,
        })
    }

    /// Map from `.text` byte offsets to (name, size) for every function
    /// symbol.
    pub fn function_table(&self) -> Result<BTreeMap<u64, (String, u64)>> {
        let mut table = BTreeMap::new();
        for symbol in self.symbols()? {
            if !symbol.is_function() {
                continue;
            }
            let name = self.symbol_name(&symbol)?;
            if name.is_empty() {
                continue;
            }
            table.insert(symbol.value, (name, symbol.size));
        }
        Ok(table)
    }
}

fn slice_at(bytes: &[u8], offset: usize, size: usize) -> Result<&[u8]> {
    bytes
        .get(offset..offset + size)
        .ok_or(ArchError::Truncated {
            offset,
            needed: size,
            available: bytes.len().saturating_sub(offset),
        })
}

fn string_at(table: &[u8], offset: usize) -> Option<String> {
    let tail = table.get(offset..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&tail[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::N;
    use crate::opcode::Opcode;

    fn sample_params<'a>(
        text: &'a [Word],
        rodata: &'a [u8],
        symbols: &'a [Symbol],
        strtab: &'a [u8],
        entry: Option<u64>,
    ) -> ImageParams<'a> {
        ImageParams {
            text,
            rodata,
            symbols,
            relocations: None,
            string_table: strtab,
            entry,
            interpreter: "viua-vm",
            comment: "viua test",
        }
    }

    fn sample_symbols() -> (Vec<Symbol>, Vec<u8>) {
        let mut strtab: Vec<u8> = vec![0];
        let mut save = |name: &str| -> u32 {
            let at = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            at
        };

        let mut main_sym = Symbol::new(save("main"), binding::GLOBAL, symbol_type::FUNC);
        main_sym.value = 8;
        main_sym.size = 16;

        let mut msg_sym = Symbol::new(save("msg"), binding::GLOBAL, symbol_type::OBJECT);
        msg_sym.value = 0;
        msg_sym.size = 6;

        let symbols = vec![Symbol::null(), main_sym, msg_sym];
        strtab.push(0);
        (symbols, strtab)
    }

    #[test]
    fn image_starts_with_the_magic() {
        let text = [N {
            opcode: Opcode::Halt.to_u16(),
        }
        .encode()];
        let (symbols, strtab) = sample_symbols();
        let bytes = write_image(&sample_params(&text, b"ababab", &symbols, &strtab, Some(8)));
        assert_eq!(&bytes[0..8], &MAGIC);
        assert_eq!(bytes[8], CLASS_64);
        assert_eq!(bytes[9], DATA_LITTLE_ENDIAN);
    }

    #[test]
    fn null_segment_carries_magic_copy() {
        let text = [0u64];
        let (symbols, strtab) = sample_symbols();
        let bytes = write_image(&sample_params(&text, &[], &symbols, &strtab, None));
        // First segment header starts right after the file header; its
        // offset field is 8 bytes in.
        let at = FileHeader::SIZE + 8;
        assert_eq!(&bytes[at..at + 8], &MAGIC);
    }

    #[test]
    fn writer_reader_roundtrip() {
        let text = [
            N {
                opcode: Opcode::Halt.to_u16(),
            }
            .encode(),
            N {
                opcode: Opcode::Ebreak.to_u16(),
            }
            .encode(),
            N {
                opcode: Opcode::Halt.to_u16(),
            }
            .encode(),
        ];
        let (symbols, strtab) = sample_symbols();
        let bytes = write_image(&sample_params(&text, b"ababab", &symbols, &strtab, Some(8)));

        let image = Image::load(&bytes).unwrap();
        assert_eq!(image.header.ftype, file_type::EXECUTABLE);
        assert_eq!(image.text_words().unwrap(), text);
        assert_eq!(image.entry_point(), Some(8));

        let rodata = image.find_fragment(section_name::RODATA).unwrap();
        assert_eq!(rodata.data, b"ababab");

        let loaded = image.symbols().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(image.symbol_name(&loaded[1]).unwrap(), "main");
        assert_eq!(image.symbol_name(&loaded[2]).unwrap(), "msg");
    }

    #[test]
    fn function_symbols_get_text_section_index() {
        let text = [0u64; 2];
        let (symbols, strtab) = sample_symbols();
        let bytes = write_image(&sample_params(&text, b"x", &symbols, &strtab, None));
        let image = Image::load(&bytes).unwrap();

        let text_ndx = image.find_fragment(section_name::TEXT).unwrap().index as u16;
        let rodata_ndx = image.find_fragment(section_name::RODATA).unwrap().index as u16;

        let loaded = image.symbols().unwrap();
        assert_eq!(loaded[1].shndx, text_ndx);
        assert_eq!(loaded[2].shndx, rodata_ndx);
    }

    #[test]
    fn function_table_maps_offsets_to_names() {
        let text = [0u64; 4];
        let (symbols, strtab) = sample_symbols();
        let bytes = write_image(&sample_params(&text, &[], &symbols, &strtab, Some(8)));
        let image = Image::load(&bytes).unwrap();

        let table = image.function_table().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&8), Some(&("main".to_string(), 16)));
    }

    #[test]
    fn relocations_roundtrip() {
        let text = [0u64; 3];
        let (symbols, strtab) = sample_symbols();
        let relocations = [
            Relocation::new(8, 1, RelocKind::JumpSlot),
            Relocation::new(16, 2, RelocKind::Object),
        ];
        let mut params = sample_params(&text, &[], &symbols, &strtab, None);
        params.relocations = Some(&relocations);
        let bytes = write_image(&params);

        let image = Image::load(&bytes).unwrap();
        let loaded = image.relocations().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].symbol(), 1);
        assert_eq!(loaded[0].kind(), Some(RelocKind::JumpSlot));
        assert_eq!(loaded[1].kind(), Some(RelocKind::Object));
        assert!(loaded.iter().all(|rel| rel.offset % 8 == 0));
    }

    #[test]
    fn image_without_entry_is_relocatable() {
        let text = [0u64];
        let (symbols, strtab) = sample_symbols();
        let bytes = write_image(&sample_params(&text, &[], &symbols, &strtab, None));
        let image = Image::load(&bytes).unwrap();
        assert_eq!(image.header.ftype, file_type::RELOCATABLE);
        assert_eq!(image.entry_point(), None);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let text = [0u64];
        let (symbols, strtab) = sample_symbols();
        let mut bytes = write_image(&sample_params(&text, &[], &symbols, &strtab, None));
        bytes[1] = b'X';
        assert!(matches!(
            Image::load(&bytes),
            Err(ArchError::InvalidMagic)
        ));
    }

    #[test]
    fn load_rejects_wrong_class_and_order() {
        let text = [0u64];
        let (symbols, strtab) = sample_symbols();
        let good = write_image(&sample_params(&text, &[], &symbols, &strtab, None));

        let mut bad_class = good.clone();
        bad_class[8] = 1;
        assert!(matches!(
            Image::load(&bad_class),
            Err(ArchError::BadFileClass(1))
        ));

        let mut bad_order = good;
        bad_order[9] = 2;
        assert!(matches!(
            Image::load(&bad_order),
            Err(ArchError::BadByteOrder(2))
        ));
    }

    #[test]
    fn load_rejects_truncated_image() {
        let text = [0u64; 8];
        let (symbols, strtab) = sample_symbols();
        let bytes = write_image(&sample_params(&text, &[], &symbols, &strtab, None));
        let truncated = &bytes[..bytes.len() - 16];
        assert!(Image::load(truncated).is_err());
    }

    #[test]
    fn string_tables_start_with_zero() {
        let text = [0u64];
        let (symbols, strtab) = sample_symbols();
        assert_eq!(strtab[0], 0);
        let bytes = write_image(&sample_params(&text, &[], &symbols, &strtab, None));
        let image = Image::load(&bytes).unwrap();
        let strtab = image.find_fragment(section_name::STRTAB).unwrap();
        let shstrtab = image.find_fragment(section_name::SHSTRTAB).unwrap();
        assert_eq!(strtab.data[0], 0);
        assert_eq!(shstrtab.data[0], 0);
    }

    #[test]
    fn symbol_info_packing() {
        let symbol = Symbol::new(1, binding::GLOBAL, symbol_type::FUNC);
        assert_eq!(symbol.binding(), binding::GLOBAL);
        assert_eq!(symbol.symbol_type(), symbol_type::FUNC);
        assert!(symbol.is_function());
        assert!(!symbol.is_object());
    }

    #[test]
    fn text_segment_is_read_execute() {
        let text = [0u64; 2];
        let (symbols, strtab) = sample_symbols();
        let bytes = write_image(&sample_params(&text, b"d", &symbols, &strtab, None));
        let image = Image::load(&bytes).unwrap();
        let text_frag = image.find_fragment(section_name::TEXT).unwrap();
        let seg = text_frag.segment.expect("text must be loadable");
        assert_eq!(seg.stype, segment_type::LOAD);
        assert_eq!(seg.flags, segment_flags::R | segment_flags::X);

        let rodata_frag = image.find_fragment(section_name::RODATA).unwrap();
        let seg = rodata_frag.segment.expect("rodata must be loadable");
        assert_eq!(seg.flags, segment_flags::R);
    }
}
