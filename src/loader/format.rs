//! EBIN module format.
//!
//! Layout (all fields little-endian):
//!
//! ```text
//! +--------------------+ 0
//! | header (60 bytes)  |
//! +--------------------+ reloc_offset
//! | relocations (8 B)  |
//! +--------------------+ code_offset
//! | code               |
//! +--------------------+ data_offset
//! | data               |
//! +--------------------+ symbol_offset
//! | symbols (32 B)     |  optional
//! +--------------------+
//! ```

use bitflags::bitflags;
use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::sequence::tuple;
use nom::IResult;

use crate::component::ComponentKind;
use crate::error::{CoreError, Result};

/// "EBIN" read as a little-endian word.
pub const MAGIC: u32 = u32::from_le_bytes(*b"EBIN");

/// Fixed header size.
pub const HEADER_SIZE: usize = 60;

/// Format version written by [`ModuleBuilder`].
pub const FORMAT_VERSION: u16 = 1;

/// Highest format version this loader reads.
pub const MAX_FORMAT_VERSION: u16 = 1;

/// Relocation entry size.
pub const RELOC_ENTRY_SIZE: usize = 8;

/// Symbol entry size.
pub const SYMBOL_ENTRY_SIZE: usize = 32;

/// Maximum symbol name length (NUL padded).
pub const SYMBOL_NAME_LEN: usize = 24;

/// Section selector: code.
pub const SECTION_CODE: u8 = 0;

/// Section selector: data.
pub const SECTION_DATA: u8 = 1;

bitflags! {
    /// Module feature flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModuleFlags: u32 {
        /// A symbol table follows the data section
        const HAS_SYMBOLS = 0x0000_0001;
        /// Built with debug information
        const DEBUG = 0x0000_0002;
        /// Sections are compressed
        const COMPRESSED = 0x0000_0004;
    }
}

/// Interface version, packed as `major << 16 | minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceVersion {
    /// Incompatible changes
    pub major: u16,
    /// Backward-compatible additions
    pub minor: u16,
}

impl InterfaceVersion {
    /// Interface version of the components this crate provides.
    pub const CURRENT: InterfaceVersion = InterfaceVersion::new(1, 0);

    /// Construct from parts.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Packed header encoding.
    pub const fn packed(self) -> u32 {
        ((self.major as u32) << 16) | self.minor as u32
    }

    /// Decode a packed header field.
    pub const fn from_packed(packed: u32) -> Self {
        Self {
            major: (packed >> 16) as u16,
            minor: packed as u16,
        }
    }

    /// True if an image declaring `self` satisfies `required`: same major,
    /// minor at least the required minor.
    pub fn satisfies(self, required: InterfaceVersion) -> bool {
        self.major == required.major && self.minor >= required.minor
    }
}

impl std::fmt::Display for InterfaceVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Decoded module header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHeader {
    /// Magic word
    pub magic: u32,
    /// Format version
    pub version: u16,
    /// Raw component kind
    pub kind: u16,
    /// Raw flag word
    pub flags: u32,
    /// Code section size
    pub code_size: u32,
    /// Data section size
    pub data_size: u32,
    /// Zero-initialized section size
    pub bss_size: u32,
    /// Entry point, relative to the code section
    pub entry_offset: u32,
    /// Interface version the image targets (packed)
    pub interface_version: u32,
    /// Working memory the component needs
    pub min_memory: u32,
    /// Relocation entries
    pub reloc_count: u32,
    /// File offset of the relocation table
    pub reloc_offset: u32,
    /// File offset of the code section
    pub code_offset: u32,
    /// File offset of the data section
    pub data_offset: u32,
    /// File offset of the symbol table
    pub symbol_offset: u32,
    /// Symbol entries
    pub symbol_count: u32,
}

fn header_fields(input: &[u8]) -> IResult<&[u8], ModuleHeader> {
    let (input, (magic, version, kind, flags)) = tuple((le_u32, le_u16, le_u16, le_u32))(input)?;
    let (input, (code_size, data_size, bss_size, entry_offset)) =
        tuple((le_u32, le_u32, le_u32, le_u32))(input)?;
    let (input, (interface_version, min_memory, reloc_count, reloc_offset)) =
        tuple((le_u32, le_u32, le_u32, le_u32))(input)?;
    let (input, (code_offset, data_offset, symbol_offset, symbol_count)) =
        tuple((le_u32, le_u32, le_u32, le_u32))(input)?;
    Ok((
        input,
        ModuleHeader {
            magic,
            version,
            kind,
            flags,
            code_size,
            data_size,
            bss_size,
            entry_offset,
            interface_version,
            min_memory,
            reloc_count,
            reloc_offset,
            code_offset,
            data_offset,
            symbol_offset,
            symbol_count,
        },
    ))
}

/// Bounds check a table or section against the file length.
fn check_span(what: &str, offset: u32, len: u64, file_len: usize) -> Result<()> {
    let end = u64::from(offset) + len;
    if end > file_len as u64 {
        log::debug!("{what} extends past end of file ({end} > {file_len})");
        return Err(CoreError::InvalidSize {
            what: "module section",
            expected: end as usize,
            actual: file_len,
        });
    }
    Ok(())
}

impl ModuleHeader {
    /// Decode the fixed header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CoreError::InvalidSize {
                what: "module header",
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        header_fields(data)
            .map(|(_, header)| header)
            .map_err(|e| CoreError::InvalidArgument(format!("malformed module header: {e}")))
    }

    /// Validate header fields and section bounds for a file of `file_len` bytes.
    pub fn validate(&self, file_len: usize) -> Result<()> {
        if self.magic != MAGIC {
            return Err(CoreError::InvalidArgument(format!(
                "bad module magic 0x{:08X}",
                self.magic
            )));
        }
        if self.version > MAX_FORMAT_VERSION {
            return Err(CoreError::Unsupported(format!(
                "module format version {} (max {})",
                self.version, MAX_FORMAT_VERSION
            )));
        }
        if self.component_kind().is_none() {
            return Err(CoreError::InvalidArgument(format!(
                "component kind {} out of range",
                self.kind
            )));
        }
        if self.code_size == 0 {
            return Err(CoreError::InvalidSize {
                what: "code section",
                expected: 1,
                actual: 0,
            });
        }
        if (self.code_offset as usize) < HEADER_SIZE {
            return Err(CoreError::InvalidArgument(format!(
                "code offset {} overlaps the header",
                self.code_offset
            )));
        }
        if self.entry_offset >= self.code_size {
            return Err(CoreError::InvalidArgument(format!(
                "entry offset {} outside code section of {} bytes",
                self.entry_offset, self.code_size
            )));
        }

        check_span("code", self.code_offset, u64::from(self.code_size), file_len)?;
        check_span("data", self.data_offset, u64::from(self.data_size), file_len)?;
        check_span(
            "relocation table",
            self.reloc_offset,
            u64::from(self.reloc_count) * RELOC_ENTRY_SIZE as u64,
            file_len,
        )?;
        if self.flags().contains(ModuleFlags::HAS_SYMBOLS) {
            check_span(
                "symbol table",
                self.symbol_offset,
                u64::from(self.symbol_count) * SYMBOL_ENTRY_SIZE as u64,
                file_len,
            )?;
        }
        Ok(())
    }

    /// Decoded component kind.
    pub fn component_kind(&self) -> Option<ComponentKind> {
        ComponentKind::from_code(self.kind)
    }

    /// Decoded flags (unknown bits dropped).
    pub fn flags(&self) -> ModuleFlags {
        ModuleFlags::from_bits_truncate(self.flags)
    }

    /// Decoded interface version.
    pub fn interface(&self) -> InterfaceVersion {
        InterfaceVersion::from_packed(self.interface_version)
    }

    /// Code + data + bss rounded up to 8 bytes.
    pub fn allocation_size(&self) -> usize {
        let total =
            u64::from(self.code_size) + u64::from(self.data_size) + u64::from(self.bss_size);
        ((total + 7) & !7) as usize
    }

    /// Encode to the 60-byte on-disk form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.kind.to_le_bytes());
        let longs = [
            self.flags,
            self.code_size,
            self.data_size,
            self.bss_size,
            self.entry_offset,
            self.interface_version,
            self.min_memory,
            self.reloc_count,
            self.reloc_offset,
            self.code_offset,
            self.data_offset,
            self.symbol_offset,
            self.symbol_count,
        ];
        for (i, v) in longs.iter().enumerate() {
            let at = 8 + i * 4;
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Raw relocation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocEntry {
    /// Byte offset inside the target section
    pub offset: u32,
    /// Raw relocation kind (see [`RelocKind`](super::reloc::RelocKind))
    pub kind: u8,
    /// Target section (0 code, 1 data)
    pub section: u8,
}

fn reloc_entry(input: &[u8]) -> IResult<&[u8], RelocEntry> {
    let (input, (offset, kind, section, _reserved)) =
        tuple((le_u32, le_u8, le_u8, le_u16))(input)?;
    Ok((
        input,
        RelocEntry {
            offset,
            kind,
            section,
        },
    ))
}

/// Decode the relocation table described by `header`.
pub fn parse_relocations(data: &[u8], header: &ModuleHeader) -> Result<Vec<RelocEntry>> {
    let start = header.reloc_offset as usize;
    let mut input = data
        .get(start..)
        .ok_or_else(|| CoreError::InvalidArgument("relocation table offset past end".into()))?;
    let mut entries = Vec::with_capacity(header.reloc_count as usize);
    for _ in 0..header.reloc_count {
        let (rest, entry) = reloc_entry(input)
            .map_err(|e| CoreError::InvalidArgument(format!("truncated relocation table: {e}")))?;
        entries.push(entry);
        input = rest;
    }
    Ok(entries)
}

/// Symbol table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Offset inside its section
    pub offset: u32,
    /// Section (0 code, 1 data)
    pub section: u8,
    /// Name, NUL padding stripped
    pub name: String,
}

fn symbol_entry(input: &[u8]) -> IResult<&[u8], Symbol> {
    let (input, (offset, section, _reserved, raw_name)) =
        tuple((le_u32, le_u8, take(3usize), take(SYMBOL_NAME_LEN)))(input)?;
    let len = raw_name
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(SYMBOL_NAME_LEN);
    let name = String::from_utf8_lossy(&raw_name[..len]).into_owned();
    Ok((
        input,
        Symbol {
            offset,
            section,
            name,
        },
    ))
}

/// Decode the symbol table, if the header declares one.
pub fn parse_symbols(data: &[u8], header: &ModuleHeader) -> Result<Vec<Symbol>> {
    if !header.flags().contains(ModuleFlags::HAS_SYMBOLS) || header.symbol_count == 0 {
        return Ok(Vec::new());
    }
    let start = header.symbol_offset as usize;
    let mut input = data
        .get(start..)
        .ok_or_else(|| CoreError::InvalidArgument("symbol table offset past end".into()))?;
    let mut symbols = Vec::with_capacity(header.symbol_count as usize);
    for _ in 0..header.symbol_count {
        let (rest, symbol) = symbol_entry(input)
            .map_err(|e| CoreError::InvalidArgument(format!("truncated symbol table: {e}")))?;
        symbols.push(symbol);
        input = rest;
    }
    Ok(symbols)
}

/// Assembles EBIN images.
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    kind: ComponentKind,
    code: Vec<u8>,
    data: Vec<u8>,
    bss_size: u32,
    entry: Option<(String, u32)>,
    interface: InterfaceVersion,
    min_memory: u32,
    flags: ModuleFlags,
    relocations: Vec<RelocEntry>,
    symbols: Vec<Symbol>,
}

impl ModuleBuilder {
    /// Start an image of the given kind.
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            code: Vec::new(),
            data: Vec::new(),
            bss_size: 0,
            entry: None,
            interface: InterfaceVersion::CURRENT,
            min_memory: 0,
            flags: ModuleFlags::empty(),
            relocations: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Code section contents.
    pub fn code(mut self, code: impl Into<Vec<u8>>) -> Self {
        self.code = code.into();
        self
    }

    /// Data section contents.
    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Zero-initialized section size.
    pub fn bss(mut self, size: u32) -> Self {
        self.bss_size = size;
        self
    }

    /// Entry point: a code symbol named `name` at `offset`.
    pub fn entry(mut self, name: impl Into<String>, offset: u32) -> Self {
        self.entry = Some((name.into(), offset));
        self
    }

    /// Declared interface version.
    pub fn interface_version(mut self, version: InterfaceVersion) -> Self {
        self.interface = version;
        self
    }

    /// Declared working-memory requirement.
    pub fn min_memory(mut self, bytes: u32) -> Self {
        self.min_memory = bytes;
        self
    }

    /// Extra flags (HAS_SYMBOLS is managed automatically).
    pub fn flags(mut self, flags: ModuleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Add a relocation entry.
    pub fn relocation(mut self, offset: u32, kind: u8, section: u8) -> Self {
        self.relocations.push(RelocEntry {
            offset,
            kind,
            section,
        });
        self
    }

    /// Add a symbol.
    pub fn symbol(mut self, name: impl Into<String>, section: u8, offset: u32) -> Self {
        self.symbols.push(Symbol {
            offset,
            section,
            name: name.into(),
        });
        self
    }

    /// Encode the image.
    pub fn build(&self) -> Result<Vec<u8>> {
        if self.code.is_empty() {
            return Err(CoreError::InvalidSize {
                what: "code section",
                expected: 1,
                actual: 0,
            });
        }

        let mut symbols = Vec::with_capacity(self.symbols.len() + 1);
        let entry_offset = match &self.entry {
            Some((name, offset)) => {
                symbols.push(Symbol {
                    offset: *offset,
                    section: SECTION_CODE,
                    name: name.clone(),
                });
                *offset
            }
            None => 0,
        };
        symbols.extend(self.symbols.iter().cloned());
        if let Some(long) = symbols.iter().find(|s| s.name.len() > SYMBOL_NAME_LEN) {
            return Err(CoreError::InvalidArgument(format!(
                "symbol name '{}' longer than {} bytes",
                long.name, SYMBOL_NAME_LEN
            )));
        }

        let mut flags = self.flags;
        flags.set(ModuleFlags::HAS_SYMBOLS, !symbols.is_empty());

        let reloc_offset = HEADER_SIZE as u32;
        let code_offset = reloc_offset + (self.relocations.len() * RELOC_ENTRY_SIZE) as u32;
        let data_offset = code_offset + self.code.len() as u32;
        let symbol_offset = data_offset + self.data.len() as u32;

        let header = ModuleHeader {
            magic: MAGIC,
            version: FORMAT_VERSION,
            kind: self.kind.code(),
            flags: flags.bits(),
            code_size: self.code.len() as u32,
            data_size: self.data.len() as u32,
            bss_size: self.bss_size,
            entry_offset,
            interface_version: self.interface.packed(),
            min_memory: self.min_memory,
            reloc_count: self.relocations.len() as u32,
            reloc_offset,
            code_offset,
            data_offset,
            symbol_offset: if symbols.is_empty() { 0 } else { symbol_offset },
            symbol_count: symbols.len() as u32,
        };

        let mut out = Vec::with_capacity(
            symbol_offset as usize + symbols.len() * SYMBOL_ENTRY_SIZE,
        );
        out.extend_from_slice(&header.to_bytes());
        for r in &self.relocations {
            out.extend_from_slice(&r.offset.to_le_bytes());
            out.push(r.kind);
            out.push(r.section);
            out.extend_from_slice(&[0, 0]);
        }
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&self.data);
        for s in &symbols {
            out.extend_from_slice(&s.offset.to_le_bytes());
            out.push(s.section);
            out.extend_from_slice(&[0, 0, 0]);
            let mut name = [0u8; SYMBOL_NAME_LEN];
            name[..s.name.len()].copy_from_slice(s.name.as_bytes());
            out.extend_from_slice(&name);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        ModuleBuilder::new(ComponentKind::Io)
            .code(vec![0x4E, 0x75, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10])
            .data(vec![1, 2, 3, 4])
            .bss(12)
            .entry("mfp68901", 0)
            .relocation(4, 0, SECTION_CODE)
            .symbol("config", SECTION_DATA, 0)
            .build()
            .unwrap()
    }

    #[test]
    fn header_parses_what_builder_wrote() {
        let image = sample();
        let header = ModuleHeader::parse(&image).unwrap();
        header.validate(image.len()).unwrap();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.component_kind(), Some(ComponentKind::Io));
        assert_eq!(header.code_size, 8);
        assert_eq!(header.data_size, 4);
        assert_eq!(header.bss_size, 12);
        assert_eq!(header.allocation_size(), 24);
        assert_eq!(header.code_offset as usize, HEADER_SIZE + RELOC_ENTRY_SIZE);
        assert!(header.flags().contains(ModuleFlags::HAS_SYMBOLS));

        let relocs = parse_relocations(&image, &header).unwrap();
        assert_eq!(
            relocs,
            vec![RelocEntry {
                offset: 4,
                kind: 0,
                section: SECTION_CODE
            }]
        );
        let symbols = parse_symbols(&image, &header).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "mfp68901");
        assert_eq!(symbols[1].name, "config");
        assert_eq!(symbols[1].section, SECTION_DATA);
    }

    #[test]
    fn version_compatibility_rules() {
        let req = InterfaceVersion::new(1, 2);
        assert!(InterfaceVersion::new(1, 2).satisfies(req));
        assert!(InterfaceVersion::new(1, 7).satisfies(req));
        assert!(!InterfaceVersion::new(1, 1).satisfies(req));
        assert!(!InterfaceVersion::new(2, 9).satisfies(req));
        assert!(!InterfaceVersion::new(0, 9).satisfies(req));
        assert_eq!(InterfaceVersion::from_packed(0x0003_0004), InterfaceVersion::new(3, 4));
        assert_eq!(InterfaceVersion::new(3, 4).packed(), 0x0003_0004);
    }

    #[test]
    fn rejects_bad_headers() {
        let image = sample();

        let mut bad = image.clone();
        bad[0] = b'X';
        let header = ModuleHeader::parse(&bad).unwrap();
        assert!(matches!(header.validate(bad.len()), Err(CoreError::InvalidArgument(_))));

        let mut bad = image.clone();
        bad[6] = 9;
        let header = ModuleHeader::parse(&bad).unwrap();
        assert!(header.validate(bad.len()).is_err());

        let header = ModuleHeader::parse(&image).unwrap();
        assert!(matches!(
            header.validate(image.len() - 40),
            Err(CoreError::InvalidSize { .. })
        ));

        assert!(matches!(
            ModuleHeader::parse(&image[..20]),
            Err(CoreError::InvalidSize { expected: 60, .. })
        ));

        let mut overlapping = ModuleHeader::parse(&image).unwrap();
        overlapping.code_offset = 10;
        assert!(overlapping.validate(image.len()).is_err());
    }

    #[test]
    fn builder_requires_code() {
        assert!(ModuleBuilder::new(ComponentKind::Cpu).build().is_err());
    }
}
