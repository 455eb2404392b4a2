use std::fmt::Display;
use std::fmt::Error;
use std::fmt::Formatter;

use sub_array::SubArray;

use crate::error::{DisasmError, Result};

/// Size of the fixed story file header.
pub const HEADER_SIZE: usize = 64;

/// The 64-byte preamble of a story file. Fields marked "set by interpreter"
/// are normally zero in a story file on disk but are decoded anyway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub flags1: u8,
    pub release: u16,
    /// Base of high memory (end of preloaded data)
    pub end_lod: u16,
    /// Initial program counter
    pub start: u16,
    pub vocab: u16,
    pub objects: u16,
    pub globals: u16,
    /// Base of static memory (end of dynamic memory)
    pub impure: u16,
    pub flags2: u16,
    pub serial: [u8; 6],
    /// Abbreviation table
    pub words: u16,
    /// File length, divided by the version's size factor
    pub length: u16,
    pub checksum: u16,
    // set by interpreter
    pub interpreter_number: u8,
    pub interpreter_version: u8,
    pub screen_rows: u8,
    pub screen_columns: u8,
    pub screen_width: u16,
    pub screen_height: u16,
    pub font_width: u8,
    pub font_height: u8,
    /// V6-7 routine offset, in units of 8 bytes
    pub routine_offset: u16,
    /// V6-7 string offset, in units of 8 bytes
    pub string_offset: u16,
    // set by interpreter
    pub default_bg: u8,
    pub default_fg: u8,
    pub tchars_table: u16,
    // set by interpreter
    pub buffer_width: u16,
    pub standard_revision: u16,
    pub alphabet_table: u16,
    pub extension_table: u16,
    // set by interpreter
    pub username: [u8; 4],
    pub creator: [u8; 4],
}

fn word(bytes: &[u8; HEADER_SIZE], offset: usize) -> u16 {
    u16::from_be_bytes(*bytes.sub_array_ref::<2>(offset))
}

impl Header {
    /// Parse the header from the start of a story image.
    pub fn parse(memory: &[u8]) -> Result<Header> {
        let bytes: &[u8; HEADER_SIZE] = memory
            .get(..HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(DisasmError::TruncatedHeader(memory.len()))?;

        Ok(Header {
            version: bytes[0x00],
            flags1: bytes[0x01],
            release: word(bytes, 0x02),
            end_lod: word(bytes, 0x04),
            start: word(bytes, 0x06),
            vocab: word(bytes, 0x08),
            objects: word(bytes, 0x0A),
            globals: word(bytes, 0x0C),
            impure: word(bytes, 0x0E),
            flags2: word(bytes, 0x10),
            serial: *bytes.sub_array_ref::<6>(0x12),
            words: word(bytes, 0x18),
            length: word(bytes, 0x1A),
            checksum: word(bytes, 0x1C),
            interpreter_number: bytes[0x1E],
            interpreter_version: bytes[0x1F],
            screen_rows: bytes[0x20],
            screen_columns: bytes[0x21],
            screen_width: word(bytes, 0x22),
            screen_height: word(bytes, 0x24),
            font_width: bytes[0x26],
            font_height: bytes[0x27],
            routine_offset: word(bytes, 0x28),
            string_offset: word(bytes, 0x2A),
            default_bg: bytes[0x2C],
            default_fg: bytes[0x2D],
            tchars_table: word(bytes, 0x2E),
            buffer_width: word(bytes, 0x30),
            standard_revision: word(bytes, 0x32),
            alphabet_table: word(bytes, 0x34),
            extension_table: word(bytes, 0x36),
            username: *bytes.sub_array_ref::<4>(0x38),
            creator: *bytes.sub_array_ref::<4>(0x3C),
        })
    }

    /// Serial number as text (normally six ASCII digits, YYMMDD)
    pub fn serial_string(&self) -> String {
        self.serial.iter().map(|&b| b as char).collect()
    }

    /// File length in bytes as declared by the header.
    pub fn file_length(&self, size_factor: usize) -> usize {
        self.length as usize * size_factor
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::result::Result<(), Error> {
        write!(
            f,
            "
Z-code version:           {}
Interpreter flags:        {:#04x}
Release number:           {}
Size of resident memory:  {:#06x}
Start PC:                 {:#06x}
Dictionary address:       {:#06x}
Object table address:     {:#06x}
Global variables address: {:#06x}
Size of dynamic memory:   {:#06x}
Game flags:               {:#06x}
Serial number:            {}
Abbreviations address:    {:#06x}
File size word:           {:#06x}
Checksum:                 {:#06x}
",
            self.version,
            self.flags1,
            self.release,
            self.end_lod,
            self.start,
            self.vocab,
            self.objects,
            self.globals,
            self.impure,
            self.flags2,
            self.serial_string(),
            self.words,
            self.length,
            self.checksum,
        )?;
        if self.version >= 5 {
            write!(
                f,
                "Alphabet table:           {:#06x}
Header extension:         {:#06x}
Terminating chars table:  {:#06x}
",
                self.alphabet_table, self.extension_table, self.tchars_table,
            )?;
        }
        if self.version == 6 || self.version == 7 {
            write!(
                f,
                "Routines offset:          {:#06x}
Strings offset:           {:#06x}
",
                self.routine_offset, self.string_offset,
            )?;
        }
        Ok(())
    }
}
