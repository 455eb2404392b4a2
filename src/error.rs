// Disassembler error handling

use std::fmt;
use thiserror::Error;

/// Features the disassembler deliberately does not implement. Hitting one of
/// these is reported as an error instead of producing approximate output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedFeature {
    /// Z-character codes 1-3 reference the abbreviation table.
    Abbreviation { code: u8 },
    /// The header names a custom alphabet table (V5+).
    CustomAlphabet { table: u16 },
    /// Text decoding is only implemented for V3 and later.
    TextVersion { version: u8 },
}

impl fmt::Display for UnsupportedFeature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnsupportedFeature::Abbreviation { code } => {
                write!(f, "abbreviation reference (z-char {})", code)
            }
            UnsupportedFeature::CustomAlphabet { table } => {
                write!(f, "custom alphabet table at {:#06x}", table)
            }
            UnsupportedFeature::TextVersion { version } => {
                write!(f, "text decoding for version {}", version)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum DisasmError {
    #[error("interval {start:#07x}+{length} overlaps existing interval {existing_start:#07x}+{existing_length}")]
    Overlap {
        start: usize,
        length: usize,
        existing_start: usize,
        existing_length: usize,
    },

    #[error("interval at {start:#07x} must have positive length")]
    EmptyInterval { start: usize },

    #[error("only versions 3-8 are supported (got {0})")]
    UnsupportedVersion(u8),

    #[error("address {address:#07x} cannot be packed for version {version}")]
    AddressOutOfRange { address: usize, version: u8 },

    #[error("story file is {0} bytes, too small for a 64-byte header")]
    TruncatedHeader(usize),

    #[error("unsupported: {0}")]
    Unsupported(UnsupportedFeature),

    #[error("bad z-character word: {0}")]
    ZChars(#[from] bitreader::BitReaderError),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<UnsupportedFeature> for DisasmError {
    fn from(feature: UnsupportedFeature) -> Self {
        DisasmError::Unsupported(feature)
    }
}

impl From<toml::de::Error> for DisasmError {
    fn from(e: toml::de::Error) -> Self {
        DisasmError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DisasmError>;
