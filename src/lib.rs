#![crate_name = "zdasm"]

#[macro_use]
extern crate lazy_static;

pub mod chunk;
pub mod config;
pub mod error;
pub mod explorer;
pub mod header;
pub mod instruction;
pub mod interval_map;
pub mod opcode_tables;
pub mod text;
pub mod version;

pub use chunk::Chunk;
pub use config::DisasmConfig;
pub use error::{DisasmError, Result, UnsupportedFeature};
pub use explorer::{explore, Diagnostic, Landmarks, StoryMap};
pub use header::Header;
pub use instruction::{DecodeError, Instruction};
pub use interval_map::IntervalMap;
pub use version::ZVersion;
