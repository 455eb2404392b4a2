//! Control-flow exploration.
//!
//! Starting from the header's initial PC, follow every branch, fallthrough
//! and constant jump, and queue every routine called with a constant
//! address. Once everything reachable is decoded, routines are assembled
//! from their locals tables and the instructions that follow them, the
//! globals table is sized from the highest global referenced, and whatever
//! is left over becomes data.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexSet;
use log::{debug, info, warn};
use thiserror::Error;

use crate::chunk::{Chunk, DataChunk, GlobalsChunk, RoutineChunk};
use crate::config::DisasmConfig;
use crate::error::Result;
use crate::header::{Header, HEADER_SIZE};
use crate::instruction::{DecodeError, Instruction};
use crate::interval_map::{Coalesced, IntervalMap};
use crate::version::ZVersion;

/// Problems with the story file that exploration works around.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    #[error(transparent)]
    Malformed(#[from] DecodeError),

    #[error("instruction at {from:#07x} targets {target:#x}, outside the story file")]
    TargetOutOfRange { from: usize, target: i64 },

    #[error("routine at {address:#07x} lies outside the story file")]
    RoutineOutOfRange { address: usize },
}

impl Diagnostic {
    pub fn address(&self) -> usize {
        match self {
            Diagnostic::Malformed(e) => e.address(),
            Diagnostic::TargetOutOfRange { from, .. } => *from,
            Diagnostic::RoutineOutOfRange { address } => *address,
        }
    }
}

/// Header addresses worth labelling, in the order labels are emitted.
#[derive(Debug, Clone)]
pub struct Landmarks {
    entries: Vec<(&'static str, usize)>,
}

impl Landmarks {
    pub fn from_header(header: &Header) -> Landmarks {
        let entries = vec![
            ("ALPHABET", header.alphabet_table as usize),
            ("ENDLOD", header.end_lod as usize),
            ("HDREXT", header.extension_table as usize),
            ("WORDS", header.words as usize),
            ("GLOBAL", header.globals as usize),
            ("IMPURE", header.impure as usize),
            ("OBJECT", header.objects as usize),
            ("ROUTINES", header.routine_offset as usize * 8),
            ("START", header.start as usize),
            ("STRINGS", header.string_offset as usize * 8),
            ("TCHARS", header.tchars_table as usize),
            ("VOCAB", header.vocab as usize),
        ];
        Landmarks { entries }
    }

    /// Labels for a chunk starting at `address`. Address 0 is the header,
    /// where unset table pointers also point, so it never gets a label.
    pub fn labels_at(&self, address: usize) -> Vec<&'static str> {
        if address == 0 {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|(_, a)| *a == address)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Result of exploring a story file.
#[derive(Debug)]
pub struct StoryMap {
    pub header: Header,
    pub version: ZVersion,
    /// Every byte of the file, classified. Zero padding may be left out.
    pub chunks: IntervalMap<Chunk>,
    pub landmarks: Landmarks,
    /// Routine entry points, in discovery order
    pub routines: Vec<usize>,
    pub diagnostics: Vec<Diagnostic>,
}

impl StoryMap {
    pub fn chunk_at(&self, address: usize) -> Option<&Chunk> {
        self.chunks.get(address).map(|i| &i.value)
    }
}

/// Explore `memory` and classify all of it.
pub fn explore(memory: &[u8], config: &DisasmConfig) -> Result<StoryMap> {
    let mut explorer = Explorer::new(memory, config)?;
    explorer.follow_flow()?;
    explorer.compose_routines()?;
    explorer.add_globals()?;
    if config.mark_boundaries {
        explorer.mark_boundaries()?;
    }
    explorer.fill_gaps(config.drop_zero_padding)?;
    Ok(explorer.finish())
}

struct Explorer<'a> {
    memory: &'a [u8],
    header: Header,
    version: ZVersion,
    chunks: IntervalMap<Chunk>,
    todo: Vec<usize>,
    pending: VecDeque<usize>,
    explored: IndexSet<usize>,
    /// Locals byte assumed in front of the entry point, until a call confirms it
    entry_guess: Option<usize>,
    max_global: u8,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Explorer<'a> {
    fn new(memory: &'a [u8], config: &DisasmConfig) -> Result<Self> {
        let header = Header::parse(memory)?;
        let version = ZVersion::new(config.version.unwrap_or(header.version))?;

        let declared = header.file_length(version.size_factor());
        if declared != 0 && declared != memory.len() {
            info!(
                "Header declares {} bytes but the story file has {}",
                declared,
                memory.len()
            );
        }

        let mut chunks = IntervalMap::new();
        chunks.insert(0, HEADER_SIZE, Chunk::Header(header.clone()))?;

        let mut explorer = Explorer {
            memory,
            header,
            version,
            chunks,
            todo: Vec::new(),
            pending: VecDeque::new(),
            explored: IndexSet::new(),
            entry_guess: None,
            max_global: 0,
            diagnostics: Vec::new(),
        };
        explorer.seed();
        Ok(explorer)
    }

    /// Queue the entry point. V6 and V7 name a packed main routine; earlier
    /// versions give the address of the first instruction, which is usually
    /// preceded by the header byte of a routine with no locals.
    fn seed(&mut self) {
        let start = self.header.start as usize;
        if matches!(self.version.get(), 6 | 7) {
            let main = self
                .version
                .unpack_address(self.header.start, self.header.routine_offset);
            debug!("Main routine at {:05x}", main);
            self.pending.push_back(main);
            return;
        }

        self.todo.push(start);
        if start > HEADER_SIZE && self.memory.get(start - 1) == Some(&0) {
            debug!("Entry point {:05x} follows an empty locals table", start);
            self.explored.insert(start - 1);
            self.entry_guess = Some(start - 1);
        }
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    fn push_target(&mut self, from: usize, target: i64) {
        match usize::try_from(target) {
            Ok(t) if t < self.memory.len() => self.todo.push(t),
            _ => self.report(Diagnostic::TargetOutOfRange { from, target }),
        }
    }

    /// Decode everything reachable, draining the current routine's flow
    /// before opening the next queued call target.
    fn follow_flow(&mut self) -> Result<()> {
        loop {
            while let Some(pc) = self.todo.pop() {
                self.step(pc)?;
            }
            match self.pending.pop_front() {
                Some(address) => self.open_routine(address),
                None => break,
            }
        }
        debug!(
            "Flow exploration found {} routines, highest global {}",
            self.explored.len(),
            self.max_global
        );
        Ok(())
    }

    fn step(&mut self, pc: usize) -> Result<()> {
        if self.chunks.contains(pc) {
            return Ok(());
        }

        let inst = match Instruction::decode(self.memory, pc, &self.version) {
            Ok(inst) => inst,
            Err(e) => {
                self.report(e.into());
                return Ok(());
            }
        };

        if let Some(global) = inst.variables().into_iter().filter(|&v| v >= 16).max() {
            self.max_global = self.max_global.max(global);
        }

        for target in inst.flow_successors() {
            self.push_target(pc, target);
        }
        if let Some(callee) = inst.call_target(&self.version, self.header.routine_offset) {
            self.pending.push_back(callee);
        }

        self.chunks.insert(pc, inst.length, Chunk::Instruction(inst))
    }

    fn locals_count(&self, address: usize) -> Option<usize> {
        self.memory.get(address).map(|&n| n as usize)
    }

    /// Bytes taken by the locals table of a routine with `count` locals
    fn routine_header_length(&self, count: usize) -> usize {
        if self.version.get() < 5 {
            1 + 2 * count
        } else {
            1
        }
    }

    fn open_routine(&mut self, address: usize) {
        if self.entry_guess == Some(address) {
            self.entry_guess = None;
        }
        if self.explored.contains(&address) {
            return;
        }
        let Some(count) = self.locals_count(address) else {
            self.report(Diagnostic::RoutineOutOfRange { address });
            return;
        };

        debug!("Exploring routine at {:05x} ({} locals)", address, count);
        self.explored.insert(address);
        let code = address + self.routine_header_length(count);
        self.push_target(address, code as i64);
    }

    fn compose_routines(&mut self) -> Result<()> {
        if let Some(guess) = self.entry_guess {
            if self.chunks.contains(guess) {
                debug!("No locals table in front of the entry point after all");
                self.explored.shift_remove(&guess);
            }
        }

        let routines: Vec<usize> = self.explored.iter().copied().collect();
        for address in routines {
            self.compose_routine(address)?;
        }
        Ok(())
    }

    /// Insert the routine's locals table and fuse it with the instructions
    /// that directly follow it. A locals table overlapping decoded code is
    /// an error.
    fn compose_routine(&mut self, address: usize) -> Result<()> {
        let count = self.locals_count(address).unwrap_or(0);
        let header_length = self.routine_header_length(count);
        let code_start = address + header_length;

        if code_start > self.memory.len() {
            self.report(Diagnostic::RoutineOutOfRange { address });
            return Ok(());
        }

        let locals = if self.version.get() < 5 {
            self.memory[address + 1..code_start]
                .chunks_exact(2)
                .map(|w| u16::from_be_bytes([w[0], w[1]]))
                .collect()
        } else {
            vec![0; count]
        };

        let extent_end = self.measure_extents(code_start).1.max(code_start);

        self.chunks.insert(
            address,
            header_length,
            Chunk::Routine(RoutineChunk::new(address, header_length, locals)),
        )?;
        self.chunks
            .coalesce(address, extent_end - address, |left, right| match (left, right) {
                (Chunk::Routine(mut r), Chunk::Instruction(i)) => {
                    r.body.push(Chunk::Instruction(i));
                    Coalesced::Fused(Chunk::Routine(r))
                }
                (Chunk::Compound(mut c), Chunk::Instruction(i)) => {
                    c.push(Chunk::Instruction(i));
                    Coalesced::Fused(Chunk::Compound(c))
                }
                (left, right) => Coalesced::Kept(left, right),
            });
        Ok(())
    }

    /// Lowest start and one past the highest end of the instructions
    /// reachable from `start` without following calls. Returns
    /// `(start, start)` when nothing is decoded there.
    fn measure_extents(&self, start: usize) -> (usize, usize) {
        let mut visited = HashSet::new();
        let mut todo = vec![start as i64];
        let (mut min, mut end) = (start, start);

        while let Some(addr) = todo.pop() {
            let Ok(addr) = usize::try_from(addr) else {
                continue;
            };
            if !visited.insert(addr) {
                continue;
            }
            let Some(Chunk::Instruction(inst)) = self.chunks.get(addr).map(|i| &i.value) else {
                continue;
            };
            min = min.min(inst.address);
            end = end.max(inst.end());
            todo.extend(inst.flow_successors());
        }
        (min, end)
    }

    fn add_globals(&mut self) -> Result<()> {
        let count = self.max_global.saturating_sub(15) as usize;
        if count == 0 {
            return Ok(());
        }

        let start = self.header.globals as usize;
        let globals = GlobalsChunk::from_memory(self.memory, start, count);
        if globals.values.len() < count {
            warn!(
                "Globals table at {:05x} needs {} entries but the file ends after {}",
                start,
                count,
                globals.values.len()
            );
        }
        if globals.values.is_empty() {
            return Ok(());
        }
        debug!("Globals table at {:05x}: {} entries", start, globals.values.len());
        let length = 2 * globals.values.len();
        self.chunks.insert(start, length, Chunk::Globals(globals))
    }

    /// Split data at the end of preloaded memory and the end of dynamic
    /// memory so those addresses start a chunk of their own.
    fn mark_boundaries(&mut self) -> Result<()> {
        for address in [self.header.end_lod as usize, self.header.impure as usize] {
            if address >= self.memory.len() {
                warn!("Memory boundary {:05x} is past the end of the file", address);
                continue;
            }
            if !self.chunks.contains(address) {
                let data = DataChunk::from_memory(self.memory, address, 1);
                self.chunks.insert(address, 1, Chunk::Data(data))?;
            }
        }
        Ok(())
    }

    /// Turn every uncovered range into data, except short runs of zeros that
    /// only exist to align the chunk after them.
    fn fill_gaps(&mut self, drop_zero_padding: bool) -> Result<()> {
        let packing = self.version.packing_factor();
        for gap in self.chunks.find_gaps(0, self.memory.len()) {
            let data = DataChunk::from_memory(self.memory, gap.start, gap.length);

            let is_padding = drop_zero_padding
                && data.is_zero()
                && self
                    .chunks
                    .get(gap.end())
                    .map_or(false, |next| gap.length < next.value.alignment(packing));
            if is_padding {
                debug!("Dropping {} bytes of padding at {:05x}", gap.length, gap.start);
                continue;
            }

            self.chunks.insert(gap.start, gap.length, Chunk::Data(data))?;
        }
        Ok(())
    }

    fn finish(self) -> StoryMap {
        StoryMap {
            landmarks: Landmarks::from_header(&self.header),
            header: self.header,
            version: self.version,
            chunks: self.chunks,
            routines: self.explored.into_iter().collect(),
            diagnostics: self.diagnostics,
        }
    }
}
