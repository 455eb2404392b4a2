use crate::header::{Header, HEADER_SIZE};
use crate::instruction::Instruction;

/// Opaque bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub start: usize,
    pub bytes: Vec<u8>,
}

impl DataChunk {
    /// Copy `length` bytes starting at `start`, clipped to the image.
    pub fn from_memory(memory: &[u8], start: usize, length: usize) -> DataChunk {
        let end = (start + length).min(memory.len());
        DataChunk {
            start,
            bytes: memory.get(start..end).unwrap_or_default().to_vec(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

/// An ordered run of adjacent chunks, optionally led by `preamble` bytes
/// that belong to the compound itself (a routine's locals table).
///
/// `length` is always `preamble` plus the lengths of the children.
#[derive(Debug, Clone)]
pub struct CompoundChunk {
    pub start: usize,
    preamble: usize,
    length: usize,
    children: Vec<Chunk>,
}

impl CompoundChunk {
    pub fn new(start: usize) -> CompoundChunk {
        Self::with_preamble(start, 0)
    }

    pub fn with_preamble(start: usize, preamble: usize) -> CompoundChunk {
        CompoundChunk {
            start,
            preamble,
            length: preamble,
            children: Vec::new(),
        }
    }

    /// Append a chunk that starts where this one ends.
    pub fn push(&mut self, child: Chunk) {
        debug_assert_eq!(child.start(), self.start + self.length);
        self.length += child.len();
        self.children.push(child);
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn preamble(&self) -> usize {
        self.preamble
    }

    pub fn children(&self) -> &[Chunk] {
        &self.children
    }
}

/// A routine: locals table followed by the instructions fused onto it
#[derive(Debug, Clone)]
pub struct RoutineChunk {
    pub body: CompoundChunk,
    /// Initial values of the locals (all zero from V5 on, where the
    /// header stores only the count)
    pub locals: Vec<u16>,
}

impl RoutineChunk {
    pub fn new(start: usize, header_length: usize, locals: Vec<u16>) -> RoutineChunk {
        RoutineChunk {
            body: CompoundChunk::with_preamble(start, header_length),
            locals,
        }
    }

    /// First byte past the locals table
    pub fn code_start(&self) -> usize {
        self.body.start + self.body.preamble()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.body.children().iter().filter_map(|c| match c {
            Chunk::Instruction(inst) => Some(inst),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalsChunk {
    pub start: usize,
    /// Initial values, starting with global 16
    pub values: Vec<u16>,
}

impl GlobalsChunk {
    /// Read `count` words at `start`, stopping early at the end of the image.
    pub fn from_memory(memory: &[u8], start: usize, count: usize) -> GlobalsChunk {
        let values = memory
            .get(start..)
            .unwrap_or_default()
            .chunks_exact(2)
            .take(count)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect();
        GlobalsChunk { start, values }
    }
}

#[derive(Debug, Clone)]
pub enum Chunk {
    Header(Header),
    Data(DataChunk),
    Instruction(Instruction),
    Compound(CompoundChunk),
    Routine(RoutineChunk),
    Globals(GlobalsChunk),
}

impl Chunk {
    pub fn start(&self) -> usize {
        match self {
            Chunk::Header(_) => 0,
            Chunk::Data(d) => d.start,
            Chunk::Instruction(i) => i.address,
            Chunk::Compound(c) => c.start,
            Chunk::Routine(r) => r.body.start,
            Chunk::Globals(g) => g.start,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Chunk::Header(_) => HEADER_SIZE,
            Chunk::Data(d) => d.bytes.len(),
            Chunk::Instruction(i) => i.length,
            Chunk::Compound(c) => c.len(),
            Chunk::Routine(r) => r.body.len(),
            Chunk::Globals(g) => 2 * g.values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end(&self) -> usize {
        self.start() + self.len()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Chunk::Header(_) => "header",
            Chunk::Data(_) => "data",
            Chunk::Instruction(_) => "instruction",
            Chunk::Compound(_) => "compound",
            Chunk::Routine(_) => "routine",
            Chunk::Globals(_) => "globals",
        }
    }

    /// Required start alignment, in bytes
    pub fn alignment(&self, packing_factor: usize) -> usize {
        match self {
            Chunk::Routine(_) => packing_factor,
            _ => 1,
        }
    }

    /// Whether a renderer should leave a blank line between `previous` and
    /// this chunk. Consecutive instructions run together.
    pub fn wants_new_paragraph(&self, previous: &Chunk) -> bool {
        !matches!(
            (self, previous),
            (Chunk::Instruction(_), Chunk::Instruction(_))
        )
    }

    pub fn children(&self) -> &[Chunk] {
        match self {
            Chunk::Compound(c) => c.children(),
            Chunk::Routine(r) => r.body.children(),
            _ => &[],
        }
    }

    /// Depth-first walk; `depth` is 0 for this chunk and grows by one per
    /// level of nesting, so a renderer can tell nested chunks from
    /// top-level ones.
    pub fn visit<F: FnMut(&Chunk, usize)>(&self, f: &mut F) {
        self.visit_at(0, f);
    }

    fn visit_at<F: FnMut(&Chunk, usize)>(&self, depth: usize, f: &mut F) {
        f(self, depth);
        for child in self.children() {
            child.visit_at(depth + 1, f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::ZVersion;
    use test_log::test;

    fn rtrue_at(address: usize) -> Chunk {
        let mut memory = vec![0u8; address + 1];
        memory[address] = 0xB0;
        let zv = ZVersion::new(3).unwrap();
        Chunk::Instruction(Instruction::decode(&memory, address, &zv).unwrap())
    }

    #[test]
    fn routine_length_tracks_children() {
        let mut routine = RoutineChunk::new(0x100, 5, vec![1, 2]);
        assert_eq!(routine.code_start(), 0x105);
        routine.body.push(rtrue_at(0x105));
        routine.body.push(rtrue_at(0x106));
        let chunk = Chunk::Routine(routine);
        assert_eq!(chunk.len(), 7);
        assert_eq!(chunk.end(), 0x107);
        assert_eq!(chunk.children().len(), 2);
        assert_eq!(
            chunk.len(),
            5 + chunk.children().iter().map(|c| c.len()).sum::<usize>()
        );
    }

    #[test]
    fn compound_without_preamble() {
        let mut compound = CompoundChunk::new(0x20);
        assert!(compound.is_empty());
        compound.push(rtrue_at(0x20));
        assert_eq!(Chunk::Compound(compound).len(), 1);
    }

    #[test]
    fn alignment_by_kind() {
        let routine = Chunk::Routine(RoutineChunk::new(0x100, 1, vec![]));
        assert_eq!(routine.alignment(4), 4);
        assert_eq!(rtrue_at(3).alignment(4), 1);
        let data = Chunk::Data(DataChunk::from_memory(&[1, 2, 3], 0, 3));
        assert_eq!(data.alignment(8), 1);
    }

    #[test]
    fn paragraphs_split_everything_but_instruction_runs() {
        let a = rtrue_at(1);
        let b = rtrue_at(2);
        let data = Chunk::Data(DataChunk::from_memory(&[0; 8], 4, 2));
        assert!(!b.wants_new_paragraph(&a));
        assert!(data.wants_new_paragraph(&b));
        assert!(a.wants_new_paragraph(&data));
    }

    #[test]
    fn data_and_globals_clip_to_image() {
        let memory = [0x00, 0x00, 0x12, 0x34, 0x56];
        let data = DataChunk::from_memory(&memory, 3, 10);
        assert_eq!(data.bytes, vec![0x34, 0x56]);
        assert!(!data.is_zero());
        assert!(DataChunk::from_memory(&memory, 0, 2).is_zero());

        let globals = GlobalsChunk::from_memory(&memory, 1, 4);
        assert_eq!(globals.values, vec![0x0012, 0x3456]);
        assert!(GlobalsChunk::from_memory(&memory, 9, 4).values.is_empty());
    }

    #[test]
    fn visit_reports_depth() {
        let mut routine = RoutineChunk::new(0x10, 1, vec![]);
        routine.body.push(rtrue_at(0x11));
        let mut seen = Vec::new();
        Chunk::Routine(routine).visit(&mut |c, depth| seen.push((c.kind(), depth)));
        assert_eq!(seen, vec![("routine", 0), ("instruction", 1)]);
    }
}
