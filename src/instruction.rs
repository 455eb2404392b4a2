use std::fmt::{Display, Error, Formatter};

use log::trace;
use thiserror::Error;

use crate::opcode_tables::{OpFlags, OpcodeSpec, DOUBLE_VAR_OPCODES, EXTENDED_ESCAPE};
use crate::version::ZVersion;

/// Operand types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// Large constant (2 bytes)
    Word,
    /// Small constant (1 byte)
    Byte,
    /// Variable number
    Variable,
}

impl OperandType {
    /// Parse operand type from a 2-bit field; `None` means omitted
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x03 {
            0b00 => Some(OperandType::Word),
            0b01 => Some(OperandType::Byte),
            0b10 => Some(OperandType::Variable),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        !matches!(self, OperandType::Variable)
    }
}

/// Instruction forms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionForm {
    Long,
    Short,
    Variable,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandType,
    pub value: u16,
}

/// Branch information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    /// True if branch on true, false if branch on false
    pub on_true: bool,
    /// Two-byte branch with a signed 14-bit offset
    pub long: bool,
    /// Branch offset (0-1 = return false/true, otherwise a jump)
    pub offset: i16,
}

impl Branch {
    /// Offsets 0 and 1 return false/true instead of jumping
    pub fn is_return(&self) -> bool {
        self.offset == 0 || self.offset == 1
    }
}

/// Why an instruction could not be decoded. These are properties of the
/// input, not of the decoder, and never abort a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unrecognized opcode {opcode} at {address:#07x}")]
    UnrecognizedOpcode { address: usize, opcode: u16 },
    #[error("instruction at {address:#07x} runs past end of file")]
    Truncated { address: usize },
}

impl DecodeError {
    pub fn address(&self) -> usize {
        match self {
            DecodeError::UnrecognizedOpcode { address, .. } => *address,
            DecodeError::Truncated { address } => *address,
        }
    }
}

struct Cursor<'a> {
    memory: &'a [u8],
    start: usize,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self.memory.get(self.pos).ok_or(DecodeError::Truncated {
            address: self.start,
        })?;
        self.pos += 1;
        Ok(b)
    }

    fn word(&mut self) -> Result<u16, DecodeError> {
        let hi = self.byte()? as u16;
        let lo = self.byte()? as u16;
        Ok((hi << 8) | lo)
    }
}

/// A decoded Z-Machine instruction
#[derive(Debug, Clone)]
pub struct Instruction {
    pub address: usize,
    /// Total size of instruction in bytes
    pub length: usize,
    /// Canonical opcode number
    pub opcode: u16,
    pub form: InstructionForm,
    pub spec: &'static OpcodeSpec,
    pub operands: Vec<Operand>,
    /// Variable to store result (if applicable)
    pub store: Option<u8>,
    pub branch: Option<Branch>,
    /// Encoded text words for PRINTI/PRINTR
    pub text: Option<Vec<u16>>,
}

impl Instruction {
    /// Decode an instruction from memory at the given address
    pub fn decode(memory: &[u8], address: usize, zv: &ZVersion) -> Result<Self, DecodeError> {
        let mut rdr = Cursor {
            memory,
            start: address,
            pos: address,
        };

        let mut opcode = rdr.byte()? as u16;
        if opcode == EXTENDED_ESCAPE as u16 && zv.get() >= 5 {
            opcode = 256 + rdr.byte()? as u16;
        }

        // canonicalize opcode number and decode operand types
        let (form, types) = if opcode < 128 {
            let first = if opcode & 0x40 == 0 {
                OperandType::Byte
            } else {
                OperandType::Variable
            };
            let second = if opcode & 0x20 == 0 {
                OperandType::Byte
            } else {
                OperandType::Variable
            };
            opcode &= 0x1f;
            (InstructionForm::Long, vec![first, second])
        } else if opcode < 192 {
            if opcode < 176 {
                let kind = OperandType::from_bits((opcode >> 4) as u8);
                opcode &= 0xcf;
                (InstructionForm::Short, kind.into_iter().collect())
            } else {
                (InstructionForm::Short, Vec::new())
            }
        } else {
            let type_bytes = if DOUBLE_VAR_OPCODES.contains(&opcode) { 2 } else { 1 };
            let form = if opcode >= 256 {
                InstructionForm::Extended
            } else {
                InstructionForm::Variable
            };
            if opcode < 224 {
                opcode &= 0x1f;
            }
            let mut types = Vec::with_capacity(4 * type_bytes);
            for _ in 0..type_bytes {
                let b = rdr.byte()?;
                // an omitted slot reads nothing, but later slots still count
                types.extend((0..4).filter_map(|i| OperandType::from_bits(b >> (6 - 2 * i))));
            }
            (form, types)
        };

        let spec = zv.opcode(opcode).ok_or(DecodeError::UnrecognizedOpcode { address, opcode })?;

        let mut operands = Vec::with_capacity(types.len());
        for kind in types {
            let value = match kind {
                OperandType::Word => rdr.word()?,
                OperandType::Byte | OperandType::Variable => rdr.byte()? as u16,
            };
            operands.push(Operand { kind, value });
        }

        let store = if spec.has(OpFlags::STORE) {
            Some(rdr.byte()?)
        } else {
            None
        };

        let branch = if spec.has(OpFlags::BRANCH) {
            let b = rdr.byte()?;
            let on_true = b & 0x80 != 0;
            if b & 0x40 == 0 {
                // signed 14-bit offset: low 6 bits of b, then all of the next
                // byte; shifting into the top of a word and back extends the sign
                let s = ((((b & 0x3f) as u16) << 10) | ((rdr.byte()? as u16) << 2)) as i16;
                Some(Branch {
                    on_true,
                    long: true,
                    offset: s >> 2,
                })
            } else {
                Some(Branch {
                    on_true,
                    long: false,
                    offset: (b & 0x3f) as i16,
                })
            }
        } else {
            None
        };

        let text = if spec.has(OpFlags::STRING) {
            let mut words = Vec::new();
            loop {
                let w = rdr.word()?;
                words.push(w);
                if w & 0x8000 != 0 {
                    break;
                }
            }
            Some(words)
        } else {
            None
        };

        let inst = Instruction {
            address,
            length: rdr.pos - address,
            opcode,
            form,
            spec,
            operands,
            store,
            branch,
            text,
        };
        trace!("{:05x}: {}", address, inst);
        Ok(inst)
    }

    /// Address of the following instruction
    pub fn end(&self) -> usize {
        self.address + self.length
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn terminates(&self) -> bool {
        self.spec.has(OpFlags::TERMINATES)
    }

    /// Destination of a branch that jumps rather than returns
    pub fn branch_target(&self) -> Option<i64> {
        self.branch
            .filter(|b| !b.is_return())
            .map(|b| self.end() as i64 + b.offset as i64 - 2)
    }

    /// Destination of JUMP when its operand is a constant
    pub fn label_target(&self) -> Option<i64> {
        if !self.spec.has(OpFlags::LABEL) {
            return None;
        }
        self.operands
            .first()
            .filter(|op| op.kind.is_constant())
            .map(|op| self.end() as i64 + op.value as i16 as i64 - 2)
    }

    /// Byte address of the routine called with a constant first operand.
    /// Calling packed address 0 does nothing, so it has no target.
    pub fn call_target(&self, zv: &ZVersion, routine_offset: u16) -> Option<usize> {
        if !self.spec.has(OpFlags::CALL) {
            return None;
        }
        self.operands
            .first()
            .filter(|op| op.kind.is_constant() && op.value != 0)
            .map(|op| zv.unpack_address(op.value, routine_offset))
    }

    /// Addresses control can reach next within the same routine, in the
    /// order they should be pushed on a work stack
    pub fn flow_successors(&self) -> Vec<i64> {
        let mut out = Vec::with_capacity(2);
        out.extend(self.branch_target());
        if !self.terminates() {
            out.push(self.end() as i64);
        }
        out.extend(self.label_target());
        out
    }

    /// Every variable number the instruction reads or writes
    pub fn variables(&self) -> Vec<u8> {
        let mut vars: Vec<u8> = self
            .operands
            .iter()
            .filter(|op| op.kind == OperandType::Variable)
            .map(|op| op.value as u8)
            .collect();
        if self.spec.has(OpFlags::INDIRECT_VAR) {
            if let Some(op) = self.operands.first().filter(|op| op.kind == OperandType::Byte) {
                vars.push(op.value as u8);
            }
        }
        vars.extend(self.store);
        vars
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.name())?;

        for (i, op) in self.operands.iter().enumerate() {
            write!(f, "{}", if i == 0 { " " } else { "," })?;
            match op.kind {
                OperandType::Variable => write!(f, "V{:02x}", op.value)?,
                _ => write!(f, "#{:04x}", op.value)?,
            }
        }

        if let Some(var) = self.store {
            write!(f, " >V{:02x}", var)?;
        }

        if let Some(branch) = self.branch {
            write!(f, " {}", if branch.on_true { "/" } else { "\\" })?;
            match branch.offset {
                0 => write!(f, "FALSE")?,
                1 => write!(f, "TRUE")?,
                _ => write!(f, "{:05x}", self.end() as i64 + branch.offset as i64 - 2)?,
            }
        }

        if let Some(words) = &self.text {
            write!(f, " [{} words]", words.len())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn v(version: u8) -> ZVersion {
        ZVersion::new(version).unwrap()
    }

    #[test]
    fn test_operand_type_from_bits() {
        assert_eq!(OperandType::from_bits(0b00), Some(OperandType::Word));
        assert_eq!(OperandType::from_bits(0b01), Some(OperandType::Byte));
        assert_eq!(OperandType::from_bits(0b10), Some(OperandType::Variable));
        assert_eq!(OperandType::from_bits(0b11), None);
    }

    #[test]
    fn test_decode_long_form() {
        // je #34, L03 with a short branch on true to +5
        let memory = vec![
            0x21, // long form, 2OP opcode 1, second operand is a variable
            0x34, 0x04, // operands
            0xC5, // branch: on true, short, offset 5
            0xFF, // next instruction
        ];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.form, InstructionForm::Long);
        assert_eq!(inst.opcode, 1);
        assert_eq!(inst.name(), "EQUAL?");
        assert_eq!(
            inst.operands,
            vec![
                Operand { kind: OperandType::Byte, value: 0x34 },
                Operand { kind: OperandType::Variable, value: 0x04 },
            ]
        );
        assert_eq!(
            inst.branch,
            Some(Branch { on_true: true, long: false, offset: 5 })
        );
        assert_eq!(inst.length, 4);
        assert_eq!(inst.branch_target(), Some(4 + 5 - 2));
    }

    #[test]
    fn test_decode_short_form() {
        // jump with a large constant offset of -4
        let memory = vec![0x8C, 0xFF, 0xFC, 0x00];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.form, InstructionForm::Short);
        assert_eq!(inst.opcode, 140);
        assert_eq!(inst.length, 3);
        assert!(inst.terminates());
        assert_eq!(inst.label_target(), Some(3 - 4 - 2));
        // terminates, so the label is the only successor
        assert_eq!(inst.flow_successors(), vec![-3]);
    }

    #[test]
    fn short_form_type_bits_are_masked() {
        // jz with variable operand: 0xA0 -> canonical 128
        let memory = vec![0xA0, 0x10, 0x40];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.opcode, 128);
        assert_eq!(inst.operands[0].kind, OperandType::Variable);
        assert_eq!(inst.branch, Some(Branch { on_true: false, long: false, offset: 0 }));
        assert!(inst.branch.unwrap().is_return());
        assert_eq!(inst.branch_target(), None);
        assert_eq!(inst.variables(), vec![0x10]);
    }

    #[test]
    fn test_decode_variable_form() {
        // call #1234, L00, L01, L02 -> sp
        let memory = vec![0xE0, 0x2A, 0x12, 0x34, 0x01, 0x02, 0x03, 0x00];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.form, InstructionForm::Variable);
        assert_eq!(inst.opcode, 224);
        assert_eq!(inst.operands.len(), 4);
        assert_eq!(inst.operands[0].value, 0x1234);
        assert_eq!(inst.store, Some(0x00));
        assert_eq!(inst.length, 8);
        assert_eq!(inst.call_target(&v(3), 0), Some(0x2468));
    }

    #[test]
    fn variable_form_of_2op_is_canonicalized() {
        // 0xC1 = je in variable form with three byte operands
        let memory = vec![0xC1, 0x57, 0x01, 0x02, 0x03, 0x80, 0x10];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.opcode, 1);
        assert_eq!(inst.operands.len(), 3);
        // long branch on true, offset 16
        assert_eq!(inst.branch, Some(Branch { on_true: true, long: true, offset: 0x10 }));
        assert_eq!(inst.length, 7);
    }

    #[test]
    fn omitted_slot_does_not_end_operand_list() {
        // types: word, omitted, byte, omitted
        let memory = vec![0xE8, 0x37, 0x12, 0x34, 0x56];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.name(), "PUSH");
        assert_eq!(inst.operands.len(), 2);
        assert_eq!(inst.length, 5);
    }

    #[test]
    fn double_var_reads_two_type_bytes() {
        // call_vs2 with five byte operands
        let memory = vec![0xEC, 0x55, 0x7F, 1, 2, 3, 4, 5, 0x00];
        let inst = Instruction::decode(&memory, 0, &v(4)).unwrap();
        assert_eq!(inst.opcode, 236);
        assert_eq!(inst.operands.len(), 5);
        assert_eq!(inst.length, 9);
        // not valid before V4
        assert!(matches!(
            Instruction::decode(&memory, 0, &v(3)),
            Err(DecodeError::UnrecognizedOpcode { opcode: 236, .. })
        ));
    }

    #[test]
    fn extended_opcode_in_v5() {
        // log_shift #01, #02 -> sp
        let memory = vec![0xBE, 0x02, 0x5F, 0x01, 0x02, 0x00];
        let inst = Instruction::decode(&memory, 0, &v(5)).unwrap();
        assert_eq!(inst.form, InstructionForm::Extended);
        assert_eq!(inst.opcode, 258);
        assert_eq!(inst.name(), "SHIFT");
        assert_eq!(inst.length, 6);
    }

    #[test]
    fn escape_byte_is_plain_0op_before_v5() {
        // 0xBE is 0OP opcode 190, which has no definition
        let memory = vec![0xBE, 0x02, 0x5F];
        assert_eq!(
            Instruction::decode(&memory, 0, &v(4)).unwrap_err(),
            DecodeError::UnrecognizedOpcode { address: 0, opcode: 190 }
        );
    }

    #[test]
    fn long_branch_sign_extension() {
        // jz #00 with a long branch of -1: 0x3F 0xFF
        let memory = vec![0x90, 0x00, 0x3F, 0xFF];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.branch, Some(Branch { on_true: false, long: true, offset: -1 }));

        // boundary: 0x1FFF is the largest positive, 0x2000 the most negative
        let memory = vec![0x90, 0x00, 0x9F, 0xFF];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.branch.unwrap().offset, 0x1FFF);
        let memory = vec![0x90, 0x00, 0xA0, 0x00];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.branch.unwrap().offset, -0x2000);
    }

    #[test]
    fn inline_text_runs_to_high_bit() {
        // print with three words, the last marked
        let memory = vec![0xB2, 0x11, 0xAA, 0x46, 0x34, 0x96, 0x45, 0xB0];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.text, Some(vec![0x11AA, 0x4634, 0x9645]));
        assert_eq!(inst.length, 7);
        assert!(!inst.terminates());
    }

    #[test]
    fn decoded_length_never_overruns() {
        // one of each form back to back; each decode must land exactly on
        // the next instruction
        let memory = vec![
            0x54, 0x10, 0x05, 0x20, // add G00, #05 -> G10 (long)
            0x9C, 0x07, // jump #07 (short, 1OP)
            0xB0, // rtrue (short, 0OP)
            0xE1, 0x97, 0x01, 0x02, 0x03, // storew L00, #02, #03 (variable)
            0xBE, 0x09, 0xFF, 0x00, // save_undo -> sp (extended)
            0xBA, // quit
        ];
        let zv = v(5);
        let mut pc = 0;
        let mut names = Vec::new();
        while pc < memory.len() {
            let inst = Instruction::decode(&memory, pc, &zv).unwrap();
            names.push(inst.name());
            pc += inst.length;
        }
        assert_eq!(pc, memory.len());
        assert_eq!(names, vec!["ADD", "JUMP", "RTRUE", "PUT", "ISAVE", "QUIT"]);
    }

    #[test]
    fn truncated_instruction_is_reported() {
        let memory = vec![0xE0, 0x3F, 0x12];
        assert_eq!(
            Instruction::decode(&memory, 0, &v(3)).unwrap_err(),
            DecodeError::Truncated { address: 0 }
        );
        assert!(Instruction::decode(&memory, 10, &v(3)).is_err());
    }

    #[test]
    fn indirect_and_store_variables_are_reported() {
        // inc #12 (indirect global)
        let memory = vec![0x95, 0x12];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.variables(), vec![0x12]);
        // loadw G01, #00 -> G20
        let memory = vec![0x4F, 0x11, 0x00, 0x30];
        let inst = Instruction::decode(&memory, 0, &v(3)).unwrap();
        assert_eq!(inst.variables(), vec![0x11, 0x30]);
    }
}
