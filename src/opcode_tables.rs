//! Static opcode specification.
//!
//! Opcodes are identified by a canonical number: 2OP opcodes are 1-31, 1OP
//! opcodes 128-143, 0OP opcodes 176-191, VAR opcodes 224-255 and EXT opcodes
//! 256 and up (the second opcode byte plus 256). Some numbers have more than
//! one entry, each valid over a different range of versions.

use std::fmt;
use std::ops::BitOr;

/// Behavior flags for an opcode
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct OpFlags(u16);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    /// The instruction stores a result.
    pub const STORE: OpFlags = OpFlags(1);
    /// The instruction branches to a label.
    pub const BRANCH: OpFlags = OpFlags(2);
    /// The instruction takes a second operand type byte, for up to 8 operands.
    pub const EXTRA: OpFlags = OpFlags(4);
    /// Nominally 2OP but can take up to 4 operands.
    pub const VAR_ARGS: OpFlags = OpFlags(8);
    /// The instruction is followed by inline encoded text.
    pub const STRING: OpFlags = OpFlags(16);
    /// The first operand is a relative jump target.
    pub const LABEL: OpFlags = OpFlags(32);
    /// The first operand is an indirect variable number.
    pub const INDIRECT_VAR: OpFlags = OpFlags(64);
    /// The first operand is a packed routine address.
    pub const CALL: OpFlags = OpFlags(128);
    /// Control does not pass to the following instruction.
    pub const TERMINATES: OpFlags = OpFlags(256);

    pub fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpFlags {
    type Output = OpFlags;

    fn bitor(self, rhs: OpFlags) -> OpFlags {
        OpFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for OpFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: [(OpFlags, &str); 9] = [
            (OpFlags::STORE, "STORE"),
            (OpFlags::BRANCH, "BRANCH"),
            (OpFlags::EXTRA, "EXTRA"),
            (OpFlags::VAR_ARGS, "VAR_ARGS"),
            (OpFlags::STRING, "STRING"),
            (OpFlags::LABEL, "LABEL"),
            (OpFlags::INDIRECT_VAR, "INDIRECT_VAR"),
            (OpFlags::CALL, "CALL"),
            (OpFlags::TERMINATES, "TERMINATES"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", set.join(" | "))
        }
    }
}

/// One opcode definition, valid for versions `min_version..=max_version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeSpec {
    pub number: u16,
    /// ZAP mnemonic
    pub name: &'static str,
    /// Inform mnemonic
    pub inform_name: &'static str,
    pub min_version: u8,
    pub max_version: u8,
    pub flags: OpFlags,
}

impl OpcodeSpec {
    pub fn valid_for(&self, effective_version: u8) -> bool {
        (self.min_version..=self.max_version).contains(&effective_version)
    }

    pub fn has(&self, flag: OpFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// Opcode numbers whose variable form carries two operand type bytes
pub const DOUBLE_VAR_OPCODES: [u16; 2] = [236, 250];

/// Escape byte introducing a V5+ extended opcode
pub const EXTENDED_ESCAPE: u8 = 190;

macro_rules! op {
    ($num:expr, $name:expr, $inform:expr, $min:expr, $max:expr) => {
        op!($num, $name, $inform, $min, $max, OpFlags::NONE)
    };
    ($num:expr, $name:expr, $inform:expr, $min:expr, $max:expr, $flags:expr) => {
        OpcodeSpec {
            number: $num,
            name: $name,
            inform_name: $inform,
            min_version: $min,
            max_version: $max,
            flags: $flags,
        }
    };
}

lazy_static! {
    pub static ref OPCODE_SPECS: Vec<OpcodeSpec> = {
        use crate::opcode_tables::OpFlags as F;
        vec![
            op!(1, "EQUAL?", "je", 1, 6, F::BRANCH | F::VAR_ARGS),
            op!(2, "LESS?", "jl", 1, 6, F::BRANCH),
            op!(3, "GRTR?", "jg", 1, 6, F::BRANCH),
            op!(4, "DLESS?", "dec_chk", 1, 6, F::BRANCH | F::INDIRECT_VAR),
            op!(5, "IGRTR?", "inc_chk", 1, 6, F::BRANCH | F::INDIRECT_VAR),
            op!(6, "IN?", "jin", 1, 6, F::BRANCH),
            op!(7, "BTST", "test", 1, 6, F::BRANCH),
            op!(8, "BOR", "or", 1, 6, F::STORE),
            op!(9, "BAND", "and", 1, 6, F::STORE),
            op!(10, "FSET?", "test_attr", 1, 6, F::BRANCH),
            op!(11, "FSET", "set_attr", 1, 6),
            op!(12, "FCLEAR", "clear_attr", 1, 6),
            op!(13, "SET", "store", 1, 6, F::INDIRECT_VAR),
            op!(14, "MOVE", "insert_obj", 1, 6),
            op!(15, "GET", "loadw", 1, 6, F::STORE),
            op!(16, "GETB", "loadb", 1, 6, F::STORE),
            op!(17, "GETP", "get_prop", 1, 6, F::STORE),
            op!(18, "GETPT", "get_prop_addr", 1, 6, F::STORE),
            op!(19, "NEXTP", "get_next_prop", 1, 6, F::STORE),
            op!(20, "ADD", "add", 1, 6, F::STORE),
            op!(21, "SUB", "sub", 1, 6, F::STORE),
            op!(22, "MUL", "mul", 1, 6, F::STORE),
            op!(23, "DIV", "div", 1, 6, F::STORE),
            op!(24, "MOD", "mod", 1, 6, F::STORE),
            op!(25, "CALL2", "call_2s", 4, 6, F::STORE | F::CALL),
            op!(26, "ICALL2", "call_2n", 5, 6, F::CALL),
            op!(27, "COLOR", "set_colour", 5, 5),
            op!(27, "COLOR", "set_colour", 6, 6, F::VAR_ARGS),
            op!(28, "THROW", "throw", 5, 6, F::TERMINATES),
            op!(128, "ZERO?", "jz", 1, 6, F::BRANCH),
            op!(129, "NEXT?", "get_sibling", 1, 6, F::STORE | F::BRANCH),
            op!(130, "FIRST?", "get_child", 1, 6, F::STORE | F::BRANCH),
            op!(131, "LOC", "get_parent", 1, 6, F::STORE),
            op!(132, "PTSIZE", "get_prop_len", 1, 6, F::STORE),
            op!(133, "INC", "inc", 1, 6, F::INDIRECT_VAR),
            op!(134, "DEC", "dec", 1, 6, F::INDIRECT_VAR),
            op!(135, "PRINTB", "print_addr", 1, 6),
            op!(136, "CALL1", "call_1s", 4, 6, F::STORE | F::CALL),
            op!(137, "REMOVE", "remove_obj", 1, 6),
            op!(138, "PRINTD", "print_obj", 1, 6),
            op!(139, "RETURN", "ret", 1, 6, F::TERMINATES),
            op!(140, "JUMP", "jump", 1, 6, F::LABEL | F::TERMINATES),
            op!(141, "PRINT", "print_paddr", 1, 6),
            op!(142, "VALUE", "load", 1, 6, F::STORE | F::INDIRECT_VAR),
            op!(143, "BCOM", "not", 1, 4, F::STORE),
            op!(143, "ICALL1", "call_1n", 5, 6, F::CALL),
            op!(176, "RTRUE", "rtrue", 1, 6, F::TERMINATES),
            op!(177, "RFALSE", "rfalse", 1, 6, F::TERMINATES),
            op!(178, "PRINTI", "print", 1, 6, F::STRING),
            op!(179, "PRINTR", "print_ret", 1, 6, F::STRING | F::TERMINATES),
            op!(180, "NOOP", "nop", 1, 6),
            op!(181, "SAVE", "save", 1, 3, F::BRANCH),
            op!(181, "SAVE", "save", 4, 4, F::STORE),
            op!(182, "RESTORE", "restore", 1, 3, F::BRANCH),
            op!(182, "RESTORE", "restore", 4, 4, F::STORE),
            op!(183, "RESTART", "restart", 1, 6, F::TERMINATES),
            op!(184, "RSTACK", "ret_popped", 1, 6, F::TERMINATES),
            op!(185, "FSTACK", "pop", 1, 4),
            op!(185, "CATCH", "catch", 5, 6, F::STORE),
            op!(186, "QUIT", "quit", 1, 6, F::TERMINATES),
            op!(187, "CRLF", "new_line", 1, 6),
            op!(188, "USL", "show_status", 1, 3),
            op!(189, "VERIFY", "verify", 3, 6, F::BRANCH),
            op!(191, "ORIGINAL?", "piracy", 5, 6, F::BRANCH),
            op!(224, "CALL", "call_vs", 1, 6, F::STORE | F::CALL),
            op!(225, "PUT", "storew", 1, 6),
            op!(226, "PUTB", "storeb", 1, 6),
            op!(227, "PUTP", "put_prop", 1, 6),
            op!(228, "READ", "sread", 1, 4),
            op!(228, "READ", "aread", 5, 6, F::STORE),
            op!(229, "PRINTC", "print_char", 1, 6),
            op!(230, "PRINTN", "print_num", 1, 6),
            op!(231, "RANDOM", "random", 1, 6, F::STORE),
            op!(232, "PUSH", "push", 1, 6),
            op!(233, "POP", "pull", 1, 5),
            op!(233, "POP", "pull", 6, 6, F::STORE),
            op!(234, "SPLIT", "split_window", 3, 6),
            op!(235, "SCREEN", "set_window", 3, 6),
            op!(236, "XCALL", "call_vs2", 4, 6, F::STORE | F::EXTRA | F::CALL),
            op!(237, "CLEAR", "erase_window", 4, 6),
            op!(238, "ERASE", "erase_line", 4, 6),
            op!(239, "CURSET", "set_cursor", 4, 6),
            op!(240, "CURGET", "get_cursor", 4, 6),
            op!(241, "HLIGHT", "set_text_style", 4, 6),
            op!(242, "BUFOUT", "buffer_mode", 4, 6),
            op!(243, "DIROUT", "output_stream", 3, 6),
            op!(244, "DIRIN", "input_stream", 3, 6),
            op!(245, "SOUND", "sound_effect", 3, 6),
            op!(246, "INPUT", "read_char", 4, 6, F::STORE),
            op!(247, "INTBL?", "scan_table", 4, 6, F::STORE | F::BRANCH),
            op!(248, "BCOM", "not", 5, 6, F::STORE),
            op!(249, "ICALL", "call_vn", 5, 6, F::CALL),
            op!(250, "IXCALL", "call_vn2", 5, 6, F::EXTRA | F::CALL),
            op!(251, "LEX", "tokenise", 5, 6),
            op!(252, "ZWSTR", "encode_text", 5, 6),
            op!(253, "COPYT", "copy_table", 5, 6),
            op!(254, "PRINTT", "print_table", 5, 6),
            op!(255, "ASSIGNED?", "check_arg_count", 5, 6, F::BRANCH | F::INDIRECT_VAR),
            op!(256, "SAVE", "save", 5, 6, F::STORE),
            op!(257, "RESTORE", "restore", 5, 6, F::STORE),
            op!(258, "SHIFT", "log_shift", 5, 6, F::STORE),
            op!(259, "ASHIFT", "art_shift", 5, 6, F::STORE),
            op!(260, "FONT", "set_font", 5, 6, F::STORE),
            op!(261, "DISPLAY", "draw_picture", 6, 6),
            op!(262, "PICINF", "picture_data", 6, 6, F::BRANCH),
            op!(263, "DCLEAR", "erase_picture", 6, 6),
            op!(264, "MARGIN", "set_margins", 6, 6),
            op!(265, "ISAVE", "save_undo", 5, 6, F::STORE),
            op!(266, "IRESTORE", "restore_undo", 5, 6, F::STORE),
            op!(267, "PRINTU", "print_unicode", 5, 6),
            op!(268, "CHECKU", "check_unicode", 5, 6, F::STORE),
            op!(272, "WINPOS", "move_window", 6, 6),
            op!(273, "WINSIZE", "window_size", 6, 6),
            op!(274, "WINATTR", "window_style", 6, 6),
            op!(275, "WINGET", "get_wind_prop", 6, 6, F::STORE),
            op!(276, "SCROLL", "scroll_window", 6, 6),
            op!(277, "FSTACK", "pop_stack", 6, 6),
            op!(278, "MOUSE-INFO", "read_mouse", 6, 6),
            op!(279, "MOUSE-LIMIT", "mouse_window", 6, 6),
            op!(280, "XPUSH", "push_stack", 6, 6, F::BRANCH),
            op!(281, "WINPUT", "put_wind_prop", 6, 6),
            op!(282, "PRINTF", "print_form", 6, 6),
            op!(283, "MENU", "make_menu", 6, 6, F::BRANCH),
            op!(284, "PICSET", "picture_table", 6, 6),
        ]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use test_log::test;

    #[test]
    fn at_most_one_entry_per_number_and_version() {
        for version in 1..=6 {
            let mut seen = HashSet::new();
            for spec in OPCODE_SPECS.iter().filter(|s| s.valid_for(version)) {
                assert!(
                    seen.insert(spec.number),
                    "opcode {} defined twice for version {}",
                    spec.number,
                    version
                );
            }
        }
    }

    #[test]
    fn numbers_fall_in_canonical_ranges() {
        for spec in OPCODE_SPECS.iter() {
            let n = spec.number;
            assert!(
                (1..32).contains(&n)
                    || (128..144).contains(&n)
                    || (176..192).contains(&n)
                    || (224..256).contains(&n)
                    || n >= 256,
                "{} has non-canonical number {}",
                spec.name,
                n
            );
        }
    }

    #[test]
    fn double_var_opcodes_carry_extra_flag() {
        for number in DOUBLE_VAR_OPCODES {
            let spec = OPCODE_SPECS
                .iter()
                .find(|s| s.number == number)
                .unwrap();
            assert!(spec.has(OpFlags::EXTRA));
            assert!(spec.has(OpFlags::CALL));
        }
    }

    #[test]
    fn flags_debug_lists_members() {
        let flags = OpFlags::STRING | OpFlags::TERMINATES;
        assert_eq!(format!("{:?}", flags), "STRING | TERMINATES");
        assert_eq!(format!("{:?}", OpFlags::NONE), "NONE");
        assert!(flags.contains(OpFlags::STRING));
        assert!(!flags.contains(OpFlags::STORE));
    }
}
