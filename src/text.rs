use bitreader::{BitReader, BitReaderError};
use log::trace;

use crate::error::{Result, UnsupportedFeature};
use crate::header::Header;

/// Default alphabets for Z-string decoding
const ALPHABET_A0: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHABET_A1: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHABET_A2: &[u8; 26] = b" \n0123456789.,!?_#'\"/\\-:()";

pub type Zchar = u8;

/// One 16-bit word of packed text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedChars {
    /// Set on the final word of a string
    pub last: bool,
    pub chars: [Zchar; 3],
}

impl PackedChars {
    pub fn from_word(word: u16) -> std::result::Result<PackedChars, BitReaderError> {
        let bytes = word.to_be_bytes();
        let mut br = BitReader::new(&bytes);

        // top bit marks the last word
        let mut pc = PackedChars {
            last: br.read_u8(1)? == 1,
            chars: [0, 0, 0],
        };
        for c in pc.chars.iter_mut() {
            *c = br.read_u8(5)?;
        }
        Ok(pc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    A0,
    A1,
    A2,
}

impl Alphabet {
    fn table(self) -> &'static [u8; 26] {
        match self {
            Alphabet::A0 => ALPHABET_A0,
            Alphabet::A1 => ALPHABET_A1,
            Alphabet::A2 => ALPHABET_A2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Alphabet(Alphabet),
    /// Waiting for the high half of a ZSCII escape
    EscapeHigh,
    /// Waiting for the low half, holding the high half
    EscapeLow(u16),
}

/// Z-character state machine. Shifts apply to the next character only.
#[derive(Debug)]
pub struct TextDecoder {
    state: State,
    out: String,
}

impl Default for TextDecoder {
    fn default() -> Self {
        TextDecoder {
            state: State::Alphabet(Alphabet::A0),
            out: String::new(),
        }
    }
}

impl TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, code: Zchar) -> Result<()> {
        self.state = match self.state {
            State::EscapeHigh => State::EscapeLow((code as u16) << 5),
            State::EscapeLow(high) => {
                let zscii = high | code as u16;
                self.out.push(char::from_u32(zscii as u32).unwrap_or(char::REPLACEMENT_CHARACTER));
                State::Alphabet(Alphabet::A0)
            }
            State::Alphabet(alphabet) => match code {
                0 => {
                    self.out.push(' ');
                    State::Alphabet(Alphabet::A0)
                }
                1..=3 => return Err(UnsupportedFeature::Abbreviation { code }.into()),
                4 => State::Alphabet(Alphabet::A1),
                5 => State::Alphabet(Alphabet::A2),
                6 if alphabet == Alphabet::A2 => State::EscapeHigh,
                _ => {
                    self.out.push(alphabet.table()[(code - 6) as usize] as char);
                    State::Alphabet(Alphabet::A0)
                }
            },
        };
        Ok(())
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Decode encoded text words using the default alphabets.
pub fn decode_text(words: &[u16], version: u8) -> Result<String> {
    if version < 3 {
        return Err(UnsupportedFeature::TextVersion { version }.into());
    }

    let mut decoder = TextDecoder::new();
    for &word in words {
        let packed = PackedChars::from_word(word)?;
        trace!("Z-word {:04x} = Z-chars {:?}", word, packed.chars);
        for code in packed.chars {
            decoder.push(code)?;
        }
    }
    Ok(decoder.finish())
}

/// Like `decode_text`, but refuses stories that declare their own alphabet.
pub fn decode_text_for_header(words: &[u16], header: &Header) -> Result<String> {
    if header.version >= 5 && header.alphabet_table != 0 {
        return Err(UnsupportedFeature::CustomAlphabet {
            table: header.alphabet_table,
        }
        .into());
    }
    decode_text(words, header.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DisasmError;
    use test_log::test;

    fn pack(chars: &[Zchar]) -> Vec<u16> {
        let mut padded = chars.to_vec();
        while padded.len() % 3 != 0 {
            padded.push(5);
        }
        let mut words: Vec<u16> = padded
            .chunks(3)
            .map(|c| ((c[0] as u16) << 10) | ((c[1] as u16) << 5) | c[2] as u16)
            .collect();
        if let Some(last) = words.last_mut() {
            *last |= 0x8000;
        }
        words
    }

    #[test]
    fn packed_chars_split_word() {
        let pc = PackedChars::from_word(0x9645).unwrap();
        assert!(pc.last);
        assert_eq!(pc.chars, [5, 18, 5]);
        assert!(!PackedChars::from_word(0x1234).unwrap().last);
    }

    #[test]
    fn test_decode_hello() {
        // "hello" = h(13) e(10) l(17) l(17) o(20)
        let words = pack(&[13, 10, 17, 17, 20]);
        assert_eq!(decode_text(&words, 3).unwrap(), "hello");
    }

    #[test]
    fn space_resets_to_a0() {
        let words = pack(&[4, 0, 6]);
        assert_eq!(decode_text(&words, 3).unwrap(), " a");
    }

    #[test]
    fn shift_applies_to_one_character() {
        // "Hi." = shift-1 H, i, shift-2 '.'
        let words = pack(&[4, 13, 14, 5, 18]);
        assert_eq!(decode_text(&words, 5).unwrap(), "Hi.");
    }

    #[test]
    fn a2_newline() {
        let words = pack(&[5, 7, 6]);
        assert_eq!(decode_text(&words, 3).unwrap(), "\na");
    }

    #[test]
    fn zscii_escape() {
        // '@' = 64 = 0b00010_00000
        let words = pack(&[5, 6, 2, 0, 6]);
        assert_eq!(decode_text(&words, 3).unwrap(), "@a");
    }

    #[test]
    fn code_6_outside_a2_is_a_letter() {
        let words = pack(&[4, 6]);
        assert_eq!(decode_text(&words, 3).unwrap(), "A");
    }

    #[test]
    fn abbreviations_fail_loudly() {
        let words = pack(&[13, 2, 7]);
        let err = decode_text(&words, 3).unwrap_err();
        assert!(matches!(
            err,
            DisasmError::Unsupported(UnsupportedFeature::Abbreviation { code: 2 })
        ));
    }

    #[test]
    fn old_versions_are_refused() {
        let words = pack(&[13]);
        assert!(matches!(
            decode_text(&words, 2),
            Err(DisasmError::Unsupported(UnsupportedFeature::TextVersion { version: 2 }))
        ));
    }

    #[test]
    fn custom_alphabet_is_refused() {
        let mut memory = vec![0u8; 64];
        memory[0] = 5;
        memory[0x34] = 0x02;
        let header = Header::parse(&memory).unwrap();
        let words = pack(&[13]);
        assert!(matches!(
            decode_text_for_header(&words, &header),
            Err(DisasmError::Unsupported(UnsupportedFeature::CustomAlphabet { table: 0x200 }))
        ));

        // V3 ignores the field
        memory[0] = 3;
        let header = Header::parse(&memory).unwrap();
        assert_eq!(decode_text_for_header(&words, &header).unwrap(), "h");
    }
}
