//! Byte-level detokenization.
//!
//! Byte-level BPE vocabularies store every raw byte as a printable character:
//! printable Latin-1 bytes map to themselves, the remaining 68 bytes map to
//! code points from U+0100 upward in byte order. Decoding reverses that table
//! per character and validates the accumulated bytes as UTF-8 once at the end,
//! since one multi-byte character is often split across tokens.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::special::SpecialTokens;
use crate::vocab::Vocabulary;

static BYTE_DECODER: OnceLock<HashMap<char, u8>> = OnceLock::new();

fn is_printable(b: u8) -> bool {
    matches!(b, b'!'..=b'~' | 161..=172 | 174..=255)
}

/// Escape code point → raw byte, built on first use.
pub fn byte_decoder() -> &'static HashMap<char, u8> {
    BYTE_DECODER.get_or_init(|| {
        let mut table = HashMap::with_capacity(256);
        let mut shifted = 0u32;
        for b in 0..=u8::MAX {
            let c = if is_printable(b) {
                char::from(b)
            } else {
                let c = char::from_u32(256 + shifted).unwrap_or(char::REPLACEMENT_CHARACTER);
                shifted += 1;
                c
            };
            let _ = table.insert(c, b);
        }
        table
    })
}

/// Turn a finished id sequence into text.
///
/// Stops at the first end-of-sequence, skips timestamp and other special ids,
/// drops invalid UTF-8 and trims surrounding whitespace.
pub fn detokenize(ids: &[u32], vocab: &Vocabulary, special: &SpecialTokens) -> String {
    let decoder = byte_decoder();
    let mut bytes = Vec::new();

    for &id in ids {
        if id == special.eos {
            break;
        }
        if special.is_timestamp(id) || vocab.is_special(id) {
            continue;
        }
        let Some(token) = vocab.token(id) else {
            continue;
        };
        for c in token.chars() {
            if let Some(&b) = decoder.get(&c) {
                bytes.push(b);
            } else {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    let text: String = bytes.utf8_chunks().map(|chunk| chunk.valid()).collect();
    text.trim().to_string()
}
