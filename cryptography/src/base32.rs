//! Base32 (RFC 3548) over raw byte buffers.
//!
//! Only whole symbol groups are supported: the input to [encode] must have a bit length that is a
//! multiple of 5 and the input to [decode] must describe a whole number of bytes. This is exactly
//! what onion addresses need (10 bytes in, 16 symbols out) so no padding character is ever
//! emitted or accepted.

use crate::Error;

/// Lowercase alphabet used when encoding.
const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Number of bits carried by a single symbol.
const SYMBOL_BITS: usize = 5;

/// Encode `data` using the lowercase alphabet.
///
/// # Panics
///
/// Panics if the bit length of `data` is not a multiple of 5.
pub fn encode(data: &[u8]) -> String {
    let bits = data.len() * 8;
    assert_eq!(
        bits % SYMBOL_BITS,
        0,
        "base32 input must be a multiple of 5 bits, got {bits}"
    );

    let mut out = String::with_capacity(bits / SYMBOL_BITS);
    let mut bit = 0;
    while bit < bits {
        // Window of 16 bits starting at the byte holding `bit` (zero-padded past the end)
        let mut window = (data[bit / 8] as u16) << 8;
        if let Some(next) = data.get(bit / 8 + 1) {
            window |= *next as u16;
        }
        let index = (window >> (11 - (bit % 8))) & 0x1f;
        out.push(ALPHABET[index as usize] as char);
        bit += SYMBOL_BITS;
    }
    out
}

/// Map a symbol to its 5-bit value. Both cases are accepted.
fn value(symbol: char) -> Option<u8> {
    match symbol {
        'a'..='z' => Some(symbol as u8 - b'a'),
        'A'..='Z' => Some(symbol as u8 - b'A'),
        '2'..='7' => Some(symbol as u8 - b'2' + 26),
        _ => None,
    }
}

/// Decode `encoded` (case-insensitive) into bytes.
pub fn decode(encoded: &str) -> Result<Vec<u8>, Error> {
    let symbols = encoded.chars().count();
    if (symbols * SYMBOL_BITS) % 8 != 0 {
        return Err(Error::InvalidLength(symbols));
    }

    let mut out = Vec::with_capacity(symbols * SYMBOL_BITS / 8);
    let mut acc: u16 = 0;
    let mut pending = 0;
    for symbol in encoded.chars() {
        let v = value(symbol).ok_or(Error::InvalidSymbol(symbol))?;
        acc = (acc << SYMBOL_BITS) | v as u16;
        pending += SYMBOL_BITS;
        if pending >= 8 {
            pending -= 8;
            out.push((acc >> pending) as u8);
            acc &= (1 << pending) - 1;
        }
    }
    Ok(out)
}
