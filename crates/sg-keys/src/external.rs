//! Text token form of an encoded key:
//! `<2 checksum chars><base64url payload>`.
//!
//! The payload is the binary key XOR-rolled through a six-byte mask; the
//! checksum is a 12-bit running sum over the masked bytes, written as two
//! characters of [`CHECK_ALPHABET`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use sg_types::KeyError;

const MASK: [u8; 6] = [0x6B, 0xD2, 0x39, 0xA4, 0x1F, 0x8E];

const CHECK_ALPHABET: &[u8; 64] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

fn roll(bytes: &mut [u8]) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b ^= MASK[i % MASK.len()];
    }
}

fn checksum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |sum, &b| (sum + u16::from(b)) & 0x0FFF)
}

fn check_digit(c: u8) -> Result<u16, KeyError> {
    CHECK_ALPHABET
        .iter()
        .position(|&a| a == c)
        .map(|p| p as u16)
        .ok_or_else(|| KeyError::Malformed(format!("'{}' is not a checksum character", c as char)))
}

pub fn encode(mut bytes: Vec<u8>) -> String {
    roll(&mut bytes);
    let sum = checksum(&bytes);
    let mut out = String::with_capacity(2 + bytes.len().div_ceil(3) * 4);
    out.push(CHECK_ALPHABET[usize::from(sum >> 6)] as char);
    out.push(CHECK_ALPHABET[usize::from(sum & 0x3F)] as char);
    URL_SAFE_NO_PAD.encode_string(&bytes, &mut out);
    out
}

pub fn decode(token: &str) -> Result<Vec<u8>, KeyError> {
    let raw = token.as_bytes();
    if !token.is_ascii() || raw.len() < 3 {
        return Err(KeyError::Malformed("token too short or not ASCII".into()));
    }
    let expected = (check_digit(raw[0])? << 6) | check_digit(raw[1])?;
    let mut bytes = URL_SAFE_NO_PAD
        .decode(&raw[2..])
        .map_err(|e| KeyError::Malformed(e.to_string()))?;
    let actual = checksum(&bytes);
    if actual != expected {
        return Err(KeyError::ChecksumMismatch { expected, actual });
    }
    roll(&mut bytes);
    Ok(bytes)
}
