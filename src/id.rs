//! UAID/CHID codec.
//!
//! Agent identifiers are 128-bit values carried on the wire either as
//! 32 hex characters or in the hyphenated 8-4-4-4-12 form. Both forms
//! decode to the same 16 raw bytes.

use thiserror::Error;
use uuid::Uuid;

/// Raw identifier width in bytes.
pub const RAW_LEN: usize = 16;

/// Length of the compact hex encoding.
pub const ENCODED_LEN: usize = 32;

/// Length of the hyphenated 8-4-4-4-12 encoding.
pub const HYPHENATED_LEN: usize = 36;

/// Hyphen offsets in the 36-character form.
const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid identifier")]
pub struct InvalidId;

/// Generate a fresh agent identifier: 32 lowercase hex characters,
/// no hyphens, backed by the OS random source.
pub fn generate() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// True iff `s` is exactly 32 hex characters or the hyphenated
/// 8-4-4-4-12 form.
pub fn valid(s: &str) -> bool {
    let bytes = s.as_bytes();
    match bytes.len() {
        ENCODED_LEN => bytes.iter().all(u8::is_ascii_hexdigit),
        HYPHENATED_LEN => bytes.iter().enumerate().all(|(i, b)| {
            if HYPHEN_POSITIONS.contains(&i) {
                *b == b'-'
            } else {
                b.is_ascii_hexdigit()
            }
        }),
        _ => false,
    }
}

/// Decode `s` into `dst`. Hyphens at the canonical positions of the
/// 36-character form are skipped; anything else fails with
/// [`InvalidId`].
pub fn decode(s: &str, dst: &mut [u8; RAW_LEN]) -> Result<(), InvalidId> {
    if !valid(s) {
        return Err(InvalidId);
    }
    let mut nibbles = s.bytes().filter(|b| *b != b'-');
    for slot in dst.iter_mut() {
        let hi = nibble(nibbles.next().ok_or(InvalidId)?)?;
        let lo = nibble(nibbles.next().ok_or(InvalidId)?)?;
        *slot = (hi << 4) | lo;
    }
    Ok(())
}

/// Allocating variant of [`decode`].
pub fn decode_string(s: &str) -> Result<Vec<u8>, InvalidId> {
    let mut dst = [0u8; RAW_LEN];
    decode(s, &mut dst)?;
    Ok(dst.to_vec())
}

/// Network-input filter: true when `s` contains any character outside
/// `[a-fA-F0-9-]`. Frames carrying such identifiers are rejected.
pub fn filter_rejects(s: &str) -> bool {
    s.bytes().any(|b| !b.is_ascii_hexdigit() && b != b'-')
}

fn nibble(c: u8) -> Result<u8, InvalidId> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(InvalidId),
    }
}
