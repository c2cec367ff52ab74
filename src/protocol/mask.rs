//! Payload masking (RFC 6455 Section 5.3).
//!
//! Masking is an involution: applying the same key twice restores the input.

use crate::error::{Error, Result};

/// Byte-by-byte XOR against the repeating 4-byte key.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Same result as [`apply_mask`], processing four bytes per step.
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&(val ^ mask_u32).to_ne_bytes());
    }
    // The tail starts on a multiple of four, so the key index restarts at 0.
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

/// A fresh masking key from the operating system's CSPRNG.
///
/// # Errors
///
/// Returns `Error::Io` if the random source is unavailable.
pub fn generate_mask() -> Result<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key).map_err(|e| Error::Io(format!("random source: {e}")))?;
    Ok(key)
}
