//! Incremental UTF-8 validation for TEXT messages split across frames.
//!
//! A code point may straddle a fragment boundary; the validator keeps the
//! dangling prefix (at most 3 bytes) until the next fragment completes it.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    partial: [u8; 4],
    partial_len: usize,
}

/// Encoded length announced by a lead byte already accepted as a valid prefix.
const fn sequence_len(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

impl Utf8Validator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the next fragment of a TEXT message. Only a non-final fragment
    /// may stop inside a code point.
    ///
    /// # Errors
    ///
    /// `Error::InvalidUtf8` once the bytes so far cannot start valid UTF-8,
    /// or when the final fragment leaves a code point open.
    pub fn validate(&mut self, mut data: &[u8], is_final: bool) -> Result<()> {
        if self.partial_len > 0 {
            let needed = sequence_len(self.partial[0]);
            let take = (needed - self.partial_len).min(data.len());
            self.partial[self.partial_len..self.partial_len + take].copy_from_slice(&data[..take]);
            self.partial_len += take;
            data = &data[take..];

            match std::str::from_utf8(&self.partial[..self.partial_len]) {
                Ok(_) => self.partial_len = 0,
                Err(e) if e.error_len().is_none() && !is_final => return Ok(()),
                Err(_) => {
                    self.partial_len = 0;
                    return Err(Error::InvalidUtf8);
                }
            }
        }

        match std::str::from_utf8(data) {
            Ok(_) => Ok(()),
            Err(e) if e.error_len().is_none() && !is_final => {
                let tail = &data[e.valid_up_to()..];
                self.partial[..tail.len()].copy_from_slice(tail);
                self.partial_len = tail.len();
                Ok(())
            }
            Err(_) => Err(Error::InvalidUtf8),
        }
    }

    pub fn reset(&mut self) {
        self.partial_len = 0;
    }

    /// Whether a code point is waiting for its continuation bytes.
    #[must_use]
    pub fn has_incomplete(&self) -> bool {
        self.partial_len > 0
    }
}

/// # Errors
///
/// `Error::InvalidUtf8` unless `data` is valid UTF-8.
pub fn validate_utf8(data: &[u8]) -> Result<()> {
    std::str::from_utf8(data).map(drop).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `fragments` in order, the last one as final.
    fn feed(fragments: &[&[u8]]) -> Result<()> {
        let mut validator = Utf8Validator::new();
        let last = fragments.len().saturating_sub(1);
        for (i, fragment) in fragments.iter().enumerate() {
            validator.validate(fragment, i == last)?;
        }
        Ok(())
    }

    #[test]
    fn test_whole_payloads() {
        assert!(validate_utf8("plain, ñ, 世界, 🎉".as_bytes()).is_ok());
        for bad in [&[0x80][..], &[0xc0, 0x80], &[0xed, 0xa0, 0x80], &[0xff]] {
            assert_eq!(validate_utf8(bad), Err(Error::InvalidUtf8), "{bad:x?}");
        }
    }

    #[test]
    fn test_fragment_boundaries() {
        // 🎉 is F0 9F 8E 89, 世 is E4 B8 96, 界 is E7 95 8C.
        let ok: &[&[&[u8]]] = &[
            &[&[0xf0, 0x9f], &[0x8e, 0x89]],
            &[&[0xf0], &[0x9f], &[0x8e], &[0x89, b'!']],
            &[b"Hi \xe4", &[0xb8, 0x96, 0xe7, 0x95], &[0x8c]],
            &[&[], &[0xe2], &[], &[0x82, 0xac]],
        ];
        for fragments in ok {
            assert!(feed(fragments).is_ok(), "{fragments:x?}");
        }

        let bad: &[&[&[u8]]] = &[
            // Final fragment ends inside a code point.
            &[&[0xe2]],
            &[&[0xe2], &[0x82]],
            // The continuation never arrives.
            &[&[0xe2], &[0x41, 0x41]],
        ];
        for fragments in bad {
            assert_eq!(feed(fragments), Err(Error::InvalidUtf8), "{fragments:x?}");
        }
    }

    #[test]
    fn test_hopeless_prefix_fails_before_final() {
        // F4 90 is already above U+10FFFF.
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xf4, 0x90], false).is_err());
        assert!(validator.validate(&[0xff], false).is_err());
    }

    #[test]
    fn test_pending_tail_and_reset() {
        let mut validator = Utf8Validator::new();
        validator.validate(&[b'a', 0xe2], false).unwrap();
        assert!(validator.has_incomplete());
        validator.reset();
        assert!(!validator.has_incomplete());
        assert!(validator.validate(b"next message", true).is_ok());
    }
}
