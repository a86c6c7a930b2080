//! Bounded strings for the fixed-width fields of a note record.
//!
//! Every text field in the segment is a NUL-terminated byte buffer of fixed
//! size. [`BoundedStr<N>`] is the owned, validated counterpart: it holds at
//! most `N - 1` bytes of UTF-8 with no interior NUL, so it always fits the
//! buffer together with its terminator.
//!
//! Two construction policies are offered:
//!
//! - [`BoundedStr::new`] rejects input that does not fit.
//! - [`BoundedStr::truncate`] cuts input at the first NUL and then at the
//!   last UTF-8 boundary that fits.

use std::fmt;
use std::ops::Deref;

use crate::layout::{AUTHOR_LEN, TEXT_LEN, TIMESTAMP_LEN};

/// Note body (at most 199 bytes).
pub type NoteText = BoundedStr<TEXT_LEN>;

/// Author name (at most 31 bytes).
pub type Author = BoundedStr<AUTHOR_LEN>;

/// Timestamp in `YYYY-MM-DD HH:MM` form (at most 19 bytes).
pub type Timestamp = BoundedStr<TIMESTAMP_LEN>;

/// Format used for note timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A UTF-8 string that fits a NUL-terminated buffer of `N` bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoundedStr<const N: usize> {
    buf: String,
}

/// Errors from [`BoundedStr::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundedStrError {
    /// Input is longer than the field allows.
    TooLong { len: usize, max: usize },
    /// Input contains a NUL byte, which would terminate the C string early.
    InteriorNul { position: usize },
}

impl fmt::Display for BoundedStrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong { len, max } => {
                write!(f, "input is {len} bytes, field holds at most {max}")
            }
            Self::InteriorNul { position } => write!(f, "input contains NUL at byte {position}"),
        }
    }
}

impl std::error::Error for BoundedStrError {}

impl<const N: usize> BoundedStr<N> {
    /// Maximum content length in bytes (one byte is kept for the terminator).
    pub const CAPACITY: usize = N - 1;

    /// Validate `s` against the bound, rejecting anything that does not fit.
    pub fn new(s: &str) -> Result<Self, BoundedStrError> {
        if let Some(position) = s.bytes().position(|b| b == 0) {
            return Err(BoundedStrError::InteriorNul { position });
        }
        if s.len() > Self::CAPACITY {
            return Err(BoundedStrError::TooLong {
                len: s.len(),
                max: Self::CAPACITY,
            });
        }
        Ok(Self { buf: s.to_owned() })
    }

    /// Build from `s`, dropping everything from the first NUL on and cutting
    /// at the last character boundary that fits.
    pub fn truncate(s: &str) -> Self {
        let s = match s.find('\0') {
            Some(nul) => &s[..nul],
            None => s,
        };
        Self {
            buf: s[..floor_char_boundary(s, Self::CAPACITY)].to_owned(),
        }
    }

    /// Decode a raw record field.
    ///
    /// Reads up to the first NUL (or `N - 1` bytes if the buffer was never
    /// terminated). Invalid UTF-8 from a foreign writer is replaced lossily.
    pub fn from_bytes(raw: &[u8; N]) -> Self {
        let content = c_str_bytes(raw);
        match std::str::from_utf8(content) {
            Ok(s) => Self { buf: s.to_owned() },
            Err(_) => Self::truncate(&String::from_utf8_lossy(content)),
        }
    }

    /// Encode into a raw record field, zero-filling the remainder.
    pub fn write_to(&self, raw: &mut [u8; N]) {
        let len = self.buf.len();
        raw[..len].copy_from_slice(self.buf.as_bytes());
        raw[len..].fill(0);
    }

    /// Compare against a raw record field with C string semantics.
    pub fn matches(&self, raw: &[u8; N]) -> bool {
        c_str_bytes(raw) == self.buf.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

impl Timestamp {
    /// The current local time in [`TIMESTAMP_FORMAT`].
    pub fn now() -> Self {
        Self::truncate(&chrono::Local::now().format(TIMESTAMP_FORMAT).to_string())
    }
}

impl<const N: usize> Deref for BoundedStr<N> {
    type Target = str;

    fn deref(&self) -> &str {
        &self.buf
    }
}

impl<const N: usize> AsRef<str> for BoundedStr<N> {
    fn as_ref(&self) -> &str {
        &self.buf
    }
}

impl<const N: usize> PartialEq<str> for BoundedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.buf == other
    }
}

impl<const N: usize> PartialEq<&str> for BoundedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.buf == *other
    }
}

impl<const N: usize> fmt::Display for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

impl<const N: usize> fmt::Debug for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.buf, f)
    }
}

/// Bytes of a C string field, excluding the terminator.
#[inline]
fn c_str_bytes<const N: usize>(raw: &[u8; N]) -> &[u8] {
    let limit = N.saturating_sub(1);
    let end = raw[..limit].iter().position(|&b| b == 0).unwrap_or(limit);
    &raw[..end]
}

#[inline]
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_accepts_exact_capacity() {
        let s = "a".repeat(Author::CAPACITY);
        let author = Author::new(&s).unwrap();
        assert_eq!(author.len(), 31);
    }

    #[test]
    fn new_rejects_over_capacity() {
        let s = "a".repeat(32);
        assert_eq!(
            Author::new(&s),
            Err(BoundedStrError::TooLong { len: 32, max: 31 })
        );
    }

    #[test]
    fn new_rejects_interior_nul() {
        assert_eq!(
            Author::new("al\0ice"),
            Err(BoundedStrError::InteriorNul { position: 2 })
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // 15 two-byte characters = 30 bytes, then a 3-byte one straddles 31.
        let s = format!("{}€", "é".repeat(15));
        let author = Author::truncate(&s);
        assert_eq!(author.len(), 30);
        assert_eq!(author.as_str(), "é".repeat(15));
    }

    #[test]
    fn truncate_stops_at_nul() {
        assert_eq!(Author::truncate("bob\0mallory"), "bob");
    }

    #[test]
    fn text_truncates_to_199_bytes() {
        let long = "x".repeat(500);
        assert_eq!(NoteText::truncate(&long).len(), 199);
    }

    #[test]
    fn write_to_clears_stale_tail() {
        let mut raw = [b'z'; AUTHOR_LEN];
        Author::new("amy").unwrap().write_to(&mut raw);
        assert_eq!(&raw[..3], b"amy");
        assert!(raw[3..].iter().all(|&b| b == 0));
        assert_eq!(Author::from_bytes(&raw), "amy");
    }

    #[test]
    fn from_bytes_handles_unterminated_buffer() {
        let raw = [b'q'; AUTHOR_LEN];
        assert_eq!(Author::from_bytes(&raw).len(), 31);
    }

    #[test]
    fn from_bytes_replaces_invalid_utf8() {
        let mut raw = [0u8; AUTHOR_LEN];
        raw[..3].copy_from_slice(&[b'o', 0xff, b'k']);
        assert_eq!(Author::from_bytes(&raw), "o\u{fffd}k");
    }

    #[test]
    fn matches_uses_c_string_semantics() {
        let mut raw = [0u8; AUTHOR_LEN];
        Author::new("alice").unwrap().write_to(&mut raw);
        assert!(Author::new("alice").unwrap().matches(&raw));
        assert!(!Author::new("alic").unwrap().matches(&raw));
        assert!(!Author::new("alice2").unwrap().matches(&raw));
    }

    #[test]
    fn timestamp_now_has_fixed_shape() {
        let ts = Timestamp::now();
        assert_eq!(ts.len(), 16);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }
}
