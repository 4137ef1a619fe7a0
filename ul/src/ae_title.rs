//! The application entity title data type (PS3.8 Section 9.3.2): a
//! short ASCII name identifying an application entity, carried on the
//! wire as a fixed 16-byte, space-padded field.

use snafu::{ensure, Snafu};

/// Maximum length, in characters, of an AE title's trimmed value.
pub const MAX_LENGTH: usize = 16;

/// Fixed width of an AE title field on the wire.
pub const WIRE_LENGTH: usize = 16;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("AE title is empty after trimming"))]
    Empty,

    #[snafu(display(
        "AE title `{}` is {} characters long, exceeding the maximum of {}",
        value,
        len,
        MAX_LENGTH
    ))]
    TooLong { value: String, len: usize },

    #[snafu(display("AE title `{}` contains a non-printable-ASCII character", value))]
    NotAscii { value: String },

    #[snafu(display("AE title `{}` contains a newline", value))]
    ContainsNewline { value: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A validated application entity title: 1-16 printable ASCII
/// characters, trimmed of leading and trailing spaces.
///
/// Constructing one validates the invariant from the data model
/// the trimmed value's length must fall in `[1, 16]` and
/// every character must be ASCII. The untrimmed wire form is always 16
/// bytes, right-padded with spaces.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AeTitle(String);

impl AeTitle {
    /// Validate and construct an AE title from a user-supplied string,
    /// trimming leading/trailing spaces first.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim_matches(' ').to_string();
        ensure!(!trimmed.is_empty(), EmptySnafu);
        ensure!(
            trimmed.len() <= MAX_LENGTH,
            TooLongSnafu {
                value: trimmed.clone(),
                len: trimmed.len(),
            }
        );
        ensure!(
            !trimmed.contains(['\n', '\r']),
            ContainsNewlineSnafu { value: trimmed.clone() }
        );
        ensure!(
            trimmed.is_ascii() && trimmed.chars().all(|c| !c.is_ascii_control()),
            NotAsciiSnafu { value: trimmed.clone() }
        );
        Ok(AeTitle(trimmed))
    }

    /// Parse an AE title out of its 16-byte wire representation,
    /// trimming trailing spaces and NUL padding.
    pub fn from_wire(bytes: &[u8; WIRE_LENGTH]) -> Result<Self> {
        let s = String::from_utf8_lossy(bytes);
        let trimmed = s.trim_end_matches(['\0', ' ']).trim_start_matches(' ');
        Self::new(trimmed)
    }

    /// Encode this AE title to its 16-byte, space-padded wire form.
    pub fn wire_bytes(&self) -> [u8; WIRE_LENGTH] {
        let mut out = [b' '; WIRE_LENGTH];
        let bytes = self.0.as_bytes();
        out[..bytes.len()].copy_from_slice(bytes);
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AeTitle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AeTitle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for AeTitle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_bytes() {
        let ae = AeTitle::new("STORE-SCP").unwrap();
        let wire = ae.wire_bytes();
        assert_eq!(wire.len(), WIRE_LENGTH);
        assert_eq!(&wire[..9], b"STORE-SCP");
        assert_eq!(&wire[9..], b"       ");
        let back = AeTitle::from_wire(&wire).unwrap();
        assert_eq!(back, ae);
    }

    #[test]
    fn trims_leading_and_trailing_spaces() {
        let ae = AeTitle::new("  MY-AE  ").unwrap();
        assert_eq!(ae.as_str(), "MY-AE");
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(AeTitle::new("   "), Err(Error::Empty)));
    }

    #[test]
    fn rejects_too_long() {
        assert!(matches!(
            AeTitle::new("THIS-AE-TITLE-IS-WAY-TOO-LONG"),
            Err(Error::TooLong { .. })
        ));
    }

    #[test]
    fn accepts_exactly_sixteen_characters() {
        assert!(AeTitle::new("1234567890123456").is_ok());
    }

    #[test]
    fn rejects_non_ascii() {
        assert!(matches!(AeTitle::new("CAFÉ-SCP"), Err(Error::NotAscii { .. })));
    }

    #[test]
    fn wire_bytes_are_always_sixteen_bytes_long() {
        for len in 1..=16 {
            let ae = AeTitle::new("A".repeat(len)).unwrap();
            assert_eq!(ae.wire_bytes().len(), 16);
        }
    }
}
