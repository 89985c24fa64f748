//! Message names.
//!
//! The textual key identifying a queue entry. Canonical form is three
//! hex fields, `<unique-name>_<unique-number>_<split-counter>`, encoding
//! the input time, a per-second unique number and the split-job counter.
//! A single-segment form `<host>_<timestamp>_<counter>` also appears in
//! older spools; validators accept both.

use thiserror::Error;

/// Longest accepted message name (also bounds fifo payloads).
pub const MAX_MSG_NAME_LENGTH: usize = 80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MsgNameError {
    #[error("message name is empty")]
    Empty,
    #[error("message name too long ({0} bytes)")]
    TooLong(usize),
    #[error("message name `{0}` is not of the form a_b_c")]
    BadShape(String),
    #[error("message name `{0}` has an empty field")]
    EmptyField(String),
}

/// A validated message name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MsgName(String);

impl MsgName {
    /// Builds the canonical form from its parts.
    pub fn build(input_time: i64, unique_number: u32, split_job_counter: u32) -> Self {
        Self(format!(
            "{:x}_{:x}_{:x}",
            input_time, unique_number, split_job_counter
        ))
    }

    /// Validates an arbitrary string as a message name.
    ///
    /// Accepts both the canonical all-hex form and the legacy
    /// `<host>_<timestamp>_<counter>` form; anything else is rejected.
    pub fn parse(s: &str) -> Result<Self, MsgNameError> {
        if s.is_empty() {
            return Err(MsgNameError::Empty);
        }
        if s.len() > MAX_MSG_NAME_LENGTH {
            return Err(MsgNameError::TooLong(s.len()));
        }
        let parts: Vec<&str> = s.split('_').collect();
        if parts.len() < 3 {
            return Err(MsgNameError::BadShape(s.to_string()));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(MsgNameError::EmptyField(s.to_string()));
        }
        // The two trailing fields are numeric in both accepted forms.
        let tail_numeric = parts[parts.len() - 2..]
            .iter()
            .all(|p| p.chars().all(|c| c.is_ascii_hexdigit()));
        if !tail_numeric {
            return Err(MsgNameError::BadShape(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split-job counter (last field), when it parses as hex.
    pub fn split_job_counter(&self) -> Option<u32> {
        let last = self.0.rsplit('_').next()?;
        u32::from_str_radix(last, 16).ok()
    }

    /// `(input_time, unique_number, split_job_counter)` for canonical
    /// names; `None` for the legacy host-prefixed form.
    pub fn parts(&self) -> Option<(i64, u32, u32)> {
        let mut it = self.0.split('_');
        let t = i64::from_str_radix(it.next()?, 16).ok()?;
        let u = u32::from_str_radix(it.next()?, 16).ok()?;
        let s = u32::from_str_radix(it.next()?, 16).ok()?;
        Some((t, u, s))
    }
}

impl std::fmt::Display for MsgName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MsgName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_round_trips() {
        let m = MsgName::build(0x6552_a1b0, 0x3f, 2);
        assert_eq!(m.as_str(), "6552a1b0_3f_2");
        assert_eq!(MsgName::parse(m.as_str()).unwrap(), m);
        assert_eq!(m.split_job_counter(), Some(2));
    }

    #[test]
    fn legacy_host_form_is_accepted() {
        let m = MsgName::parse("ftp-berlin_1700000000_7").unwrap();
        assert_eq!(m.as_str(), "ftp-berlin_1700000000_7");
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert_eq!(MsgName::parse(""), Err(MsgNameError::Empty));
        assert!(matches!(
            MsgName::parse("no-separators"),
            Err(MsgNameError::BadShape(_))
        ));
        assert!(matches!(
            MsgName::parse("a__b"),
            Err(MsgNameError::EmptyField(_))
        ));
        assert!(matches!(
            MsgName::parse("a_b_zz!"),
            Err(MsgNameError::BadShape(_))
        ));
        let long = "a_".repeat(60) + "1_2";
        assert!(matches!(
            MsgName::parse(&long),
            Err(MsgNameError::TooLong(_))
        ));
    }
}
