//! Identity keys derived from a payload's natural key

use std::fmt;

use serde::{Deserialize, Serialize};

const STORAGE_SEPARATOR: char = '\u{1f}';
const STORAGE_ESCAPE: char = '\\';

/// The identity of a record: the values of its identity fields, in schema order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    parts: Vec<String>,
}

impl RecordKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    pub fn single(part: impl Into<String>) -> Self {
        Self {
            parts: vec![part.into()],
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Unambiguous encoding used as the physical storage key
    ///
    /// Parts are joined with U+001F. A separator or backslash inside a part
    /// is preceded by a backslash.
    pub fn storage_key(&self) -> String {
        let mut out = String::new();
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push(STORAGE_SEPARATOR);
            }
            for c in part.chars() {
                if c == STORAGE_SEPARATOR || c == STORAGE_ESCAPE {
                    out.push(STORAGE_ESCAPE);
                }
                out.push(c);
            }
        }
        out
    }

    /// Parse a `:`-separated key as typed on the command line
    pub fn parse(text: &str, arity: usize) -> Option<Self> {
        let parts: Vec<String> = if arity <= 1 {
            vec![text.to_string()]
        } else {
            text.splitn(arity, ':').map(str::to_string).collect()
        };
        (parts.len() == arity.max(1)).then(|| Self { parts })
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parts.join(":"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_parts() {
        let key = RecordKey::new(vec!["a".into(), "ab".into()]);
        assert_eq!(key.to_string(), "a:ab");
        assert_eq!(RecordKey::single("team").to_string(), "team");
    }

    #[test]
    fn test_storage_key_does_not_collide_on_colons() {
        let left = RecordKey::new(vec!["a:b".into(), "c".into()]);
        let right = RecordKey::new(vec!["a".into(), "b:c".into()]);
        assert_eq!(left.to_string(), right.to_string());
        assert_ne!(left.storage_key(), right.storage_key());
    }

    #[test]
    fn test_storage_key_escapes_separator_inside_parts() {
        let left = RecordKey::new(vec!["a\u{1f}b".into(), "c".into()]);
        let right = RecordKey::new(vec!["a".into(), "b\u{1f}c".into()]);
        assert_ne!(left.storage_key(), right.storage_key());
        assert_eq!(left.storage_key(), "a\\\u{1f}b\u{1f}c");

        let slash_left = RecordKey::new(vec!["a\\".into(), "b".into()]);
        let slash_right = RecordKey::new(vec!["a".into(), "\\b".into()]);
        assert_ne!(slash_left.storage_key(), slash_right.storage_key());
    }

    #[test]
    fn test_parse_respects_arity() {
        assert_eq!(
            RecordKey::parse("a:ab", 2),
            Some(RecordKey::new(vec!["a".into(), "ab".into()]))
        );
        assert_eq!(RecordKey::parse("a", 2), None);
        assert_eq!(RecordKey::parse("x:y", 1), Some(RecordKey::single("x:y")));
    }
}
