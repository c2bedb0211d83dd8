//! Ordered identifiers for phases and plans.
//!
//! Identifiers carry a numeric prefix that may be zero-padded (`03`) or
//! decimal (`2.1` for an inserted phase). Two identifiers are equal when their
//! numeric components are equal, so `3` and `03` name the same unit.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Numeric work item identifier such as `03`, `3`, or `02.1`.
#[derive(Debug, Clone)]
pub struct ItemId {
    raw: String,
    parts: Vec<u32>,
}

impl ItemId {
    /// Parse an identifier made of dot-separated decimal components.
    ///
    /// Returns `None` for empty input or any non-numeric component.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let mut parts = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            parts.push(part.parse().ok()?);
        }
        Some(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    /// Parse the leading numeric prefix of a file or directory name
    /// (`03-auth` → `03`, `02.1-hotfix` → `02.1`).
    pub fn from_prefix(name: &str) -> Option<Self> {
        let end = name
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(name.len());
        Self::parse(name[..end].trim_end_matches('.'))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    /// Render with the integer component zero-padded to `width` digits.
    pub fn padded(&self, width: usize) -> String {
        let mut out = format!("{:0width$}", self.parts[0], width = width);
        for part in &self.parts[1..] {
            out.push('.');
            out.push_str(&part.to_string());
        }
        out
    }
}

impl PartialEq for ItemId {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for ItemId {}

impl Hash for ItemId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_and_bare_ids_are_equal() {
        let bare = ItemId::parse("3").expect("bare");
        let padded = ItemId::parse("03").expect("padded");
        assert_eq!(bare, padded);
        assert_eq!(bare.padded(2), "03");
    }

    #[test]
    fn ordering_is_numeric_not_textual() {
        let mut ids: Vec<ItemId> = ["10", "2.1", "02", "3", "1"]
            .iter()
            .map(|raw| ItemId::parse(raw).expect("id"))
            .collect();
        ids.sort();
        let rendered: Vec<&str> = ids.iter().map(ItemId::as_str).collect();
        assert_eq!(rendered, vec!["1", "02", "2.1", "3", "10"]);
    }

    #[test]
    fn decimal_ids_pad_only_the_integer_part() {
        let id = ItemId::parse("2.1").expect("id");
        assert_eq!(id.padded(2), "02.1");
    }

    #[test]
    fn from_prefix_reads_leading_digits() {
        assert_eq!(ItemId::from_prefix("03-auth").expect("id").as_str(), "03");
        assert_eq!(
            ItemId::from_prefix("02.1-hotfix").expect("id").as_str(),
            "02.1"
        );
        assert!(ItemId::from_prefix("notes").is_none());
    }

    #[test]
    fn rejects_non_numeric_components() {
        assert!(ItemId::parse("").is_none());
        assert!(ItemId::parse("a1").is_none());
        assert!(ItemId::parse("1..2").is_none());
    }
}
