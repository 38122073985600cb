//! Registry of filename suffixes that mark encrypted containers.

use std::collections::BTreeSet;

use relaygate_core::utils::ext;

/// Suffixes recognized out of the box.
pub const DEFAULT_SUFFIXES: &[&str] = &["sccgv", "sccgt", "sccgpdf", "sccgi", "sccga"];

/// Set of container suffixes, matched case-insensitively against the
/// extension of a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSuffixes {
    suffixes: BTreeSet<String>,
}

impl Default for ContainerSuffixes {
    fn default() -> Self {
        let mut set = Self::empty();
        for suffix in DEFAULT_SUFFIXES {
            set.register(suffix);
        }
        set
    }
}

impl ContainerSuffixes {
    /// A set with no suffixes.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            suffixes: BTreeSet::new(),
        }
    }

    /// Add a suffix (with or without a leading dot). Returns `false` if it
    /// was already registered.
    pub fn register(&mut self, suffix: &str) -> bool {
        let suffix = suffix.trim().trim_start_matches('.').to_ascii_lowercase();
        if suffix.is_empty() {
            return false;
        }
        self.suffixes.insert(suffix)
    }

    /// Whether `name` ends in a registered suffix.
    #[must_use]
    pub fn is_container(&self, name: &str) -> bool {
        self.suffixes.contains(&ext(name))
    }

    /// Registered suffixes in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.suffixes.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_recognize_default_suffixes() {
        let suffixes = ContainerSuffixes::default();
        for name in ["a.sccgv", "b.SCCGT", "report.sccgpdf", "c.sccgi", "d.sccga"] {
            assert!(suffixes.is_container(name), "{name}");
        }
        assert!(!suffixes.is_container("notes.md"));
        assert!(!suffixes.is_container("sccgv"));
    }

    #[test]
    fn test_should_register_additional_suffix() {
        let mut suffixes = ContainerSuffixes::default();
        assert!(!suffixes.is_container("movie.sccgx"));
        assert!(suffixes.register(".SCCGX"));
        assert!(!suffixes.register("sccgx"));
        assert!(!suffixes.register(" "));
        assert!(suffixes.is_container("movie.sccgx"));
    }

    #[test]
    fn test_should_start_empty() {
        let suffixes = ContainerSuffixes::empty();
        assert!(!suffixes.is_container("a.sccgv"));
        assert_eq!(suffixes.iter().count(), 0);
    }
}
