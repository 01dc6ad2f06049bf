//! Domain index: a bidirectional string <-> dense integer interner.
//!
//! Instrumentation assigns each class, method, and source file an index on
//! first sight; coverage bits are addressed by those indices. The on-disk
//! form is two files:
//!
//! - `<name>.dom` holding one line `<name> <size> <mapfile>`
//! - `<mapfile>` holding one identifier per line in index order

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

/// Domain persistence errors
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed domain descriptor {file}: {reason}")]
    MalformedDescriptor { file: String, reason: String },

    #[error("Domain name mismatch: expected {expected}, found {found}")]
    NameMismatch { expected: String, found: String },

    #[error("Unexpected end of map file {file}: expected {expected} entries, read {read}")]
    Truncated {
        file: String,
        expected: usize,
        read: usize,
    },

    #[error("Duplicate entry '{entry}' at line {line} of map file {file}")]
    DuplicateEntry {
        file: String,
        entry: String,
        line: usize,
    },
}

/// Ordered bijection between names and `0..size()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainIndex {
    name: String,
    names: Vec<String>,
    indices: HashMap<String, usize>,
}

impl DomainIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            names: Vec::new(),
            indices: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the index of `name`, assigning `size()` if it is new.
    pub fn get_or_add(&mut self, name: &str) -> usize {
        if let Some(&index) = self.indices.get(name) {
            return index;
        }
        let index = self.names.len();
        self.names.push(name.to_string());
        self.indices.insert(name.to_string(), index);
        index
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }

    fn map_file_name(&self) -> String {
        format!("{}.map", self.name)
    }

    /// Write `<name>.dom` and its map file into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), DomainError> {
        fs::create_dir_all(dir)?;
        let map_file = self.map_file_name();
        fs::write(
            dir.join(format!("{}.dom", self.name)),
            format!("{} {} {}\n", self.name, self.size(), map_file),
        )?;

        let mut writer = BufWriter::new(fs::File::create(dir.join(&map_file))?);
        for name in &self.names {
            writeln!(writer, "{}", name)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load the domain called `name` from `dir`. Map lines are taken
    /// verbatim, so this is the exact inverse of [`DomainIndex::save`].
    pub fn load(dir: &Path, name: &str) -> Result<Self, DomainError> {
        let dom_path = dir.join(format!("{}.dom", name));
        let descriptor = fs::read_to_string(&dom_path)?;
        let malformed = |reason: &str| DomainError::MalformedDescriptor {
            file: dom_path.display().to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = descriptor
            .lines()
            .next()
            .ok_or_else(|| malformed("empty descriptor"))?
            .split_whitespace()
            .collect();
        let &[found, size, map_file] = fields.as_slice() else {
            return Err(malformed("expected `<name> <size> <mapfile>`"));
        };
        if found != name {
            return Err(DomainError::NameMismatch {
                expected: name.to_string(),
                found: found.to_string(),
            });
        }
        let size: usize = size.parse().map_err(|_| malformed("size is not a number"))?;

        let map_path = dir.join(map_file);
        let map = fs::read_to_string(&map_path)?;
        let mut domain = Self::new(name);
        for (line, entry) in map.split_terminator('\n').take(size).enumerate() {
            if domain.indices.contains_key(entry) {
                return Err(DomainError::DuplicateEntry {
                    file: map_path.display().to_string(),
                    entry: entry.to_string(),
                    line: line + 1,
                });
            }
            domain.indices.insert(entry.to_string(), domain.names.len());
            domain.names.push(entry.to_string());
        }
        if domain.size() < size {
            return Err(DomainError::Truncated {
                file: map_path.display().to_string(),
                expected: size,
                read: domain.size(),
            });
        }
        Ok(domain)
    }

    /// Load `name` from `dir`, or start an empty domain when no descriptor exists.
    pub fn load_or_empty(dir: &Path, name: &str) -> Result<Self, DomainError> {
        if dir.join(format!("{}.dom", name)).exists() {
            Self::load(dir, name)
        } else {
            Ok(Self::new(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_indices_follow_first_seen_order() {
        let mut dom = DomainIndex::new("classes");
        assert_eq!(dom.get_or_add("a.A"), 0);
        assert_eq!(dom.get_or_add("a.B"), 1);
        assert_eq!(dom.get_or_add("a.A"), 0);
        assert_eq!(dom.get_or_add("a.C"), 2);
        assert_eq!(dom.size(), 3);
        assert_eq!(dom.get(1), Some("a.B"));
        assert_eq!(dom.get(3), None);
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let temp = TempDir::new().unwrap();
        let mut dom = DomainIndex::new("methods");
        for name in ["p.A.f()", "p.A.g(int)", "p.B.<init>()"] {
            dom.get_or_add(name);
        }
        dom.save(temp.path()).unwrap();

        let descriptor = fs::read_to_string(temp.path().join("methods.dom")).unwrap();
        assert_eq!(descriptor.trim(), "methods 3 methods.map");

        let loaded = DomainIndex::load(temp.path(), "methods").unwrap();
        assert_eq!(loaded, dom);
        for i in 0..dom.size() {
            assert_eq!(loaded.get(i), dom.get(i));
        }
    }

    #[test]
    fn test_load_rejects_name_mismatch() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("files.dom"), "classes 0 classes.map\n").unwrap();
        let err = DomainIndex::load(temp.path(), "files").unwrap_err();
        assert!(matches!(err, DomainError::NameMismatch { .. }));
    }

    #[test]
    fn test_load_rejects_truncated_map() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("files.dom"), "files 3 files.map\n").unwrap();
        fs::write(temp.path().join("files.map"), "A.java\nB.java\n").unwrap();
        let err = DomainIndex::load(temp.path(), "files").unwrap_err();
        assert!(matches!(err, DomainError::Truncated { expected: 3, read: 2, .. }));
    }

    #[test]
    fn test_load_keeps_surrounding_whitespace() {
        let temp = TempDir::new().unwrap();
        let mut dom = DomainIndex::new("files");
        for name in ["A.java", " A.java", "A.java\t", ""] {
            dom.get_or_add(name);
        }
        dom.save(temp.path()).unwrap();
        let loaded = DomainIndex::load(temp.path(), "files").unwrap();
        assert_eq!(loaded.size(), 4);
        assert_eq!(loaded, dom);
        assert_eq!(loaded.index_of(" A.java"), Some(1));
    }

    #[test]
    fn test_load_rejects_duplicate_entry() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("files.dom"), "files 3 files.map\n").unwrap();
        fs::write(temp.path().join("files.map"), "A.java\nB.java\nA.java\n").unwrap();
        let err = DomainIndex::load(temp.path(), "files").unwrap_err();
        assert!(matches!(
            err,
            DomainError::DuplicateEntry { ref entry, line: 3, .. } if entry == "A.java"
        ));
    }

    #[test]
    fn test_load_or_empty_without_descriptor() {
        let temp = TempDir::new().unwrap();
        let dom = DomainIndex::load_or_empty(temp.path(), "classes").unwrap();
        assert!(dom.is_empty());
        assert_eq!(dom.name(), "classes");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Property: repeated lookups are stable and indices are dense
            #[test]
            fn prop_get_or_add_is_stable(names in proptest::collection::vec("[a-z]{1,6}", 0..40)) {
                let mut dom = DomainIndex::new("d");
                let first: Vec<usize> = names.iter().map(|n| dom.get_or_add(n)).collect();
                let second: Vec<usize> = names.iter().map(|n| dom.get_or_add(n)).collect();
                prop_assert_eq!(&first, &second);
                for (i, name) in dom.iter() {
                    prop_assert_eq!(dom.index_of(name), Some(i));
                }
            }
        }
    }
}
