//! Candidate patches and the locations they touch.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::junit::classfile::{ClassFileError, ClassInfo};
use crate::junit::TestUnitFilter;

static NEXT_PATCH_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide unique patch identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchId(u64);

impl PatchId {
    pub fn alloc() -> Self {
        Self(NEXT_PATCH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A patched class file plus an optional method/line annotation.
///
/// Two locations are equal when they name the same class, method and line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchLocation {
    base_dir: Option<PathBuf>,
    class_file: PathBuf,
    class_name: String,
    source_name: Option<String>,
    method: Option<String>,
    line: Option<u32>,
    suspiciousness: Option<f64>,
}

impl PatchLocation {
    /// Read the owning class name and source file name from the class file
    /// itself; the path is never used to guess the name.
    pub fn from_class_file(
        base_dir: impl Into<PathBuf>,
        class_file: impl Into<PathBuf>,
    ) -> Result<Self, ClassFileError> {
        let class_file = class_file.into();
        let info = ClassInfo::read(&class_file)?;
        Ok(Self {
            base_dir: Some(base_dir.into()),
            class_file,
            class_name: info.name,
            source_name: info.source_file,
            method: None,
            line: None,
            suspiciousness: None,
        })
    }

    /// A location whose class name is already known.
    pub fn with_class_name(class_file: impl Into<PathBuf>, class_name: impl Into<String>) -> Self {
        Self {
            base_dir: None,
            class_file: class_file.into(),
            class_name: class_name.into(),
            source_name: None,
            method: None,
            line: None,
            suspiciousness: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_suspiciousness(mut self, score: f64) -> Self {
        self.suspiciousness = Some(score);
        self
    }

    pub fn class_file(&self) -> &Path {
        &self.class_file
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn suspiciousness(&self) -> Option<f64> {
        self.suspiciousness
    }

    /// Package part of the class name; empty for the default package.
    pub fn package_name(&self) -> &str {
        self.class_name
            .rsplit_once('.')
            .map(|(package, _)| package)
            .unwrap_or("")
    }

    /// The patched source file: the `SourceFile` name resolved against the
    /// base directory, or against the class file's directory without one.
    pub fn source_file(&self) -> Option<PathBuf> {
        let name = self.source_name.as_deref()?;
        let base = match &self.base_dir {
            Some(dir) => dir.as_path(),
            None => self.class_file.parent()?,
        };
        Some(base.join(name))
    }

    /// The unpatched source file under `source_root`, located by package.
    pub fn original_source_file(&self, source_root: &Path) -> Option<PathBuf> {
        let name = self.source_name.as_deref()?;
        let mut path = source_root.to_path_buf();
        for segment in self.package_name().split('.').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        Some(path.join(name))
    }
}

impl PartialEq for PatchLocation {
    fn eq(&self, other: &Self) -> bool {
        self.class_name == other.class_name
            && self.method == other.method
            && self.line == other.line
    }
}

impl Eq for PatchLocation {}

impl Hash for PatchLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class_name.hash(state);
        self.method.hash(state);
        self.line.hash(state);
    }
}

impl fmt::Display for PatchLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name)?;
        if let Some(method) = &self.method {
            write!(f, "::{}", method)?;
        }
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        Ok(())
    }
}

/// An immutable bundle of patched locations. Equality and hashing use the
/// id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    id: PatchId,
    locations: Vec<PatchLocation>,
    covering_tests: TestUnitFilter,
}

impl Patch {
    /// A patch validated against every test.
    pub fn new(locations: Vec<PatchLocation>) -> Self {
        Self {
            id: PatchId::alloc(),
            locations,
            covering_tests: TestUnitFilter::All,
        }
    }

    /// A patch validated only against `covering_tests`.
    pub fn with_covering_tests<I, S>(locations: Vec<PatchLocation>, covering_tests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: PatchId::alloc(),
            locations,
            covering_tests: TestUnitFilter::some(covering_tests),
        }
    }

    pub fn id(&self) -> PatchId {
        self.id
    }

    pub fn locations(&self) -> &[PatchLocation] {
        &self.locations
    }

    pub fn covering_tests_filter(&self) -> &TestUnitFilter {
        &self.covering_tests
    }

    pub fn class_files(&self) -> Vec<PathBuf> {
        self.locations.iter().map(|l| l.class_file.clone()).collect()
    }

    /// Highest suspiciousness annotated on any location.
    pub fn max_suspiciousness(&self) -> Option<f64> {
        self.locations
            .iter()
            .filter_map(|l| l.suspiciousness)
            .fold(None, |acc, s| Some(acc.map_or(s, |a: f64| a.max(s))))
    }
}

impl PartialEq for Patch {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Patch {}

impl Hash for Patch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
