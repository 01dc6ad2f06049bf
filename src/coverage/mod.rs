//! Coverage recording and the program entities it is keyed by.
//!
//! Instrumented code reports integer indices (see [`CoverageSink`]); the
//! [`recorder::CoverageRecorder`] packs them into one bit unit per test, and
//! after the run the units are decoded through the [`ProfilingDomains`] into
//! [`CoverageInfo`] and, via [`crate::localization`], into
//! [`FaultLocalizationInfo`].

pub mod callgraph;
pub mod recorder;
pub mod unit;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::{DomainError, DomainIndex};

pub use callgraph::{CallGraph, CallGraphRecorder};
pub use recorder::CoverageRecorder;

/// Granularity of coverage recording and fault localization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Off,
    Class,
    Method,
    Line,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Class => write!(f, "class"),
            Self::Method => write!(f, "method"),
            Self::Line => write!(f, "line"),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "class" | "class_level" => Ok(Self::Class),
            "method" | "method_level" => Ok(Self::Method),
            "line" | "line_level" => Ok(Self::Line),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

/// Callback surface the instrumented program drives.
///
/// This is the per-run context handle threaded into test execution; the
/// recorder behind it assumes a single writer.
pub trait CoverageSink {
    /// A test is about to run; subsequent marks belong to it.
    fn start_test(&mut self, _test: &str) {}
    fn end_test(&mut self) {}

    fn mark_class(&mut self, class_index: usize);
    fn mark_method(&mut self, method_index: usize);
    fn mark_line(&mut self, file_index: usize, line: u32);

    fn enter_method(&mut self, _method_index: usize) {}
    fn leave_method(&mut self) {}
}

/// Sink that drops every callback, used when nothing is being measured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl CoverageSink for NullSink {
    fn mark_class(&mut self, _class_index: usize) {}
    fn mark_method(&mut self, _method_index: usize) {}
    fn mark_line(&mut self, _file_index: usize, _line: u32) {}
}

/// Domain names shared with the instrumentation agent.
pub const CLASSES_DOMAIN: &str = "classes";
pub const METHODS_DOMAIN: &str = "methods";
pub const FILES_DOMAIN: &str = "files";

/// The three domains coverage bits are addressed by.
#[derive(Debug, Clone, Default)]
pub struct ProfilingDomains {
    pub classes: DomainIndex,
    pub methods: DomainIndex,
    pub files: DomainIndex,
}

impl ProfilingDomains {
    pub fn new() -> Self {
        Self {
            classes: DomainIndex::new(CLASSES_DOMAIN),
            methods: DomainIndex::new(METHODS_DOMAIN),
            files: DomainIndex::new(FILES_DOMAIN),
        }
    }

    /// Load whatever domains exist in `dir`; missing ones start empty.
    pub fn load(dir: &Path) -> Result<Self, DomainError> {
        Ok(Self {
            classes: DomainIndex::load_or_empty(dir, CLASSES_DOMAIN)?,
            methods: DomainIndex::load_or_empty(dir, METHODS_DOMAIN)?,
            files: DomainIndex::load_or_empty(dir, FILES_DOMAIN)?,
        })
    }
}

/// A fully qualified class name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassName(pub String);

/// A fully qualified method name with its parameter list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodName(pub String);

/// A line in a source file. Serialized as `file:line`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceLine {
    pub file: String,
    pub line: u32,
}

impl SourceLine {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

impl FromStr for SourceLine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (file, line) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected `file:line`, got '{}'", s))?;
        let line = line
            .parse()
            .map_err(|_| format!("invalid line number in '{}'", s))?;
        Ok(Self::new(file, line))
    }
}

impl Serialize for SourceLine {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SourceLine {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Marker for anything coverage can be attributed to.
pub trait ProgramElement: Clone + Ord + fmt::Display {}

impl ProgramElement for ClassName {}
impl ProgramElement for MethodName {}
impl ProgramElement for SourceLine {}

/// Test name -> entities that test covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize",
    deserialize = "E: Deserialize<'de> + Ord"
))]
pub struct CoverageInfo<E> {
    per_test: BTreeMap<String, BTreeSet<E>>,
}

impl<E> Default for CoverageInfo<E> {
    fn default() -> Self {
        Self {
            per_test: BTreeMap::new(),
        }
    }
}

impl<E: ProgramElement> CoverageInfo<E> {
    pub fn new(per_test: BTreeMap<String, BTreeSet<E>>) -> Self {
        Self { per_test }
    }

    pub fn covered_by(&self, test: &str) -> Option<&BTreeSet<E>> {
        self.per_test.get(test)
    }

    pub fn tests(&self) -> impl Iterator<Item = &str> {
        self.per_test.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<E>)> {
        self.per_test.iter().map(|(t, e)| (t.as_str(), e))
    }

    /// Tests that cover `element`.
    pub fn tests_covering<'a>(&'a self, element: &'a E) -> impl Iterator<Item = &'a str> + 'a {
        self.per_test
            .iter()
            .filter(move |(_, covered)| covered.contains(element))
            .map(|(test, _)| test.as_str())
    }

    pub fn len(&self) -> usize {
        self.per_test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_test.is_empty()
    }
}

/// Entity -> suspiciousness in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize",
    deserialize = "E: Deserialize<'de> + Ord"
))]
pub struct FaultLocalizationInfo<E> {
    scores: BTreeMap<E, f64>,
}

impl<E> Default for FaultLocalizationInfo<E> {
    fn default() -> Self {
        Self {
            scores: BTreeMap::new(),
        }
    }
}

impl<E: ProgramElement> FaultLocalizationInfo<E> {
    pub fn new(scores: BTreeMap<E, f64>) -> Self {
        Self { scores }
    }

    pub fn score(&self, element: &E) -> Option<f64> {
        self.scores.get(element).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&E, f64)> {
        self.scores.iter().map(|(e, s)| (e, *s))
    }

    /// Entities sorted by descending score, ties broken by entity order.
    pub fn ranked(&self) -> Vec<(&E, f64)> {
        let mut ranked: Vec<(&E, f64)> = self.iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Fault localization result at whichever granularity was profiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "granularity", content = "scores", rename_all = "lowercase")]
pub enum FlReport {
    Class(FaultLocalizationInfo<ClassName>),
    Method(FaultLocalizationInfo<MethodName>),
    Line(FaultLocalizationInfo<SourceLine>),
}

impl FlReport {
    pub fn granularity(&self) -> Granularity {
        match self {
            Self::Class(_) => Granularity::Class,
            Self::Method(_) => Granularity::Method,
            Self::Line(_) => Granularity::Line,
        }
    }

    /// Ranked `(entity, score)` pairs with entities rendered as text.
    pub fn ranked(&self) -> Vec<(String, f64)> {
        fn render<E: ProgramElement>(info: &FaultLocalizationInfo<E>) -> Vec<(String, f64)> {
            info.ranked()
                .into_iter()
                .map(|(e, s)| (e.to_string(), s))
                .collect()
        }
        match self {
            Self::Class(info) => render(info),
            Self::Method(info) => render(info),
            Self::Line(info) => render(info),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Class(info) => info.len(),
            Self::Method(info) => info.len(),
            Self::Line(info) => info.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coverage result at whichever granularity was profiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "granularity", content = "tests", rename_all = "lowercase")]
pub enum CoverageReport {
    Class(CoverageInfo<ClassName>),
    Method(CoverageInfo<MethodName>),
    Line(CoverageInfo<SourceLine>),
}

impl CoverageReport {
    pub fn granularity(&self) -> Granularity {
        match self {
            Self::Class(_) => Granularity::Class,
            Self::Method(_) => Granularity::Method,
            Self::Line(_) => Granularity::Line,
        }
    }

    /// Number of tests with a recorded unit.
    pub fn test_count(&self) -> usize {
        match self {
            Self::Class(info) => info.len(),
            Self::Method(info) => info.len(),
            Self::Line(info) => info.len(),
        }
    }

    /// Covered entities of `test`, rendered as text.
    pub fn covered_by(&self, test: &str) -> Vec<String> {
        fn render<E: ProgramElement>(info: &CoverageInfo<E>, test: &str) -> Vec<String> {
            info.covered_by(test)
                .map(|set| set.iter().map(ToString::to_string).collect())
                .unwrap_or_default()
        }
        match self {
            Self::Class(info) => render(info, test),
            Self::Method(info) => render(info, test),
            Self::Line(info) => render(info, test),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_parsing() {
        assert_eq!("LINE_LEVEL".parse::<Granularity>(), Ok(Granularity::Line));
        assert_eq!("method".parse::<Granularity>(), Ok(Granularity::Method));
        assert!("bogus".parse::<Granularity>().is_err());
        assert_eq!(Granularity::Class.to_string(), "class");
    }

    #[test]
    fn test_source_line_text_form() {
        let line: SourceLine = "Foo.java:42".parse().unwrap();
        assert_eq!(line, SourceLine::new("Foo.java", 42));
        assert_eq!(line.to_string(), "Foo.java:42");
        assert!("Foo.java".parse::<SourceLine>().is_err());
    }

    #[test]
    fn test_line_report_serializes_with_string_keys() {
        let mut scores = BTreeMap::new();
        scores.insert(SourceLine::new("A.java", 3), 0.5);
        let report = FlReport::Line(FaultLocalizationInfo::new(scores));
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"A.java:3\""));
        let back: FlReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_ranked_orders_by_score_then_name() {
        let mut scores = BTreeMap::new();
        scores.insert(ClassName("b.B".into()), 0.5);
        scores.insert(ClassName("a.A".into()), 0.5);
        scores.insert(ClassName("c.C".into()), 0.9);
        let report = FlReport::Class(FaultLocalizationInfo::new(scores));
        let names: Vec<String> = report.ranked().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["c.C", "a.A", "b.B"]);
    }

    #[test]
    fn test_tests_covering() {
        let mut per_test = BTreeMap::new();
        per_test.insert("T1".to_string(), BTreeSet::from([ClassName("A".into())]));
        per_test.insert("T2".to_string(), BTreeSet::new());
        let info = CoverageInfo::new(per_test);
        let a = ClassName("A".into());
        assert_eq!(info.tests_covering(&a).collect::<Vec<_>>(), vec!["T1"]);
    }
}
