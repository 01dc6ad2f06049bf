//! Per-run coverage recorder.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use super::callgraph::{CallGraph, CallGraphRecorder};
use super::unit::{ByteUnit, CoverageUnit, LineUnit, WordUnit};
use super::{
    ClassName, CoverageInfo, CoverageReport, CoverageSink, FlReport, Granularity, MethodName,
    ProfilingDomains, ProgramElement, SourceLine,
};
use crate::domain::DomainIndex;
use crate::localization::{localize, FlStrategy};

/// Collects one coverage unit per test.
///
/// Single writer: tests are started, marked, and ended sequentially by the
/// thread running them. Callbacks arriving outside a test are dropped.
#[derive(Debug)]
pub struct CoverageRecorder {
    granularity: Granularity,
    units: Vec<(String, CoverageUnit)>,
    by_test: HashMap<String, usize>,
    current: Option<usize>,
    call_graph: Option<CallGraphRecorder>,
}

impl CoverageRecorder {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            units: Vec::new(),
            by_test: HashMap::new(),
            current: None,
            call_graph: None,
        }
    }

    /// Also record caller -> callee edges.
    pub fn with_call_graph(mut self) -> Self {
        self.call_graph = Some(CallGraphRecorder::new());
        self
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn fresh_unit(&self) -> Option<CoverageUnit> {
        match self.granularity {
            Granularity::Off => None,
            Granularity::Class => Some(CoverageUnit::Class(ByteUnit::new())),
            Granularity::Method => Some(CoverageUnit::Method(WordUnit::new())),
            Granularity::Line => Some(CoverageUnit::Line(LineUnit::new())),
        }
    }

    /// Allocate a zeroed unit for `test`, replacing any earlier one.
    pub fn start_test(&mut self, test: &str) {
        if let Some(graph) = self.call_graph.as_mut() {
            graph.reset_stack();
        }
        let Some(unit) = self.fresh_unit() else {
            return;
        };
        let slot = match self.by_test.get(test) {
            Some(&slot) => {
                self.units[slot].1 = unit;
                slot
            }
            None => {
                self.units.push((test.to_string(), unit));
                self.by_test.insert(test.to_string(), self.units.len() - 1);
                self.units.len() - 1
            }
        };
        self.current = Some(slot);
    }

    pub fn end_test(&mut self) {
        self.current = None;
    }

    /// Number of tests with a unit.
    pub fn recorded_tests(&self) -> usize {
        self.units.len()
    }

    fn current_unit(&mut self) -> Option<&mut CoverageUnit> {
        match self.current {
            Some(slot) => Some(&mut self.units[slot].1),
            None => {
                debug!("Coverage callback outside of a test ignored");
                None
            }
        }
    }

    /// Domain the units of this recorder are addressed by.
    pub fn domain<'a>(&self, domains: &'a ProfilingDomains) -> &'a DomainIndex {
        match self.granularity {
            Granularity::Class | Granularity::Off => &domains.classes,
            Granularity::Method => &domains.methods,
            Granularity::Line => &domains.files,
        }
    }

    fn decode_names(
        &self,
        domain: &DomainIndex,
        indices: impl Iterator<Item = usize>,
        missing: &mut usize,
    ) -> Vec<String> {
        indices
            .filter_map(|i| {
                let name = domain.get(i);
                if name.is_none() {
                    *missing += 1;
                }
                name.map(str::to_string)
            })
            .collect()
    }

    fn decode_with<E: ProgramElement>(
        &self,
        domain: &DomainIndex,
        decode: impl Fn(&Self, &CoverageUnit, &DomainIndex, &mut usize) -> BTreeSet<E>,
    ) -> CoverageInfo<E> {
        let mut missing = 0usize;
        let per_test: BTreeMap<String, BTreeSet<E>> = self
            .units
            .iter()
            .map(|(test, unit)| (test.clone(), decode(self, unit, domain, &mut missing)))
            .collect();
        if missing > 0 {
            warn!(
                domain = domain.name(),
                missing, "Coverage bits without a domain entry were dropped"
            );
        }
        CoverageInfo::new(per_test)
    }

    fn class_coverage(&self, domain: &DomainIndex) -> CoverageInfo<ClassName> {
        self.decode_with(domain, |this, unit, domain, missing| match unit {
            CoverageUnit::Class(u) => this
                .decode_names(domain, u.decode(), missing)
                .into_iter()
                .map(ClassName)
                .collect(),
            _ => BTreeSet::new(),
        })
    }

    fn method_coverage(&self, domain: &DomainIndex) -> CoverageInfo<MethodName> {
        self.decode_with(domain, |this, unit, domain, missing| match unit {
            CoverageUnit::Method(u) => this
                .decode_names(domain, u.decode(), missing)
                .into_iter()
                .map(MethodName)
                .collect(),
            _ => BTreeSet::new(),
        })
    }

    fn line_coverage(&self, domain: &DomainIndex) -> CoverageInfo<SourceLine> {
        self.decode_with(domain, |_, unit, domain, missing| match unit {
            CoverageUnit::Line(u) => u
                .decode()
                .filter_map(|(file, line)| match domain.get(file) {
                    Some(name) => Some(SourceLine::new(name, line)),
                    None => {
                        *missing += 1;
                        None
                    }
                })
                .collect(),
            _ => BTreeSet::new(),
        })
    }

    /// Decode every unit into the entities it covers. `None` when off.
    pub fn coverage_info(&self, domain: &DomainIndex) -> Option<CoverageReport> {
        match self.granularity {
            Granularity::Off => None,
            Granularity::Class => Some(CoverageReport::Class(self.class_coverage(domain))),
            Granularity::Method => Some(CoverageReport::Method(self.method_coverage(domain))),
            Granularity::Line => Some(CoverageReport::Line(self.line_coverage(domain))),
        }
    }

    /// Score the covered entities. `None` when off.
    pub fn fault_localization(
        &self,
        domain: &DomainIndex,
        failing: &BTreeSet<String>,
        strategy: FlStrategy,
    ) -> Option<FlReport> {
        match self.granularity {
            Granularity::Off => None,
            Granularity::Class => Some(FlReport::Class(localize(
                &self.class_coverage(domain),
                failing,
                strategy,
            ))),
            Granularity::Method => Some(FlReport::Method(localize(
                &self.method_coverage(domain),
                failing,
                strategy,
            ))),
            Granularity::Line => Some(FlReport::Line(localize(
                &self.line_coverage(domain),
                failing,
                strategy,
            ))),
        }
    }

    /// Recorded call graph, if call-graph recording is enabled.
    pub fn call_graph(&self, methods: &DomainIndex) -> Option<CallGraph> {
        self.call_graph.as_ref().map(|g| g.call_graph(methods))
    }
}

impl CoverageSink for CoverageRecorder {
    fn start_test(&mut self, test: &str) {
        CoverageRecorder::start_test(self, test);
    }

    fn end_test(&mut self) {
        CoverageRecorder::end_test(self);
    }

    fn mark_class(&mut self, class_index: usize) {
        if let Some(CoverageUnit::Class(unit)) = self.current_unit() {
            unit.mark(class_index);
        }
    }

    fn mark_method(&mut self, method_index: usize) {
        if let Some(CoverageUnit::Method(unit)) = self.current_unit() {
            unit.mark(method_index);
        }
    }

    fn mark_line(&mut self, file_index: usize, line: u32) {
        if let Some(CoverageUnit::Line(unit)) = self.current_unit() {
            unit.mark(file_index, line);
        }
    }

    fn enter_method(&mut self, method_index: usize) {
        if let Some(graph) = self.call_graph.as_mut() {
            graph.enter_method(method_index);
        }
    }

    fn leave_method(&mut self) {
        if let Some(graph) = self.call_graph.as_mut() {
            graph.leave_method();
        }
    }
}

#[cfg(test)]
#[path = "recorder_tests.rs"]
mod tests;
