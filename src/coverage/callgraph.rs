//! Dynamic call-graph recording.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collections::NonNegativeIntSet;
use crate::domain::DomainIndex;

/// Records caller -> callee edges from method entry/exit callbacks.
#[derive(Debug, Clone, Default)]
pub struct CallGraphRecorder {
    stack: Vec<usize>,
    edges: Vec<Option<NonNegativeIntSet>>,
}

impl CallGraphRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_method(&mut self, callee: usize) {
        if let Some(&caller) = self.stack.last() {
            if caller >= self.edges.len() {
                self.edges.resize(caller + 1, None);
            }
            self.edges[caller]
                .get_or_insert_with(NonNegativeIntSet::new)
                .insert(callee);
        }
        self.stack.push(callee);
    }

    pub fn leave_method(&mut self) {
        if self.stack.pop().is_none() {
            debug!("Unbalanced method exit ignored");
        }
    }

    /// Drop any frames left over from an aborted test.
    pub fn reset_stack(&mut self) {
        self.stack.clear();
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().flatten().map(NonNegativeIntSet::size).sum()
    }

    /// Decode the recorded edges into method names.
    pub fn call_graph(&self, methods: &DomainIndex) -> CallGraph {
        let mut edges = Vec::with_capacity(self.edge_count());
        for (caller, callees) in self.edges.iter().enumerate() {
            let Some(callees) = callees else { continue };
            let Some(caller_name) = methods.get(caller) else {
                debug!(caller, "Caller index missing from methods domain");
                continue;
            };
            for callee in callees.iter() {
                match methods.get(callee) {
                    Some(callee_name) => {
                        edges.push((caller_name.to_string(), callee_name.to_string()))
                    }
                    None => debug!(callee, "Callee index missing from methods domain"),
                }
            }
        }
        edges.sort();
        CallGraph { edges }
    }
}

/// May-call relation over method names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraph {
    pub edges: Vec<(String, String)>,
}

impl CallGraph {
    pub fn callees_of<'a>(&'a self, caller: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |(from, _)| from == caller)
            .map(|(_, to)| to.as_str())
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
