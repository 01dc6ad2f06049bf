//! Test-unit discovery from compiled test classes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::classfile::{ClassFileError, ClassInfo, MethodInfo};
use super::classpath::ClassByteSource;

const SUITE_BASE: &str = "junit.framework.TestCase";
const TEST_ANNOTATION: &str = "Lorg/junit/Test;";
const OBJECT: &str = "java.lang.Object";

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Test class not found: {0}")]
    ClassNotFound(String),

    #[error("Failed to read class {class}: {source}")]
    ClassFile {
        class: String,
        #[source]
        source: ClassFileError,
    },

    #[error("I/O error while loading {class}: {source}")]
    Io {
        class: String,
        #[source]
        source: std::io::Error,
    },
}

/// One runnable test method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestUnit {
    pub class_name: String,
    pub method_name: String,
}

impl TestUnit {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }

    /// Canonical `Class.method` name used for timing, filters, and reports.
    pub fn name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

impl std::fmt::Display for TestUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.class_name, self.method_name)
    }
}

fn load(source: &dyn ClassByteSource, class: &str) -> Result<Option<ClassInfo>, DiscoveryError> {
    let bytes = source.class_bytes(class).map_err(|e| DiscoveryError::Io {
        class: class.to_string(),
        source: e,
    })?;
    bytes
        .map(|b| {
            ClassInfo::parse(&b).map_err(|e| DiscoveryError::ClassFile {
                class: class.to_string(),
                source: e,
            })
        })
        .transpose()
}

/// A loaded test class with its resolvable superclass chain.
struct Hierarchy {
    class: ClassInfo,
    ancestors: Vec<ClassInfo>,
    is_suite: bool,
}

impl Hierarchy {
    fn resolve(source: &dyn ClassByteSource, name: &str) -> Result<Self, DiscoveryError> {
        let class = load(source, name)?.ok_or_else(|| DiscoveryError::ClassNotFound(name.to_string()))?;
        let mut ancestors = Vec::new();
        let mut is_suite = false;
        let mut next = class.super_name.clone();
        while let Some(super_name) = next {
            if super_name == SUITE_BASE {
                is_suite = true;
                break;
            }
            if super_name == OBJECT {
                break;
            }
            match load(source, &super_name)? {
                Some(info) => {
                    next = info.super_name.clone();
                    ancestors.push(info);
                }
                None => {
                    debug!(class = name, super_name, "Superclass not on classpath");
                    break;
                }
            }
        }
        Ok(Self {
            class,
            ancestors,
            is_suite,
        })
    }

    fn is_concrete(&self) -> bool {
        !self.class.is_interface() && !self.class.is_abstract()
    }

    /// Public methods as reflection would list them: own declarations
    /// first, then inherited ones not overridden.
    fn public_methods(&self) -> Vec<&MethodInfo> {
        let mut seen = HashSet::new();
        std::iter::once(&self.class)
            .chain(self.ancestors.iter())
            .flat_map(|c| c.methods.iter())
            .filter(|m| m.is_public() && m.name != "<init>" && m.name != "<clinit>")
            .filter(|m| seen.insert((m.name.as_str(), m.descriptor.as_str())))
            .collect()
    }
}

fn is_runnable(method: &MethodInfo) -> bool {
    !method.is_abstract() && !method.is_native()
}

fn is_suite_test(method: &MethodInfo) -> bool {
    is_runnable(method) && method.name.starts_with("test") && method.descriptor == "()V"
}

fn is_annotated_test(method: &MethodInfo) -> bool {
    is_runnable(method) && method.has_annotation(TEST_ANNOTATION)
}

/// Discover test units in `class_names`.
///
/// Suite-style units come first (class order), then annotation-style
/// units; a (class, method) pair is reported once.
pub fn discover_test_units(
    class_names: &[String],
    source: &dyn ClassByteSource,
) -> Result<Vec<TestUnit>, DiscoveryError> {
    let mut hierarchies = Vec::with_capacity(class_names.len());
    for name in class_names {
        let hierarchy = Hierarchy::resolve(source, name)?;
        if hierarchy.is_concrete() {
            hierarchies.push(hierarchy);
        } else {
            debug!(class = %name, "Skipping abstract test class");
        }
    }

    let mut visited: HashSet<(String, String)> = HashSet::new();
    let mut units = Vec::new();
    let mut add = |class: &str, method: &str, units: &mut Vec<TestUnit>| {
        if visited.insert((class.to_string(), method.to_string())) {
            units.push(TestUnit::new(class, method));
        }
    };

    for h in hierarchies.iter().filter(|h| h.is_suite) {
        for m in h.public_methods().into_iter().filter(|m| is_suite_test(m)) {
            add(&h.class.name, &m.name, &mut units);
        }
    }
    for h in &hierarchies {
        for m in h.public_methods().into_iter().filter(|m| is_annotated_test(m)) {
            add(&h.class.name, &m.name, &mut units);
        }
    }

    info!(
        classes = class_names.len(),
        units = units.len(),
        "Discovered test units"
    );
    Ok(units)
}
