//! Test discovery and execution.
//!
//! Compiled test classes are read through a [`classpath::ClassByteSource`],
//! discovered into [`TestUnit`]s, ordered by a [`TestComparator`] and run by
//! a [`TestRunner`] against a [`executor::TestExecutor`].

pub mod classfile;
pub mod classpath;
pub mod discovery;
pub mod executor;
pub mod ordering;
pub mod runner;

pub use discovery::{discover_test_units, TestUnit};
pub use executor::{CommandTestExecutor, TestCommand, TestExecutor, TestOutcome};
pub use ordering::TestComparator;
pub use runner::{TestExecutionStatus, TestRunner, TestUnitFilter, TimeoutPolicy};
