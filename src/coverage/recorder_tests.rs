use super::*;

fn domain(name: &str, entries: &[&str]) -> DomainIndex {
    let mut dom = DomainIndex::new(name);
    for entry in entries {
        dom.get_or_add(entry);
    }
    dom
}

fn failing(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ========================================================================
// Unit lifecycle
// ========================================================================

#[test]
fn test_started_test_without_marks_decodes_empty() {
    let mut rec = CoverageRecorder::new(Granularity::Class);
    rec.start_test("T1");
    rec.end_test();

    let report = rec.coverage_info(&domain("classes", &["A"])).unwrap();
    assert_eq!(report.test_count(), 1);
    assert!(report.covered_by("T1").is_empty());
}

#[test]
fn test_marks_outside_a_test_are_dropped() {
    let mut rec = CoverageRecorder::new(Granularity::Class);
    rec.mark_class(0);
    rec.start_test("T1");
    rec.end_test();
    rec.mark_class(0);

    let report = rec.coverage_info(&domain("classes", &["A"])).unwrap();
    assert!(report.covered_by("T1").is_empty());
}

#[test]
fn test_restarting_a_test_resets_its_unit() {
    let mut rec = CoverageRecorder::new(Granularity::Class);
    rec.start_test("T1");
    rec.mark_class(0);
    rec.end_test();
    rec.start_test("T1");
    rec.mark_class(1);
    rec.end_test();

    let report = rec.coverage_info(&domain("classes", &["A", "B"])).unwrap();
    assert_eq!(rec.recorded_tests(), 1);
    assert_eq!(report.covered_by("T1"), vec!["B"]);
}

#[test]
fn test_off_granularity_reports_nothing() {
    let mut rec = CoverageRecorder::new(Granularity::Off);
    rec.start_test("T1");
    rec.mark_class(0);
    rec.end_test();
    let dom = domain("classes", &["A"]);
    assert!(rec.coverage_info(&dom).is_none());
    assert!(rec.fault_localization(&dom, &failing(&[]), FlStrategy::Ochiai).is_none());
    assert_eq!(rec.recorded_tests(), 0);
}

#[test]
fn test_mismatched_mark_kind_is_ignored() {
    let mut rec = CoverageRecorder::new(Granularity::Method);
    rec.start_test("T1");
    rec.mark_class(0);
    rec.mark_line(0, 3);
    rec.mark_method(1);
    rec.end_test();

    let report = rec.coverage_info(&domain("methods", &["a()", "b()"])).unwrap();
    assert_eq!(report.covered_by("T1"), vec!["b()"]);
}

// ========================================================================
// Decoding
// ========================================================================

#[test]
fn test_line_coverage_decodes_file_and_line() {
    let mut rec = CoverageRecorder::new(Granularity::Line);
    rec.start_test("T1");
    rec.mark_line(1, 17);
    rec.mark_line(0, 3);
    rec.end_test();

    let report = rec.coverage_info(&domain("files", &["A.java", "B.java"])).unwrap();
    assert_eq!(report.granularity(), Granularity::Line);
    assert_eq!(report.covered_by("T1"), vec!["A.java:3", "B.java:17"]);
}

#[test]
fn test_indices_missing_from_domain_are_dropped() {
    let mut rec = CoverageRecorder::new(Granularity::Class);
    rec.start_test("T1");
    rec.mark_class(0);
    rec.mark_class(9);
    rec.end_test();

    let report = rec.coverage_info(&domain("classes", &["A"])).unwrap();
    assert_eq!(report.covered_by("T1"), vec!["A"]);
}

#[test]
fn test_domain_selection_follows_granularity() {
    let mut domains = ProfilingDomains::new();
    domains.files.get_or_add("X.java");
    let rec = CoverageRecorder::new(Granularity::Line);
    assert_eq!(rec.domain(&domains).name(), "files");
    let rec = CoverageRecorder::new(Granularity::Method);
    assert_eq!(rec.domain(&domains).name(), "methods");
}

// ========================================================================
// Fault localization
// ========================================================================

#[test]
fn test_method_level_fault_localization() {
    let dom = domain("methods", &["calc.add()", "calc.sub()"]);
    let mut rec = CoverageRecorder::new(Granularity::Method);
    // add(): ef=2 ep=1, sub(): ep=1
    for (test, marks) in [
        ("F1", vec![0]),
        ("F2", vec![0]),
        ("P1", vec![0, 1]),
        ("P2", vec![]),
        ("P3", vec![]),
        ("P4", vec![]),
    ] {
        rec.start_test(test);
        for m in marks {
            rec.mark_method(m);
        }
        rec.end_test();
    }

    let report = rec
        .fault_localization(&dom, &failing(&["F1", "F2", "F3"]), FlStrategy::Tarantula)
        .unwrap();
    let ranked = report.ranked();
    assert_eq!(ranked[0].0, "calc.add()");
    assert!((ranked[0].1 - 0.7273).abs() < 1e-4);
    assert_eq!(ranked[1], ("calc.sub()".to_string(), 0.0));
}

#[test]
fn test_call_graph_is_recorded_when_enabled() {
    let methods = domain("methods", &["t()", "a()"]);
    let mut rec = CoverageRecorder::new(Granularity::Method).with_call_graph();
    rec.start_test("T1");
    rec.enter_method(0);
    rec.enter_method(1);
    rec.leave_method();
    rec.leave_method();
    rec.end_test();

    let graph = rec.call_graph(&methods).unwrap();
    assert_eq!(graph.edges, vec![("t()".to_string(), "a()".to_string())]);
    assert!(CoverageRecorder::new(Granularity::Method).call_graph(&methods).is_none());
}
