use super::*;
use crate::coverage::{ClassName, FaultLocalizationInfo, MethodName};
use crate::junit::classfile::testing::ClassFileBuilder;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn write_class(path: &Path, name: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let bytes = ClassFileBuilder::new(name).source_file("X.java").build();
    std::fs::write(path, bytes).unwrap();
}

fn layout(base: &Path) -> ProjectLayout {
    ProjectLayout {
        base_dir: base.to_path_buf(),
        source_dir: base.join("src"),
        test_source_dir: base.join("test"),
        build_dir: base.join("classes"),
        jre_home: None,
    }
}

fn pool_generator(base: &Path) -> Box<dyn PatchGenerationPlugin> {
    let registry = PluginRegistry::default();
    let mut generator = registry.create_generator(POOL_GENERATOR).unwrap();
    configure_plugin(generator.as_mut(), &layout(base), None, None, &BTreeMap::new());
    generator
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_default_registry_holds_builtins() {
    let registry = PluginRegistry::default();
    assert_eq!(registry.len(), 3);
    assert!(!registry.is_empty());
    assert_eq!(registry.generator_names(), vec![POOL_GENERATOR]);
    assert_eq!(
        registry.prioritizer_names(),
        vec![IDENTITY_PRIORITIZER, SUSPICIOUSNESS_PRIORITIZER]
    );
}

#[test]
fn test_empty_registry() {
    let registry = PluginRegistry::empty();
    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
}

#[test]
fn test_lookup_ignores_case() {
    let registry = PluginRegistry::default();
    assert!(registry.has_generator("Patches-Pool"));
    assert!(registry.has_prioritizer("IDENTITY"));
    assert!(registry.create_prioritizer("Suspiciousness").is_ok());
}

#[test]
fn test_unknown_plugin_lookup_fails() {
    let registry = PluginRegistry::default();
    assert_eq!(
        registry.create_generator("nope").err(),
        Some(PluginError::UnknownGenerator("nope".to_string()))
    );
    assert_eq!(
        registry.create_prioritizer("nope").err(),
        Some(PluginError::UnknownPrioritizer("nope".to_string()))
    );
}

#[test]
fn test_duplicate_registration_rejected() {
    let mut registry = PluginRegistry::default();
    let result = registry.register_prioritizer("Identity", || Box::new(IdentityPrioritizationPlugin));
    assert_eq!(result, Err(PluginError::Duplicate("Identity".to_string())));
}

#[test]
fn test_register_custom_generator() {
    struct Nothing;
    impl RepairPlugin for Nothing {
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata {
                name: "nothing".into(),
                description: "Generates nothing".into(),
            }
        }
    }
    impl PatchGenerationPlugin for Nothing {
        fn generate(&mut self) -> Result<Vec<Patch>, GenerationFailure> {
            Ok(Vec::new())
        }
    }

    let mut registry = PluginRegistry::empty();
    registry.register_generator("Nothing", || Box::new(Nothing)).unwrap();
    let mut plugin = registry.create_generator("nothing").unwrap();
    assert_eq!(plugin.metadata().to_string(), "nothing (Generates nothing)");
    assert!(plugin.generate().unwrap().is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Clone, Default)]
struct Recording {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recording {
    fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl RepairPlugin for Recording {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "recording".into(),
            description: String::new(),
        }
    }

    fn init(&mut self) {
        self.push("init");
    }

    fn set_fault_localization(&mut self, fl: Option<&FlReport>) {
        self.push(format!("fl:{}", fl.is_some()));
    }

    fn set_coverage(&mut self, coverage: Option<&CoverageReport>) {
        self.push(format!("cov:{}", coverage.is_some()));
    }

    fn set_project_base_directory(&mut self, _dir: &Path) {
        self.push("base");
    }

    fn set_project_source_directory(&mut self, _dir: &Path) {
        self.push("src");
    }

    fn set_project_test_source_directory(&mut self, _dir: &Path) {
        self.push("test");
    }

    fn set_project_build_directory(&mut self, _dir: &Path) {
        self.push("build");
    }

    fn set_compatible_jre_home(&mut self, _dir: &Path) {
        self.push("jre");
    }

    fn visit_plugin_parameter(&mut self, key: &str, value: &str) {
        self.push(format!("{}={}", key, value));
    }
}

#[test]
fn test_configure_plugin_call_order() {
    let temp = TempDir::new().unwrap();
    let mut layout = layout(temp.path());
    layout.jre_home = Some(temp.path().join("jre"));
    let params = BTreeMap::from([
        ("b".to_string(), "2".to_string()),
        ("a".to_string(), "1".to_string()),
    ]);
    let plugin = Recording::default();
    let mut driven = plugin.clone();
    configure_plugin(&mut driven, &layout, None, None, &params);

    let calls = plugin.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec!["init", "fl:false", "cov:false", "base", "src", "test", "build", "jre", "a=1", "b=2"]
    );
}

#[test]
fn test_maven_layout() {
    let layout = ProjectLayout::maven("/p");
    assert_eq!(layout.source_dir, PathBuf::from("/p/src/main/java"));
    assert_eq!(layout.test_source_dir, PathBuf::from("/p/src/test/java"));
    assert_eq!(layout.build_dir, PathBuf::from("/p/target/classes"));
}

// ============================================================================
// Pool generator
// ============================================================================

#[test]
fn test_pool_generates_one_patch_per_directory() {
    let temp = TempDir::new().unwrap();
    let pool = temp.path().join(POOL_GENERATOR);
    write_class(&pool.join("p1").join("a").join("Calc.class"), "a.Calc");
    write_class(&pool.join("p1").join("a").join("Util.class"), "a.Util");
    write_class(&pool.join("p2").join("Calc.class"), "a.Calc");
    std::fs::create_dir_all(pool.join("p3-empty").join("a")).unwrap();
    std::fs::write(pool.join("p3-empty").join("README"), "notes").unwrap();

    let patches = pool_generator(temp.path()).generate().unwrap();
    assert_eq!(patches.len(), 2);

    let first: Vec<&str> = patches[0].locations().iter().map(|l| l.class_name()).collect();
    assert_eq!(first, vec!["a.Calc", "a.Util"]);
    assert_eq!(
        patches[0].locations()[0].source_file(),
        Some(pool.join("p1").join("X.java"))
    );
    assert_eq!(patches[1].locations().len(), 1);
}

#[test]
fn test_missing_pool_is_a_generation_failure() {
    let temp = TempDir::new().unwrap();
    let err = pool_generator(temp.path()).generate().unwrap_err();
    assert!(err.to_string().contains("non-existent"));
}

#[test]
fn test_corrupt_class_file_is_a_generation_failure() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(POOL_GENERATOR).join("p1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("Bad.class"), b"not a class").unwrap();
    assert!(pool_generator(temp.path()).generate().is_err());
}

#[test]
fn test_pool_parameter_overrides_location() {
    let temp = TempDir::new().unwrap();
    let custom = temp.path().join("elsewhere");
    write_class(&custom.join("p1").join("A.class"), "A");

    let mut generator = PoolGenerationPlugin::default();
    let params = BTreeMap::from([("pool".to_string(), custom.display().to_string())]);
    configure_plugin(&mut generator, &layout(temp.path()), None, None, &params);
    assert_eq!(generator.generate().unwrap().len(), 1);
}

// ============================================================================
// Prioritizers
// ============================================================================

fn patch_on(class: &str) -> Patch {
    Patch::new(vec![PatchLocation::with_class_name(
        format!("/pool/{}.class", class),
        class,
    )])
}

#[test]
fn test_identity_keeps_order() {
    let patches = vec![patch_on("a.B"), patch_on("a.A")];
    let sorted = IdentityPrioritizationPlugin.sort(patches.clone()).unwrap();
    assert_eq!(sorted, patches);
}

#[test]
fn test_suspiciousness_uses_class_scores() {
    let scores = BTreeMap::from([
        (ClassName("a.Low".into()), 0.1),
        (ClassName("a.High".into()), 0.9),
    ]);
    let fl = FlReport::Class(FaultLocalizationInfo::new(scores));
    let mut plugin = SuspiciousnessPrioritizationPlugin::default();
    plugin.set_fault_localization(Some(&fl));

    let low = patch_on("a.Low");
    let high = patch_on("a.High");
    let unknown = patch_on("a.Unknown");
    let sorted = plugin
        .sort(vec![unknown.clone(), low.clone(), high.clone()])
        .unwrap();
    assert_eq!(sorted, vec![high, low, unknown]);
}

#[test]
fn test_suspiciousness_uses_method_scores() {
    let scores = BTreeMap::from([
        (MethodName("a.Calc.add(II)I".into()), 0.4),
        (MethodName("a.Calc.sub(II)I".into()), 0.8),
        (MethodName("a.Util.abs(I)I".into()), 0.6),
    ]);
    let fl = FlReport::Method(FaultLocalizationInfo::new(scores));
    let mut plugin = SuspiciousnessPrioritizationPlugin::default();
    plugin.set_fault_localization(Some(&fl));

    let add = Patch::new(vec![
        PatchLocation::with_class_name("/p/Calc.class", "a.Calc").with_method("add")
    ]);
    let util = patch_on("a.Util");
    let sorted = plugin.sort(vec![add.clone(), util.clone()]).unwrap();
    assert_eq!(sorted, vec![util, add]);
}

#[test]
fn test_annotated_score_wins() {
    let mut plugin = SuspiciousnessPrioritizationPlugin::default();
    plugin.set_fault_localization(None);
    let annotated = Patch::new(vec![
        PatchLocation::with_class_name("/p/A.class", "a.A").with_suspiciousness(0.7)
    ]);
    let plain = patch_on("a.B");
    let sorted = plugin.sort(vec![plain.clone(), annotated.clone()]).unwrap();
    assert_eq!(sorted, vec![annotated, plain]);
}
