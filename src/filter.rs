//! Name filters and test-name normalization.
//!
//! Class and test selection is configured with globs over fully qualified
//! names: `*` matches any run of characters, `?` a single character, and a
//! leading `~` switches to a raw regular expression.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// A single compiled glob.
#[derive(Debug, Clone)]
pub struct Glob {
    source: String,
    regex: Regex,
}

impl Glob {
    pub fn new(glob: &str) -> Result<Self, regex_lite::Error> {
        let pattern = match glob.strip_prefix('~') {
            Some(raw) => raw.to_string(),
            None => glob_to_regex(glob),
        };
        Ok(Self {
            source: glob.to_string(),
            regex: Regex::new(&pattern)?,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '$' | '.' | '\\' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('$');
    out
}

/// Include/exclude glob lists, serializable so they can cross the worker
/// boundary as plain strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl NameFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Compile into a matcher; fails on the first invalid pattern.
    pub fn compile(&self) -> Result<CompiledFilter, regex_lite::Error> {
        Ok(CompiledFilter {
            include: self.include.iter().map(|g| Glob::new(g)).collect::<Result<_, _>>()?,
            exclude: self.exclude.iter().map(|g| Glob::new(g)).collect::<Result<_, _>>()?,
        })
    }
}

/// Matcher built from a [`NameFilter`].
///
/// A name is accepted when it matches any include glob (or the include list
/// is empty) and no exclude glob.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    include: Vec<Glob>,
    exclude: Vec<Glob>,
}

impl CompiledFilter {
    pub fn accepts(&self, name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|g| g.matches(name));
        included && !self.exclude.iter().any(|g| g.matches(name))
    }

    /// `true` only for names matched by an explicit include glob.
    pub fn explicitly_includes(&self, name: &str) -> bool {
        self.include.iter().any(|g| g.matches(name)) && !self.exclude.iter().any(|g| g.matches(name))
    }
}

/// Normalize a runner description such as `[engine] testFoo(com.acme.FooTest)`
/// into `com.acme.FooTest.testFoo`.
pub fn sanitize_extended_test_name(name: &str) -> String {
    let name = match name.find(' ') {
        Some(space) => &name[space + 1..],
        None => name,
    };
    match (name.find('('), name.ends_with(')')) {
        (Some(lp), true) => format!("{}.{}", &name[lp + 1..name.len() - 1], &name[..lp]),
        _ => name.to_string(),
    }
}

/// Normalize user-supplied test names: `Class::method`, `Class:method`, and
/// `Class.method(args)` all become `Class.method`.
pub fn sanitize_test_name(name: &str) -> String {
    let name = name.trim().replace("::", ".").replace(':', ".");
    match name.find('(') {
        Some(lp) => name[..lp].to_string(),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_wildcards() {
        let glob = Glob::new("com.acme.*").unwrap();
        assert!(glob.matches("com.acme.Foo"));
        assert!(glob.matches("com.acme.sub.Bar$Inner"));
        assert!(!glob.matches("com.acmeX.Foo"));
        assert!(!glob.matches("org.com.acme.Foo"));

        let single = Glob::new("a.?Test").unwrap();
        assert!(single.matches("a.BTest"));
        assert!(!single.matches("a.BCTest"));
    }

    #[test]
    fn test_glob_escapes_dollar_and_dot() {
        let glob = Glob::new("a.B$1").unwrap();
        assert!(glob.matches("a.B$1"));
        assert!(!glob.matches("aXB$1"));
    }

    #[test]
    fn test_raw_regex_prefix() {
        let glob = Glob::new("~^org\\.(foo|bar)\\..*Test$").unwrap();
        assert!(glob.matches("org.foo.ATest"));
        assert!(glob.matches("org.bar.x.BTest"));
        assert!(!glob.matches("org.baz.CTest"));
        assert_eq!(glob.as_str(), "~^org\\.(foo|bar)\\..*Test$");
    }

    #[test]
    fn test_filter_include_and_exclude() {
        let filter = NameFilter::new(vec!["com.acme.*".into()], vec!["*IT".into()])
            .compile()
            .unwrap();
        assert!(filter.accepts("com.acme.FooTest"));
        assert!(!filter.accepts("com.acme.FooIT"));
        assert!(!filter.accepts("org.other.FooTest"));

        let open = NameFilter::default().compile().unwrap();
        assert!(open.accepts("anything"));
        assert!(!open.explicitly_includes("anything"));
    }

    #[test]
    fn test_sanitize_extended_test_name() {
        assert_eq!(
            sanitize_extended_test_name("[junit] testAdd(com.acme.CalcTest)"),
            "com.acme.CalcTest.testAdd"
        );
        assert_eq!(sanitize_extended_test_name("com.acme.CalcTest"), "com.acme.CalcTest");
    }

    #[test]
    fn test_sanitize_test_name_styles() {
        assert_eq!(sanitize_test_name("com.acme.CalcTest::testAdd"), "com.acme.CalcTest.testAdd");
        assert_eq!(sanitize_test_name("com.acme.CalcTest:testAdd"), "com.acme.CalcTest.testAdd");
        assert_eq!(sanitize_test_name("com.acme.CalcTest.testAdd()"), "com.acme.CalcTest.testAdd");
    }
}
