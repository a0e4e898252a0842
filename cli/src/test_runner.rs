use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use codespan_reporting::term::termcolor::{
    Color, ColorChoice, ColorSpec, StandardStream, WriteColor,
};
use serde::Deserialize;

use hm::{DiagnosticError, Engine, Error, Node};

const EXTENSION: &str = ".test.hm";

#[derive(Debug, Deserialize)]
pub struct ExpectedWarning {
    /// Substring that must appear in the warning message.
    pub contains: String,

    /// If set, the warning must point at this 1-based line of the markup.
    #[serde(default)]
    pub line: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Expected text of the compiled document, compared after trimming.
    #[serde(default)]
    pub expect_output: Option<String>,

    /// Substring of the expected evaluation error.
    #[serde(default)]
    pub expect_error: Option<String>,

    #[serde(default)]
    pub expect_parse_error: bool,

    /// If present (even empty), the warnings must match one to one.
    #[serde(default)]
    pub expect_warnings: Option<Vec<ExpectedWarning>>,
}

/// Split a `.test.hm` file into its TOML frontmatter and the markup after it.
fn split_test_file(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.trim_start_matches('\u{feff}');
    let rest = content
        .strip_prefix("---")
        .ok_or("missing opening --- line")?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);
    let (frontmatter, after) = match rest.strip_prefix("---") {
        Some(after) => ("", after),
        None => {
            let end = rest.find("\n---").ok_or("missing closing --- line")?;
            (rest[..end].trim_end_matches('\r'), &rest[end + 4..])
        }
    };
    let source = after
        .strip_prefix("\r\n")
        .or_else(|| after.strip_prefix('\n'))
        .unwrap_or(after);
    let config = toml::from_str(frontmatter).map_err(|e| format!("bad frontmatter: {}", e))?;
    Ok((config, source))
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

impl TestResult {
    fn label(&self) -> String {
        self.description.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.trim_end_matches(EXTENSION).to_string())
                .unwrap_or_else(|| "?".to_string())
        })
    }
}

/// Compile the markup in memory with every module installed. Output files
/// go to a scratch directory that is removed afterwards.
fn compile(path: &Path, source: &str) -> Result<(Node, Vec<DiagnosticError>), Error> {
    let scratch = tempfile::tempdir()?;
    let base_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut engine = Engine::new().with_log(Box::new(io::sink()));
    hm_html::install(&mut engine);
    engine.configure(base_dir, scratch.path())?;
    let node = engine.compile_source(&path.display().to_string(), source)?;
    Ok((node, engine.take_diagnostics()))
}

fn check(config: &TestConfig, result: Result<(Node, Vec<DiagnosticError>), Error>) -> Option<String> {
    if config.expect_parse_error {
        return match result {
            Err(error) if error.is_parse_error() => None,
            Err(error) => Some(format!("expected a parse error, got: {}", error)),
            Ok(_) => Some("expected a parse error, but compilation succeeded".into()),
        };
    }

    let (node, diagnostics) = match (&config.expect_error, result) {
        (Some(expected), Err(error)) => {
            let message = error.to_string();
            return (!message.contains(expected.as_str())).then(|| {
                format!("expected error containing \"{}\", got: {}", expected, message)
            });
        }
        (Some(expected), Ok(_)) => {
            return Some(format!(
                "expected error containing \"{}\", but compilation succeeded",
                expected
            ));
        }
        (None, Err(error)) => return Some(format!("unexpected error: {}", error)),
        (None, Ok(compiled)) => compiled,
    };

    if let Some(expected) = &config.expect_output {
        let actual = node.to_text();
        if actual.trim() != expected.trim() {
            return Some(format!(
                "output mismatch\n  expected: {}\n  actual:   {}",
                expected.trim(),
                actual.trim()
            ));
        }
    }

    config
        .expect_warnings
        .as_ref()
        .and_then(|expected| check_warnings(&diagnostics, expected))
}

fn run_single_test(path: &Path) -> TestResult {
    let fail = |description: Option<String>, reason: String| TestResult {
        path: path.to_path_buf(),
        description,
        outcome: TestOutcome::Fail(reason),
    };
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => return fail(None, format!("cannot read file: {}", e)),
    };
    let (config, source) = match split_test_file(&content) {
        Ok(split) => split,
        Err(e) => return fail(None, e),
    };

    let description = config.description.clone();
    match check(&config, compile(path, source)) {
        Some(reason) => fail(description, reason),
        None => TestResult {
            path: path.to_path_buf(),
            description,
            outcome: TestOutcome::Pass,
        },
    }
}

/// Compare warnings in order. Returns the first mismatch.
fn check_warnings(diagnostics: &[DiagnosticError], expected: &[ExpectedWarning]) -> Option<String> {
    let warnings: Vec<&DiagnosticError> = diagnostics.iter().filter(|d| d.is_warning).collect();

    if warnings.len() != expected.len() {
        let listed = if warnings.is_empty() {
            "    (none)".to_string()
        } else {
            warnings
                .iter()
                .map(|w| format!("  - {}", w))
                .collect::<Vec<_>>()
                .join("\n")
        };
        return Some(format!(
            "expected {} warning(s), got {}\n  actual warnings:\n{}",
            expected.len(),
            warnings.len(),
            listed
        ));
    }

    for (i, (actual, expected)) in warnings.iter().zip(expected).enumerate() {
        let message = actual.to_string();
        if !message.contains(&expected.contains) {
            return Some(format!(
                "warning[{}]: expected message containing \"{}\", got: {}",
                i, expected.contains, message
            ));
        }
        let Some(line) = expected.line else {
            continue;
        };
        match &actual.position {
            Some(position) if position.line == line => {}
            Some(position) => {
                return Some(format!(
                    "warning[{}]: expected on line {}, but it is on line {}",
                    i, line, position.line
                ));
            }
            None => {
                return Some(format!(
                    "warning[{}]: expected on line {}, but the warning has no position",
                    i, line
                ));
            }
        }
    }
    None
}

/// Test files under `root`, keyed by the directory they are in relative to
/// `root` ("" for files directly inside it).
fn discover(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|entry| entry.path()) {
        if path.is_dir() {
            collect(&path, root, out);
            continue;
        }
        let is_test = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(EXTENSION));
        if is_test {
            let category = path
                .parent()
                .and_then(|parent| parent.strip_prefix(root).ok())
                .map(|parent| parent.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            out.entry(category).or_default().push(path);
        }
    }
}

fn category_name(category: &str) -> &str {
    if category.is_empty() { "(root)" } else { category }
}

pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }
    let categories = discover(path);
    if categories.is_empty() {
        eprintln!("no {} files found in {}", EXTENSION, path.display());
        return;
    }
    eprintln!("available categories:");
    for (category, files) in &categories {
        eprintln!("  {} ({} tests)", category_name(category), files.len());
    }
}

/// Pick the categories to run. A requested name also selects its subcategories.
fn select<'a>(
    all: &'a BTreeMap<String, Vec<PathBuf>>,
    requested: &[String],
) -> BTreeMap<&'a str, &'a [PathBuf]> {
    if requested.is_empty() {
        return all.iter().map(|(k, v)| (k.as_str(), v.as_slice())).collect();
    }
    let mut selected = BTreeMap::new();
    for name in requested {
        let name = name.trim_matches('/');
        let prefix = format!("{}/", name);
        let before = selected.len();
        for (category, files) in all {
            if category == name || category.starts_with(&prefix) {
                selected.insert(category.as_str(), files.as_slice());
            }
        }
        if selected.len() == before {
            let available: Vec<&str> = all.keys().map(|k| category_name(k)).collect();
            eprintln!(
                "warning: category '{}' not found (available: {})",
                name,
                available.join(", ")
            );
        }
    }
    selected
}

/// Colored PASS/FAIL lines and the closing summary.
struct Report {
    out: StandardStream,
    passed: usize,
    failures: Vec<TestResult>,
}

impl Report {
    fn new(color: ColorChoice) -> Self {
        Report {
            out: StandardStream::stderr(color),
            passed: 0,
            failures: Vec::new(),
        }
    }

    fn paint(&mut self, text: &str, color: Option<Color>, bold: bool) {
        let _ = self
            .out
            .set_color(ColorSpec::new().set_fg(color).set_bold(bold));
        let _ = write!(self.out, "{}", text);
        let _ = self.out.reset();
    }

    fn heading(&mut self, category: &str) {
        let _ = writeln!(self.out);
        self.paint(category_name(category), None, true);
        let _ = writeln!(self.out);
    }

    fn record(&mut self, result: TestResult) {
        let _ = write!(self.out, "  ");
        match result.outcome {
            TestOutcome::Pass => {
                self.paint("PASS", Some(Color::Green), false);
                self.passed += 1;
            }
            TestOutcome::Fail(_) => self.paint("FAIL", Some(Color::Red), false),
        }
        let _ = writeln!(self.out, "  {}", result.label());
        if let TestOutcome::Fail(_) = result.outcome {
            self.failures.push(result);
        }
    }

    /// Print failure details and the totals; returns the exit code.
    fn finish(mut self) -> i32 {
        if !self.failures.is_empty() {
            let _ = writeln!(self.out, "\nfailures:");
            for failure in &self.failures {
                let _ = writeln!(self.out, "\n  --- {} ---", failure.path.display());
                if let TestOutcome::Fail(reason) = &failure.outcome {
                    for line in reason.lines() {
                        let _ = writeln!(self.out, "  {}", line);
                    }
                }
            }
        }

        let failed = self.failures.len();
        let _ = write!(self.out, "\ntest result: ");
        if failed == 0 {
            self.paint("ok", Some(Color::Green), false);
            let _ = writeln!(self.out, ". {} passed, 0 failed", self.passed);
            0
        } else {
            self.paint("FAILED", Some(Color::Red), false);
            let _ = writeln!(
                self.out,
                ". {} passed, {} failed (of {})",
                self.passed,
                failed,
                self.passed + failed
            );
            1
        }
    }
}

/// Run a single `.test.hm` file, or every one under a directory restricted
/// to `categories` when that is non-empty. Returns the exit code.
pub fn run_tests(path: &Path, color: ColorChoice, categories: &[String]) -> i32 {
    let mut report = Report::new(color);
    if path.is_file() {
        report.record(run_single_test(path));
        return report.finish();
    }

    let all = discover(path);
    if all.is_empty() {
        eprintln!("no {} files found in {}", EXTENSION, path.display());
        return 1;
    }
    let selected = select(&all, categories);
    if selected.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    for (category, files) in selected {
        report.heading(category);
        for file in files {
            report.record(run_single_test(file));
        }
    }
    report.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_and_source() {
        let (config, source) = split_test_file(
            "---\ndescription = \"bold\"\nexpect_output = \"<B>x</B>\"\n---\n\\textbf{x}\n",
        )
        .unwrap();
        assert_eq!(config.description.as_deref(), Some("bold"));
        assert_eq!(config.expect_output.as_deref(), Some("<B>x</B>"));
        assert!(!config.expect_parse_error);
        assert_eq!(source, "\\textbf{x}\n");
    }

    #[test]
    fn empty_frontmatter() {
        let (config, source) = split_test_file("---\n---\ntext").unwrap();
        assert!(config.description.is_none());
        assert_eq!(source, "text");
    }

    #[test]
    fn frontmatter_is_required() {
        assert!(split_test_file("\\textbf{x}").is_err());
        assert!(split_test_file("---\ndescription = \"x\"\n").is_err());
        assert!(split_test_file("---\nnot toml\n---\n").is_err());
    }

    #[test]
    fn outcomes_are_checked() {
        let expect = |toml: &str| -> TestConfig { toml::from_str(toml).unwrap() };
        let path = Path::new("inline.test.hm");

        let config = expect("expect_output = \"<I>x</I>\"");
        assert!(check(&config, compile(path, "\\textit{x}\n")).is_none());
        assert!(check(&config, compile(path, "\\textbf{x}")).is_some());

        let config = expect("expect_parse_error = true");
        assert!(check(&config, compile(path, "\\nosuchmacro")).is_none());
        assert!(check(&config, compile(path, "fine")).is_some());

        let config = expect("expect_error = \"no binding for variable 'x'\"");
        assert!(check(&config, compile(path, "\\var{x}")).is_none());

        let config = expect("expect_warnings = [{ contains = \"nowhere\", line = 2 }]");
        assert!(check(&config, compile(path, "see\n\\ref{nowhere}")).is_none());
        assert!(check(&config, compile(path, "\\ref{nowhere}")).is_some());
        assert!(check(&TestConfig::default(), compile(path, "plain")).is_none());
    }

    #[test]
    fn categories_select_subdirectories() {
        let all = BTreeMap::from([
            (String::new(), vec![PathBuf::from("a.test.hm")]),
            ("math".to_string(), vec![PathBuf::from("math/b.test.hm")]),
            ("math/greek".to_string(), vec![PathBuf::from("math/greek/c.test.hm")]),
            ("pages".to_string(), vec![PathBuf::from("pages/d.test.hm")]),
        ]);
        let selected = select(&all, &["math".to_string()]);
        assert_eq!(selected.keys().copied().collect::<Vec<_>>(), ["math", "math/greek"]);
        assert_eq!(select(&all, &[]).len(), 4);
        assert!(select(&all, &["nothing".to_string()]).is_empty());
    }
}
