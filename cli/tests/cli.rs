use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn hm(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hm"))
        .args(args)
        .output()
        .expect("failed to run hm")
}

fn cases() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/cases")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

const SITE: &str = "\\setpagetemplate{template.html}\n\
\\begin{page}{index.html}\\label{home}\\title{Home}\\modified{today}\n\
See \\ref{more}.\n\
\\end{page}\n\
\\begin{page}{more.html}\\label{more}\\title{More}\\modified{today}\n\
Back to \\ref{home}.\n\
\\end{page}\n";

fn site(dir: &Path) -> PathBuf {
    fs::write(
        dir.join("template.html"),
        "<title>\\var{pagetitle}</title>\\var{pagecontent}",
    )
    .unwrap();
    let input = dir.join("site.hm");
    fs::write(&input, SITE).unwrap();
    input
}

#[test]
fn sample_cases_pass() {
    let output = hm(&["test", "--no-color", cases().to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stderr(&output).contains("test result: ok."));
}

#[test]
fn categories_can_be_listed_and_selected() {
    let output = hm(&["test", "--list-categories", cases().to_str().unwrap()]);
    let listed = stderr(&output);
    assert!(listed.contains("errors (2 tests)"));
    assert!(listed.contains("text (3 tests)"));

    let output = hm(&["test", "--no-color", "-c", "math", cases().to_str().unwrap()]);
    assert!(output.status.success());
    assert!(stderr(&output).contains("1 passed, 0 failed"));
}

#[test]
fn forward_references_need_a_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = site(dir.path());
    let out = dir.path().join("out");
    let args = [input.to_str().unwrap(), out.to_str().unwrap(), "--quiet"];

    let first = hm(&args);
    assert!(first.status.success());
    assert!(stdout(&first).contains("***Run again to get labels right.***"));
    assert!(stderr(&first).contains("no such reference 'more'"));

    let second = hm(&args);
    assert!(second.status.success());
    assert!(stdout(&second).contains("***Done***"));
    let index = fs::read_to_string(out.join("index.html")).unwrap();
    assert!(index.contains("<A HREF=\"more.html\">More</A>"));
}

#[test]
fn until_stable_repeats_runs() {
    let dir = tempfile::tempdir().unwrap();
    let input = site(dir.path());
    let out = dir.path().join("out");
    let output = hm(&[
        "build",
        input.to_str().unwrap(),
        out.to_str().unwrap(),
        "--until-stable",
        "3",
    ]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("***Done***"));
    assert!(!stderr(&output).contains("no such reference"));
    assert!(stderr(&output).contains("Wrote page"));
}

#[test]
fn errors_exit_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.hm");
    fs::write(&input, "text\n\\nosuchmacro\n").unwrap();
    let output = hm(&[
        "--no-color",
        input.to_str().unwrap(),
        dir.path().join("out").to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("nosuchmacro"));
}
