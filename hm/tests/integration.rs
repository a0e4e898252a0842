use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use hm::ambient::{INPUT_DIR, OUTPUT_DIR};
use hm::environment::Environment;
use hm::{Bindings, Engine, Error, Marker, Node, Position, RuntimeError, SyntaxError, handler};

fn engine() -> Engine {
    Engine::new().with_log(Box::new(io::sink()))
}

fn run(source: &str) -> String {
    engine()
        .compile_str(source)
        .expect("compile failed")
        .to_text()
}

fn run_err(source: &str) -> Error {
    engine()
        .compile_str(source)
        .expect_err("expected compilation to fail")
}

fn syntax_error(source: &str) -> (SyntaxError, usize) {
    match run_err(source) {
        Error::Parse(error) => (error.kind, error.position.line),
        other => panic!("expected a parse error, got: {}", other),
    }
}

fn runtime_error(source: &str) -> RuntimeError {
    match run_err(source) {
        Error::Runtime(diagnostic) => diagnostic.error,
        other => panic!("expected a runtime error, got: {}", other),
    }
}

/// An engine with a `quote` block that wraps its body in blockquote tags.
fn engine_with_quote() -> Engine {
    let mut engine = engine();
    engine.register_block(
        "quote",
        |_, _, frame| Ok((frame.chars.clone(), frame.macros.child())),
        |_, _, body| Ok(Node::text("<blockquote>") + body + Node::text("</blockquote>")),
    );
    engine
}

#[test]
fn plain_text_passes_through() {
    assert_eq!(run("Hello, world!\nSecond line."), "Hello, world!\nSecond line.");
}

#[test]
fn braces_group_without_output() {
    let node = engine().compile_str("{abc}").unwrap();
    assert_eq!(node, Node::text("abc"));
    assert_eq!(run("a{}b"), "ab");
    assert_eq!(run("{a{b}c}"), "abc");
}

#[test]
fn comments_run_to_end_of_line() {
    assert_eq!(run("a% ignored {\nb"), "a\nb");
}

#[test]
fn reserved_characters_can_be_escaped() {
    assert_eq!(run("\\{\\}\\#\\%\\[\\]"), "{}#%[]");
}

#[test]
fn closing_bracket_is_text() {
    assert_eq!(run("a]b"), "a]b");
}

#[test]
fn def_and_var() {
    assert_eq!(
        run("\\def{greet}{who}{Hello, \\var{who}!}\\greet{World}"),
        "Hello, World!"
    );
}

#[test]
fn def_without_arguments() {
    assert_eq!(run("\\def{me}{}{hm}\\me{} and \\me{}"), "hm and hm");
}

#[test]
fn def_with_several_arguments() {
    assert_eq!(
        run("\\def{pair}{a,b}{(\\var{a}, \\var{b})}\\pair{1}{2}"),
        "(1, 2)"
    );
    assert_eq!(
        run("\\def{pair}{a, b}{\\var{b}\\var{a}}\\pair{1}{2}"),
        "21"
    );
}

#[test]
fn def_formals_are_trimmed_between_commas() {
    assert_eq!(
        run("\\def{pair}{ first ,second }{\\var{second}\\var{first}}\\pair{1}{2}"),
        "21"
    );
    assert_eq!(
        runtime_error("\\def{one}{a b}{\\var{a}}\\one{1}"),
        RuntimeError::UnboundVariable("a".into())
    );
}

#[test]
fn macro_names_swallow_following_spaces() {
    assert_eq!(run("\\def{x}{}{X}\\x   y"), "Xy");
}

#[test]
fn variables_are_dynamically_scoped() {
    let src = "\\def{inner}{}{\\var{x}}\\def{outer}{x}{[\\inner]}\\outer{hi}";
    assert_eq!(run(src), "[hi]");
}

#[test]
fn later_definitions_shadow_earlier_ones() {
    assert_eq!(run("\\def{a}{}{1}\\a\\def{a}{}{2}\\a"), "12");
}

#[test]
fn definitions_inside_blocks_stay_local() {
    let mut engine = engine_with_quote();
    let err = engine
        .compile_str("\\begin{quote}\\def{x}{}{in}\\end{quote}\\x")
        .unwrap_err();
    match err {
        Error::Parse(error) => assert_eq!(error.kind, SyntaxError::UndefinedMacro("x".into())),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn unbound_variable_is_located() {
    match run_err("text\n\\var{nope}") {
        Error::Runtime(diagnostic) => {
            assert_eq!(diagnostic.error, RuntimeError::UnboundVariable("nope".into()));
            assert_eq!(diagnostic.position.map(|p| p.line), Some(2));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn def_name_must_be_plain_text() {
    assert_eq!(
        runtime_error("\\def{}{}{x}"),
        RuntimeError::DefMustBeStatic("name".into())
    );
}

#[test]
fn unmatched_brace_reports_opening_line() {
    assert_eq!(
        syntax_error("line one\n{abc\nmore"),
        (SyntaxError::UnmatchedBrace, 2)
    );
}

#[test]
fn stray_close_brace() {
    assert_eq!(syntax_error("abc}"), (SyntaxError::UnexpectedCloseBrace, 1));
}

#[test]
fn undefined_macro_reports_its_line() {
    assert_eq!(
        syntax_error("a\nb \\nosuch"),
        (SyntaxError::UndefinedMacro("nosuch".into()), 2)
    );
}

#[test]
fn escape_at_end_of_input() {
    assert_eq!(syntax_error("abc\\"), (SyntaxError::MissingMacroName, 1));
}

#[test]
fn missing_macro_argument() {
    let (kind, _) = syntax_error("\\def{x}{a}{\\var{a}}\\x");
    assert_eq!(kind, SyntaxError::MissingArgument("a".into()));
}

#[test]
fn blocks_nest() {
    let mut engine = engine_with_quote();
    let out = engine
        .compile_str("\\begin{quote}a\\begin{quote}b\\end{quote}c\\end{quote}")
        .unwrap();
    assert_eq!(
        out.to_text(),
        "<blockquote>a<blockquote>b</blockquote>c</blockquote>"
    );
}

#[test]
fn empty_block_body() {
    let mut engine = engine_with_quote();
    let out = engine.compile_str("\\begin{quote}\\end{quote}").unwrap();
    assert_eq!(out.to_text(), "<blockquote></blockquote>");
}

#[test]
fn block_errors() {
    let mut engine = engine_with_quote();
    match engine.compile_str("\\begin{quote}x\\end{other}").unwrap_err() {
        Error::Parse(error) => assert_eq!(
            error.kind,
            SyntaxError::MismatchedEnd {
                open: "quote".into(),
                close: "other".into()
            }
        ),
        other => panic!("unexpected error: {}", other),
    }

    let mut engine = engine_with_quote();
    match engine.compile_str("\n\\begin{quote}x").unwrap_err() {
        Error::Parse(error) => {
            assert_eq!(error.kind, SyntaxError::UnterminatedEnvironment("quote".into()));
            assert_eq!(error.position.line, 2);
        }
        other => panic!("unexpected error: {}", other),
    }

    let mut engine = engine_with_quote();
    match engine.compile_str("\\begin{quote}{\\end{quote}}").unwrap_err() {
        Error::Parse(error) => assert_eq!(
            error.kind,
            SyntaxError::MismatchedEnd {
                open: "{".into(),
                close: "quote".into()
            }
        ),
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(
        syntax_error("\\begin{nope}"),
        (SyntaxError::UnknownEnvironment("nope".into()), 1)
    );
    assert_eq!(
        syntax_error("\\end{quote}"),
        (SyntaxError::NothingToEnd("quote".into()), 1)
    );
}

#[test]
fn bracket_arguments_are_optional() {
    let mut engine = engine();
    engine.register_macro(
        "opt",
        handler(|engine, stream, frame| {
            Ok(engine
                .read_bracket_args(stream, frame)?
                .unwrap_or_else(|| Node::text("none")))
        }),
    );
    assert_eq!(engine.compile_str("\\opt[a{b}]").unwrap().to_text(), "ab");
    assert_eq!(engine.compile_str("\\opt[]|").unwrap().to_text(), "|");
    assert_eq!(engine.compile_str("\\opt{x}").unwrap().to_text(), "nonex");
    match engine.compile_str("\\opt[abc").unwrap_err() {
        Error::Parse(error) => assert_eq!(error.kind, SyntaxError::UnmatchedBracket),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn concatenation_flattens_and_merges() {
    let a = Node::text("a");
    let b = Node::text("b");
    let p = Node::marker(Marker::Paragraph);

    assert_eq!(a.clone() + b.clone(), Node::text("ab"));
    assert_eq!(Node::empty() + p.clone(), p);
    assert_eq!(p.clone() + Node::empty(), p);
    assert_eq!(
        (a.clone() + p.clone()) + (b.clone() + p.clone()),
        Node::Sequence(vec![Node::text("a"), p.clone(), Node::text("b"), p.clone()])
    );
    assert_eq!(
        (a.clone() + p.clone()) + b.clone(),
        a.clone() + (p.clone() + b.clone())
    );
    assert_eq!(Node::join(vec![a, Node::empty(), b]), Node::text("ab"));
}

#[test]
fn environment_lookup_falls_back_through_parents() {
    let root: Environment<String, i32> = Environment::root(Some(0));
    let global = root.child();
    global.set("a".to_string(), 1).unwrap();
    let inner = global.extend(HashMap::from([("b".to_string(), 2)]));

    assert_eq!(inner.get("a"), Some(1));
    assert_eq!(inner.get("b"), Some(2));
    assert_eq!(inner.get("missing"), Some(0));
    assert_eq!(global.get("b"), Some(0));
    assert!(inner.has_local("b"));
    assert!(!inner.has_local("a"));
    assert_eq!(
        root.set("x".to_string(), 1),
        Err(RuntimeError::ImmutableRoot)
    );

    global.set("a".to_string(), 5).unwrap();
    assert_eq!(inner.get("a"), Some(5));
}

#[test]
fn counters_reset_their_subcounters() {
    let mut counters = hm::counter::Counters::new();
    counters.add_counter("page", None).unwrap();
    counters.add_counter("section", Some("page")).unwrap();
    counters.add_counter("subsection", Some("section")).unwrap();

    counters.increment("page").unwrap();
    counters.increment("section").unwrap();
    counters.increment("section").unwrap();
    counters.increment("subsection").unwrap();
    assert_eq!(counters.display(&["section", "subsection"]).unwrap(), "2.1");
    assert_eq!(
        counters
            .generate_id("subsection", &["page", "section", "subsection"])
            .unwrap(),
        "subsection_1_2_1"
    );

    counters.increment("section").unwrap();
    assert_eq!(counters.value("subsection").unwrap(), 0);
    counters.increment("page").unwrap();
    assert_eq!(counters.value("section").unwrap(), 0);
    assert_eq!(
        counters.increment("chapter"),
        Err(RuntimeError::UnknownCounter("chapter".into()))
    );
}

#[test]
fn include_reads_relative_to_the_including_file() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    fs::create_dir(&sub).unwrap();
    fs::write(sub.join("part.hm"), "\\def{greeting}{}{hi}[\\include{other.hm}]").unwrap();
    fs::write(sub.join("other.hm"), "other").unwrap();

    let mut engine = engine();
    engine.configure(dir.path(), &dir.path().join("out")).unwrap();
    let out = engine
        .compile_str("\\include{sub/part.hm} \\greeting")
        .unwrap();
    assert_eq!(out.to_text(), "[other] hi");
    assert_eq!(
        engine.global_macros().path(INPUT_DIR).as_deref(),
        Some(dir.path())
    );
}

#[test]
fn include_of_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine();
    engine.configure(dir.path(), dir.path()).unwrap();
    match engine.compile_str("\\include{absent.hm}").unwrap_err() {
        Error::Runtime(diagnostic) => {
            assert_eq!(
                diagnostic.error,
                RuntimeError::NoSuchFile(dir.path().join("absent.hm"))
            );
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn output_directory_stays_inside_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine();
    engine.configure(dir.path(), dir.path()).unwrap();
    engine.compile_str("\\setoutputdir{a/b/../c}").unwrap();
    assert_eq!(
        engine.global_macros().path(OUTPUT_DIR),
        Some(dir.path().join("a/c"))
    );

    match engine.compile_str("\\setoutputdir{../elsewhere}").unwrap_err() {
        Error::Parse(error) => assert_eq!(
            error.kind,
            SyntaxError::OutputEscapesRoot("../elsewhere".into())
        ),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn unconfigured_output_directory_is_relative() {
    let mut engine = engine();
    engine.compile_str("\\setoutputdir{sub/./inner}").unwrap();
    assert_eq!(
        engine.global_macros().path(OUTPUT_DIR),
        Some(PathBuf::from("sub/inner"))
    );

    match engine.compile_str("\\setoutputdir{../x}").unwrap_err() {
        Error::Parse(error) => {
            assert_eq!(error.kind, SyntaxError::OutputEscapesRoot("../x".into()))
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn evaluation_reaches_normal_form() {
    let position = Position::new("nested", 1);
    let node = Node::text("a")
        + Node::deferred(None, move |_, _| {
            let position = position.clone();
            Ok(Node::deferred(None, move |_, _| {
                Ok(Node::Variable {
                    name: "x".into(),
                    position: position.clone(),
                })
            }))
        })
        + Node::marker(Marker::Paragraph);
    assert!(!node.is_normal());

    let mut engine = engine();
    let bindings = Bindings::from([("x".to_string(), Node::text("v"))]);
    let once = node.evaluate(&mut engine, &bindings).unwrap();
    assert!(once.is_normal());
    assert_eq!(once.to_text(), "av");
    assert_eq!(once.evaluate(&mut engine, &bindings).unwrap(), once);
}

#[test]
fn read_errors_outrank_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.hm");
    fs::write(&path, b"{abc\n\xff\xfe\n").unwrap();
    match engine().compile_file(&path).unwrap_err() {
        Error::Runtime(diagnostic) => {
            assert!(matches!(diagnostic.error, RuntimeError::Io(_)))
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn source_map_locates_lines() {
    let mut sources = hm::SourceMap::new();
    let id = sources.add("doc", "a\nb\n".to_string());
    let position = hm::Position::new("doc", 2);
    assert_eq!(sources.locate(&position), Some((id, 2..4)));
    assert_eq!(sources.locate(&hm::Position::new("not-a-file", 1)), None);
}
