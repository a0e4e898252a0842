use std::fs;
use std::io;
use std::path::Path;

use hm::ambient::OUTPUT_DIR;
use hm::references::{ReferenceTable, References, UNRESOLVED};
use hm::{Config, Engine, Error, Node, Outcome, RuntimeError, SyntaxError, handler};

/// An engine with a `\target{file}` macro that makes `file` the next label target.
fn engine_with_targets() -> Engine {
    let mut engine = Engine::new().with_log(Box::new(io::sink()));
    engine.register_macro(
        "target",
        handler(|engine, stream, frame| {
            let file = engine.parse_argument(stream, frame, "file")?;
            Ok(Node::deferred(None, move |engine, bindings| {
                let file = engine.static_text(&file, bindings, "file")?;
                let dir = engine.global_macros().path(OUTPUT_DIR).unwrap_or_default();
                engine.references_mut().set_page_reference(&file, &file, &dir);
                Ok(Node::text(""))
            }))
        }),
    );
    engine
}

#[test]
fn labels_bind_pages_and_anchors() {
    let mut refs = References::new(ReferenceTable::default());
    refs.set_page_reference("page_1", "index.html", Path::new("/out"));
    let page = refs.label("home").unwrap();
    assert_eq!(page.name(), "home");
    assert_eq!(page.autoname, "home");

    refs.set_anchor_reference("section_1_1", "1", "page_1").unwrap();
    let anchor = refs.label("intro").unwrap();
    assert_eq!(anchor.name(), "home#intro");
    assert_eq!(anchor.autoname, "1");
    assert_eq!(anchor.path(), Path::new("/out/index.html"));

    assert_eq!(
        refs.label("again"),
        Err(RuntimeError::DanglingLabel("again".into()))
    );
    assert_eq!(
        refs.anchor_for("section_1_1"),
        Node::text("<A NAME=\"intro\"></A>")
    );
    assert_eq!(refs.anchor_for("section_9_9"), Node::text(""));
}

#[test]
fn anchors_need_a_labelled_page() {
    let mut refs = References::new(ReferenceTable::default());
    assert!(matches!(
        refs.set_anchor_reference("section_1_1", "1", "page_1"),
        Err(RuntimeError::MissingRequiredField { .. })
    ));
}

#[test]
fn links_are_relative_to_the_referring_page() {
    let mut refs = References::new(ReferenceTable::default());
    refs.set_page_reference("page_1", "index.html", Path::new("/out"));
    refs.label("home").unwrap();
    refs.set_anchor_reference("section_1_1", "1", "page_1").unwrap();
    refs.label("intro").unwrap();

    let link = refs
        .link_to("home#intro", None, Path::new("/out/sub"))
        .unwrap();
    assert_eq!(link, Node::text("<A HREF=\"../index.html#intro\">1</A>"));

    let link = refs
        .link_to("home", Some(Node::text("Home")), Path::new("/out"))
        .unwrap();
    assert_eq!(link, Node::text("<A HREF=\"index.html\">Home</A>"));
    assert!(refs.link_to("nowhere", None, Path::new("/out")).is_none());
}

#[test]
fn retitle_updates_display_text() {
    let mut refs = References::new(ReferenceTable::default());
    refs.set_page_reference("page_1", "index.html", Path::new("/out"));
    refs.label("home").unwrap();
    refs.retitle("page_1", "Welcome");
    assert_eq!(refs.display_text_for("home").as_deref(), Some("Welcome"));
    assert_eq!(refs.current().by_id["page_1"].autoname, "Welcome");
}

#[test]
fn previous_run_resolves_forward_references() {
    let mut previous = ReferenceTable::default();
    let mut old = References::new(ReferenceTable::default());
    old.set_page_reference("page_2", "later.html", Path::new("/out"));
    previous.insert(old.label("later").unwrap());

    let refs = References::new(previous);
    assert_eq!(refs.display_text_for("later").as_deref(), Some("later"));
    assert!(refs.labels_changed());
}

#[test]
fn label_with_nothing_pending() {
    let err = Engine::new()
        .with_log(Box::new(io::sink()))
        .compile_str("text\n\\label{x}")
        .unwrap_err();
    match err {
        Error::Runtime(diagnostic) => {
            assert_eq!(diagnostic.error, RuntimeError::DanglingLabel("x".into()));
            assert_eq!(diagnostic.position.map(|p| p.line), Some(2));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn unknown_reference_warns_and_renders_placeholder() {
    let mut engine = engine_with_targets();
    let out = engine.compile_str("see \\ref{nowhere}").unwrap();
    assert_eq!(out.to_text(), format!("see {}", UNRESOLVED));
    assert_eq!(engine.diagnostics().len(), 1);
    assert!(engine.diagnostics()[0].is_warning);
}

#[test]
fn links_use_given_text() {
    let mut engine = engine_with_targets();
    let out = engine
        .compile_str("\\link[the site]{https://example.org}")
        .unwrap();
    assert_eq!(
        out.to_text(),
        "<A HREF=\"https://example.org\">the site</A>"
    );
}

#[test]
fn reference_table_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.ref");
    assert_eq!(ReferenceTable::load(&path).unwrap(), ReferenceTable::default());

    let mut refs = References::new(ReferenceTable::default());
    refs.set_page_reference("page_1", "index.html", dir.path());
    refs.label("home").unwrap();
    refs.set_anchor_reference("figure_1_1", "1", "page_1").unwrap();
    refs.label("fig").unwrap();
    refs.current().save(&path).unwrap();

    assert_eq!(&ReferenceTable::load(&path).unwrap(), refs.current());
}

#[test]
fn forward_references_settle_after_a_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doc.hm");
    fs::write(
        &input,
        "\\ref{b}\\target{a.html}\\label{a}\\target{b.html}\\label{b}",
    )
    .unwrap();
    let config = Config::new(&input, dir.path().join("out"));

    let mut first = engine_with_targets();
    assert_eq!(first.compile(&config).unwrap(), Outcome::RerunNeeded);
    assert_eq!(first.diagnostics().len(), 1);
    assert!(dir.path().join("doc.hm.ref").exists());

    let mut second = engine_with_targets();
    assert_eq!(second.compile(&config).unwrap(), Outcome::Done);
    assert!(second.diagnostics().is_empty());

    let mut third = engine_with_targets();
    assert_eq!(third.compile(&config).unwrap(), Outcome::Done);
}

#[test]
fn anchor_names_match_their_links() {
    let mut refs = References::new(ReferenceTable::default());
    refs.set_page_reference("page_1", "index.html", Path::new("/out"));
    refs.label("home").unwrap();
    refs.set_anchor_reference("figure_1_1", "1", "page_1").unwrap();
    refs.label("my fig").unwrap();

    assert_eq!(
        refs.anchor_for("figure_1_1"),
        Node::text("<A NAME=\"my+fig\"></A>")
    );
    assert_eq!(
        refs.link_to("home#my fig", None, Path::new("/out")),
        Some(Node::text("<A HREF=\"index.html#my+fig\">1</A>"))
    );
}

#[test]
fn each_run_starts_from_the_installed_macros() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doc.hm");
    let config = Config::new(&input, dir.path().join("out"));
    let mut engine = Engine::new().with_log(Box::new(io::sink()));

    fs::write(&input, "\\ref{nowhere}\\def{leak}{}{x}").unwrap();
    engine.compile(&config).unwrap();
    assert_eq!(engine.diagnostics().len(), 1);

    fs::write(&input, "\\ref{nowhere}\\leak").unwrap();
    match engine.compile(&config).unwrap_err() {
        Error::Parse(error) => {
            assert_eq!(error.kind, SyntaxError::UndefinedMacro("leak".into()))
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(engine.diagnostics().len(), 1);
}
