use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

use hm::{Config, Engine, Error, Node, Outcome, RuntimeError, handler};
use hm_html::assets::ImageOptions;

const TEMPLATE: &str = "<html><title>\\var{pagetitle}</title>\\var{css}<body>\\var{breadcrumbs}|\\var{pagecontent}|\\var{pagemodified}</body></html>";

fn engine() -> Engine {
    let mut engine = Engine::new().with_log(Box::new(io::sink()));
    hm_html::install(&mut engine);
    engine
}

/// A log that can be read back after the engine has taken ownership of it.
#[derive(Clone, Default)]
struct SharedLog(Rc<RefCell<Vec<u8>>>);

impl SharedLog {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write `source` as `doc.hm` next to the page template and return its config.
fn project(dir: &Path, source: &str) -> Config {
    fs::write(dir.join("template.html"), TEMPLATE).unwrap();
    let input = dir.join("doc.hm");
    fs::write(&input, source).unwrap();
    Config::new(&input, dir.join("out"))
}

fn runtime_error(result: hm::Result<Outcome>) -> RuntimeError {
    match result {
        Err(Error::Runtime(diagnostic)) => diagnostic.error,
        Err(other) => panic!("expected a runtime error, got: {}", other),
        Ok(outcome) => panic!("expected an error, got {:?}", outcome),
    }
}

#[test]
fn page_is_written_through_the_template() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(
        dir.path(),
        "\\setpagetemplate{template.html}\n\
         \\begin{page}{index.html}\\label{home}\n\
         \\title{Home}\\modified{today}\n\
         \\section{Intro}\\label{intro}\n\
         First paragraph\\footnote{A note.}.\n\
         \n\
         Second paragraph.\n\
         \\end{page}\n",
    );
    let page = dir.path().join("out/index.html");

    let mut first = engine();
    assert_eq!(first.compile(&config).unwrap(), Outcome::RerunNeeded);
    let html = fs::read_to_string(&page).unwrap();
    assert!(html.starts_with("<html><title>Home</title><body>Home|"));
    assert!(html.contains("<H2>1. Intro</H2>"));
    assert!(html.contains("<P>Second paragraph."));
    assert!(html.contains("<A HREF=\"index.html#ref_footnote_1_1\">[1]</A>"));
    assert!(html.contains("A note.</div>"));
    assert!(html.ends_with("|today</body></html>"));

    let mut second = engine();
    assert_eq!(second.compile(&config).unwrap(), Outcome::Done);
    assert!(second.diagnostics().is_empty());
    let html = fs::read_to_string(&page).unwrap();
    assert!(html.contains("<A NAME=\"intro\"></A>"));
    assert!(html.contains("<sup><A HREF=\"index.html#footnote_1_1\">[1]</A></sup>"));
}

#[test]
fn breadcrumbs_link_to_earlier_pages() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(
        dir.path(),
        "\\setpagetemplate{template.html}\n\
         \\begin{page}{index.html}\\label{home}\\title{Home}\\modified{x}\\end{page}\n\
         \\addbreadcrumb{home}\n\
         \\begin{page}{sub.html}\\label{sub}\\title{Sub}\\modified{x}\\end{page}\n",
    );
    engine().compile(&config).unwrap();

    let index = fs::read_to_string(dir.path().join("out/index.html")).unwrap();
    assert!(index.contains("<body>Home|"));
    let sub = fs::read_to_string(dir.path().join("out/sub.html")).unwrap();
    assert!(sub.contains("<body><A HREF=\"index.html\">Home</A> > Sub|"));
}

#[test]
fn stylesheet_is_linked_relative_to_each_page() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("style.css"), "body {}").unwrap();
    let config = project(
        dir.path(),
        "\\setpagetemplate{template.html}\\setstylesheet{style.css}\n\
         \\begin{page}{index.html}\\label{home}\\title{Home}\\modified{x}\\end{page}\n\
         \\setoutputdir{sub}\n\
         \\begin{page}{inner.html}\\label{inner}\\title{Inner}\\modified{x}\\end{page}\n",
    );
    let mut log = SharedLog::default();
    let mut engine = engine().with_log(Box::new(log.clone()));
    engine.compile(&config).unwrap();
    log.flush().unwrap();

    assert!(dir.path().join("out/css/style.css").is_file());
    let index = fs::read_to_string(dir.path().join("out/index.html")).unwrap();
    assert!(index.contains("<LINK REL=\"stylesheet\" HREF=\"css/style.css\" TYPE=\"text/css\">"));
    let inner = fs::read_to_string(dir.path().join("out/sub/inner.html")).unwrap();
    assert!(inner.contains("HREF=\"../css/style.css\""));
    assert!(log.contents().contains("Wrote page"));
}

#[test]
fn two_pages_cannot_share_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(
        dir.path(),
        "\\setpagetemplate{template.html}\n\
         \\begin{page}{index.html}\\label{a}\\title{A}\\modified{x}\\end{page}\n\
         \\begin{page}{index.html}\\label{b}\\title{B}\\modified{x}\\end{page}\n",
    );
    assert!(matches!(
        runtime_error(engine().compile(&config)),
        RuntimeError::DuplicateOutputPath(_)
    ));
}

#[test]
fn a_page_is_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(
        dir.path(),
        "\\setpagetemplate{template.html}\n\
         \\twice{\\begin{page}{index.html}\\label{a}\\title{A}\\modified{x}\\end{page}}\n",
    );
    let mut engine = engine();
    engine.register_macro(
        "twice",
        handler(|engine, stream, frame| {
            let body = engine.parse_argument(stream, frame, "body")?;
            Ok(Node::deferred(None, move |engine, bindings| {
                body.evaluate(engine, bindings)?;
                body.evaluate(engine, bindings)
            }))
        }),
    );
    assert!(matches!(
        runtime_error(engine.compile(&config)),
        RuntimeError::DuplicateOutputPath(path) if path.ends_with("out/index.html")
    ));
    assert!(dir.path().join("out/index.html").exists());
}

#[test]
fn pages_need_template_label_and_date() {
    let missing_field = |source: &str| {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), source);
        match runtime_error(engine().compile(&config)) {
            RuntimeError::MissingRequiredField { field, .. } => field,
            other => panic!("unexpected error: {}", other),
        }
    };
    assert_eq!(
        missing_field("\\begin{page}{a.html}\\label{a}\\title{A}\\modified{x}\\end{page}"),
        "\\setpagetemplate"
    );
    assert_eq!(
        missing_field(
            "\\setpagetemplate{template.html}\\begin{page}{a.html}\\title{A}\\modified{x}\\end{page}"
        ),
        "\\label"
    );
    assert_eq!(
        missing_field(
            "\\setpagetemplate{template.html}\\begin{page}{a.html}\\label{a}\\title{A}\\end{page}"
        ),
        "\\modified"
    );
}

#[test]
fn page_macros_need_a_page() {
    let err = engine().compile_str("\\title{Lost}").unwrap_err();
    assert!(err.message().contains("within a page"));
}

#[test]
fn files_are_copied_and_linked() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.txt"), "1,2,3").unwrap();
    let out = dir.path().join("out");

    let log = SharedLog::default();
    let mut engine = engine().with_log(Box::new(log.clone()));
    engine.configure(dir.path(), &out).unwrap();
    let html = engine.compile_str("\\file{data.txt}").unwrap().to_text();
    assert_eq!(html, "<A HREF=\"data.txt\">data.txt</A>");
    assert_eq!(fs::read_to_string(out.join("data.txt")).unwrap(), "1,2,3");

    let html = engine
        .compile_str("\\file[the data]{data.txt}")
        .unwrap()
        .to_text();
    assert_eq!(html, "<A HREF=\"data.txt\">the data</A>");
    assert!(log.contents().contains("... already copied."));
}

#[test]
fn images_are_copied_with_alt_text() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("img")).unwrap();
    fs::write(dir.path().join("img/logo.png"), "not really a png").unwrap();
    let out = dir.path().join("out");

    let mut engine = engine();
    engine.configure(dir.path(), &out).unwrap();
    let html = engine
        .compile_str("\\includegraphics[alt=Logo]{img/logo.png}")
        .unwrap()
        .to_text();
    assert_eq!(html, "<IMG ALT=\"Logo\" SRC=\"img/logo.png\">");
    assert!(out.join("img/logo.png").is_file());

    assert!(matches!(
        engine.compile_str("\\includegraphics{img/missing.png}"),
        Err(Error::Runtime(diagnostic)) if matches!(diagnostic.error, RuntimeError::NoSuchFile(_))
    ));
}

#[test]
fn failed_conversion_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pic.png"), "not an image").unwrap();
    let mut engine = engine();
    engine.configure(dir.path(), &dir.path().join("out")).unwrap();
    match engine.compile_str("\\includegraphics[width=10]{pic.png}") {
        Err(Error::Runtime(diagnostic)) => assert!(matches!(
            diagnostic.error,
            RuntimeError::AssetConversionFailed { .. }
        )),
        other => panic!("unexpected result: {:?}", other.map(|node| node.to_text())),
    }
}

#[test]
fn image_options() {
    let options = ImageOptions::parse("width=100, height=50,ext=png,alt=A picture");
    assert_eq!(
        options,
        ImageOptions {
            width: "100".to_string(),
            height: "50".to_string(),
            ext: Some("png".to_string()),
            page: None,
            alt: "A picture".to_string(),
        }
    );
    assert_eq!(ImageOptions::parse(""), ImageOptions::default());
}
