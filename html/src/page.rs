//! The `page` block and everything that contributes to a written page.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use hm::ambient::{INPUT_DIR, OUTPUT_DIR, OUTPUT_ROOT, PAGE_ID};
use hm::paths::{normalize, relative_to, to_url};
use hm::references::{LinkReference, reference};
use hm::{
    Binding, Bindings, BlockScope, CharEnv, DiagnosticError, Engine, FileStream, Frame, MacroEnv,
    Marker, Node, Position, Result, RuntimeError, Stream, handler,
};

use crate::paragraphs::{self, RULE};
use crate::text::pretty_chars;

const PAGE_STATE: &str = "_page_state";
const PAGE_TEMPLATE: &str = "_page_template";
const PAGE_CSS: &str = "_page_css";
const BREADCRUMBS: &str = "_breadcrumbs";

/// What the body of one page has declared about it.
#[derive(Debug)]
pub struct PageState {
    pub id: String,
    pub title: Option<Node>,
    pub modified: Option<Node>,
    /// Footnotes in order of appearance, with their identifiers.
    pub footnotes: Vec<(String, Node)>,
    /// Where the page went once written.
    pub written: Option<PathBuf>,
}

impl PageState {
    fn new(id: &str) -> Self {
        PageState {
            id: id.to_string(),
            title: None,
            modified: None,
            footnotes: Vec::new(),
            written: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Crumb {
    name: Option<Node>,
    label: String,
}

fn page_state(macros: &MacroEnv, what: &str) -> Result<Rc<RefCell<PageState>>, RuntimeError> {
    macros
        .shared::<RefCell<PageState>>(PAGE_STATE)
        .ok_or_else(|| RuntimeError::Custom(format!("{} can only appear within a page", what)))
}

fn missing(field: &str, context: &str) -> RuntimeError {
    RuntimeError::MissingRequiredField {
        field: field.to_string(),
        context: context.to_string(),
    }
}

fn inhibit() -> Node {
    Node::marker(Marker::InhibitParagraph)
}

/// `\begin{page}{file.html}` opens a page written to the current output directory.
fn begin_page(
    engine: &mut Engine,
    stream: &mut dyn Stream,
    frame: &Frame<'_>,
    pretty: &CharEnv,
) -> Result<(CharEnv, MacroEnv)> {
    let position = stream.position();
    let file = engine.parse_argument(stream, frame, "page file name")?;
    let file = engine.parse_static(&file, "page file name", &position)?;

    engine.counters_mut().increment("page")?;
    let id = engine.counters().generate_id("page", &["page"])?;
    let dir = frame.macros.path(OUTPUT_DIR).unwrap_or_default();
    engine.references_mut().set_page_reference(&id, &file, &dir);

    let state = Rc::new(RefCell::new(PageState::new(&id)));
    let macros = frame.macros.extend(HashMap::from([
        (PAGE_ID.to_string(), Binding::Text(id)),
        (PAGE_STATE.to_string(), Binding::Shared(state)),
    ]));
    Ok((pretty.clone(), macros))
}

fn end_page(_: &mut Engine, scope: BlockScope, body: Node) -> Result<Node> {
    let macros = scope.macros;
    Ok(Node::deferred(Some(scope.position), move |engine, bindings| {
        write_page(engine, &macros, &body, bindings)
    }))
}

fn write_page(
    engine: &mut Engine,
    macros: &MacroEnv,
    body: &Node,
    bindings: &Bindings,
) -> Result<Node> {
    let state = page_state(macros, "page")?;
    if let Some(path) = state.borrow().written.clone() {
        return Err(RuntimeError::DuplicateOutputPath(path).into());
    }
    let id = state.borrow().id.clone();
    let template = macros
        .node(PAGE_TEMPLATE)
        .ok_or_else(|| missing("\\setpagetemplate", &format!("page {}", id)))?;

    let content = body.evaluate(engine, bindings)?;
    let content = content + footnotes(engine, macros, &state, bindings)?;
    let rendered = paragraphs::render(&(inhibit() + content))?;

    let title = state.borrow().title.clone();
    if let Some(title) = &title {
        engine.references_mut().retitle(&id, &title.to_text());
    }
    let page = engine
        .references()
        .page(&id)
        .cloned()
        .ok_or_else(|| missing("\\label", &format!("page {}", id)))?;
    let path = page.path();
    fs::create_dir_all(&page.dir)?;
    engine.claim_output_path(&path)?;

    let context = format!("page {}", path.display());
    let css = match macros.path(PAGE_CSS) {
        Some(css) => format!(
            "<LINK REL=\"stylesheet\" HREF=\"{}\" TYPE=\"text/css\">",
            to_url(&relative_to(&css, &page.dir))
        ),
        None => String::new(),
    };
    let modified = state
        .borrow()
        .modified
        .clone()
        .ok_or_else(|| missing("\\modified", &context))?;
    let title = title.ok_or_else(|| missing("\\title", &context))?;
    let breadcrumbs = breadcrumbs(engine, macros, &page).evaluate(engine, bindings)?;

    let page_bindings = Bindings::from([
        ("pagetitle".to_string(), title),
        ("pagecontent".to_string(), rendered),
        ("css".to_string(), Node::text(css)),
        ("pagemodified".to_string(), modified),
        ("breadcrumbs".to_string(), breadcrumbs),
    ]);
    let output = match template.evaluate(engine, &page_bindings)? {
        Node::Literal(text) => text,
        _ => {
            return Err(RuntimeError::Custom(format!(
                "the page template for {} did not produce plain text",
                path.display()
            ))
            .into());
        }
    };
    fs::write(&path, output)?;
    state.borrow_mut().written = Some(path.clone());
    engine.log(&format!("Wrote page {}", path.display()));
    Ok(Node::text(""))
}

/// Render the footnotes of a page. Footnotes may contain footnotes, so this
/// repeats until no new ones appear.
fn footnotes(
    engine: &mut Engine,
    macros: &MacroEnv,
    state: &RefCell<PageState>,
    bindings: &Bindings,
) -> Result<Node> {
    let page_id = state.borrow().id.clone();
    let mut out = Node::empty();
    let mut done = 0;
    loop {
        let pending: Vec<(String, Node)> = state.borrow().footnotes[done..].to_vec();
        if pending.is_empty() {
            break;
        }
        let mut chunk = Node::empty();
        for (offset, (id, footnote)) in pending.iter().enumerate() {
            let mark = format!("[{}]", done + offset + 1);
            engine
                .references_mut()
                .make_label(id, id, &mark, &page_id)?;
            let back = reference(
                None,
                macros.clone(),
                Node::text(format!("#ref_{}", id)),
                Some(Node::text(mark)),
            );
            chunk = chunk
                + Node::tag(RULE)
                + inhibit()
                + engine.references().anchor_for(id)
                + inhibit()
                + Node::text("<div class=\"footnote\">\n<sup>")
                + back
                + Node::text("</sup> ")
                + footnote.clone()
                + Node::text("</div>\n");
        }
        done += pending.len();
        out = out + chunk.evaluate(engine, bindings)?;
    }
    Ok(out)
}

fn current_crumbs(engine: &Engine) -> Vec<Crumb> {
    engine
        .global_macros()
        .shared::<Vec<Crumb>>(BREADCRUMBS)
        .map(|crumbs| crumbs.as_ref().clone())
        .unwrap_or_default()
}

/// The trail of breadcrumbs leading to `page`, each linked except the page itself.
fn breadcrumbs(engine: &Engine, macros: &MacroEnv, page: &LinkReference) -> Node {
    let crumbs = current_crumbs(engine);
    let Some(last) = crumbs.last() else {
        return Node::text(page.autoname.clone());
    };
    let mut out = Node::empty();
    for (i, crumb) in crumbs.iter().enumerate() {
        if i > 0 {
            out = out + Node::text(" > ");
        }
        if crumb.label == page.label {
            let name = crumb.name.clone().unwrap_or_else(|| {
                Node::text(
                    engine
                        .references()
                        .display_text_for(&crumb.label)
                        .unwrap_or_default(),
                )
            });
            out = out + name;
        } else {
            out = out
                + reference(
                    None,
                    macros.clone(),
                    Node::text(crumb.label.clone()),
                    crumb.name.clone(),
                );
        }
    }
    if last.label != page.label {
        out = out + Node::text(" > ") + Node::text(page.autoname.clone());
    }
    out
}

/// `\addbreadcrumb[name]{label}` appends to the trail shown on later pages.
fn add_breadcrumb(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let name = engine.read_bracket_args(stream, frame)?;
    let global = engine.global_chars().clone();
    let label = engine.parse_argument(stream, &frame.with_chars(&global), "breadcrumb label")?;
    Ok(Node::deferred(Some(position), move |engine, bindings| {
        engine.add_fluid_key(BREADCRUMBS);
        let name = match &name {
            Some(name) => Some(name.evaluate(engine, bindings)?),
            None => None,
        };
        let label = engine.static_text(&label, bindings, "breadcrumb label")?;
        let mut crumbs = current_crumbs(engine);
        crumbs.push(Crumb { name, label });
        engine.set_global(BREADCRUMBS, Binding::Shared(Rc::new(crumbs)));
        Ok(Node::text(""))
    }))
}

fn pop_breadcrumb(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    Ok(Node::deferred(Some(position), |engine, _| {
        let mut crumbs = current_crumbs(engine);
        crumbs.pop();
        engine.set_global(BREADCRUMBS, Binding::Shared(Rc::new(crumbs)));
        Ok(Node::text(""))
    }))
}

fn title(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let text = engine.parse_argument(stream, frame, "title")?;
    let macros = frame.macros.clone();
    Ok(Node::deferred(Some(position), move |engine, bindings| {
        let state = page_state(&macros, "\\title")?;
        if state.borrow().title.is_some() {
            return Err(RuntimeError::Custom("page has two titles".to_string()).into());
        }
        let title = text.evaluate(engine, bindings)?;
        let id = state.borrow().id.clone();
        engine.references_mut().retitle(&id, &title.to_text());
        state.borrow_mut().title = Some(title);
        Ok(Node::text(""))
    }))
}

fn modified(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let text = engine.parse_argument(stream, frame, "modification date")?;
    let macros = frame.macros.clone();
    Ok(Node::deferred(Some(position), move |engine, bindings| {
        let state = page_state(&macros, "\\modified")?;
        let date = text.evaluate(engine, bindings)?;
        state.borrow_mut().modified = Some(date);
        Ok(Node::text(""))
    }))
}

/// `\footnote{text}` leaves a numbered mark here; the text is rendered at
/// the bottom of the page.
fn footnote(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let text = engine.parse_argument(stream, frame, "footnote")?;
    let macros = frame.macros.clone();
    Ok(Node::deferred(Some(position.clone()), move |engine, _| {
        let state = page_state(&macros, "\\footnote")?;
        engine.counters_mut().increment("footnote")?;
        let id = engine.counters().generate_id("footnote", &["page", "footnote"])?;
        let back = format!("ref_{}", id);
        let page_id = state.borrow().id.clone();
        engine
            .references_mut()
            .make_label(&back, &back, "^", &page_id)?;
        state.borrow_mut().footnotes.push((id.clone(), text.clone()));
        Ok(engine.references().anchor_for(&back)
            + Node::text("<sup>")
            + reference(
                Some(position.clone()),
                macros.clone(),
                Node::text(format!("#{}", id)),
                None,
            )
            + Node::text("</sup>"))
    }))
}

/// Resolve `name` against the directory of the file being read.
fn input_path(engine: &Engine, name: &str) -> std::path::PathBuf {
    let input_dir = engine.global_macros().path(INPUT_DIR).unwrap_or_default();
    normalize(&input_dir.join(name))
}

fn no_such_file(path: &Path, position: &Position) -> DiagnosticError {
    DiagnosticError::at(RuntimeError::NoSuchFile(path.to_path_buf()), position.clone())
}

/// `\setpagetemplate{file}` reads the template right away. Its text is
/// evaluated for every page with the page parts bound as variables.
fn set_page_template(
    engine: &mut Engine,
    stream: &mut dyn Stream,
    frame: &Frame<'_>,
) -> Result<Node> {
    let position = stream.position();
    let name = engine.parse_argument(stream, frame, "template file name")?;
    let name = engine.parse_static(&name, "template file name", &position)?;
    let path = input_path(engine, &name);
    let mut template = FileStream::open(&path).map_err(|_| no_such_file(&path, &position))?;

    let globals = engine.global_macros().clone();
    let saved = globals.get(INPUT_DIR);
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    globals.set(INPUT_DIR.to_string(), Binding::Path(dir))?;
    let parsed = engine.parse_all(&mut template, frame);
    if let Some(saved) = saved {
        globals.set(INPUT_DIR.to_string(), saved)?;
    }
    let parsed = parsed?;
    if let Some(error) = template.take_error() {
        return Err(error.into());
    }
    frame
        .macros
        .set(PAGE_TEMPLATE.to_string(), Binding::Node(parsed))?;
    Ok(Node::text(""))
}

/// `\setstylesheet{file}` copies the stylesheet to `css/` under the output root.
fn set_stylesheet(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let name = engine.parse_argument(stream, frame, "stylesheet file name")?;
    let name = engine.parse_static(&name, "stylesheet file name", &position)?;
    let source = input_path(engine, &name);
    let file_name = source
        .file_name()
        .ok_or_else(|| no_such_file(&source, &position))?;
    let css_dir = engine
        .global_macros()
        .path(OUTPUT_ROOT)
        .unwrap_or_default()
        .join("css");
    fs::create_dir_all(&css_dir)?;
    let dest = css_dir.join(file_name);
    fs::copy(&source, &dest).map_err(|_| no_such_file(&source, &position))?;
    frame
        .macros
        .set(PAGE_CSS.to_string(), Binding::Path(dest))?;
    Ok(Node::text(""))
}

pub(crate) fn install(engine: &mut Engine) {
    // Parents are registered before their children, so these cannot fail.
    let _ = engine.counters_mut().add_counter("page", None);
    let _ = engine.counters_mut().add_counter("footnote", Some("page"));

    let pretty = pretty_chars(engine);
    engine.register_block(
        "page",
        move |engine, stream, frame| begin_page(engine, stream, frame, &pretty),
        end_page,
    );
    engine.register_macro("title", handler(title));
    engine.register_macro("modified", handler(modified));
    engine.register_macro("footnote", handler(footnote));
    engine.register_macro("setpagetemplate", handler(set_page_template));
    engine.register_macro("setstylesheet", handler(set_stylesheet));
    engine.register_macro("addbreadcrumb", handler(add_breadcrumb));
    engine.register_macro("popbreadcrumb", handler(pop_breadcrumb));
}
