//! Numbered sections and figures.

use std::collections::HashMap;

use hm::ambient::PAGE_ID;
use hm::{
    Binding, BlockScope, CharEnv, Engine, Frame, Handler, MacroEnv, Marker, Node, Result,
    RuntimeError, Stream, handler,
};

const FIGURE_PLACEMENT: &str = "_figure_placement";

/// Placement used by a figure without `[...]`.
const DEFAULT_PLACEMENT: &str = "h";

#[derive(Clone, Copy)]
struct Level {
    counter: &'static str,
    /// Counters shown in the number, outermost first.
    path: &'static [&'static str],
    heading: &'static str,
}

const SECTION: Level = Level {
    counter: "section",
    path: &["section"],
    heading: "H2",
};

const SUBSECTION: Level = Level {
    counter: "subsection",
    path: &["section", "subsection"],
    heading: "H3",
};

const SUBSUBSECTION: Level = Level {
    counter: "subsubsection",
    path: &["section", "subsection", "subsubsection"],
    heading: "H4",
};

fn inhibit() -> Node {
    Node::marker(Marker::InhibitParagraph)
}

fn paragraph() -> Node {
    Node::marker(Marker::Paragraph)
}

fn current_page(macros: &MacroEnv, what: &str) -> Result<String, RuntimeError> {
    macros
        .text(PAGE_ID)
        .ok_or_else(|| RuntimeError::Custom(format!("{} can only appear within a page", what)))
}

/// `\section{title}` and friends. The heading becomes the next label target,
/// displayed by its title.
fn heading(level: Level) -> Handler {
    handler(move |engine, stream, frame| {
        let position = stream.position();
        let text = engine.parse_argument(stream, frame, "section title")?;
        let macros = frame.macros.clone();
        Ok(Node::deferred(Some(position), move |engine, bindings| {
            let page_id = current_page(&macros, &format!("\\{}", level.counter))?;
            let text = text.evaluate(engine, bindings)?;
            engine.counters_mut().increment(level.counter)?;
            let mut names = vec!["page"];
            names.extend_from_slice(level.path);
            let id = engine.counters().generate_id(level.counter, &names)?;
            let number = engine.counters().display(level.path)?;
            engine
                .references_mut()
                .set_anchor_reference(&id, &text.to_text(), &page_id)?;
            Ok(paragraph()
                + inhibit()
                + engine.references().anchor_for(&id)
                + inhibit()
                + Node::text(format!("<{}>{}. ", level.heading, number))
                + text
                + Node::text(format!("</{}>", level.heading))
                + paragraph())
        }))
    })
}

fn begin_figure(
    engine: &mut Engine,
    stream: &mut dyn Stream,
    frame: &Frame<'_>,
) -> Result<(CharEnv, MacroEnv)> {
    let placement = engine
        .read_bracket_args(stream, frame)?
        .unwrap_or_else(|| Node::text(DEFAULT_PLACEMENT));
    let macros = frame.macros.extend(HashMap::from([(
        FIGURE_PLACEMENT.to_string(),
        Binding::Node(placement),
    )]));
    Ok((frame.chars.clone(), macros))
}

fn end_figure(_: &mut Engine, scope: BlockScope, body: Node) -> Result<Node> {
    let placement = scope
        .macros
        .node(FIGURE_PLACEMENT)
        .unwrap_or_else(|| Node::text(DEFAULT_PLACEMENT));
    let outer = scope.outer;
    Ok(Node::deferred(Some(scope.position), move |engine, bindings| {
        let page_id = current_page(&outer, "figure")?;
        engine.counters_mut().increment("figure")?;
        let id = engine.counters().generate_id("figure", &["page", "figure"])?;
        let number = engine.counters().display(&["figure"])?;
        engine
            .references_mut()
            .set_anchor_reference(&id, &number, &page_id)?;
        let placement = engine.static_text(&placement, bindings, "figure placement")?;
        let anchor = engine.references().anchor_for(&id);
        Ok(paragraph()
            + inhibit()
            + anchor
            + inhibit()
            + Node::text(format!("<div class=\"figure figure_{}\">", placement))
            + body.evaluate(engine, bindings)?
            + Node::text("</div>")
            + paragraph())
    }))
}

/// `\caption{text}` is numbered by the figure it appears in.
fn caption(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let text = engine.parse_argument(stream, frame, "caption")?;
    Ok(Node::deferred(Some(position), move |engine, bindings| {
        let number = engine.counters().display(&["figure"])?;
        Ok(Node::text(format!("<div class=\"caption\"><b>Figure {}.</b> ", number))
            + text.evaluate(engine, bindings)?
            + Node::text("</div>"))
    }))
}

pub(crate) fn install(engine: &mut Engine) {
    let counters = engine.counters_mut();
    let _ = counters.add_counter("section", Some("page"));
    let _ = counters.add_counter("subsection", Some("section"));
    let _ = counters.add_counter("subsubsection", Some("subsection"));
    let _ = counters.add_counter("figure", Some("page"));

    engine.register_macro("section", heading(SECTION));
    engine.register_macro("subsection", heading(SUBSECTION));
    engine.register_macro("subsubsection", heading(SUBSUBSECTION));
    engine.register_block("figure", begin_figure, end_figure);
    engine.register_macro("caption", handler(caption));
}
