//! Markup for HTML pages: fonts, pages and sections, lists, tables, math
//! and assets, installed into an [`hm::Engine`].

pub mod assets;
pub mod lists;
pub mod math;
pub mod page;
pub mod paragraphs;
pub mod structure;
pub mod tabular;
pub mod text;

use hm::{Engine, Node};

/// Install every module. Pages need the text module's prettified grammar,
/// so text goes first.
pub fn install(engine: &mut Engine) {
    text::install(engine);
    paragraphs::install(engine);
    page::install(engine);
    structure::install(engine);
    lists::install(engine);
    tabular::install(engine);
    math::install(engine);
    assets::install(engine);
}

/// Escape the characters HTML treats specially in text.
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) fn wrap(open: &str, inner: Node, close: &str) -> Node {
    Node::text(open) + inner + Node::text(close)
}
