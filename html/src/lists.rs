//! `itemize`, `enumerate` and `description`.

use std::collections::HashMap;

use hm::{
    Binding, BlockScope, CharEnv, Engine, Frame, MacroEnv, Marker, Node, ParseError, Result,
    Stream, SyntaxError, Tag, handler,
};

use crate::paragraphs;

const IN_LIST: &str = "_in_list";
const ITEM: &str = "item";

/// The tags a list kind renders with.
#[derive(Clone, Copy)]
struct ListKind {
    name: &'static str,
    outer: &'static str,
    /// One tag per item, or a term tag followed by a body tag.
    item: &'static str,
    body: Option<&'static str>,
}

const ITEMIZE: ListKind = ListKind {
    name: "itemize",
    outer: "UL",
    item: "LI",
    body: None,
};

const ENUMERATE: ListKind = ListKind {
    name: "enumerate",
    outer: "OL",
    item: "LI",
    body: None,
};

const DESCRIPTION: ListKind = ListKind {
    name: "description",
    outer: "DL",
    item: "DT",
    body: Some("DD"),
};

impl ListKind {
    /// Markup that opens an item with an optional label.
    fn open(&self, label: Option<Node>) -> Node {
        let open = Node::text(format!("\n<{}>", self.item));
        match self.body {
            None => match label {
                Some(label) => open + Node::text("<b>") + label + Node::text("</b> "),
                None => open,
            },
            Some(body) => {
                open + label.unwrap_or_else(|| Node::text(""))
                    + Node::text(format!("</{}><{}>", self.item, body))
            }
        }
    }

    fn close(&self) -> Node {
        Node::text(format!("</{}>", self.body.unwrap_or(self.item)))
    }
}

/// Inside a list `\item[label]` starts an item. Nested lists shadow the
/// binding, so an item always belongs to the innermost list.
fn item(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    if !frame.macros.has_local(IN_LIST) {
        return Err(stream
            .failure(SyntaxError::Custom(
                "\\item found at the wrong level of a list".to_string(),
            ))
            .into());
    }
    let tag = match engine.read_bracket_args(stream, frame)? {
        Some(label) => Tag::with_payload(ITEM, label),
        None => Tag::new(ITEM),
    };
    Ok(Node::marker(Marker::Tag(tag)))
}

fn item_outside_list(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    Err(stream
        .failure(SyntaxError::Custom(
            "\\item found outside itemize, enumerate or description".to_string(),
        ))
        .into())
}

fn begin_list(
    _: &mut Engine,
    _: &mut dyn Stream,
    frame: &Frame<'_>,
) -> Result<(CharEnv, MacroEnv)> {
    let macros = frame.macros.extend(HashMap::from([
        (ITEM.to_string(), Binding::Macro(handler(item))),
        (IN_LIST.to_string(), Binding::Flag(true)),
    ]));
    Ok((frame.chars.clone(), macros))
}

fn is_blank(node: &Node) -> bool {
    node.is_empty()
        || node.is_marker(&Marker::Paragraph)
        || node.as_literal().is_some_and(|text| text.trim().is_empty())
}

/// Split the body at its item markers. Text between two items is
/// paragraph-rendered once evaluated.
fn end_list(kind: ListKind, scope: BlockScope, body: Node) -> Result<Node> {
    let fail = |message: String| -> hm::Error {
        ParseError::new(SyntaxError::Custom(message), scope.position.clone()).into()
    };
    let items = match &body {
        Node::Sequence(items) => items.as_slice(),
        other => std::slice::from_ref(other),
    };

    let mut out = Node::text(format!("<{}>", kind.outer));
    let mut current: Option<Node> = None;
    for node in items {
        let label = node
            .as_tag()
            .filter(|tag| tag.name == ITEM)
            .map(|tag| tag.payload.as_deref().cloned());
        match (label, current.take()) {
            (Some(label), None) => {
                out = out + kind.open(label);
                current = Some(Node::empty());
            }
            (Some(label), Some(text)) => {
                out = out + paragraphs::deferred(text) + kind.close() + kind.open(label);
                current = Some(Node::empty());
            }
            (None, Some(text)) => current = Some(text + node.clone()),
            (None, None) if is_blank(node) => {}
            (None, None) => {
                return Err(fail(format!("{} must start with \\item", kind.name)));
            }
        }
    }
    match current {
        Some(text) => out = out + paragraphs::deferred(text) + kind.close() + Node::text("\n"),
        None => return Err(fail(format!("{} has no \\item", kind.name))),
    }
    out = out + Node::text(format!("</{}>\n", kind.outer));
    Ok(Node::marker(Marker::Paragraph) + Node::marker(Marker::InhibitParagraph) + out)
}

pub(crate) fn install(engine: &mut Engine) {
    engine.register_macro("item", handler(item_outside_list));
    for kind in [ITEMIZE, ENUMERATE, DESCRIPTION] {
        engine.register_block(kind.name, begin_list, move |_, scope, body| {
            end_list(kind, scope, body)
        });
    }
}
