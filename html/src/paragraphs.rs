use hm::{Engine, Marker, Node, RuntimeError, handler};

/// Tag of the horizontal rule marker produced by `\hline`.
pub const RULE: &str = "hline";

/// Turn paragraph, line-break and rule markers in an evaluated tree into
/// HTML. Text following a paragraph break opens a `<P>` unless an inhibit
/// marker came first; a lone literal is returned unchanged.
pub fn render(node: &Node) -> Result<Node, RuntimeError> {
    let items = match node {
        Node::Literal(_) => return Ok(node.clone()),
        Node::Sequence(items) => items.as_slice(),
        _ => return Ok(Node::text("")),
    };
    let mut out = String::new();
    let mut in_paragraph = false;
    let mut inhibit = false;
    for item in items {
        match item {
            Node::Literal(text) if text.trim().is_empty() => out.push_str(text),
            Node::Literal(text) => {
                if !in_paragraph && !inhibit {
                    in_paragraph = true;
                    out.push_str("<P>");
                }
                inhibit = false;
                out.push_str(text);
            }
            Node::Marker(Marker::LineBreak) => out.push_str("<BR>"),
            Node::Marker(Marker::InhibitParagraph) => inhibit = true,
            Node::Marker(Marker::Paragraph) => {
                if inhibit {
                    inhibit = false;
                } else if in_paragraph {
                    out.push_str("</P>\n\n");
                    in_paragraph = false;
                }
            }
            other if other.as_tag().is_some_and(|tag| tag.name == RULE) => {
                out.push_str("\n<HR>\n")
            }
            other => {
                return Err(RuntimeError::Custom(format!(
                    "cannot render {:?} in running text",
                    other
                )));
            }
        }
    }
    if in_paragraph {
        out.push_str("</P>\n\n");
    }
    Ok(Node::Literal(out))
}

/// Evaluate `node` and render its paragraphs once the result is known.
pub fn deferred(node: Node) -> Node {
    Node::deferred(None, move |engine, bindings| {
        Ok(render(&node.evaluate(engine, bindings)?)?)
    })
}

/// `\par` forces a paragraph break.
pub(crate) fn install(engine: &mut Engine) {
    engine.register_macro(
        "par",
        handler(|_, _, _| Ok(Node::marker(Marker::Paragraph))),
    );
}
