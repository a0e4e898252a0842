use std::collections::HashMap;
use std::fmt;
use std::ops::Add;
use std::rc::Rc;

use crate::engine::Engine;
use crate::error::{DiagnosticError, Result, RuntimeError};
use crate::stream::Position;

/// Values bound to variable names while a macro body is evaluated.
pub type Bindings = HashMap<String, Node>;

type Thunk = dyn Fn(&mut Engine, &Bindings) -> Result<Node>;

/// The lazy result of parsing.
///
/// Parsing builds a tree of nodes; evaluating it under a set of bindings
/// yields a tree made only of literals, sequences and markers.
#[derive(Clone)]
pub enum Node {
    Literal(String),
    Sequence(Vec<Node>),
    /// A reference to a binding, resolved at evaluation time.
    Variable { name: String, position: Position },
    /// Work postponed to evaluation time. A thunk with side effects, such as
    /// writing a page, must be evaluated only once.
    Deferred(Deferred),
    Marker(Marker),
}

#[derive(Clone)]
pub struct Deferred {
    thunk: Rc<Thunk>,
    position: Option<Position>,
}

/// Control values that carry meaning to the enclosing construct.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    Paragraph,
    InhibitParagraph,
    LineBreak,
    ColumnBreak,
    EndOfFile,
    EndOfEnvironment(String),
    /// A module-specific marker, such as a list item or a horizontal rule.
    Tag(Tag),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: &'static str,
    pub payload: Option<Box<Node>>,
}

impl Tag {
    pub fn new(name: &'static str) -> Self {
        Tag {
            name,
            payload: None,
        }
    }

    pub fn with_payload(name: &'static str, payload: Node) -> Self {
        Tag {
            name,
            payload: Some(Box::new(payload)),
        }
    }
}

impl Node {
    /// The empty sequence, the identity of concatenation.
    pub fn empty() -> Self {
        Node::Sequence(Vec::new())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Node::Literal(text.into())
    }

    pub fn marker(marker: Marker) -> Self {
        Node::Marker(marker)
    }

    pub fn tag(name: &'static str) -> Self {
        Node::Marker(Marker::Tag(Tag::new(name)))
    }

    pub fn deferred<F>(position: Option<Position>, thunk: F) -> Self
    where
        F: Fn(&mut Engine, &Bindings) -> Result<Node> + 'static,
    {
        Node::Deferred(Deferred {
            thunk: Rc::new(thunk),
            position,
        })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Sequence(items) if items.is_empty())
    }

    pub fn is_marker(&self, marker: &Marker) -> bool {
        matches!(self, Node::Marker(m) if m == marker)
    }

    /// The tag carried by this node, if it is a tag marker.
    pub fn as_tag(&self) -> Option<&Tag> {
        match self {
            Node::Marker(Marker::Tag(tag)) => Some(tag),
            _ => None,
        }
    }

    /// Concatenate two nodes: sequences are spliced, adjacent literals merge,
    /// and a result holding a single element collapses to that element.
    pub fn concat(self, other: Node) -> Node {
        let mut items = match self {
            Node::Sequence(items) => items,
            node => vec![node],
        };
        push_flat(&mut items, other);
        if items.len() == 1 {
            if let Some(only) = items.pop() {
                return only;
            }
        }
        Node::Sequence(items)
    }

    /// Concatenate every node of `nodes` in order.
    pub fn join(nodes: impl IntoIterator<Item = Node>) -> Node {
        nodes.into_iter().fold(Node::empty(), Node::concat)
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Node::Literal(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_literal(self) -> Option<String> {
        match self {
            Node::Literal(text) => Some(text),
            _ => None,
        }
    }

    /// All literal text in the tree, ignoring markers.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Literal(text) => out.push_str(text),
            Node::Sequence(items) => items.iter().for_each(|item| item.collect_text(out)),
            _ => {}
        }
    }

    /// True when the tree holds no variables and no deferred work.
    pub fn is_normal(&self) -> bool {
        match self {
            Node::Literal(_) | Node::Marker(_) => true,
            Node::Sequence(items) => items.iter().all(Node::is_normal),
            Node::Variable { .. } | Node::Deferred(_) => false,
        }
    }

    /// Reduce to normal form under `bindings`.
    pub fn evaluate(&self, engine: &mut Engine, bindings: &Bindings) -> Result<Node> {
        match self {
            Node::Literal(_) | Node::Marker(_) => Ok(self.clone()),
            Node::Sequence(items) => {
                let mut out = Node::empty();
                for item in items {
                    out = out.concat(item.evaluate(engine, bindings)?);
                }
                Ok(out)
            }
            Node::Variable { name, position } => match bindings.get(name) {
                Some(value) => Ok(value.clone()),
                None => Err(DiagnosticError::at(
                    RuntimeError::UnboundVariable(name.clone()),
                    position.clone(),
                )
                .into()),
            },
            Node::Deferred(deferred) => {
                let position = deferred.position.as_ref();
                let next = (deferred.thunk)(engine, bindings).map_err(|e| e.located(position))?;
                next.evaluate(engine, bindings)
                    .map_err(|e| e.located(position))
            }
        }
    }
}

fn push_flat(items: &mut Vec<Node>, node: Node) {
    match node {
        Node::Sequence(inner) => {
            for item in inner {
                push_flat(items, item);
            }
        }
        Node::Literal(text) => match items.last_mut() {
            Some(Node::Literal(last)) => last.push_str(&text),
            _ => items.push(Node::Literal(text)),
        },
        node => items.push(node),
    }
}

impl Add for Node {
    type Output = Node;

    fn add(self, other: Node) -> Node {
        self.concat(other)
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::text(text)
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Node::Literal(text)
    }
}

impl FromIterator<Node> for Node {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Node::join(iter)
    }
}

/// Structural equality. Variables and deferred nodes are never equal to
/// anything, since their value is unknown until evaluation.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Literal(a), Node::Literal(b)) => a == b,
            (Node::Sequence(a), Node::Sequence(b)) => a == b,
            (Node::Marker(a), Node::Marker(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Literal(text) => write!(f, "{:?}", text),
            Node::Sequence(items) => f.debug_list().entries(items).finish(),
            Node::Variable { name, .. } => write!(f, "Variable({})", name),
            Node::Deferred(_) => write!(f, "Deferred"),
            Node::Marker(marker) => write!(f, "{:?}", marker),
        }
    }
}
