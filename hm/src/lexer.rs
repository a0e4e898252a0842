//! Character handlers of the global environment.

use crate::engine::{Engine, Frame, handler};
use crate::error::{ParseError, Result, SyntaxError};
use crate::node::{Marker, Node};
use crate::stream::Stream;

/// Read a run of characters that no handler in the current environment claims.
pub fn text(_: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let bound = frame.chars.bound_keys();
    let first = match stream.read() {
        Some(c) => c,
        None => return Ok(Node::marker(Marker::EndOfFile)),
    };
    let mut out = first.to_string();
    out.push_str(&stream.read_while_p(&|c| !bound.contains(&Some(c))));
    Ok(Node::Literal(out))
}

fn end_of_file(_: &mut Engine, _: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    Ok(Node::marker(Marker::EndOfFile))
}

fn comment(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    stream.read_while_not("\n");
    Ok(Node::text(""))
}

/// `\name` with a run of letters, or `\c` with any single other character.
/// A multi-letter name swallows the spaces after it.
fn escape(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    stream.read();
    let letters = stream.read_while_p(&|c| c.is_ascii_alphabetic());
    let (name, multi_letter) = if letters.is_empty() {
        match stream.read() {
            Some(c) => (c.to_string(), false),
            None => return Err(ParseError::new(SyntaxError::MissingMacroName, position).into()),
        }
    } else {
        (letters, true)
    };
    let handler = frame.macros.handler(&name).ok_or_else(|| {
        ParseError::new(SyntaxError::UndefinedMacro(name.clone()), position.clone())
    })?;
    if multi_letter {
        stream.read_while(" ");
    }
    handler(engine, stream, frame)
}

/// A `{...}` group. The content is concatenated; `{}` reads as empty text.
fn open_brace(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let start = stream.position();
    stream.read();
    let open = frame.opened("{");
    let inner = frame.with_open(&open);
    let mut out = Node::empty();
    loop {
        match stream.peek() {
            Some('}') => {
                stream.read();
                return Ok(if out.is_empty() { Node::text("") } else { out });
            }
            None => return Err(ParseError::new(SyntaxError::UnmatchedBrace, start).into()),
            Some(_) => out = out.concat(engine.parse_one(stream, &inner)?),
        }
    }
}

fn close_brace(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    Err(stream.failure(SyntaxError::UnexpectedCloseBrace).into())
}

/// Outside a bracket argument `]` is ordinary text.
fn close_bracket(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    stream.read();
    Ok(Node::text("]"))
}

pub(crate) fn install(engine: &mut Engine) {
    engine.register_char(None, handler(end_of_file));
    engine.register_char(Some('%'), handler(comment));
    engine.register_char(Some('\\'), handler(escape));
    engine.register_char(Some('{'), handler(open_brace));
    engine.register_char(Some('}'), handler(close_brace));
    engine.register_char(Some(']'), handler(close_bracket));
}
