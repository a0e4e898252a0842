//! Macros every document can use: definitions, variables, blocks, includes
//! and escapes for the reserved characters.

use std::path::Path;
use std::rc::Rc;

use crate::engine::{BlockScope, Engine, Frame, Handler, handler};
use crate::error::{ParseError, Result, RuntimeError, SyntaxError};
use crate::node::{Marker, Node};
use crate::stream::Stream;

/// `\def{name}{arg1, arg2, ...}{body}`.
///
/// The definition takes effect when the returned node is evaluated, and is
/// made in the macro environment the `\def` was read in.
fn def(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let name = engine.parse_argument(stream, frame, "macro name")?;
    stream.read_while(" \t\n");
    let formals = engine.parse_argument(stream, frame, "argument list")?;
    stream.read_while(" \t\n");
    let body = engine.parse_argument(stream, frame, "macro body")?;
    let target = frame.macros.clone();
    Ok(Node::deferred(Some(position), move |engine, bindings| {
        let name = match name.evaluate(engine, bindings)? {
            Node::Literal(name) if !name.is_empty() => name,
            _ => return Err(RuntimeError::DefMustBeStatic("name".to_string()).into()),
        };
        let formals: Vec<String> = match formals.evaluate(engine, bindings)? {
            Node::Literal(text) => text
                .split(',')
                .map(str::trim)
                .filter(|formal| !formal.is_empty())
                .map(str::to_string)
                .collect(),
            node if node.is_empty() => Vec::new(),
            _ => return Err(RuntimeError::DefMustBeStatic("argument list".to_string()).into()),
        };
        target.set_macro(&name, user_macro(formals, body.clone()))?;
        Ok(Node::text(""))
    }))
}

/// A macro defined by `\def`. Each call reads one argument per formal and
/// evaluates the body with the caller's bindings extended by the arguments.
fn user_macro(formals: Vec<String>, body: Node) -> Handler {
    let formals: Rc<[String]> = formals.into();
    handler(move |engine, stream, frame| {
        let position = stream.position();
        let mut arguments = Vec::with_capacity(formals.len());
        for formal in formals.iter() {
            let argument = engine.parse_argument(stream, frame, formal)?;
            arguments.push((formal.clone(), argument));
        }
        let body = body.clone();
        Ok(Node::deferred(Some(position), move |engine, bindings| {
            let mut scope = bindings.clone();
            for (formal, argument) in &arguments {
                scope.insert(formal.clone(), argument.evaluate(engine, bindings)?);
            }
            body.evaluate(engine, &scope)
        }))
    })
}

/// `\var{name}`, the value bound to `name` where the expansion is evaluated.
fn var(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let global = engine.global_chars().clone();
    let name = engine.parse_argument(stream, &frame.with_chars(&global), "variable name")?;
    Ok(Node::deferred(Some(position.clone()), move |engine, bindings| {
        let name = engine.static_text(&name, bindings, "variable name")?;
        Ok(Node::Variable {
            name,
            position: position.clone(),
        })
    }))
}

fn include(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let file = engine.parse_argument(stream, frame, "file name")?;
    Ok(Node::deferred(Some(position), move |engine, bindings| {
        let file = engine.static_text(&file, bindings, "file name")?;
        engine.include(Path::new(&file))
    }))
}

/// `\setoutputdir{dir}` takes effect as soon as it is read.
fn set_output_dir(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let dir = engine.parse_argument(stream, frame, "output directory")?;
    let dir = engine.parse_static(&dir, "output directory", &position)?;
    engine.set_output_dir(&dir, &position)?;
    Ok(Node::text(""))
}

/// Read the name argument of `\begin` or `\end`.
fn block_name(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<String> {
    let position = stream.position();
    let global = engine.global_chars().clone();
    let name = engine.parse_argument(stream, &frame.with_chars(&global), "environment name")?;
    engine.parse_static(&name, "environment name", &position)
}

/// `\begin{name} ... \end{name}`.
///
/// The registered begin handler chooses the environments the body is read in;
/// the end handler turns the body into the block's result.
fn begin(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let name = block_name(engine, stream, frame)?;
    let (on_begin, on_end) = engine.block(&name).ok_or_else(|| {
        ParseError::new(SyntaxError::UnknownEnvironment(name.clone()), position.clone())
    })?;
    let (chars, macros) = on_begin(engine, stream, frame)?;
    let open = frame.opened(&name);
    let inner = Frame::new(&chars, &macros, &open);
    let end_marker = Marker::EndOfEnvironment(name.clone());
    let mut body = Node::empty();
    loop {
        if stream.peek().is_none() {
            return Err(
                ParseError::new(SyntaxError::UnterminatedEnvironment(name), position).into(),
            );
        }
        let node = engine.parse_one(stream, &inner)?;
        if node.is_marker(&end_marker) {
            break;
        }
        if node.is_marker(&Marker::EndOfFile) {
            return Err(
                ParseError::new(SyntaxError::UnterminatedEnvironment(name), position).into(),
            );
        }
        body = body.concat(node);
    }
    if body.is_empty() {
        body = Node::text("");
    }
    let scope = BlockScope {
        chars: chars.clone(),
        macros: macros.clone(),
        outer: frame.macros.clone(),
        position,
    };
    on_end(engine, scope, body)
}

/// `\end{name}` closes the innermost open block, which must be `name`.
fn end(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let name = block_name(engine, stream, frame)?;
    match frame.open.last() {
        None => Err(ParseError::new(SyntaxError::NothingToEnd(name), position).into()),
        Some(open) if *open != name => Err(ParseError::new(
            SyntaxError::MismatchedEnd {
                open: open.clone(),
                close: name,
            },
            position,
        )
        .into()),
        Some(_) => Ok(Node::marker(Marker::EndOfEnvironment(name))),
    }
}

fn literal(text: &'static str) -> Handler {
    handler(move |_, _, _| Ok(Node::text(text)))
}

pub(crate) fn install(engine: &mut Engine) {
    engine.register_macro("def", handler(def));
    engine.register_macro("var", handler(var));
    engine.register_macro("include", handler(include));
    engine.register_macro("setoutputdir", handler(set_output_dir));
    engine.register_macro("begin", handler(begin));
    engine.register_macro("end", handler(end));
    for reserved in ["#", "{", "}", "%", "[", "]"] {
        engine.register_macro(reserved, literal(reserved));
    }
}
