//! Fonts, special characters, verbatim text and the prettified grammar
//! used inside pages.

use std::collections::HashMap;

use hm::{
    Binding, BlockScope, CharEnv, Engine, Frame, Handler, Marker, MacroEnv, Node, ParseError,
    Result, RuntimeError, Stream, SyntaxError, handler, with_arguments,
};

use crate::paragraphs::RULE;
use crate::{html_escape, wrap};

const IN_EMPH: &str = "_in_emph";

fn font(tag: &'static str, close: &'static str) -> Handler {
    with_arguments(1, move |mut args| {
        let inner = args.pop().unwrap_or_else(Node::empty);
        wrap(tag, inner, close)
    })
}

/// `\emph` alternates between emphasis and de-emphasis when nested.
fn emph(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let in_emph = frame.macros.flag(IN_EMPH);
    let macros = frame
        .macros
        .extend(HashMap::from([(IN_EMPH.to_string(), Binding::Flag(!in_emph))]));
    let inner = engine.parse_argument(stream, &frame.with_macros(&macros), "emphasized text")?;
    Ok(if in_emph {
        wrap("<SPAN CLASS=\"de_em\">", inner, "</SPAN>")
    } else {
        wrap("<EM>", inner, "</EM>")
    })
}

/// `\'{e}` and friends become `&eacute;` style entities.
fn accent(suffix: &'static str) -> Handler {
    handler(move |engine, stream, frame| {
        let position = stream.position();
        let letter = engine.parse_argument(stream, frame, "accented letter")?;
        Ok(Node::deferred(Some(position), move |engine, bindings| {
            let letter = engine.static_text(&letter, bindings, "accented letter")?;
            match letter.chars().next() {
                Some(c) => Ok(Node::text(format!("&{}{};", c, suffix))),
                None => Err(RuntimeError::NotStatic("accented letter".to_string()).into()),
            }
        }))
    })
}

fn symbol(entity: &'static str) -> Handler {
    handler(move |_, _, _| Ok(Node::text(entity)))
}

/// `\verb|text|`, with any delimiter character.
fn verb(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let delimiter = match stream.read() {
        Some(c) => c,
        None => {
            return Err(ParseError::new(
                SyntaxError::MissingArgument("\\verb delimiter".to_string()),
                position,
            )
            .into());
        }
    };
    let mut out = String::new();
    loop {
        match stream.read() {
            Some(c) if c == delimiter => break,
            Some(c) => out.push(c),
            None => {
                return Err(ParseError::new(
                    SyntaxError::Custom(format!("\\verb has no closing '{}'", delimiter)),
                    position,
                )
                .into());
            }
        }
    }
    Ok(Node::text(format!("<tt>{}</tt>", html_escape(&out))))
}

const END_VERBATIM: &str = "\\end{verbatim}";

fn verbatim_char(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    Ok(match stream.read() {
        Some(c) => Node::text(c.to_string()),
        None => Node::marker(Marker::EndOfFile),
    })
}

/// Inside verbatim, a backslash only matters when it starts `\end{verbatim}`.
fn verbatim_backslash(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    let target: Vec<char> = END_VERBATIM.chars().collect();
    let mut matched = 0;
    while matched < target.len() && stream.peek() == Some(target[matched]) {
        stream.read();
        matched += 1;
    }
    if matched == target.len() {
        Ok(Node::marker(Marker::EndOfEnvironment("verbatim".to_string())))
    } else {
        Ok(Node::text(target[..matched].iter().collect::<String>()))
    }
}

fn begin_verbatim(
    _: &mut Engine,
    _: &mut dyn Stream,
    frame: &Frame<'_>,
) -> Result<(CharEnv, MacroEnv)> {
    let chars = CharEnv::root(Some(handler(verbatim_char)))
        .extend(HashMap::from([(Some('\\'), handler(verbatim_backslash))]));
    Ok((chars, frame.macros.clone()))
}

/// The text after `\begin{verbatim}` up to the end of its line is dropped.
fn end_verbatim(_: &mut Engine, _: BlockScope, body: Node) -> Result<Node> {
    let text = match body {
        Node::Literal(text) => text,
        _ => return Err(RuntimeError::Custom("verbatim body is not plain text".to_string()).into()),
    };
    let rest = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    Ok(Node::text(format!("<pre>{}</pre>", html_escape(rest))))
}

fn same_environments(
    _: &mut Engine,
    _: &mut dyn Stream,
    frame: &Frame<'_>,
) -> Result<(CharEnv, MacroEnv)> {
    Ok((frame.chars.clone(), frame.macros.clone()))
}

fn inhibit() -> Node {
    Node::marker(Marker::InhibitParagraph)
}

fn paragraph() -> Node {
    Node::marker(Marker::Paragraph)
}

fn open_quote(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    stream.read();
    if stream.peek() == Some('`') {
        stream.read();
        return Ok(Node::text("&ldquo;"));
    }
    Ok(Node::text("&lsquo;"))
}

fn close_quote(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    stream.read();
    if stream.peek() == Some('\'') {
        stream.read();
        return Ok(Node::text("&rdquo;"));
    }
    Ok(Node::text("&rsquo;"))
}

fn dash(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    stream.read();
    if stream.peek() != Some('-') {
        return Ok(Node::text("-"));
    }
    stream.read();
    if stream.peek() != Some('-') {
        return Ok(Node::text("&ndash;"));
    }
    stream.read();
    Ok(Node::text("&mdash;"))
}

/// A run of blank lines is a paragraph break; a single newline is kept.
fn newline(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    let space = stream.read_while(" \n");
    if space.matches('\n').count() >= 2 {
        Ok(paragraph())
    } else {
        Ok(Node::text(space))
    }
}

/// The character grammar of page bodies: the global one plus curly quotes,
/// dashes and paragraph breaks.
pub fn pretty_chars(engine: &Engine) -> CharEnv {
    engine.global_chars().extend(HashMap::from([
        (Some('`'), handler(open_quote)),
        (Some('\''), handler(close_quote)),
        (Some('-'), handler(dash)),
        (Some('\n'), handler(newline)),
    ]))
}

pub(crate) fn install(engine: &mut Engine) {
    engine.register_macro("textit", font("<I>", "</I>"));
    engine.register_macro("textbf", font("<B>", "</B>"));
    engine.register_macro("texttt", font("<TT>", "</TT>"));
    engine.register_macro(
        "textsc",
        font(
            "<SPAN STYLE=\"font-variant: small-caps;\" CLASS=\"small-caps\">",
            "</SPAN>",
        ),
    );
    engine.register_macro("emph", handler(emph));
    engine.register_macro("framebox", font("<SPAN CLASS=\"framebox\">", "</SPAN>"));
    engine.register_macro("fbox", font("<SPAN CLASS=\"framebox\">", "</SPAN>"));

    engine.register_macro(
        "\\",
        handler(|_, _, _| Ok(Node::marker(Marker::LineBreak))),
    );
    engine.register_macro("hline", handler(|_, _, _| Ok(Node::tag(RULE))));

    for (name, suffix) in [
        ("`", "grave"),
        ("'", "acute"),
        ("^", "circ"),
        ("\"", "uml"),
        ("~", "tilde"),
        ("r", "ring"),
        ("c", "cedil"),
    ] {
        engine.register_macro(name, accent(suffix));
    }
    engine.register_macro("copyright", symbol("&copy;"));
    engine.register_macro("nbsp", symbol("&nbsp;"));
    engine.register_macro(
        "char",
        with_arguments(1, |mut args| {
            wrap("&", args.pop().unwrap_or_else(Node::empty), ";")
        }),
    );

    engine.register_macro("verb", handler(verb));
    engine.register_block("verbatim", begin_verbatim, end_verbatim);

    engine.register_block("center", same_environments, |_, _, body| {
        Ok(inhibit() + Node::text("<CENTER>") + body + Node::text("</CENTER>\n"))
    });
    engine.register_block("quote", same_environments, |_, _, body| {
        Ok(inhibit() + Node::text("<BLOCKQUOTE>") + paragraph() + body + Node::text("</BLOCKQUOTE>\n"))
    });
    engine.register_block("abstract", same_environments, |_, _, body| {
        Ok(inhibit()
            + Node::text("<DIV CLASS=\"abstract\"><DIV CLASS=\"abstractcaption\">Abstract</DIV>")
            + paragraph()
            + body
            + Node::text("</DIV>\n"))
    });
}
