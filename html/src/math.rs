//! Math mode: `$...$` and the `equation*` block.
//!
//! The math grammar turns letters into variables and symbols into tagged
//! atoms; rendering spaces the atoms by their class once the formula has
//! been evaluated.

use std::collections::HashMap;
use std::slice;

use hm::{
    BlockScope, CharEnv, Engine, Frame, Handler, MacroEnv, Marker, Node, ParseError, Result,
    RuntimeError, Stream, SyntaxError, Tag, handler,
};

/// A binary operator, rendered as a prefix when nothing precedes it.
const BIN: &str = "math_bin";
/// A relation, with wide spaces on both sides.
const REL: &str = "math_rel";
/// A named operator such as `sin`.
const OP: &str = "math_op";
/// The start of a group: what follows counts as leading.
const GROUP: &str = "math_group";
const SUP: &str = "math_sup";
const SUB: &str = "math_sub";

const LOWER_GREEK: &[&str] = &[
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
    "lambda", "mu", "nu", "xi", "pi", "rho", "sigma", "tau", "upsilon", "phi", "chi", "psi",
    "omega",
];

const UPPER_GREEK: &[&str] = &[
    "Gamma", "Delta", "Lambda", "Phi", "Pi", "Psi", "Sigma", "Theta", "Upsilon", "Xi", "Omega",
];

const OPERATORS: &[(&str, &str)] = &[
    ("arccos", "arccos"),
    ("arcsin", "arcsin"),
    ("arctan", "arctan"),
    ("arg", "arg"),
    ("cos", "cos"),
    ("cosh", "cosh"),
    ("cot", "cot"),
    ("coth", "coth"),
    ("csc", "csc"),
    ("deg", "deg"),
    ("det", "det"),
    ("dim", "dim"),
    ("exp", "exp"),
    ("gcd", "gcd"),
    ("hom", "hom"),
    ("inf", "inf"),
    ("injlim", "inj&thinsp;lim"),
    ("ker", "ker"),
    ("lg", "lg"),
    ("lim", "lim"),
    ("liminf", "lim&thinsp;inf"),
    ("limsup", "lim&thinsp;sup"),
    ("ln", "ln"),
    ("log", "log"),
    ("max", "max"),
    ("min", "min"),
    ("Pr", "Pr"),
    ("projlim", "proj&thinsp;lim"),
    ("sec", "sec"),
    ("sin", "sin"),
    ("sinh", "sinh"),
    ("sup", "sup"),
    ("tan", "tan"),
    ("tanh", "tanh"),
];

const BIN_SYMBOLS: &[(char, &str)] = &[('+', "+"), ('-', "&minus;"), ('*', "*")];

const BIN_MACROS: &[(&str, &str)] = &[
    ("cdot", "&sdot;"),
    ("times", "&times;"),
    ("pm", "&plusmn;"),
    ("cup", "&cup;"),
    ("cap", "&cap;"),
];

const REL_SYMBOLS: &[(char, &str)] = &[('=', "="), ('<', "&lt;"), ('>', "&gt;"), (':', ":")];

const REL_MACROS: &[(&str, &str)] = &[
    ("leq", "&le;"),
    ("geq", "&ge;"),
    ("neq", "&ne;"),
    ("equiv", "&equiv;"),
    ("approx", "&asymp;"),
    ("in", "&isin;"),
    ("subset", "&sub;"),
    ("supset", "&sup;"),
    ("to", "&rarr;"),
    ("rightarrow", "&rarr;"),
    ("leftarrow", "&larr;"),
    ("botharrow", "&harr;"),
];

const SYMBOL_MACROS: &[(&str, &str)] = &[
    ("circ", "&deg;"),
    ("infty", "&infin;"),
    ("qed", "&#x220e;"),
];

const BLACKBOARD: &[(char, &str)] = &[
    ('R', "&#8477;"),
    ('C', "&#8450;"),
    ('N', "&#8469;"),
    ('P', "&#8473;"),
    ('Q', "&#8474;"),
    ('Z', "&#8484;"),
];

fn atom(kind: &'static str, text: &str) -> Node {
    Node::marker(Marker::Tag(Tag::with_payload(kind, Node::text(text))))
}

/// A handler for a single character that reads it and yields `node`.
fn character(node: Node) -> Handler {
    handler(move |_, stream, _| {
        stream.read();
        Ok(node.clone())
    })
}

/// A macro handler that yields `node`.
fn constant(node: Node) -> Handler {
    handler(move |_, _, _| Ok(node.clone()))
}

/// Render an evaluated formula to HTML.
pub fn render(node: &Node) -> Result<String, RuntimeError> {
    let items = match node {
        Node::Sequence(items) => items.as_slice(),
        other => slice::from_ref(other),
    };
    let mut out = String::new();
    let mut leading = true;
    for item in items {
        match item {
            Node::Literal(text) => out.push_str(text),
            Node::Marker(Marker::Tag(tag)) => {
                if tag.name == GROUP {
                    leading = true;
                    continue;
                }
                let inner = match tag.payload.as_deref() {
                    Some(payload) => render(payload)?,
                    None => String::new(),
                };
                match tag.name {
                    BIN if leading => out.push_str(&inner),
                    BIN => out.push_str(&format!(" {} ", inner)),
                    REL => out.push_str(&format!("&ensp;{}&ensp;", inner)),
                    OP => out.push_str(&format!("{} ", inner)),
                    SUP => out.push_str(&format!("<sup>{}</sup>", inner)),
                    SUB => out.push_str(&format!("<sub>{}</sub>", inner)),
                    other => {
                        return Err(RuntimeError::Custom(format!(
                            "'{}' cannot appear in math mode",
                            other
                        )));
                    }
                }
            }
            Node::Sequence(items) if items.is_empty() => continue,
            other => {
                return Err(RuntimeError::Custom(format!(
                    "{:?} cannot appear in math mode",
                    other
                )));
            }
        }
        leading = false;
    }
    Ok(out)
}

/// Evaluate `node` and render it as math.
fn deferred_render(node: Node) -> Node {
    Node::deferred(None, move |engine, bindings| {
        let evaluated = node.evaluate(engine, bindings)?;
        Ok(Node::text(render(&evaluated)?))
    })
}

/// `^` and `_` take the next construct as a script. The script is evaluated
/// before it is tagged, since tags are not evaluated further.
fn script(kind: &'static str) -> Handler {
    handler(move |engine, stream, frame| {
        let position = stream.position();
        stream.read();
        let inner = engine.parse_argument(stream, frame, "script")?;
        Ok(Node::deferred(Some(position), move |engine, bindings| {
            let inner = inner.evaluate(engine, bindings)?;
            Ok(Node::marker(Marker::Tag(Tag::with_payload(kind, inner))))
        }))
    })
}

/// In math a group starts afresh, so a leading `-` is a sign.
fn math_brace(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let brace = engine
        .global_chars()
        .get(&Some('{'))
        .ok_or_else(|| stream.failure(SyntaxError::Custom("no reader for '{'".to_string())))?;
    Ok(Node::tag(GROUP) + brace(engine, stream, frame)?)
}

fn opening(delimiter: &'static str) -> Handler {
    character(Node::text(delimiter) + Node::tag(GROUP))
}

/// `\frac{numerator}{denominator}`, stacked in a small table.
fn frac(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let numerator = engine.parse_argument(stream, frame, "numerator")?;
    let denominator = engine.parse_argument(stream, frame, "denominator")?;
    Ok(Node::text("<TABLE CLASS=\"mathfrac\"><TR CLASS=\"mathfracnum\"><TD>")
        + Node::tag(GROUP)
        + numerator
        + Node::text("</TD></TR><TR><TD>")
        + Node::tag(GROUP)
        + denominator
        + Node::text("</TD></TR></TABLE>"))
}

/// Read one construct with the letters rendered by `letter`.
fn font(letter: fn(char) -> Option<String>) -> Handler {
    handler(move |engine, stream, frame| {
        let letters: HashMap<Option<char>, Handler> = ('a'..='z')
            .chain('A'..='Z')
            .filter_map(|c| letter(c).map(|text| (Some(c), character(Node::text(text)))))
            .collect();
        let chars = frame.chars.extend(letters);
        engine.parse_argument(stream, &frame.with_chars(&chars), "math text")
    })
}

/// `$...$`: everything up to the next unnested `$` is a formula.
fn inline_math(
    engine: &mut Engine,
    stream: &mut dyn Stream,
    frame: &Frame<'_>,
    math: &CharEnv,
) -> Result<Node> {
    let start = stream.position();
    stream.read();
    if stream.peek() == Some('$') {
        return Err(ParseError::new(SyntaxError::Custom("math mode '$$' is empty".to_string()), start).into());
    }
    let open = frame.opened("$");
    let inner = Frame::new(math, frame.macros, &open);
    let mut out = Node::empty();
    loop {
        match stream.peek() {
            Some('$') => break,
            None => {
                return Err(ParseError::new(
                    SyntaxError::Custom("missing closing '$' for math mode".to_string()),
                    start,
                )
                .into());
            }
            Some(_) => out = out.concat(engine.parse_one(stream, &inner)?),
        }
    }
    stream.read();
    Ok(deferred_render(out))
}

fn math_chars(engine: &Engine) -> CharEnv {
    let mut chars: HashMap<Option<char>, Handler> = HashMap::new();
    for c in [' ', '\t', '\n'] {
        chars.insert(Some(c), character(Node::empty()));
    }
    for c in ('a'..='z').chain('A'..='Z') {
        chars.insert(Some(c), character(Node::text(format!("<var>{}</var>", c))));
    }
    for c in '0'..='9' {
        chars.insert(Some(c), character(Node::text(c.to_string())));
    }
    for (c, text) in BIN_SYMBOLS {
        chars.insert(Some(*c), character(atom(BIN, text)));
    }
    for (c, text) in REL_SYMBOLS {
        chars.insert(Some(*c), character(atom(REL, text)));
    }
    chars.insert(Some('\''), character(Node::text("&thinsp;&prime;")));
    chars.insert(Some(','), character(Node::text(",&thinsp;")));
    chars.insert(Some('('), opening("("));
    chars.insert(Some('['), opening("["));
    chars.insert(Some(')'), character(Node::text(")")));
    chars.insert(Some(']'), character(Node::text("]")));
    chars.insert(Some('^'), script(SUP));
    chars.insert(Some('_'), script(SUB));
    chars.insert(Some('{'), handler(math_brace));
    engine.global_chars().extend(chars)
}

fn math_block(
    math: CharEnv,
) -> impl Fn(&mut Engine, &mut dyn Stream, &Frame<'_>) -> Result<(CharEnv, MacroEnv)> {
    move |_, _, frame| Ok((math.clone(), frame.macros.clone()))
}

fn end_equation(_: &mut Engine, _: BlockScope, body: Node) -> Result<Node> {
    Ok(Node::marker(Marker::Paragraph)
        + Node::marker(Marker::InhibitParagraph)
        + Node::text("<CENTER>")
        + deferred_render(body)
        + Node::text("</CENTER>\n")
        + Node::marker(Marker::Paragraph))
}

pub(crate) fn install(engine: &mut Engine) {
    let math = math_chars(engine);
    let inline = math.clone();
    engine.register_char(
        Some('$'),
        handler(move |engine, stream, frame| inline_math(engine, stream, frame, &inline)),
    );
    engine.register_macro("$", constant(Node::text("$")));
    engine.register_block("equation*", math_block(math), end_equation);

    for name in LOWER_GREEK {
        engine.register_macro(name, constant(Node::text(format!("<var>&{};</var>", name))));
    }
    for name in UPPER_GREEK {
        engine.register_macro(name, constant(Node::text(format!("&{};", name))));
    }
    for (name, text) in SYMBOL_MACROS {
        engine.register_macro(name, constant(Node::text(*text)));
    }
    for (name, text) in OPERATORS {
        engine.register_macro(name, constant(atom(OP, text)));
    }
    for (name, text) in BIN_MACROS {
        engine.register_macro(name, constant(atom(BIN, text)));
    }
    for (name, text) in REL_MACROS {
        engine.register_macro(name, constant(atom(REL, text)));
    }
    engine.register_macro("frac", handler(frac));

    engine.register_macro(" ", constant(Node::text(" ")));
    engine.register_macro(",", constant(Node::text("&#8202;")));
    engine.register_macro("thinspace", constant(Node::text("&#8202;")));
    engine.register_macro(":", constant(Node::text("&thinsp;")));
    engine.register_macro("midspace", constant(Node::text("&thinsp;")));
    engine.register_macro("quad", constant(Node::text("&nbsp;&nbsp;&nbsp;&nbsp;")));

    engine.register_macro("text", font(|c| Some(c.to_string())));
    engine.register_macro("mathrm", font(|c| Some(c.to_string())));
    engine.register_macro("mathbf", font(|c| Some(format!("<b>{}</b>", c))));
    engine.register_macro("mathit", font(|c| Some(format!("<i>{}</i>", c))));
    engine.register_macro(
        "mathbb",
        font(|c| {
            BLACKBOARD
                .iter()
                .find(|(letter, _)| *letter == c)
                .map(|(_, entity)| entity.to_string())
        }),
    );
}

