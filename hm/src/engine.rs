use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use crate::ambient::{FLUID_KEYS, INPUT_DIR, OUTPUT_DIR, OUTPUT_ROOT};
use crate::config::{Config, Outcome};
use crate::counter::Counters;
use crate::environment::{Binding, CharEnv, MacroEnv};
use crate::error::{DiagnosticError, Error, ParseError, Result, RuntimeError, SyntaxError};
use crate::node::{Bindings, Node};
use crate::paths::normalize;
use crate::references::{ReferenceTable, References};
use crate::stream::{FileStream, Position, Stream, StringStream};
use crate::{builtins, lexer, references};

/// Reads one construct from the stream. Character handlers are chosen by the
/// next character, macro handlers by the escape name that precedes them.
pub type Handler = Rc<dyn Fn(&mut Engine, &mut dyn Stream, &Frame<'_>) -> Result<Node>>;

/// Called right after `\begin{name}`; returns the environments the block body
/// is read in.
pub type BeginHandler =
    Rc<dyn Fn(&mut Engine, &mut dyn Stream, &Frame<'_>) -> Result<(CharEnv, MacroEnv)>>;

/// Called with the block body once `\end{name}` is read.
pub type EndHandler = Rc<dyn Fn(&mut Engine, BlockScope, Node) -> Result<Node>>;

pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut Engine, &mut dyn Stream, &Frame<'_>) -> Result<Node> + 'static,
{
    Rc::new(f)
}

/// A macro that reads `count` arguments and combines them with `build`.
pub fn with_arguments<F>(count: usize, build: F) -> Handler
where
    F: Fn(Vec<Node>) -> Node + 'static,
{
    handler(move |engine, stream, frame| {
        let mut arguments = Vec::with_capacity(count);
        for _ in 0..count {
            arguments.push(engine.parse_argument(stream, frame, "argument")?);
        }
        Ok(build(arguments))
    })
}

/// The environments a handler is invoked in.
#[derive(Clone, Copy)]
pub struct Frame<'a> {
    pub chars: &'a CharEnv,
    pub macros: &'a MacroEnv,
    /// Names of the blocks and groups enclosing the current position,
    /// innermost last. Braces appear as `{`, brackets as `[`.
    pub open: &'a [String],
}

impl<'a> Frame<'a> {
    pub fn new(chars: &'a CharEnv, macros: &'a MacroEnv, open: &'a [String]) -> Self {
        Frame {
            chars,
            macros,
            open,
        }
    }

    pub fn with_chars<'b>(&self, chars: &'b CharEnv) -> Frame<'b>
    where
        'a: 'b,
    {
        Frame {
            chars,
            macros: self.macros,
            open: self.open,
        }
    }

    pub fn with_macros<'b>(&self, macros: &'b MacroEnv) -> Frame<'b>
    where
        'a: 'b,
    {
        Frame {
            chars: self.chars,
            macros,
            open: self.open,
        }
    }

    pub fn with_open<'b>(&self, open: &'b [String]) -> Frame<'b>
    where
        'a: 'b,
    {
        Frame {
            chars: self.chars,
            macros: self.macros,
            open,
        }
    }

    /// The open-block list with `name` pushed onto it.
    pub fn opened(&self, name: &str) -> Vec<String> {
        let mut open = self.open.to_vec();
        open.push(name.to_string());
        open
    }
}

/// What an end handler receives besides the body.
pub struct BlockScope {
    /// The environments the body was read in.
    pub chars: CharEnv,
    pub macros: MacroEnv,
    /// The macro environment in force at `\begin`.
    pub outer: MacroEnv,
    pub position: Position,
}

#[derive(Clone)]
struct Block {
    begin: BeginHandler,
    end: EndHandler,
}

/// Parser and evaluator state for one compilation run.
pub struct Engine {
    chars: CharEnv,
    macros: MacroEnv,
    blocks: HashMap<String, Block>,
    counters: Counters,
    references: References,
    /// Output files written so far in this run.
    pages: HashSet<PathBuf>,
    diagnostics: Vec<DiagnosticError>,
    /// Global macro bindings as they stood before the first run; every run
    /// starts from these.
    installed: Option<HashMap<String, Binding>>,
    log: Box<dyn Write>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    /// An engine with the core handlers installed, logging to stderr.
    pub fn new() -> Self {
        let root = CharEnv::root(Some(handler(lexer::text)));
        let mut engine = Engine {
            chars: root.child(),
            macros: MacroEnv::root(None).child(),
            blocks: HashMap::new(),
            counters: Counters::new(),
            references: References::default(),
            pages: HashSet::new(),
            diagnostics: Vec::new(),
            installed: None,
            log: Box::new(io::stderr()),
        };
        engine.set_global(FLUID_KEYS, Binding::Names(Vec::new()));
        engine.set_global(INPUT_DIR, Binding::Path(PathBuf::from(".")));
        engine.set_global(OUTPUT_ROOT, Binding::Path(PathBuf::from(".")));
        engine.set_global(OUTPUT_DIR, Binding::Path(PathBuf::from(".")));
        lexer::install(&mut engine);
        builtins::install(&mut engine);
        references::install(&mut engine);
        engine
    }

    pub fn with_log(mut self, log: Box<dyn Write>) -> Self {
        self.log = log;
        self
    }

    pub fn with_previous_references(mut self, previous: ReferenceTable) -> Self {
        self.references = References::new(previous);
        self
    }

    // The global scopes are children of their roots, so setting never fails.

    pub fn register_char(&mut self, key: Option<char>, handler: Handler) {
        let _ = self.chars.set(key, handler);
    }

    pub fn register_macro(&mut self, name: &str, handler: Handler) {
        let _ = self.macros.set(name.to_string(), Binding::Macro(handler));
    }

    pub fn set_global(&mut self, key: &str, value: Binding) {
        let _ = self.macros.set(key.to_string(), value);
    }

    pub fn register_block<B, E>(&mut self, name: &str, begin: B, end: E)
    where
        B: Fn(&mut Engine, &mut dyn Stream, &Frame<'_>) -> Result<(CharEnv, MacroEnv)> + 'static,
        E: Fn(&mut Engine, BlockScope, Node) -> Result<Node> + 'static,
    {
        self.blocks.insert(
            name.to_string(),
            Block {
                begin: Rc::new(begin),
                end: Rc::new(end),
            },
        );
    }

    pub fn block(&self, name: &str) -> Option<(BeginHandler, EndHandler)> {
        self.blocks
            .get(name)
            .map(|block| (block.begin.clone(), block.end.clone()))
    }

    /// Mark a global key as saved and restored around every `\include`.
    pub fn add_fluid_key(&mut self, key: &str) {
        let mut keys = self.macros.names(FLUID_KEYS);
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
            self.set_global(FLUID_KEYS, Binding::Names(keys));
        }
    }

    pub fn global_chars(&self) -> &CharEnv {
        &self.chars
    }

    pub fn global_macros(&self) -> &MacroEnv {
        &self.macros
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    pub fn references(&self) -> &References {
        &self.references
    }

    pub fn references_mut(&mut self) -> &mut References {
        &mut self.references
    }

    pub fn log(&mut self, message: &str) {
        let _ = writeln!(self.log, "{}", message);
    }

    pub fn warn(&mut self, message: impl Into<String>, position: Option<Position>) {
        self.diagnostics
            .push(DiagnosticError::warning(message.into(), position));
    }

    pub fn diagnostics(&self) -> &[DiagnosticError] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<DiagnosticError> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Record that `path` is written by this run; each path may be written once.
    pub fn claim_output_path(&mut self, path: &Path) -> Result<(), RuntimeError> {
        if !self.pages.insert(path.to_path_buf()) {
            return Err(RuntimeError::DuplicateOutputPath(path.to_path_buf()));
        }
        Ok(())
    }

    /// Read one construct, dispatching on the next character.
    pub fn parse_one(&mut self, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
        let key = stream.peek();
        match frame.chars.get(&key) {
            Some(handler) => handler(self, stream, frame),
            None => Err(stream
                .failure(SyntaxError::Custom(format!("no reader for {:?}", key)))
                .into()),
        }
    }

    /// Read one construct as the argument of a macro.
    pub fn parse_argument(
        &mut self,
        stream: &mut dyn Stream,
        frame: &Frame<'_>,
        what: &str,
    ) -> Result<Node> {
        if stream.peek().is_none() {
            return Err(stream
                .failure(SyntaxError::MissingArgument(what.to_string()))
                .into());
        }
        self.parse_one(stream, frame)
    }

    /// Read everything up to the end of the stream without evaluating it.
    pub fn parse_all(&mut self, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
        let mut out = Node::empty();
        while stream.peek().is_some() {
            out = out.concat(self.parse_one(stream, frame)?);
        }
        Ok(out)
    }

    /// Read an optional `[...]` argument. Returns `None` unless the next
    /// character is `[`.
    pub fn read_bracket_args(
        &mut self,
        stream: &mut dyn Stream,
        frame: &Frame<'_>,
    ) -> Result<Option<Node>> {
        if stream.peek() != Some('[') {
            return Ok(None);
        }
        let start = stream.position();
        stream.read();
        let open = frame.opened("[");
        let inner = frame.with_open(&open);
        let mut out = Node::empty();
        loop {
            match stream.peek() {
                Some(']') => {
                    stream.read();
                    return Ok(Some(if out.is_empty() { Node::text("") } else { out }));
                }
                None => {
                    return Err(ParseError::new(SyntaxError::UnmatchedBracket, start).into());
                }
                Some(_) => out = out.concat(self.parse_one(stream, &inner)?),
            }
        }
    }

    /// Evaluate `node` and require plain text.
    pub fn static_text(&mut self, node: &Node, bindings: &Bindings, what: &str) -> Result<String> {
        match node.evaluate(self, bindings)? {
            Node::Literal(text) => Ok(text),
            Node::Sequence(items) if items.is_empty() => Ok(String::new()),
            _ => Err(RuntimeError::NotStatic(what.to_string()).into()),
        }
    }

    /// Like [`Engine::static_text`] but at parse time, reporting a syntax error
    /// at `position`.
    pub fn parse_static(&mut self, node: &Node, what: &str, position: &Position) -> Result<String> {
        self.static_text(node, &Bindings::new(), what)
            .map_err(|_| {
                Error::from(ParseError::new(
                    SyntaxError::NotStatic(what.to_string()),
                    position.clone(),
                ))
            })
    }

    pub fn evaluate(&mut self, node: &Node) -> Result<Node> {
        node.evaluate(self, &Bindings::new())
    }

    /// Parse and evaluate the stream one top-level construct at a time, so that
    /// definitions take effect before the text after them is read.
    pub fn compile_stream(&mut self, stream: &mut dyn Stream) -> Result<Node> {
        let chars = self.chars.clone();
        let macros = self.macros.clone();
        let frame = Frame::new(&chars, &macros, &[]);
        let bindings = Bindings::new();
        let mut out = Node::empty();
        while stream.peek().is_some() {
            let node = self.parse_one(stream, &frame)?;
            out = out.concat(node.evaluate(self, &bindings)?);
        }
        Ok(out)
    }

    pub fn compile_source(&mut self, name: &str, text: &str) -> Result<Node> {
        let mut stream = StringStream::with_name(name, text);
        self.compile_stream(&mut stream)
    }

    pub fn compile_str(&mut self, text: &str) -> Result<Node> {
        let mut stream = StringStream::new(text);
        self.compile_stream(&mut stream)
    }

    pub fn compile_file(&mut self, path: &Path) -> Result<Node> {
        let mut stream = FileStream::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RuntimeError::NoSuchFile(path.to_path_buf()),
            _ => RuntimeError::from(e),
        })?;
        let result = self.compile_stream(&mut stream);
        // A read error ends the stream early, so it explains any parse error after it.
        if let Some(error) = stream.take_error() {
            return Err(error.into());
        }
        result
    }

    /// Compile `relative` (resolved against the current input directory) in
    /// place. Fluid keys and the input and output directories are restored
    /// afterwards.
    pub fn include(&mut self, relative: &Path) -> Result<Node> {
        let globals = self.macros.clone();
        let input_dir = globals.path(INPUT_DIR).unwrap_or_default();
        let path = normalize(&input_dir.join(relative));
        if !path.is_file() {
            return Err(RuntimeError::NoSuchFile(path).into());
        }
        let mut keys = globals.names(FLUID_KEYS);
        keys.push(INPUT_DIR.to_string());
        keys.push(OUTPUT_DIR.to_string());
        let saved: Vec<(String, Option<Binding>)> = keys
            .into_iter()
            .map(|key| {
                let value = globals.get(key.as_str());
                (key, value)
            })
            .collect();

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        globals.set(INPUT_DIR.to_string(), Binding::Path(dir))?;
        let result = self.compile_file(&path);

        for (key, value) in saved {
            match value {
                Some(value) => globals.set(key, value)?,
                None => {
                    globals.remove(key.as_str());
                }
            }
        }
        result
    }

    /// Point page output at `dir`, relative to the output root.
    pub fn set_output_dir(&mut self, dir: &str, position: &Position) -> Result<PathBuf> {
        let root = normalize(&self.macros.path(OUTPUT_ROOT).unwrap_or_default());
        let target = normalize(&root.join(dir));
        // An empty root is the working directory; only `..` or an absolute
        // path can leave it.
        let inside = target.strip_prefix(&root).is_ok_and(|rest| {
            matches!(rest.components().next(), None | Some(Component::Normal(_)))
        });
        if !inside {
            return Err(
                ParseError::new(SyntaxError::OutputEscapesRoot(dir.to_string()), position.clone())
                    .into(),
            );
        }
        self.set_global(OUTPUT_DIR, Binding::Path(target.clone()));
        Ok(target)
    }

    /// Set the input directory and output root, both made absolute.
    pub fn configure(&mut self, input_dir: &Path, output_root: &Path) -> Result<()> {
        let input_dir = normalize(&std::path::absolute(input_dir)?);
        let output_root = normalize(&std::path::absolute(output_root)?);
        self.set_global(INPUT_DIR, Binding::Path(input_dir));
        self.set_global(OUTPUT_ROOT, Binding::Path(output_root.clone()));
        self.set_global(OUTPUT_DIR, Binding::Path(output_root));
        Ok(())
    }

    /// One full run: read the previous reference table, compile the input,
    /// write the new table, and report whether another run is needed.
    /// Definitions and other global bindings made by one run are dropped
    /// before the next.
    pub fn compile(&mut self, config: &Config) -> Result<Outcome> {
        let reference_file = config.reference_path();
        self.references = References::new(ReferenceTable::load(&reference_file)?);
        self.counters.reset_all();
        self.pages.clear();
        self.diagnostics.clear();
        let installed = self
            .installed
            .get_or_insert_with(|| self.macros.local_bindings());
        self.macros.reset(installed.clone())?;

        let input_dir = config
            .input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(&config.output_root)?;
        self.configure(input_dir, &config.output_root)?;
        self.compile_file(&config.input)?;

        self.references.current().save(&reference_file)?;
        if self.references.labels_changed() {
            Ok(Outcome::RerunNeeded)
        } else {
            Ok(Outcome::Done)
        }
    }
}
