use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::error::{ParseError, SyntaxError};

/// A source name and a 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub source: String,
    pub line: usize,
}

impl Position {
    pub fn new(source: impl Into<String>, line: usize) -> Self {
        Position {
            source: source.into(),
            line,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.line)
    }
}

/// A character source with one character of lookahead.
///
/// `peek` and `read` return `None` at the end of the input. The line counter
/// advances when a newline is consumed, so a position taken right after
/// reading `'\n'` already points at the following line.
pub trait Stream {
    fn name(&self) -> &str;

    fn line(&self) -> usize;

    fn peek(&mut self) -> Option<char>;

    fn read(&mut self) -> Option<char>;

    fn position(&self) -> Position {
        Position::new(self.name(), self.line())
    }

    fn failure(&self, kind: SyntaxError) -> ParseError {
        ParseError::new(kind, self.position())
    }

    /// Consume characters while `pred` holds, returning them.
    fn read_while_p(&mut self, pred: &dyn Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.read();
            out.push(c);
        }
        out
    }

    /// Consume characters that occur in `chars`.
    fn read_while(&mut self, chars: &str) -> String {
        self.read_while_p(&|c| chars.contains(c))
    }

    /// Consume characters that do not occur in `chars`.
    fn read_while_not(&mut self, chars: &str) -> String {
        self.read_while_p(&|c| !chars.contains(c))
    }
}

/// An in-memory stream.
pub struct StringStream {
    name: String,
    chars: Vec<char>,
    index: usize,
    line: usize,
}

impl StringStream {
    pub fn new(text: &str) -> Self {
        StringStream::with_name("*string*", text)
    }

    pub fn with_name(name: impl Into<String>, text: &str) -> Self {
        StringStream {
            name: name.into(),
            chars: text.chars().collect(),
            index: 0,
            line: 1,
        }
    }
}

impl Stream for StringStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn line(&self) -> usize {
        self.line
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn read(&mut self) -> Option<char> {
        let c = self.chars.get(self.index).copied()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }
}

/// A stream over any buffered reader, decoded one line at a time.
///
/// Read errors end the stream early; they are kept so the caller can
/// report them once parsing stops.
pub struct ReaderStream<R> {
    name: String,
    reader: R,
    buffer: Vec<char>,
    index: usize,
    line: usize,
    error: Option<io::Error>,
}

pub type FileStream = ReaderStream<BufReader<File>>;

impl FileStream {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(ReaderStream::new(
            path.display().to_string(),
            BufReader::new(file),
        ))
    }
}

impl<R: BufRead> ReaderStream<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        ReaderStream {
            name: name.into(),
            reader,
            buffer: Vec::new(),
            index: 0,
            line: 1,
            error: None,
        }
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn fill(&mut self) -> bool {
        if self.index < self.buffer.len() {
            return true;
        }
        if self.error.is_some() {
            return false;
        }
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => false,
            Ok(_) => {
                self.buffer = line.chars().collect();
                self.index = 0;
                true
            }
            Err(error) => {
                self.error = Some(error);
                false
            }
        }
    }
}

impl<R: BufRead> Stream for ReaderStream<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn line(&self) -> usize {
        self.line
    }

    fn peek(&mut self) -> Option<char> {
        if !self.fill() {
            return None;
        }
        self.buffer.get(self.index).copied()
    }

    fn read(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }
}
