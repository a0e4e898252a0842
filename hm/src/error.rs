use std::fmt;
use std::path::PathBuf;

use codespan_reporting::diagnostic::{Diagnostic, Label};

use crate::stream::Position;

/// The ways the character-level reader can reject its input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxError {
    #[error("missing closing brace for '{{'")]
    UnmatchedBrace,
    #[error("closing brace '}}' without an opening brace")]
    UnexpectedCloseBrace,
    #[error("missing closing bracket for '['")]
    UnmatchedBracket,
    #[error("no such escape '\\{0}'")]
    UndefinedMacro(String),
    #[error("end of file reached while reading an escape name")]
    MissingMacroName,
    #[error("end of file reached while reading the {0}")]
    MissingArgument(String),
    #[error("no such environment '{0}'")]
    UnknownEnvironment(String),
    #[error("environment '{open}' cannot be closed by '{close}'")]
    MismatchedEnd { open: String, close: String },
    #[error("no environment to end with '{0}'")]
    NothingToEnd(String),
    #[error("environment '{0}' has no end")]
    UnterminatedEnvironment(String),
    #[error("the {0} must be plain text")]
    NotStatic(String),
    #[error("output directory '{0}' lies outside the output root")]
    OutputEscapesRoot(String),
    #[error("{0}")]
    Custom(String),
}

/// A syntax error together with the place in the input where it was found.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{position}: {kind}")]
pub struct ParseError {
    pub kind: SyntaxError,
    pub position: Position,
    pub notes: Vec<String>,
}

impl ParseError {
    pub fn new(kind: SyntaxError, position: Position) -> Self {
        ParseError {
            kind,
            position,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("no binding for variable '{0}'")]
    UnboundVariable(String),
    #[error("label '{0}' does not follow a page, section or figure")]
    DanglingLabel(String),
    #[error("two pages have the same output path {}", .0.display())]
    DuplicateOutputPath(PathBuf),
    #[error("{context} has no {field}")]
    MissingRequiredField { field: String, context: String },
    #[error("{program} failed on {}: {status}", .input.display())]
    AssetConversionFailed {
        program: String,
        input: PathBuf,
        status: String,
    },
    #[error("the {0} given to \\def must be plain text")]
    DefMustBeStatic(String),
    #[error("the {0} must be plain text")]
    NotStatic(String),
    #[error("no such file {}", .0.display())]
    NoSuchFile(PathBuf),
    #[error("no such counter '{0}'")]
    UnknownCounter(String),
    #[error("the default environment cannot be modified")]
    ImmutableRoot,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("{0}")]
    Custom(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(error: std::io::Error) -> Self {
        RuntimeError::Io(error.to_string())
    }
}

/// A runtime error or warning enriched with source location information.
#[derive(Debug, Clone)]
pub struct DiagnosticError {
    pub error: RuntimeError,
    pub position: Option<Position>,
    pub is_warning: bool,
}

impl DiagnosticError {
    /// Create a warning diagnostic at an optional source position.
    pub fn warning(message: String, position: Option<Position>) -> Self {
        DiagnosticError {
            error: RuntimeError::Custom(message),
            position,
            is_warning: true,
        }
    }

    pub fn at(error: RuntimeError, position: Position) -> Self {
        DiagnosticError {
            error,
            position: Some(position),
            is_warning: false,
        }
    }
}

impl From<RuntimeError> for DiagnosticError {
    fn from(error: RuntimeError) -> Self {
        DiagnosticError {
            error,
            position: None,
            is_warning: false,
        }
    }
}

impl fmt::Display for DiagnosticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(position) => write!(f, "{}: {}", position, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for DiagnosticError {}

/// Anything that can stop a compilation run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] DiagnosticError),
}

impl From<RuntimeError> for Error {
    fn from(error: RuntimeError) -> Self {
        Error::Runtime(DiagnosticError::from(error))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::from(RuntimeError::from(error))
    }
}

impl Error {
    /// Attach a position to a runtime error that does not carry one yet.
    pub fn located(self, position: Option<&Position>) -> Self {
        match (self, position) {
            (Error::Runtime(mut diagnostic), Some(position)) if diagnostic.position.is_none() => {
                diagnostic.position = Some(position.clone());
                Error::Runtime(diagnostic)
            }
            (error, _) => error,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            Error::Parse(error) => Some(&error.position),
            Error::Runtime(diagnostic) => diagnostic.position.as_ref(),
        }
    }

    /// The message without its location prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Parse(error) => error.kind.to_string(),
            Error::Runtime(diagnostic) => diagnostic.error.to_string(),
        }
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, Error::Parse(_))
    }

    /// Convert to a codespan diagnostic, labelling `span` in `file_id` when one is known.
    pub fn to_diagnostic(
        &self,
        file_id: usize,
        span: Option<std::ops::Range<usize>>,
    ) -> Diagnostic<usize> {
        let mut diagnostic = Diagnostic::error().with_message(self.message());
        if let Some(span) = span {
            let label = match self {
                Error::Parse(_) => "here",
                Error::Runtime(_) => "while evaluating this",
            };
            diagnostic = diagnostic.with_labels(vec![Label::primary(file_id, span).with_message(label)]);
        }
        if let Error::Parse(error) = self {
            diagnostic = diagnostic.with_notes(error.notes.clone());
        }
        diagnostic
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
