pub mod ambient;
mod builtins;
pub mod config;
pub mod counter;
pub mod diagnostic;
pub mod engine;
pub mod environment;
pub mod error;
mod lexer;
pub mod node;
pub mod paths;
pub mod references;
pub mod stream;

pub use config::{Config, Outcome};
pub use diagnostic::SourceMap;
pub use engine::{BlockScope, Engine, Frame, Handler, handler, with_arguments};
pub use environment::{Binding, CharEnv, MacroEnv};
pub use error::{DiagnosticError, Error, ParseError, Result, RuntimeError, SyntaxError};
pub use node::{Bindings, Marker, Node, Tag};
pub use stream::{FileStream, Position, Stream, StringStream};
