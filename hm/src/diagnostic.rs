use std::collections::HashMap;
use std::fs;
use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::{Files, SimpleFiles};

use crate::error::{DiagnosticError, Error};
use crate::stream::Position;

/// Source texts for rendering diagnostics, loaded from disk on first use.
#[derive(Default)]
pub struct SourceMap {
    files: SimpleFiles<String, String>,
    ids: HashMap<String, usize>,
}

impl SourceMap {
    pub fn new() -> Self {
        SourceMap::default()
    }

    /// Register `source` under `name`, for inputs that are not files.
    pub fn add(&mut self, name: &str, source: String) -> usize {
        let id = self.files.add(name.to_string(), source);
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn files(&self) -> &SimpleFiles<String, String> {
        &self.files
    }

    fn file_id(&mut self, name: &str) -> Option<usize> {
        if let Some(id) = self.ids.get(name) {
            return Some(*id);
        }
        let source = fs::read_to_string(name).ok()?;
        Some(self.add(name, source))
    }

    /// The file and byte range covering the line of `position`.
    pub fn locate(&mut self, position: &Position) -> Option<(usize, Range<usize>)> {
        let id = self.file_id(&position.source)?;
        let range = self
            .files
            .line_range(id, position.line.saturating_sub(1))
            .ok()?;
        Some((id, range))
    }

    /// Build the codespan diagnostic for a fatal error. Positions whose
    /// source cannot be read fall back to a `source:line` prefix.
    pub fn error_diagnostic(&mut self, error: &Error) -> Diagnostic<usize> {
        match error.position().and_then(|p| self.locate(p)) {
            Some((id, range)) => error.to_diagnostic(id, Some(range)),
            None => Diagnostic::error().with_message(error.to_string()),
        }
    }

    pub fn warning_diagnostic(&mut self, warning: &DiagnosticError) -> Diagnostic<usize> {
        let located = warning.position.as_ref().and_then(|p| self.locate(p));
        match located {
            Some((id, range)) => Diagnostic::warning()
                .with_message(warning.error.to_string())
                .with_labels(vec![Label::primary(id, range)]),
            None => Diagnostic::warning().with_message(warning.to_string()),
        }
    }
}
