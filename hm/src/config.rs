use std::path::PathBuf;

/// Inputs of one compilation run.
#[derive(Debug, Clone)]
pub struct Config {
    /// The top-level source file.
    pub input: PathBuf,
    /// Directory all pages and assets are written under.
    pub output_root: PathBuf,
    /// Where the reference table is kept between runs. Defaults to the input
    /// path with `.ref` appended.
    pub reference_file: Option<PathBuf>,
}

impl Config {
    pub fn new(input: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Config {
            input: input.into(),
            output_root: output_root.into(),
            reference_file: None,
        }
    }

    pub fn reference_path(&self) -> PathBuf {
        match &self.reference_file {
            Some(path) => path.clone(),
            None => {
                let mut path = self.input.clone().into_os_string();
                path.push(".ref");
                PathBuf::from(path)
            }
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every reference resolved against a stable table.
    Done,
    /// Labels changed during the run; running again may fix references.
    RerunNeeded,
}
