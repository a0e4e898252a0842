mod test_runner;

use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};

use hm::{Config, DiagnosticError, Engine, Error, Outcome, SourceMap};

const SUBCOMMANDS: &[&str] = &["build", "test", "help"];

#[derive(Parser)]
#[command(name = "hm", version, about = "Compile hypertext markup into HTML pages")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a document into an output directory
    Build(BuildArgs),

    /// Run .test.hm test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Top-level markup file
    input: PathBuf,

    /// Directory the pages are written under
    outdir: PathBuf,

    /// Don't print progress lines
    #[arg(short, long)]
    quiet: bool,

    /// Repeat the run until references settle, at most N times
    #[arg(long, value_name = "N", default_value_t = 1)]
    until_stable: usize,

    /// Reference table file (defaults to <input>.ref)
    #[arg(long, value_name = "FILE")]
    references: Option<PathBuf>,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.hm file or a directory containing them
    path: PathBuf,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

/// `hm doc.hm out` is short for `hm build doc.hm out`.
fn with_default_subcommand(mut args: Vec<String>) -> Vec<String> {
    let first = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, arg)| !arg.starts_with('-'))
        .map(|(index, arg)| (index, SUBCOMMANDS.contains(&arg.as_str())));
    if let Some((index, false)) = first {
        args.insert(index, "build".to_string());
    }
    args
}

fn main() {
    let args = with_default_subcommand(std::env::args().collect());
    let cli = Cli::parse_from(&args);
    let color = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    match cli.command {
        Command::Build(build_args) => process::exit(build(build_args, color)),
        Command::Test(test_args) => {
            if test_args.list_categories {
                test_runner::list_categories(&test_args.path);
                return;
            }
            let code = test_runner::run_tests(&test_args.path, color, &test_args.category);
            process::exit(code);
        }
    }
}

fn engine(quiet: bool) -> Engine {
    let mut engine = Engine::new();
    if quiet {
        engine = engine.with_log(Box::new(io::sink()));
    }
    hm_html::install(&mut engine);
    engine
}

/// Compile the document, up to `until_stable` times, and return the exit code.
fn build(args: BuildArgs, color: ColorChoice) -> i32 {
    let mut config = Config::new(&args.input, &args.outdir);
    config.reference_file = args.references;
    let runs = args.until_stable.max(1);

    let writer = StandardStream::stderr(color);
    let mut reporter = Reporter::new(writer);

    for run in 1..=runs {
        let mut engine = engine(args.quiet);
        let result = engine.compile(&config);
        let warnings = engine.take_diagnostics();
        match result {
            Ok(Outcome::RerunNeeded) if run < runs => continue,
            Ok(outcome) => {
                reporter.warnings(&warnings);
                match outcome {
                    Outcome::Done => println!("\n***Done***\n"),
                    Outcome::RerunNeeded => println!("\n***Run again to get labels right.***\n"),
                }
                return 0;
            }
            Err(error) => {
                reporter.warnings(&warnings);
                reporter.error(&error, &args.input);
                return 1;
            }
        }
    }
    0
}

/// Renders diagnostics against the source files they point into.
struct Reporter {
    writer: StandardStream,
    config: term::Config,
    sources: SourceMap,
}

impl Reporter {
    fn new(writer: StandardStream) -> Self {
        Reporter {
            writer,
            config: term::Config::default(),
            sources: SourceMap::new(),
        }
    }

    fn warnings(&mut self, warnings: &[DiagnosticError]) {
        for warning in warnings {
            let diagnostic = self.sources.warning_diagnostic(warning);
            let _ = term::emit_to_write_style(
                &mut self.writer.lock(),
                &self.config,
                self.sources.files(),
                &diagnostic,
            );
        }
    }

    fn error(&mut self, error: &Error, input: &Path) {
        if error.position().is_none() {
            eprintln!("error: {}: {}", input.display(), error);
            return;
        }
        let diagnostic = self.sources.error_diagnostic(error);
        let _ = term::emit_to_write_style(
            &mut self.writer.lock(),
            &self.config,
            self.sources.files(),
            &diagnostic,
        );
    }
}
