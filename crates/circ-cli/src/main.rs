//! Command-line driver: read a C source file, parse it straight into Cir
//! IR, and print the IR pretty-printed back to C on stdout. A parse/lower
//! failure is reported as a `codespan-reporting` diagnostic on stderr and
//! the process exits non-zero, mirroring `raya-cli`'s diagnostic path
//! without needing byte-range labels (Cir's `FatalError` only carries a
//! file:line location stack, not spans).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use codespan_reporting::diagnostic::{Diagnostic, Severity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};

use circ_frontend::FrontendError;

#[derive(Parser)]
#[command(name = "circ")]
#[command(about = "Parse and render a C-subset source file through the Cir pipeline")]
#[command(version)]
struct Cli {
    /// Path to the C source file to compile
    source: PathBuf,

    /// Target machine. `gcc` is the only implemented variant.
    #[arg(long, default_value = "gcc")]
    machine: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.machine != "gcc" {
        eprintln!("error: unsupported --machine '{}'; only 'gcc' is implemented", cli.machine);
        return ExitCode::FAILURE;
    }

    let src = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: could not read '{}': {e}", cli.source.display());
            return ExitCode::FAILURE;
        }
    };

    let file_name = cli.source.display().to_string();
    match circ_frontend::parse_program(&src, &file_name) {
        Ok(ctx) => {
            print!("{}", circ_render::render(&ctx));
            ExitCode::SUCCESS
        }
        Err(FrontendError::Fatal(fatal)) => {
            report_fatal(&file_name, &src, &fatal.message, &fatal.locations);
            ExitCode::FAILURE
        }
    }
}

fn report_fatal(file_name: &str, src: &str, message: &str, locations: &circ_core::error::LocationStack) {
    let mut files = SimpleFiles::<String, String>::new();
    files.add(file_name.to_string(), src.to_string());

    let notes: Vec<String> = locations.0.iter().map(|loc| format!("at {loc}")).collect();
    let diagnostic = Diagnostic::<usize>::new(Severity::Error).with_message(message.to_string()).with_notes(notes);

    let mut writer = StandardStream::stderr(ColorChoice::Auto);
    let config = term::Config::default();
    let _ = term::emit(&mut writer, &config, &files, &diagnostic);
}
