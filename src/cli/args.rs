//! Defines the command-line arguments for the `upp` CLI.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use clap::Parser;
use std::path::PathBuf;

/// The main CLI argument structure. `upp` takes a single file plus flags
/// rather than a subcommand tree - `--list-macros` is the one mode switch,
/// and is valid without a `file`.
#[derive(Debug, Parser)]
#[command(
    name = "upp",
    version,
    about = "A syntax-aware macro preprocessor: macro bodies run as sandboxed scripts over a concrete syntax tree."
)]
pub struct UppArgs {
    /// The C source file to expand. Required unless `--list-macros` is given.
    pub file: Option<PathBuf>,

    /// Overrides the default phase cap before expansion is declared
    /// non-terminating.
    #[arg(long)]
    pub max_phases: Option<usize>,

    /// Wraps each expanded invocation in a comment showing the original
    /// source text it replaced.
    #[arg(long)]
    pub verbose: bool,

    /// An additional directory searched for macro library headers, on top
    /// of the bundled standard library.
    #[arg(long, value_name = "DIR")]
    pub stdlib_dir: Option<PathBuf>,

    /// Prints a unified diff of input vs. output instead of the expanded
    /// source.
    #[arg(long)]
    pub emit_diff: bool,

    /// Lists every macro available (bundled plus `--stdlib-dir` and the
    /// input file's own `@define`s) and exits without expanding anything.
    #[arg(long)]
    pub list_macros: bool,
}
