//! The main entry point for the `upp` CLI: parses arguments, assembles the
//! macro registry (bundled standard library, `--stdlib-dir` headers, the
//! input file's own `@define`s), and runs the expansion driver.

pub mod args;
pub mod output;

use std::fs;
use std::path::Path;

use clap::Parser;

use crate::cli::args::UppArgs;
use crate::diagnostics::UppError;
use crate::driver::{self, DriverConfig};
use crate::prepass;
use crate::registry::MacroRegistry;
use crate::stdlib;

/// Parses arguments and runs to completion, returning the process exit code.
pub fn run() -> i32 {
    let args = UppArgs::parse();

    if args.list_macros {
        return handle_list_macros(&args);
    }

    let Some(file) = args.file.clone() else {
        eprintln!("upp: a file is required unless --list-macros is given");
        return 2;
    };

    handle_expand(&args, &file)
}

fn handle_list_macros(args: &UppArgs) -> i32 {
    let mut registry = MacroRegistry::new();
    for def in stdlib::load() {
        registry.define(def);
    }
    if let Err(e) = load_stdlib_dir(args.stdlib_dir.as_deref(), &mut registry) {
        output::print_diagnostic(&e, "<stdlib-dir>", "");
        return 1;
    }

    if let Some(file) = &args.file {
        match fs::read_to_string(file) {
            Ok(source) => {
                if let Err(e) = load_user_definitions(&source, file, &mut registry) {
                    output::print_diagnostic(&e, &path_to_str(file), &source);
                    return 1;
                }
            }
            Err(e) => {
                eprintln!("upp: cannot read {}: {e}", path_to_str(file));
                return 1;
            }
        }
    }

    for name in registry.names() {
        println!("{name}");
    }
    0
}

fn handle_expand(args: &UppArgs, file: &Path) -> i32 {
    let source = match fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("upp: cannot read {}: {e}", path_to_str(file));
            return 1;
        }
    };

    let mut registry = MacroRegistry::new();
    for def in stdlib::load() {
        registry.define(def);
    }
    if let Err(e) = load_stdlib_dir(args.stdlib_dir.as_deref(), &mut registry) {
        output::print_diagnostic(&e, "<stdlib-dir>", "");
        return 1;
    }

    let path_str = path_to_str(file);
    let cleaned = match load_user_definitions(&source, file, &mut registry) {
        Ok(cleaned) => cleaned,
        Err(e) => {
            output::print_diagnostic(&e, &path_str, &source);
            return 1;
        }
    };

    let cfg = DriverConfig {
        max_phases: args.max_phases.unwrap_or(driver::DEFAULT_MAX_PHASES),
        verbose: args.verbose,
    };

    let outcome = match driver::expand(&cleaned, &registry, &cfg) {
        Ok(outcome) => outcome,
        Err(e) => {
            output::print_diagnostic(&e, &path_str, &cleaned);
            return 1;
        }
    };

    for diag in &outcome.diagnostics {
        output::print_diagnostic(diag, &path_str, &cleaned);
    }

    if args.emit_diff {
        output::print_diff(&source, &outcome.output);
    } else {
        print!("{}", outcome.output);
    }

    outcome.exit_code()
}

/// Runs the lexical prepass over `source`, interning every `@define` it
/// finds into `registry`, and returns the cleaned buffer ready for the
/// expansion driver.
fn load_user_definitions(
    source: &str,
    file: &Path,
    registry: &mut MacroRegistry,
) -> Result<String, UppError> {
    let declaring = path_to_str(file);
    let result = prepass::run(source, &declaring)?;
    for def in result.definitions {
        registry.define(def);
    }
    Ok(result.cleaned_source)
}

/// Recursively scans `dir` (a no-op if `None`) for `.h` macro library
/// headers, running the same prepass over each and interning its
/// `@define`s - `upp` has no `#include` directive of its own, so this is
/// the CLI's substitute for the original project's header search path.
fn load_stdlib_dir(dir: Option<&Path>, registry: &mut MacroRegistry) -> Result<(), UppError> {
    let Some(dir) = dir else {
        return Ok(());
    };
    let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|ext| ext == "h").unwrap_or(false))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();

    for path in paths {
        let source = fs::read_to_string(&path).map_err(|e| {
            crate::err_msg!(UserError, format!("cannot read {}: {e}", path.display()))
        })?;
        let declaring = path_to_str(&path);
        let result = prepass::run(&source, &declaring)?;
        for def in result.definitions {
            registry.define(def);
        }
    }
    Ok(())
}

fn path_to_str(path: &Path) -> String {
    path.display().to_string()
}
