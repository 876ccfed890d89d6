//! Handles all user-facing output for the CLI: colorized diagnostics and
//! the `--emit-diff` unified-diff view.

use difference::{Changeset, Difference};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::diagnostics::UppError;

/// Prints one `path:line:col: kind: message` diagnostic line to stderr,
/// colored red when stderr is a tty.
pub fn print_diagnostic(err: &UppError, path: &str, src: &str) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
    eprintln!("{}", err.to_diagnostic_line(path, src));
    let _ = stderr.reset();
}

/// Prints a unified diff of `before` vs. `after` to stdout, line by line,
/// with additions in green and removals in red.
pub fn print_diff(before: &str, after: &str) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let changeset = Changeset::new(before, after, "\n");
    for diff in &changeset.diffs {
        match diff {
            Difference::Same(ref x) => {
                let _ = stdout.reset();
                println!(" {}", x);
            }
            Difference::Add(ref x) => {
                let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
                println!("+{}", x);
            }
            Difference::Rem(ref x) => {
                let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
                println!("-{}", x);
            }
        }
    }
    let _ = stdout.reset();
}
