//! Expansion driver (§4.6): the phase loop that orchestrates everything
//! else in the crate - parse, scan, evaluate, reconcile, re-parse, run
//! transforms, repeat to a fixed point or abort at `MAX_PHASES`. The
//! pseudocode in spec.md §4.6 is implemented here verbatim.

use std::sync::{Arc, Mutex};

use crate::diagnostics::UppError;
use crate::err_ctx;
use crate::err_msg;
use crate::invocation;
use crate::parser::parse_c;
use crate::registry::MacroRegistry;
use crate::sandbox::{self, PhaseState, RunState};

/// Default `MAX_PHASES` (§3 invariant 7); overridable via `--max-phases`.
pub const DEFAULT_MAX_PHASES: usize = 64;

pub struct DriverConfig {
    pub max_phases: usize,
    /// Comment-preservation emission mode (§6, SPEC_FULL.md §2): each
    /// replaced invocation is wrapped in a block comment showing the
    /// original invocation text.
    pub verbose: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_phases: DEFAULT_MAX_PHASES,
            verbose: false,
        }
    }
}

/// Diagnostics collected over the run, plus the final buffer. Per §7's
/// recovery policy, `diagnostics` may be non-empty even when `output` is
/// present - only reconciliation/convergence failures are fatal (returned
/// as `Err` instead, since the buffer is unusable at that point).
pub struct DriverOutcome {
    pub output: String,
    pub diagnostics: Vec<UppError>,
}

impl DriverOutcome {
    /// §6: "non-zero on any diagnostic of severity error".
    pub fn exit_code(&self) -> i32 {
        if self.diagnostics.is_empty() {
            0
        } else {
            1
        }
    }
}

/// Runs the phase loop to completion (or a fatal abort) over `source`,
/// which must already be the prepass-cleaned buffer (§6: `@define` blocks
/// blanked out, definitions interned into `registry`).
pub fn expand(source: &str, registry: &MacroRegistry, cfg: &DriverConfig) -> Result<DriverOutcome, UppError> {
    let engine = sandbox::build_engine();
    let run_state = Arc::new(Mutex::new(RunState::new()));
    let mut diagnostics = Vec::new();
    let mut buffer = source.to_string();
    let mut phase = 0usize;

    loop {
        let cst = parse_c(&buffer)?;
        let root = cst.root();
        let invocations = invocation::scan(&buffer, &root);

        let transforms_pending = !run_state.lock().unwrap().transforms.is_empty();
        if invocations.is_empty() && !transforms_pending {
            break;
        }

        let phase_state = Arc::new(Mutex::new(PhaseState::new()));

        for mut inv in invocations {
            let original_range = inv.range;
            let Some(def) = registry.get(&inv.macro_name) else {
                diagnostics.push(err_ctx!(UnresolvedMacro, inv.macro_name.clone(), inv.range));
                continue;
            };
            if let Err(e) = invocation::check_arity(&inv, def) {
                diagnostics.push(e);
                continue;
            }
            let def = def.clone();

            let outcome = sandbox::evaluate_invocation(
                &engine,
                &def,
                &mut inv,
                &root,
                Arc::clone(&run_state),
                Arc::clone(&phase_state),
            );

            match outcome.error {
                Some(e) => diagnostics.push(e),
                None => {
                    let mut text = outcome.replacement.unwrap_or_default();
                    if cfg.verbose {
                        let original_text = buffer[original_range.start..original_range.end]
                            .trim()
                            .replace("*/", "* /");
                        text = format!("/* {original_text} */{text}");
                    }
                    let mut guard = phase_state.lock().unwrap();
                    guard.edits.submit(inv.range, text);
                }
            }
        }

        let buffer_before_phase = buffer.clone();

        {
            let mut guard = phase_state.lock().unwrap();
            let PhaseState { edits, hoists } = &mut *guard;
            hoists.flush_into(edits, &root);
            let (new_buffer, _warnings) = edits.apply(&buffer)?;
            buffer = new_buffer;
        }

        let transforms = {
            let mut run = run_state.lock().unwrap();
            run.transforms.drain()
        };
        let ran_transforms = !transforms.is_empty();
        if ran_transforms {
            let cst = parse_c(&buffer)?;
            let root = cst.root();
            let transform_phase_state = Arc::new(Mutex::new(PhaseState::new()));
            for transform in &transforms {
                if let Err(e) = sandbox::run_transform(
                    &engine,
                    transform,
                    &root,
                    Arc::clone(&run_state),
                    Arc::clone(&transform_phase_state),
                ) {
                    diagnostics.push(e);
                }
            }
            let mut guard = transform_phase_state.lock().unwrap();
            let PhaseState { edits, hoists } = &mut *guard;
            hoists.flush_into(edits, &root);
            let (new_buffer, _warnings) = edits.apply(&buffer)?;
            buffer = new_buffer;
        }

        // Fixed-point per spec: "a phase that neither changed the buffer
        // nor registered a new transform ends the loop". Without this, a
        // permanently-unresolvable invocation (unknown macro, arity
        // mismatch) never gets an edit submitted, so it keeps reappearing
        // every phase and would otherwise burn the whole phase budget
        // re-emitting the same diagnostic before aborting as non-terminating.
        let buffer_changed = buffer != buffer_before_phase;
        let more_transforms_queued = !run_state.lock().unwrap().transforms.is_empty();
        if !buffer_changed && !ran_transforms && !more_transforms_queued {
            break;
        }

        phase += 1;
        if phase > cfg.max_phases {
            return Err(err_msg!(IterationLimit, cfg.max_phases));
        }
    }

    Ok(DriverOutcome {
        output: buffer,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MacroDefinition;

    fn registry_with(defs: Vec<MacroDefinition>) -> MacroRegistry {
        let mut reg = MacroRegistry::new();
        for d in defs {
            reg.define(d);
        }
        reg
    }

    #[test]
    fn identity_when_no_invocations() {
        let reg = registry_with(vec![]);
        let cfg = DriverConfig::default();
        let out = expand("int main(void) { return 0; }", &reg, &cfg).unwrap();
        assert_eq!(out.output, "int main(void) { return 0; }");
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn simple_invocation_is_replaced() {
        let reg = registry_with(vec![MacroDefinition {
            name: "two".into(),
            params: vec![],
            body: "return \"2\";".into(),
            declaring_source: "<test>".into(),
        }]);
        let cfg = DriverConfig::default();
        let out = expand("int x = @two();", &reg, &cfg).unwrap();
        assert_eq!(out.output, "int x = 2;");
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn nested_expansion_reaches_fixed_point() {
        let reg = registry_with(vec![
            MacroDefinition {
                name: "outer".into(),
                params: vec!["x".into()],
                body: "return \"@inner(10) + \" + x;".into(),
                declaring_source: "<test>".into(),
            },
            MacroDefinition {
                name: "inner".into(),
                params: vec!["y".into()],
                body: "return \"expanded_inner + \" + y;".into(),
                declaring_source: "<test>".into(),
            },
        ]);
        let cfg = DriverConfig::default();
        let out = expand("int n = @outer(20);", &reg, &cfg).unwrap();
        assert!(out.diagnostics.is_empty());
        assert!(out.output.contains("expanded_inner + 10 + 20"));
    }

    #[test]
    fn unresolved_macro_is_a_diagnostic_not_a_fatal_abort() {
        let reg = registry_with(vec![]);
        let cfg = DriverConfig::default();
        let out = expand("int x = @nope();", &reg, &cfg).unwrap();
        assert_eq!(out.diagnostics.len(), 1);
        assert!(matches!(out.diagnostics[0], UppError::UnresolvedMacro { .. }));
        assert_eq!(out.exit_code(), 1);
    }

    #[test]
    fn arity_mismatch_is_a_diagnostic() {
        let reg = registry_with(vec![MacroDefinition {
            name: "one_arg".into(),
            params: vec!["a".into()],
            body: "return a;".into(),
            declaring_source: "<test>".into(),
        }]);
        let cfg = DriverConfig::default();
        let out = expand("int x = @one_arg();", &reg, &cfg).unwrap();
        assert_eq!(out.diagnostics.len(), 1);
        assert!(matches!(out.diagnostics[0], UppError::ArityMismatch { .. }));
    }

    #[test]
    fn edit_conflict_aborts_the_whole_run() {
        let reg = registry_with(vec![MacroDefinition {
            name: "clash".into(),
            params: vec![],
            body: "upp.replace(upp.root, \"X\"); return \"\";".into(),
            declaring_source: "<test>".into(),
        }]);
        let cfg = DriverConfig::default();
        let err = expand("@clash(); @clash();", &reg, &cfg).unwrap_err();
        assert!(matches!(err, UppError::EditConflict { .. }));
    }
}
