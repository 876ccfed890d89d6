//! Registered transform queue (§3, §4.6): deferred whole-tree callbacks
//! submitted by `upp.registerTransform(fn)`, run once per phase after
//! per-invocation expansion finishes.
//!
//! The queue only tracks *what* was registered and in what order; calling
//! the transform back with `(root, helpers)` is [`crate::driver`]'s job,
//! since that requires the live sandbox engine and scope.

use std::sync::Arc;

use rhai::{FnPtr, AST};

/// One registration. `declaring_invocation` is carried for diagnostics, so
/// a transform that fails mid-run can still be attributed to the
/// invocation that registered it. `ast` is the compiled script the
/// callback was produced from - a bare `Fn("name")` reference needs it to
/// resolve the named function at call time (a captured closure embeds its
/// own definition, but carrying the AST uniformly keeps one call path for
/// both forms; see [`crate::sandbox`]).
#[derive(Clone)]
pub struct RegisteredTransform {
    pub callback: FnPtr,
    pub ast: Arc<AST>,
    pub declaring_invocation: String,
    pub ordinal: usize,
}

/// Holds transforms registered during the phase currently executing; the
/// driver drains it into the transform phase that follows, per the
/// ordering contract (transforms registered in phase *k* run in phase
/// *k*, after per-invocation expansion, in registration order).
#[derive(Default)]
pub struct TransformQueue {
    pending: Vec<RegisteredTransform>,
    next_ordinal: usize,
}

impl TransformQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: FnPtr, ast: Arc<AST>, declaring_invocation: impl Into<String>) {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.pending.push(RegisteredTransform {
            callback,
            ast,
            declaring_invocation: declaring_invocation.into(),
            ordinal,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Takes every transform pending right now, in registration order.
    /// Transforms a transform itself registers while running are pushed
    /// onto `self` by the caller and are left for the *next* drain, i.e.
    /// the next phase - the driver must call `drain` before running any
    /// of the returned transforms.
    pub fn drain(&mut self) -> Vec<RegisteredTransform> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::{Dynamic, Engine, Scope};

    fn make_fn_ptr(engine: &Engine, script: &str) -> (FnPtr, Arc<AST>) {
        let ast = engine.compile(script).unwrap();
        let mut scope = Scope::new();
        let result: Dynamic = engine.eval_ast_with_scope(&mut scope, &ast).unwrap();
        (result.try_cast::<FnPtr>().unwrap(), Arc::new(ast))
    }

    #[test]
    fn registrations_drain_in_ordinal_order() {
        let engine = Engine::new();
        let (a, ast_a) = make_fn_ptr(&engine, "Fn(\"a\")");
        let (b, ast_b) = make_fn_ptr(&engine, "Fn(\"b\")");

        let mut queue = TransformQueue::new();
        queue.register(a, ast_a, "@first");
        queue.register(b, ast_b, "@second");
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert!(queue.is_empty());
        assert_eq!(drained[0].ordinal, 0);
        assert_eq!(drained[0].declaring_invocation, "@first");
        assert_eq!(drained[1].ordinal, 1);
        assert_eq!(drained[1].declaring_invocation, "@second");
    }

    #[test]
    fn drain_leaves_new_registrations_for_next_phase() {
        let engine = Engine::new();
        let (a, ast_a) = make_fn_ptr(&engine, "Fn(\"a\")");
        let mut queue = TransformQueue::new();
        queue.register(a.clone(), ast_a.clone(), "@outer");
        let first_drain = queue.drain();
        assert_eq!(first_drain.len(), 1);

        queue.register(a, ast_a, "@outer_again");
        assert_eq!(queue.len(), 1);
        let second_drain = queue.drain();
        assert_eq!(second_drain[0].ordinal, 1);
    }
}
