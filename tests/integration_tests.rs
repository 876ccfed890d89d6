//! End-to-end expansion scenarios (SPEC_FULL.md §8): each test runs the
//! real pipeline - lexical prepass, bundled standard library, expansion
//! driver - over a small fixture and asserts on the final buffer or the
//! diagnostics produced, never on internal data structures.

use upp::driver::{self, DriverConfig};
use upp::prepass;
use upp::registry::MacroRegistry;
use upp::stdlib;
use upp::UppError;

fn registry_with_stdlib() -> MacroRegistry {
    let mut registry = MacroRegistry::new();
    for def in stdlib::load() {
        registry.define(def);
    }
    registry
}

fn expand_with_stdlib(source: &str) -> driver::DriverOutcome {
    let mut registry = registry_with_stdlib();
    let prepass = prepass::run(source, "<test>").unwrap();
    for def in prepass.definitions {
        registry.define(def);
    }
    driver::expand(&prepass.cleaned_source, &registry, &DriverConfig::default()).unwrap()
}

#[test]
fn nested_expansion_reaches_a_fixed_point() {
    let src = r#"
        @define square(x) { return "(" + x + " * " + x + ")"; }
        @define sum_of_squares(a, b) { return "@square(" + a + ") + @square(" + b + ")"; }
        int total = @sum_of_squares(2, 3);
    "#;
    let out = expand_with_stdlib(src);
    assert!(out.diagnostics.is_empty());
    assert!(out.output.contains("(2 * 2) + (3 * 3)"));
}

#[test]
fn consume_type_mismatch_is_reported_without_aborting_the_run() {
    let src = r#"
        @define wants_if() { upp.consume("if_statement"); return ""; }
        int main(void) { @wants_if() return 0; }
    "#;
    let out = expand_with_stdlib(src);
    assert_eq!(out.diagnostics.len(), 1);
    assert!(matches!(out.diagnostics[0], UppError::ConsumeTypeMismatch { .. }));
}

#[test]
fn edit_conflict_is_fatal() {
    let src = r#"
        @define clobber() { upp.replace(upp.root, "int replaced;"); return ""; }
        @clobber(); @clobber();
    "#;
    let prepass = prepass::run(src, "<test>").unwrap();
    let mut registry = registry_with_stdlib();
    for def in prepass.definitions {
        registry.define(def);
    }
    let err = driver::expand(&prepass.cleaned_source, &registry, &DriverConfig::default()).unwrap_err();
    assert!(matches!(err, UppError::EditConflict { .. }));
}

#[test]
fn hoist_ordering_places_insertion_after_leading_comments_and_preprocessor_directives() {
    let src = r#"
        @define declare_helper() { upp.hoist("int helper(void) { return 7; }\n"); return ""; }
        // leading comment
        #include <stdio.h>
        int main(void) { return @declare_helper(); }
    "#;
    let out = expand_with_stdlib(src);
    assert!(out.diagnostics.is_empty());
    let comment_pos = out.output.find("// leading comment").expect("comment kept");
    let include_pos = out.output.find("#include").expect("directive kept");
    let helper_pos = out.output.find("int helper").expect("helper hoisted");
    let main_pos = out.output.find("int main").expect("main kept");
    assert!(comment_pos < include_pos);
    assert!(include_pos < helper_pos, "hoisted text must follow the leading comment/directive run");
    assert!(helper_pos < main_pos);
}

#[test]
fn fieldsof_splices_fields_and_consumes_the_trailing_semicolon() {
    let src = r#"
        struct Base { int x; int y; };
        struct Derived {
            @fieldsof(Base);
            int z;
        };
    "#;
    let out = expand_with_stdlib(src);
    assert!(out.diagnostics.is_empty());
    assert!(!out.output.contains(";;"));
    assert!(out.output.contains("int x;"));
    assert!(out.output.contains("int y;"));
    assert!(out.output.contains("int z;"));
}

#[test]
fn scoped_defer_reemits_before_every_return_and_the_closing_brace() {
    let src = r#"
        int open_and_use(void) {
            int fd = 1;
            @defer() { close(fd); }
            if (fd < 0) {
                return -1;
            }
            return 0;
        }
    "#;
    let out = expand_with_stdlib(src);
    assert!(out.diagnostics.is_empty());
    let return_count = out.output.matches("return").count();
    let close_count = out.output.matches("close(fd)").count();
    assert_eq!(return_count, 2);
    assert_eq!(close_count, 2, "once before each of the two returns");
}

#[test]
fn defer_rejects_a_scope_containing_break_with_the_exact_diagnostic_text() {
    let src = r#"
        int scan(void) {
            for (int i = 0; i < 10; i++) {
                @defer() { close(1); }
                if (i == 5) {
                    break;
                }
            }
            return 0;
        }
    "#;
    let out = expand_with_stdlib(src);
    assert_eq!(out.diagnostics.len(), 1);
    match &out.diagnostics[0] {
        UppError::UserError { message, .. } => {
            assert_eq!(message, "@defer cannot be used in a scope containing break");
        }
        other => panic!("expected UserError, got {other:?}"),
    }
}

#[test]
fn lambda_rewrites_a_direct_call_site_to_pass_the_context() {
    let src = r#"
        int counter = 0;

        @lambda()
        int tick(int step) {
            counter = counter + step;
            return counter;
        }

        int use_it(void) {
            return tick(2);
        }
    "#;
    let out = expand_with_stdlib(src);
    assert!(out.diagnostics.is_empty());
    assert!(out.output.contains("tick_impl"));
    assert!(out.output.contains("tick_impl(&ctx, 2)"));
    assert!(!out.output.contains("return tick(2)"));
}

#[test]
fn lambda_retypes_a_plain_alias_declaration_and_rewrites_its_call_site() {
    let src = r#"
        int base = 10;

        @lambda()
        int add_base(int x) {
            return base + x;
        }

        int use_it(void) {
            int (*f)(int) = add_base;
            return f(4);
        }
    "#;
    let out = expand_with_stdlib(src);
    assert!(out.diagnostics.is_empty());
    assert!(out.output.contains("add_base_impl"));
    assert!(out.output.contains("typeof(&add_base_impl) f = add_base_impl;"));
    assert!(out.output.contains("f(&ctx, 4)"));
}

#[test]
fn method_dispatch_rewrites_dot_call_sites_to_the_mangled_function() {
    let src = r#"
        struct Point { int x; int y; };

        @method(Point)
        int distance(struct Point *self) {
            return self->x + self->y;
        }

        int use_it(void) {
            struct Point p;
            return p.distance();
        }
    "#;
    let out = expand_with_stdlib(src);
    assert!(out.diagnostics.is_empty());
    assert!(out.output.contains("_Point_method_distance"));
    assert!(!out.output.contains("p.distance()"));
}

#[test]
fn unresolved_macro_and_arity_mismatch_are_recoverable_diagnostics() {
    let src = "int a = @nonexistent(); int b = @defer(1);";
    let out = expand_with_stdlib(src);
    assert_eq!(out.diagnostics.len(), 2);
    assert!(out.diagnostics.iter().any(|d| matches!(d, UppError::UnresolvedMacro { .. })));
    assert!(out.diagnostics.iter().any(|d| matches!(d, UppError::ArityMismatch { .. })));
    assert_eq!(out.exit_code(), 1);
}
