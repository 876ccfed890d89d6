//! Macro registry: interns `@define`d macros by name and tracks arity.
//!
//! Definitions are discovered by the lexical prepass ([`crate::prepass`])
//! before the first parse, plus the bundled standard library
//! ([`crate::stdlib`]). The registry never re-parses or validates macro
//! bodies - the body text is opaque until the sandbox evaluates it.

use std::collections::HashMap;

/// A single `@define name(params) { body }` as captured verbatim.
#[derive(Debug, Clone)]
pub struct MacroDefinition {
    pub name: String,
    pub params: Vec<String>,
    pub body: String,
    /// Name of the file (or `"<source>"` for the user's own file) the
    /// definition came from, for diagnostics.
    pub declaring_source: String,
}

impl MacroDefinition {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Interns macro definitions keyed by name for the duration of one run.
#[derive(Debug, Default)]
pub struct MacroRegistry {
    defs: HashMap<String, MacroDefinition>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition, overwriting any earlier one with the same
    /// name (later `@define`s - e.g. in a file the user includes after the
    /// standard library - take precedence, mirroring ordinary `#define`
    /// shadowing semantics in the host language).
    pub fn define(&mut self, def: MacroDefinition) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&MacroDefinition> {
        self.defs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.defs.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_definition_shadows_earlier_one() {
        let mut reg = MacroRegistry::new();
        reg.define(MacroDefinition {
            name: "foo".into(),
            params: vec![],
            body: "return 1;".into(),
            declaring_source: "std".into(),
        });
        reg.define(MacroDefinition {
            name: "foo".into(),
            params: vec!["x".into()],
            body: "return x;".into(),
            declaring_source: "user".into(),
        });
        let def = reg.get("foo").unwrap();
        assert_eq!(def.arity(), 1);
        assert_eq!(def.declaring_source, "user");
    }
}
