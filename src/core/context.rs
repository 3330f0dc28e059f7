/// Caller-supplied bindings visible to scripts as `$name`.
use rustc_hash::FxHashMap;

use crate::core::entities::{EntityCodec, HtmlEntities};
use crate::schema::value::{Callable, Value};

/// Characters that make caller text read as script.
const SCRIPT_CHARS: &[char] = &['[', ']', '{', '}', '|', '$', '#', '@', '&'];

#[derive(Debug, Clone, Default)]
pub struct Context {
    values: FxHashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable insert: `Context::new().with("hero", "Ada")`.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Bind text verbatim, escaping anything the evaluator would parse.
    pub fn with_literal(self, name: &str, text: &str) -> Self {
        let escaped: String = text
            .chars()
            .map(|c| {
                if SCRIPT_CHARS.contains(&c) {
                    HtmlEntities.encode(c)
                } else {
                    c.to_string()
                }
            })
            .collect();
        self.with(name, escaped)
    }

    /// Bind a host function, callable as a symbol or a transform.
    pub fn with_fn<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.with(name, Callable::new(f))
    }

    /// Text containing script syntax (brackets, braces, sigil names) is
    /// evaluated as script on the next pass; use [`Context::with_literal`]
    /// for text that must come out as written.
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Look up `name`, then `$name` (hosts sometimes key by sigil).
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.values
            .get(name)
            .or_else(|| self.values.get(&format!("${}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_default() {
        let ctx = Context::default();
        assert!(ctx.is_empty());
        assert!(format!("{:?}", ctx).contains("Context"));
    }

    #[test]
    fn lookup_falls_back_to_sigil_key() {
        let ctx = Context::new().with("$mood", "grim").with("hero", "Ada");
        assert_eq!(ctx.lookup("mood"), Some(&Value::from("grim")));
        assert_eq!(ctx.lookup("hero"), Some(&Value::from("Ada")));
        assert!(!ctx.contains("villain"));
    }

    #[test]
    fn literal_text_is_escaped() {
        let ctx = Context::new().with_literal("sym", "x] & $y");
        assert_eq!(ctx.get("sym"), Some(&Value::from("x&#93; &#38; &#36;y")));
    }

    #[test]
    fn functions_are_values() {
        let ctx = Context::new().with_fn("shout", |s| s.to_uppercase());
        match ctx.get("shout") {
            Some(Value::Func(f)) => assert_eq!(f.call("hey"), "HEY"),
            other => panic!("expected a function, got {:?}", other),
        }
    }
}
