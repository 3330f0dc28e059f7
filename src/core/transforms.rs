/// Transform registry: named functions applied with `.name` / `.name()`.
///
/// A process-wide registry is seeded with the built-ins; engines may layer
/// their own registry on top (see `ScriptEngineBuilder::transform`).

use lazy_static::lazy_static;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::locale;

pub type TransformFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone, Default)]
pub struct TransformRegistry {
    entries: FxHashMap<String, TransformFn>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort();
        f.debug_struct("TransformRegistry")
            .field("names", &names)
            .finish()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in transforms.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for name in ["identity", "norepeat", "nr"] {
            registry.register(name, |s: &str| s.to_string());
        }
        for name in ["capitalize", "cap", "ucf"] {
            registry.register(name, capitalize);
        }
        for name in ["uppercase", "uc"] {
            registry.register(name, |s: &str| s.to_uppercase());
        }
        for name in ["quotify", "qq"] {
            registry.register(name, |s: &str| format!("\u{201C}{}\u{201D}", s));
        }
        for name in ["pluralize", "s"] {
            registry.register(name, |s: &str| {
                if s.trim().is_empty() {
                    return s.to_string();
                }
                locale::current().pluralize(s)
            });
        }
        for name in ["articlize", "art"] {
            registry.register(name, |s: &str| {
                if s.trim().is_empty() {
                    return s.to_string();
                }
                format!("{} {}", locale::current().article(s), s)
            });
        }
        registry
    }

    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.entries.insert(name.to_string(), Arc::new(f));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<TransformFn> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

lazy_static! {
    static ref GLOBAL: RwLock<TransformRegistry> = RwLock::new(TransformRegistry::with_builtins());
}

/// Add or replace a transform for every evaluator in the process.
pub fn register_global<F>(name: &str, f: F)
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    GLOBAL.write().register(name, f);
}

pub fn remove_global(name: &str) -> bool {
    GLOBAL.write().remove(name)
}

pub fn global(name: &str) -> Option<TransformFn> {
    GLOBAL.read().get(name)
}

/// Operations every text value supports natively.
pub fn native(name: &str, value: &str) -> Option<String> {
    let out = match name {
        "toLowerCase" => value.to_lowercase(),
        "toUpperCase" => value.to_uppercase(),
        "trim" => value.trim().to_string(),
        "trimStart" => value.trim_start().to_string(),
        "trimEnd" => value.trim_end().to_string(),
        "toString" => value.to_string(),
        _ => return None,
    };
    Some(out)
}

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
