//! Narrative Script, an interpreter for a generative text-templating
//! language.
//!
//! Scripts mix literal text with weighted random choices (`[a|b(3)]`),
//! bindings that are evaluated once (`#name`) or on every reference
//! (`$name`), gates that include a choice only when bound values match a
//! query (`[@{mood: 'grim'} ...]`), and transforms (`$beast.art().cap()`).
//!
//! ```no_run
//! use narrative_script::{Context, ScriptEngine};
//!
//! let mut engine = ScriptEngine::builder()
//!     .seed(42)
//!     .context(Context::new().with("hero", "ada"))
//!     .build()
//!     .unwrap();
//! let text = engine.evaluate("$hero.cap() met [an owl|a fox].").unwrap();
//! ```

pub mod core;
pub mod schema;

pub use crate::core::context::Context;
pub use crate::core::evaluator::{EvalError, EvalOptions};
pub use crate::core::grammar::{GrammarError, RuleSet};
pub use crate::core::pipeline::{evaluate, Evaluation, ScriptEngine, ScriptEngineBuilder};
pub use crate::schema::value::{Callable, Value};
