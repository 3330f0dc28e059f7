/// Named rule sets: a map of rule name → body rendered into one script.
///
/// Each rule becomes a dynamic binding, so every reference re-rolls its
/// choice. Rule files are RON maps whose values are either a single body
/// or a list of alternatives.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::core::evaluator::EvalError;
use crate::core::pipeline::ScriptEngine;

/// Rule rendered last and evaluated when no start rule is given.
pub const DEFAULT_START: &str = "start";

#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid rule name '{0}'")]
    InvalidName(String),
    #[error("rule '{0}' has an empty body")]
    EmptyBody(String),
    #[error("rule '{0}' spans more than one line")]
    MultilineBody(String),
    #[error("start rule '{0}' is not defined")]
    MissingStart(String),
}

/// A rule body as written in a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleBody {
    One(String),
    Alternatives(Vec<String>),
}

impl RuleBody {
    /// The body as choice syntax.
    pub fn to_choice(&self) -> String {
        match self {
            RuleBody::One(body) if is_bracketed(body.trim()) => body.trim().to_string(),
            RuleBody::One(body) => format!("[{}]", body.trim()),
            RuleBody::Alternatives(alts) => {
                let joined: Vec<&str> = alts.iter().map(|a| a.trim()).collect();
                format!("[{}]", joined.join("|"))
            }
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            RuleBody::One(body) => body.trim().is_empty(),
            RuleBody::Alternatives(alts) => alts.iter().all(|a| a.trim().is_empty()),
        }
    }

    fn is_multiline(&self) -> bool {
        match self {
            RuleBody::One(body) => body.contains('\n'),
            RuleBody::Alternatives(alts) => alts.iter().any(|a| a.contains('\n')),
        }
    }
}

impl From<&str> for RuleBody {
    fn from(body: &str) -> Self {
        RuleBody::One(body.to_string())
    }
}

impl From<Vec<&str>> for RuleBody {
    fn from(alts: Vec<&str>) -> Self {
        RuleBody::Alternatives(alts.into_iter().map(str::to_string).collect())
    }
}

/// A set of named rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    pub rules: BTreeMap<String, RuleBody>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable insert.
    pub fn rule(mut self, name: &str, body: impl Into<RuleBody>) -> Self {
        self.rules.insert(name.to_string(), body.into());
        self
    }

    /// Load a rule set from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<RuleSet, GrammarError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a rule set from a RON string.
    pub fn parse_ron(input: &str) -> Result<RuleSet, GrammarError> {
        let rules: BTreeMap<String, RuleBody> = ron::from_str(input)?;
        let set = RuleSet { rules };
        set.validate()?;
        Ok(set)
    }

    /// Merge another rule set into this one. Rules from `other`
    /// override rules in `self` with the same name.
    pub fn merge(&mut self, other: RuleSet) {
        for (name, body) in other.rules {
            self.rules.insert(name, body);
        }
    }

    pub fn validate(&self) -> Result<(), GrammarError> {
        for (name, body) in &self.rules {
            if !is_rule_name(name) {
                return Err(GrammarError::InvalidName(name.clone()));
            }
            if body.is_empty() {
                return Err(GrammarError::EmptyBody(name.clone()));
            }
            if body.is_multiline() {
                return Err(GrammarError::MultilineBody(name.clone()));
            }
        }
        Ok(())
    }

    /// Render the rules as a script ending in a reference to `start`.
    pub fn to_script(&self, start: &str) -> Result<String, GrammarError> {
        self.validate()?;
        if !self.rules.contains_key(start) {
            return Err(GrammarError::MissingStart(start.to_string()));
        }
        let mut script = String::new();
        for (name, body) in &self.rules {
            script.push_str(&format!("${}={}\n", name, body.to_choice()));
        }
        script.push('$');
        script.push_str(start);
        Ok(script)
    }

    /// Evaluate from the `start` rule.
    pub fn evaluate(&self, engine: &mut ScriptEngine) -> Result<String, GrammarError> {
        self.evaluate_from(DEFAULT_START, engine)
    }

    pub fn evaluate_from(&self, start: &str, engine: &mut ScriptEngine) -> Result<String, GrammarError> {
        let script = self.to_script(start)?;
        tracing::debug!(rules = self.rules.len(), start, "evaluating rule set");
        Ok(engine.evaluate(&script)?)
    }
}

fn is_rule_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether the opening `[` is closed by the final `]`.
fn is_bracketed(body: &str) -> bool {
    if !body.starts_with('[') || !body.ends_with(']') {
        return false;
    }
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '[' => depth += 1,
            ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == body.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}
