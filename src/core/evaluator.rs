/// Tree-walking evaluator: symbol tables and choice selection.
///
/// One `Evaluator` owns all state for a single evaluation. The multi-pass
/// driver in `core::pipeline` feeds it the output of each pass until the
/// text stops changing, then settles any gates still pending.

use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use thiserror::Error;

use crate::core::context::Context;
use crate::core::gate::{CompiledGate, GateError, GateOutcome, Literal};
use crate::core::lexer::{pending_marker, tokenize, LexError, PENDING_PREFIX, PENDING_SUFFIX};
use crate::core::parser::{ParseError, Parser};
use crate::core::transforms::{self, TransformRegistry};
use crate::schema::ast::{
    Atom, Choice, Expr, Gate, OrExpr, PendingGate, Script, Sigil, Silent, Symbol, Transform,
};
use crate::schema::value::Value;

/// Deepest allowed chain of dynamic symbols invoking one another.
pub const MAX_DEPTH: usize = 10;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("{0}")]
    Parse(ParseError),
    #[error("{0}")]
    Gate(#[from] GateError),
    #[error("invalid choice: {0}")]
    InvalidChoice(String),
    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),
    #[error("max recursion depth ({depth}) exceeded resolving '{symbol}'")]
    MaxRecursion { symbol: String, depth: usize },
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),
    #[error("'#{0}' refers to a dynamic symbol (use '${0}')")]
    StaticReference(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

impl From<ParseError> for EvalError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidChoice { message, offset } => {
                EvalError::InvalidChoice(format!("{} (offset {})", message, offset))
            }
            other => EvalError::Parse(other),
        }
    }
}

/// Evaluation switches. `Default` gives a three-pass-or-more, warning,
/// strict-gate evaluation with an entropy-seeded RNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalOptions {
    /// Log every pass's output at `info` level instead of `trace`.
    pub trace: bool,
    /// Stop after a single pass.
    pub onepass: bool,
    /// Suppress warnings (they are still collected).
    pub silent: bool,
    /// Write resolved symbol and gate-operand values back into the context.
    pub preserve_lookups: bool,
    /// Script syntax version; 2 enables `(a|b)` choices.
    pub compatibility_version: u32,
    /// Treat malformed gate conditions as always-accept.
    pub lenient: bool,
    /// RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            trace: false,
            onepass: false,
            silent: false,
            preserve_lookups: false,
            compatibility_version: 3,
            lenient: false,
            seed: None,
        }
    }
}

/// A dynamic symbol's right-hand side, re-visited on every reference.
#[derive(Debug, Clone)]
pub struct Thunk {
    name: String,
    expr: Rc<Expr>,
}

impl Thunk {
    pub fn new(name: &str, expr: Expr) -> Self {
        Self {
            name: name.to_string(),
            expr: Rc::new(expr),
        }
    }

    pub fn call(&self, evaluator: &mut Evaluator) -> Result<String, EvalError> {
        evaluator.enter(&self.name)?;
        let result = evaluator.visit_expr(&self.expr);
        evaluator.depth -= 1;
        result
    }
}

/// A choice whose gate could not be decided yet.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub choice: Choice,
    pub operands: Vec<String>,
}

/// A once-deferred choice together with the outcome its gate reached.
#[derive(Debug, Clone)]
pub struct SettledGate {
    pub choice: Choice,
    pub outcome: GateOutcome,
}

/// Outcome of looking a name up in the symbol tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Value),
    /// Bound, but the value still contains script syntax.
    Partial(String),
    Missing,
}

pub struct Evaluator {
    dynamics: FxHashMap<String, Thunk>,
    statics: FxHashMap<String, String>,
    context: Context,
    choices: FxHashMap<String, String>,
    pending: FxHashMap<String, PendingRecord>,
    /// Deferred choices whose gate has since been decided. Each marker
    /// still referring to one draws again.
    settled: FxHashMap<String, SettledGate>,
    transforms: TransformRegistry,
    rng: StdRng,
    depth: usize,
    norepeat: bool,
    warnings: Vec<String>,
    options: EvalOptions,
}

impl Evaluator {
    pub fn new(context: Context, options: EvalOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            dynamics: FxHashMap::default(),
            statics: FxHashMap::default(),
            context,
            choices: FxHashMap::default(),
            pending: FxHashMap::default(),
            settled: FxHashMap::default(),
            transforms: TransformRegistry::new(),
            rng,
            depth: 0,
            norepeat: false,
            warnings: Vec::new(),
            options,
        }
    }

    /// Transforms consulted before the process-wide registry.
    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn into_context(self) -> Context {
        self.context
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub fn static_value(&self, name: &str) -> Option<&str> {
        self.statics.get(name).map(String::as_str)
    }

    pub fn is_dynamic(&self, name: &str) -> bool {
        self.dynamics.contains_key(name)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn warn(&mut self, message: String) {
        if !self.options.silent {
            tracing::warn!("{}", message);
        }
        self.warnings.push(message);
    }

    fn enter(&mut self, symbol: &str) -> Result<(), EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::MaxRecursion {
                symbol: symbol.to_string(),
                depth: MAX_DEPTH,
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Lex, parse and visit one pass over `source`.
    pub fn visit_source(&mut self, source: &str) -> Result<String, EvalError> {
        let tokens = tokenize(source)?;
        let script = Parser::new(source, tokens).parse_script()?;
        self.visit_script(&script)
    }

    pub fn visit_script(&mut self, script: &Script) -> Result<String, EvalError> {
        let mut out = String::new();
        for expr in &script.exprs {
            out.push_str(&self.visit_expr(expr)?);
        }
        Ok(out)
    }

    pub fn visit_expr(&mut self, expr: &Expr) -> Result<String, EvalError> {
        let mut out = String::new();
        for atom in &expr.atoms {
            out.push_str(&self.visit_atom(atom)?);
        }
        Ok(out)
    }

    fn visit_atom(&mut self, atom: &Atom) -> Result<String, EvalError> {
        match atom {
            Atom::Text(t) | Atom::Entity(t) => Ok(t.text.clone()),
            Atom::Choice(choice) => self.visit_choice(choice),
            Atom::Symbol(symbol) => self.visit_symbol(symbol),
            Atom::Assign(assign) => self.assign(&assign.symbol, &assign.value, false),
            Atom::Silent(silent) => self.visit_silent(silent),
            Atom::PendingGate(pending) => self.visit_pending(pending),
        }
    }

    // ── Symbols ──────────────────────────────────────────────────────

    /// Look `name` up: dynamics, then statics, then the context.
    pub fn resolve(&mut self, name: &str) -> Result<Lookup, EvalError> {
        if let Some(thunk) = self.dynamics.get(name).cloned() {
            let text = thunk.call(self)?;
            return Ok(if is_parseable(&text) {
                Lookup::Partial(text)
            } else {
                Lookup::Found(Value::Text(text))
            });
        }

        if let Some(text) = self.statics.get(name).cloned() {
            if !is_parseable(&text) {
                return Ok(Lookup::Found(Value::Text(text)));
            }
            self.enter(name)?;
            let refreshed = self.visit_source(&text);
            self.depth -= 1;
            let refreshed = refreshed?;
            if is_parseable(&refreshed) {
                return Ok(Lookup::Partial(refreshed));
            }
            self.statics.insert(name.to_string(), refreshed.clone());
            return Ok(Lookup::Found(Value::Text(refreshed)));
        }

        Ok(match self.context.lookup(name) {
            Some(value) => Lookup::Found(value.clone()),
            None => Lookup::Missing,
        })
    }

    fn visit_symbol(&mut self, symbol: &Symbol) -> Result<String, EvalError> {
        let name = symbol.name.as_str();
        if symbol.sigil == Sigil::Static && self.dynamics.contains_key(name) {
            if looks_like_entity(name) {
                return Ok(symbol.source.clone());
            }
            return Err(EvalError::StaticReference(name.to_string()));
        }

        if symbol.is_norepeat() {
            if self.statics.contains_key(name) {
                return Err(EvalError::InvalidChoice(format!(
                    "norepeat cannot apply to static symbol '{}'",
                    symbol.source
                )));
            }
            self.norepeat = self.dynamics.contains_key(name);
        }
        let lookup = self.resolve(name);
        self.norepeat = false;

        match lookup? {
            Lookup::Missing => {
                tracing::trace!(symbol = %symbol.source, "deferring unbound symbol");
                Ok(symbol.source.clone())
            }
            Lookup::Partial(text) => Ok(rewrap(&text, &symbol.transforms)),
            Lookup::Found(Value::Text(text)) if is_parseable(&text) => {
                Ok(rewrap(&text, &symbol.transforms))
            }
            Lookup::Found(value) => {
                if self.options.preserve_lookups {
                    self.context.insert(name, value.clone());
                }
                self.apply_transforms(value, &symbol.transforms)
            }
        }
    }

    /// Bind `symbol` to `value`. Static bindings are evaluated once;
    /// dynamic ones are captured as a thunk.
    fn assign(&mut self, symbol: &Symbol, value: &Expr, silent: bool) -> Result<String, EvalError> {
        let name = symbol.name.as_str();
        match symbol.sigil {
            Sigil::Static => {
                if let Some(existing) = self.statics.get(name) {
                    if !is_parseable(existing) {
                        let existing = existing.clone();
                        return Ok(if silent { String::new() } else { existing });
                    }
                }
                let text = self.visit_expr(value)?;
                self.dynamics.remove(name);
                self.statics.insert(name.to_string(), text.clone());
                if self.options.preserve_lookups && !is_parseable(&text) {
                    self.context.insert(name, text.clone());
                }
                Ok(if silent { String::new() } else { text })
            }
            Sigil::Dynamic => {
                self.statics.remove(name);
                self.dynamics
                    .insert(name.to_string(), Thunk::new(name, value.clone()));
                if silent {
                    return Ok(String::new());
                }
                match self.resolve(name)? {
                    Lookup::Found(v) => Ok(v.render()),
                    Lookup::Partial(text) => Ok(text),
                    Lookup::Missing => Ok(String::new()),
                }
            }
        }
    }

    fn visit_silent(&mut self, silent: &Silent) -> Result<String, EvalError> {
        if let Some(gate) = &silent.gate {
            match self.check_gate(gate)? {
                GateOutcome::Accept => {}
                GateOutcome::Reject => return Ok(String::new()),
                GateOutcome::Defer(operands) => {
                    tracing::debug!(?operands, "silent gate undecided; skipping assignment");
                    return Ok(String::new());
                }
            }
        }
        match &silent.value {
            Some(value) => {
                self.assign(&silent.symbol, value, true)?;
            }
            None => {
                self.visit_symbol(&silent.symbol)?;
            }
        }
        Ok(String::new())
    }

    // ── Transforms ───────────────────────────────────────────────────

    /// Apply transforms left to right. An unknown transform is kept as
    /// literal text (parentheses escaped) together with everything after it.
    pub fn apply_transforms(
        &mut self,
        value: Value,
        transforms: &[Transform],
    ) -> Result<String, EvalError> {
        let mut current = value;
        for (i, transform) in transforms.iter().enumerate() {
            if transform.is_norepeat() {
                continue;
            }
            match self.apply_transform(&current, transform)? {
                Some(next) => current = next,
                None => {
                    self.warn(format!("unresolved transform '{}'", transform.render()));
                    let mut out = current.render();
                    for rest in &transforms[i..] {
                        out.push('.');
                        out.push_str(&rest.name);
                        if rest.call {
                            out.push_str("&#40;&#41;");
                        }
                    }
                    return Ok(out);
                }
            }
        }
        Ok(current.render())
    }

    /// One transform step. A script binding of the same name replaces the
    /// value outright; otherwise callables and registries are tried.
    fn apply_transform(
        &mut self,
        value: &Value,
        transform: &Transform,
    ) -> Result<Option<Value>, EvalError> {
        let name = transform.name.as_str();

        if let Some(thunk) = self.dynamics.get(name).cloned() {
            return Ok(Some(Value::Text(thunk.call(self)?)));
        }
        if let Some(text) = self.statics.get(name) {
            return Ok(Some(Value::Text(text.clone())));
        }
        if let Some(Value::Func(f)) = self.context.get(name) {
            return Ok(Some(Value::Text(f.call(&value.render()))));
        }
        if let Some(f) = self.transforms.get(name).or_else(|| transforms::global(name)) {
            return Ok(Some(Value::Text(f(&value.render()))));
        }
        if !matches!(value, Value::Map(_)) {
            if let Some(out) = transforms::native(name, &value.render()) {
                return Ok(Some(Value::Text(out)));
            }
        }
        Ok(value.property(name))
    }

    // ── Choices and gates ────────────────────────────────────────────

    fn check_gate(&mut self, gate: &Gate) -> Result<GateOutcome, EvalError> {
        let compiled = match CompiledGate::parse(&gate.condition) {
            Ok(compiled) => compiled,
            Err(e) if self.options.lenient => {
                self.warn(format!("{}; accepting", e));
                return Ok(GateOutcome::Accept);
            }
            Err(e) => return Err(e.into()),
        };
        compiled.evaluate(|name| self.gate_operand(name))
    }

    fn gate_operand(&mut self, name: &str) -> Result<Option<Literal>, EvalError> {
        let value = match self.resolve(name)? {
            Lookup::Found(Value::Text(text)) if is_parseable(&text) => return Ok(None),
            Lookup::Found(value) => value,
            Lookup::Partial(_) | Lookup::Missing => return Ok(None),
        };
        if self.options.preserve_lookups {
            self.context.insert(name, value.clone());
        }
        Ok(Some(match value {
            Value::Number(n) => Literal::Number(n),
            Value::Bool(b) => Literal::Bool(b),
            other => Literal::Str(other.render()),
        }))
    }

    fn visit_choice(&mut self, choice: &Choice) -> Result<String, EvalError> {
        let norepeat = std::mem::take(&mut self.norepeat);
        if choice.transforms.iter().any(Transform::is_norepeat) {
            return Err(EvalError::InvalidChoice(format!(
                "norepeat is only valid on symbols: '{}'",
                choice.source
            )));
        }

        let key = choice_key(choice);
        let outcome = match &choice.gate {
            Some(gate) => self.check_gate(gate)?,
            None => GateOutcome::Accept,
        };
        if let GateOutcome::Defer(operands) = &outcome {
            tracing::debug!(key = %key, ?operands, "gate deferred");
            self.pending.insert(
                key.clone(),
                PendingRecord {
                    choice: choice.clone(),
                    operands: operands.clone(),
                },
            );
            return Ok(pending_marker(&key));
        }
        self.decide(choice, &key, &outcome, norepeat)
    }

    /// Select from the branch a decided gate outcome picks.
    fn decide(
        &mut self,
        choice: &Choice,
        key: &str,
        outcome: &GateOutcome,
        norepeat: bool,
    ) -> Result<String, EvalError> {
        let branch = match (outcome, &choice.else_options) {
            (GateOutcome::Reject, Some(else_options)) => else_options,
            (GateOutcome::Reject, None) => return Ok(String::new()),
            _ => &choice.options,
        };
        self.select(choice, key, branch, norepeat)
    }

    /// Weighted draw over `branch`, redrawing under norepeat until the
    /// value differs from the last one cached for `key`.
    fn select(
        &mut self,
        choice: &Choice,
        key: &str,
        branch: &OrExpr,
        norepeat: bool,
    ) -> Result<String, EvalError> {
        let mut weights: Vec<u64> = branch
            .alternatives
            .iter()
            .map(|alt| u64::from(alt.weight))
            .collect();
        loop {
            // Fails when every remaining weight is zero.
            let index = match WeightedIndex::<u64>::new(&weights) {
                Ok(dist) => self.rng.sample(dist),
                Err(_) => {
                    return Err(EvalError::InvalidChoice(format!(
                        "no alternatives left to select in '{}'",
                        choice.source
                    )))
                }
            };
            let text = self.visit_expr(&branch.alternatives[index].expr)?;
            let text = text.trim();

            if is_parseable(text) {
                return Ok(rewrap(text, &choice.transforms));
            }

            let value = self.apply_transforms(Value::Text(text.to_string()), &choice.transforms)?;
            if norepeat && self.choices.get(key) == Some(&value) {
                weights[index] = 0;
                continue;
            }
            self.choices.insert(key.to_string(), value.clone());
            return Ok(value);
        }
    }

    fn visit_pending(&mut self, pending: &PendingGate) -> Result<String, EvalError> {
        if let Some(done) = self.settled.get(&pending.key).cloned() {
            return self.decide(&done.choice, &pending.key, &done.outcome, false);
        }
        let record = self.pending.get(&pending.key).cloned().ok_or_else(|| {
            EvalError::InternalConsistency(format!(
                "pending gate '{}' has no record",
                pending.key
            ))
        })?;
        let gate = record.choice.gate.as_ref().ok_or_else(|| {
            EvalError::InternalConsistency(format!(
                "pending gate '{}' refers to an ungated choice",
                pending.key
            ))
        })?;

        match self.check_gate(gate)? {
            GateOutcome::Defer(operands) => {
                if let Some(entry) = self.pending.get_mut(&pending.key) {
                    entry.operands = operands;
                }
                Ok(pending_marker(&pending.key))
            }
            outcome => {
                self.pending.remove(&pending.key);
                self.settle(&pending.key, record.choice, outcome)
            }
        }
    }

    /// Record the decided outcome for `key` and draw once from it.
    fn settle(&mut self, key: &str, choice: Choice, outcome: GateOutcome) -> Result<String, EvalError> {
        let out = self.decide(&choice, key, &outcome, false)?;
        self.settled
            .insert(key.to_string(), SettledGate { choice, outcome });
        Ok(out)
    }

    /// Replace every pending marker in `text` with its choice evaluated as
    /// rejected: its gate operands never all resolved.
    pub fn settle_pending(&mut self, text: &str) -> Result<String, EvalError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(i) = rest.find(PENDING_PREFIX) {
            out.push_str(&rest[..i]);
            let after = &rest[i + PENDING_PREFIX.len()..];
            let digits = after.chars().take_while(char::is_ascii_hexdigit).count();
            if digits != 16 || !after[digits..].starts_with(PENDING_SUFFIX) {
                out.push_str(PENDING_PREFIX);
                rest = after;
                continue;
            }
            let key = &after[..digits];
            let forced = self.force_reject(key)?;
            if forced.contains(PENDING_PREFIX) {
                out.push_str(&self.settle_pending(&forced)?);
            } else {
                out.push_str(&forced);
            }
            rest = &after[digits + PENDING_SUFFIX.len()..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn force_reject(&mut self, key: &str) -> Result<String, EvalError> {
        if let Some(done) = self.settled.get(key).cloned() {
            return self.decide(&done.choice, key, &done.outcome, false);
        }
        let record = self.pending.remove(key).ok_or_else(|| {
            EvalError::InternalConsistency(format!("pending gate '{}' has no record", key))
        })?;
        tracing::debug!(key, operands = ?record.operands, "forcing undecided gate to reject");
        self.settle(key, record.choice, GateOutcome::Reject)
    }
}

/// Stable key for a choice: its source text and position.
pub fn choice_key(choice: &Choice) -> String {
    let mut hasher = FxHasher::default();
    choice.source.hash(&mut hasher);
    choice.span.start.hash(&mut hasher);
    choice.span.end.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Whether `text` still contains script syntax for a later pass.
pub fn is_parseable(text: &str) -> bool {
    if text.contains(['[', ']', '{', '}']) || text.contains(PENDING_PREFIX) {
        return true;
    }
    let mut prev = ' ';
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let sigil = c == '$' || (c == '#' && prev != '&');
        if sigil && chars.peek().is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') {
            return true;
        }
        prev = c;
    }
    false
}

/// Carry unapplied transforms into the next pass as a one-option choice.
fn rewrap(text: &str, transforms: &[Transform]) -> String {
    let kept: Vec<&Transform> = transforms.iter().filter(|t| !t.is_norepeat()).collect();
    if kept.is_empty() {
        return text.to_string();
    }
    let suffix: String = kept.iter().map(|t| t.render()).collect();
    format!("[{}]{}", text, suffix)
}

/// `#x41`-style names are the tail of a hex entity, not a symbol.
fn looks_like_entity(name: &str) -> bool {
    name.len() > 1
        && name.starts_with(['x', 'X'])
        && name[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seeded(seed: u64) -> Evaluator {
        Evaluator::new(
            Context::new(),
            EvalOptions {
                seed: Some(seed),
                silent: true,
                ..EvalOptions::default()
            },
        )
    }

    #[test]
    fn plain_text_passes_through() {
        let mut ev = seeded(1);
        assert_eq!(ev.visit_source("Hello, world.").unwrap(), "Hello, world.");
    }

    #[test]
    fn unbound_symbol_is_preserved() {
        let mut ev = seeded(1);
        assert_eq!(ev.visit_source("hi $who.cap").unwrap(), "hi $who.cap");
    }

    #[test]
    fn context_symbol_with_transform() {
        let mut ev = Evaluator::new(Context::new().with("who", "ada"), EvalOptions::default());
        assert_eq!(ev.visit_source("hi $who.cap()").unwrap(), "hi Ada");
    }

    #[test]
    fn static_assignment_is_cached() {
        let mut ev = seeded(7);
        let out = ev.visit_source("{#x=[a|b]}$x $x").unwrap();
        assert!(out == "a a" || out == "b b", "got {}", out);
        assert!(ev.static_value("x").is_some());
    }

    #[test]
    fn reassigning_resolved_static_keeps_first_value() {
        let mut ev = seeded(3);
        assert_eq!(ev.visit_source("{#x=one}{#x=two}$x").unwrap(), "one");
    }

    #[test]
    fn dynamic_and_static_are_disjoint() {
        let mut ev = seeded(3);
        ev.visit_source("{#x=one}{$x=two}").unwrap();
        assert!(ev.is_dynamic("x"));
        assert!(ev.static_value("x").is_none());
    }

    #[test]
    fn inline_assignment_emits_value() {
        let mut ev = seeded(3);
        assert_eq!(ev.visit_source("[$x=cat] and $x").unwrap(), "cat and cat");
    }

    #[test]
    fn static_reference_to_dynamic_is_error() {
        let mut ev = seeded(3);
        let err = ev.visit_source("{$x=a}#x").unwrap_err();
        assert!(matches!(err, EvalError::StaticReference(name) if name == "x"));
    }

    #[test]
    fn entity_like_static_reference_is_text() {
        let mut ev = seeded(3);
        assert_eq!(ev.visit_source("{$x41=a}#x41").unwrap(), "#x41");
    }

    #[test]
    fn norepeat_on_choice_is_invalid() {
        let mut ev = seeded(3);
        assert!(matches!(
            ev.visit_source("[a|b].nr"),
            Err(EvalError::InvalidChoice(_))
        ));
    }

    #[test]
    fn norepeat_on_static_is_invalid() {
        let mut ev = seeded(3);
        assert!(matches!(
            ev.visit_source("{#x=a}$x.nr"),
            Err(EvalError::InvalidChoice(_))
        ));
    }

    #[test]
    fn norepeat_exhausted_pool_is_invalid() {
        let mut ev = seeded(3);
        assert!(matches!(
            ev.visit_source("{$x=[a]}$x $x.nr"),
            Err(EvalError::InvalidChoice(_))
        ));
    }

    #[test]
    fn zero_weights_leave_empty_pool() {
        let mut ev = seeded(3);
        assert!(matches!(
            ev.visit_source("[a(0)|b(0)]"),
            Err(EvalError::InvalidChoice(_))
        ));
    }

    #[test]
    fn recursion_guard() {
        let mut ev = seeded(3);
        let err = ev.visit_source("{$a=$b}{$b=$a}$a").unwrap_err();
        assert!(matches!(err, EvalError::MaxRecursion { depth: MAX_DEPTH, .. }));
    }

    #[test]
    fn deferred_gate_emits_marker_and_records() {
        let mut ev = seeded(3);
        let out = ev.visit_source("[@{a: 1} yes]").unwrap();
        assert!(out.starts_with(PENDING_PREFIX), "got {}", out);
        assert_eq!(ev.pending_count(), 1);

        ev.visit_source("{$a=1}").unwrap();
        assert_eq!(ev.visit_source(&out).unwrap(), "yes");
        assert_eq!(ev.pending_count(), 0);
    }

    #[test]
    fn settle_forces_reject() {
        let mut ev = seeded(3);
        let out = ev.visit_source("<[@{a: 1} yes || no]>").unwrap();
        assert_eq!(ev.settle_pending(&out).unwrap(), "<no>");
    }

    #[test]
    fn unknown_marker_is_internal_error() {
        let mut ev = seeded(3);
        let marker = pending_marker("0123456789abcdef");
        assert!(matches!(
            ev.visit_source(&marker),
            Err(EvalError::InternalConsistency(_))
        ));
        assert!(matches!(
            ev.settle_pending(&marker),
            Err(EvalError::InternalConsistency(_))
        ));
    }

    #[test]
    fn unknown_transform_is_preserved_escaped() {
        let mut ev = seeded(3);
        assert_eq!(ev.visit_source("[cat].bogus()").unwrap(), "cat.bogus&#40;&#41;");
        assert_eq!(ev.warnings().len(), 1);
    }

    #[test]
    fn malformed_gate_strict_and_lenient() {
        let mut strict = seeded(3);
        assert!(matches!(
            strict.visit_source("[@{a: } x]"),
            Err(EvalError::Gate(_))
        ));

        let mut lenient = Evaluator::new(
            Context::new(),
            EvalOptions {
                lenient: true,
                silent: true,
                ..EvalOptions::default()
            },
        );
        assert_eq!(lenient.visit_source("[@{a: } x]").unwrap(), "x");
        assert_eq!(lenient.warnings().len(), 1);
    }

    #[test]
    fn preserve_lookups_writes_back() {
        let mut ev = Evaluator::new(
            Context::new(),
            EvalOptions {
                preserve_lookups: true,
                seed: Some(5),
                ..EvalOptions::default()
            },
        );
        ev.visit_source("{#hero=Ada}$hero").unwrap();
        assert_eq!(ev.context().get("hero"), Some(&Value::from("Ada")));
    }

    #[test]
    fn repeated_markers_draw_independently() {
        let varied = (0..40).any(|seed| {
            let mut ev = seeded(seed);
            let marked = ev.visit_source("{$g=[@{a: 1} x|y|z|w]}$g $g $g").unwrap();
            ev.visit_source("{$a=1}").unwrap();
            let out = ev.visit_source(&marked).unwrap();
            let words: Vec<&str> = out.split(' ').collect();
            assert_eq!(words.len(), 3, "got {}", out);
            words.iter().any(|w| *w != words[0])
        });
        assert!(varied);
    }

    #[test]
    fn forced_markers_draw_independently() {
        let varied = (0..40).any(|seed| {
            let mut ev = seeded(seed);
            let marked = ev
                .visit_source("{$g=[@{a: 1} q || x|y|z|w]}$g $g $g")
                .unwrap();
            let out = ev.settle_pending(&marked).unwrap();
            let words: Vec<&str> = out.split(' ').collect();
            words.iter().any(|w| *w != words[0])
        });
        assert!(varied);
    }

    #[test]
    fn script_bindings_act_as_transforms() {
        let mut ev = seeded(3);
        assert_eq!(ev.visit_source("{$big=HUGE}[cat].big").unwrap(), "HUGE");
        assert_eq!(ev.visit_source("{#tag=label}[x].tag()").unwrap(), "label");
        assert!(ev.warnings().is_empty());
    }

    #[test]
    fn huge_weights_draw_without_expansion() {
        let mut ev = seeded(3);
        assert_eq!(ev.visit_source("[a(4000000000)|b(0)]").unwrap(), "a");
        let out = ev.visit_source("[a(4000000000)|b(4000000000)]").unwrap();
        assert!(out == "a" || out == "b", "got {}", out);
    }

    #[test]
    fn parseable_detection() {
        assert!(is_parseable("a $b"));
        assert!(is_parseable("[x]"));
        assert!(is_parseable("#name"));
        assert!(!is_parseable("costs $5"));
        assert!(!is_parseable("&#91;x&#93;"));
        assert!(!is_parseable("plain"));
    }
}
