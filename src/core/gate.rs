/// Gate engine: relaxed object-literal conditions and their evaluation.
///
/// A gate such as `@{mood: 'tense', level: {$gte: 3}}` is parsed into a
/// condition tree. Every non-operator key names an operand that must be
/// bound before the gate can be decided; until then evaluation defers.

use regex::{Regex, RegexBuilder};
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid gate '{condition}': {message}")]
pub struct GateError {
    pub condition: String,
    pub message: String,
}

/// A literal value in condition syntax, also used for resolved operands.
#[derive(Debug, Clone)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Regex(Regex),
    Array(Vec<Literal>),
    Object(Vec<(String, Literal)>),
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Null, Literal::Null) => true,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Number(a), Literal::Number(b)) => a == b,
            (Literal::Str(a), Literal::Str(b)) => a == b,
            (Literal::Regex(a), Literal::Regex(b)) => a.as_str() == b.as_str(),
            (Literal::Array(a), Literal::Array(b)) => a == b,
            (Literal::Object(a), Literal::Object(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(Literal),
    Ne(Literal),
    Gt(Literal),
    Gte(Literal),
    Lt(Literal),
    Lte(Literal),
    Exists(bool),
    In(Vec<Literal>),
    Nin(Vec<Literal>),
    Matches(Regex),
}

#[derive(Debug, Clone)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Field { name: String, preds: Vec<Predicate> },
}

/// Result of evaluating a gate against the current bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Accept,
    Reject,
    /// Some operands are still unbound; carries just those names.
    Defer(Vec<String>),
}

/// A parsed gate with its operand names extracted.
#[derive(Debug, Clone)]
pub struct CompiledGate {
    pub condition: Condition,
    operands: Vec<String>,
}

impl CompiledGate {
    /// Parse a braced condition such as `{a: {$exists: true}}`.
    pub fn parse(text: &str) -> Result<CompiledGate, GateError> {
        let invalid = |message: String| GateError {
            condition: text.to_string(),
            message,
        };
        let literal = JsolParser::new(text).parse_document().map_err(invalid)?;
        let condition = match literal {
            Literal::Object(fields) => compile_object(&fields).map_err(invalid)?,
            _ => return Err(invalid("a gate condition must be an object".to_string())),
        };
        let mut operands = Vec::new();
        collect_operands(&condition, &mut operands);
        Ok(CompiledGate {
            condition,
            operands,
        })
    }

    pub fn operands(&self) -> &[String] {
        &self.operands
    }

    /// Resolve every operand through `resolve`, then test the condition.
    ///
    /// `resolve` returns `None` for an unbound operand. A failed test is
    /// retried once with numeric-looking string operands coerced to numbers.
    pub fn evaluate<F, E>(&self, mut resolve: F) -> Result<GateOutcome, E>
    where
        F: FnMut(&str) -> Result<Option<Literal>, E>,
    {
        let mut values = FxHashMap::default();
        let mut unresolved = Vec::new();
        for name in &self.operands {
            match resolve(name)? {
                Some(value) => {
                    values.insert(name.clone(), value);
                }
                None => unresolved.push(name.clone()),
            }
        }
        if !unresolved.is_empty() {
            return Ok(GateOutcome::Defer(unresolved));
        }
        Ok(if self.test(&values) {
            GateOutcome::Accept
        } else {
            GateOutcome::Reject
        })
    }

    /// Test against fully resolved operand values.
    pub fn test(&self, values: &FxHashMap<String, Literal>) -> bool {
        if matches(&self.condition, values) {
            return true;
        }
        let mut coerced = false;
        let retry: FxHashMap<String, Literal> = values
            .iter()
            .map(|(name, value)| match value {
                Literal::Str(s) if is_numeric(s) => {
                    coerced = true;
                    (name.clone(), Literal::Number(s.trim().parse().unwrap_or(f64::NAN)))
                }
                other => (name.clone(), other.clone()),
            })
            .collect();
        coerced && matches(&self.condition, &retry)
    }
}

fn is_numeric(s: &str) -> bool {
    let s = s.trim();
    s.chars().any(|c| c.is_ascii_digit())
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && s.parse::<f64>().is_ok()
}

// ── Compilation ──────────────────────────────────────────────────────

const LOGICAL_OPS: &[&str] = &["$and", "$or"];
const FIELD_OPS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$exists", "$in", "$nin", "$regex", "$options",
];

fn compile_object(fields: &[(String, Literal)]) -> Result<Condition, String> {
    let mut parts = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        match key.as_str() {
            "$and" | "$or" => {
                let items = match value {
                    Literal::Array(items) => items,
                    _ => return Err(format!("'{}' expects an array of conditions", key)),
                };
                let mut subs = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Literal::Object(f) => subs.push(compile_object(f)?),
                        _ => return Err(format!("'{}' entries must be objects", key)),
                    }
                }
                parts.push(if key == "$and" {
                    Condition::And(subs)
                } else {
                    Condition::Or(subs)
                });
            }
            k if FIELD_OPS.contains(&k) => {
                return Err(format!("operator '{}' must apply to a field", k));
            }
            k => {
                let name = k.trim_start_matches(['$', '#']);
                if name.is_empty() {
                    return Err(format!("invalid field name '{}'", k));
                }
                parts.push(Condition::Field {
                    name: name.to_string(),
                    preds: compile_field(value)?,
                });
            }
        }
    }
    Ok(if parts.len() == 1 {
        parts.remove(0)
    } else {
        Condition::And(parts)
    })
}

fn compile_field(value: &Literal) -> Result<Vec<Predicate>, String> {
    let ops = match value {
        Literal::Regex(re) => return Ok(vec![Predicate::Matches(re.clone())]),
        Literal::Object(ops) if ops.iter().any(|(k, _)| k.starts_with('$')) => ops,
        other => return Ok(vec![Predicate::Eq(other.clone())]),
    };

    let mut preds = Vec::with_capacity(ops.len());
    let mut regex_source: Option<String> = None;
    let mut regex_options = String::new();
    for (op, arg) in ops {
        let pred = match op.as_str() {
            "$eq" => Predicate::Eq(arg.clone()),
            "$ne" => Predicate::Ne(arg.clone()),
            "$gt" => Predicate::Gt(arg.clone()),
            "$gte" => Predicate::Gte(arg.clone()),
            "$lt" => Predicate::Lt(arg.clone()),
            "$lte" => Predicate::Lte(arg.clone()),
            "$exists" => Predicate::Exists(truthy(arg)),
            "$in" | "$nin" => {
                let items = match arg {
                    Literal::Array(items) => items.clone(),
                    _ => return Err(format!("'{}' expects an array", op)),
                };
                if op == "$in" {
                    Predicate::In(items)
                } else {
                    Predicate::Nin(items)
                }
            }
            "$regex" => {
                match arg {
                    Literal::Str(s) => regex_source = Some(s.clone()),
                    Literal::Regex(re) => preds.push(Predicate::Matches(re.clone())),
                    _ => return Err("'$regex' expects a string or /pattern/".to_string()),
                }
                continue;
            }
            "$options" => {
                match arg {
                    Literal::Str(s) => regex_options = s.clone(),
                    _ => return Err("'$options' expects a string".to_string()),
                }
                continue;
            }
            k if LOGICAL_OPS.contains(&k) => {
                return Err(format!("'{}' is not valid inside a field condition", k));
            }
            k if k.starts_with('$') => return Err(format!("unknown operator '{}'", k)),
            k => return Err(format!("cannot mix operators with plain key '{}'", k)),
        };
        preds.push(pred);
    }
    if let Some(source) = regex_source {
        preds.push(Predicate::Matches(build_regex(&source, &regex_options)?));
    }
    Ok(preds)
}

fn truthy(lit: &Literal) -> bool {
    match lit {
        Literal::Null => false,
        Literal::Bool(b) => *b,
        Literal::Number(n) => *n != 0.0,
        Literal::Str(s) => !s.is_empty(),
        _ => true,
    }
}

fn build_regex(source: &str, flags: &str) -> Result<Regex, String> {
    let mut builder = RegexBuilder::new(source);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'g' | 'u' => &mut builder,
            other => return Err(format!("unsupported regex flag '{}'", other)),
        };
    }
    builder
        .build()
        .map_err(|e| format!("invalid regex /{}/: {}", source, e))
}

fn collect_operands(condition: &Condition, out: &mut Vec<String>) {
    match condition {
        Condition::And(subs) | Condition::Or(subs) => {
            for sub in subs {
                collect_operands(sub, out);
            }
        }
        Condition::Field { name, .. } => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
    }
}

// ── Matching ─────────────────────────────────────────────────────────

fn matches(condition: &Condition, values: &FxHashMap<String, Literal>) -> bool {
    match condition {
        // Empty $and accepts, empty $or rejects.
        Condition::And(subs) => subs.iter().all(|c| matches(c, values)),
        Condition::Or(subs) => subs.iter().any(|c| matches(c, values)),
        Condition::Field { name, preds } => {
            let value = values.get(name);
            preds.iter().all(|p| test_predicate(p, value))
        }
    }
}

fn test_predicate(pred: &Predicate, value: Option<&Literal>) -> bool {
    match pred {
        Predicate::Exists(want) => value.is_some() == *want,
        Predicate::Eq(expected) => equals(value, expected),
        Predicate::Ne(expected) => !equals(value, expected),
        Predicate::In(items) => items.iter().any(|item| equals(value, item)),
        Predicate::Nin(items) => !items.iter().any(|item| equals(value, item)),
        Predicate::Matches(re) => matches!(value, Some(Literal::Str(s)) if re.is_match(s)),
        Predicate::Gt(bound) => compare(value, bound).is_some_and(|o| o.is_gt()),
        Predicate::Gte(bound) => compare(value, bound).is_some_and(|o| o.is_ge()),
        Predicate::Lt(bound) => compare(value, bound).is_some_and(|o| o.is_lt()),
        Predicate::Lte(bound) => compare(value, bound).is_some_and(|o| o.is_le()),
    }
}

fn equals(value: Option<&Literal>, expected: &Literal) -> bool {
    match (value, expected) {
        (None, Literal::Null) => true,
        (Some(Literal::Str(s)), Literal::Regex(re)) => re.is_match(s),
        (Some(v), e) => v == e,
        (None, _) => false,
    }
}

fn compare(value: Option<&Literal>, bound: &Literal) -> Option<std::cmp::Ordering> {
    match (value?, bound) {
        (Literal::Number(a), Literal::Number(b)) => a.partial_cmp(b),
        (Literal::Str(a), Literal::Str(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// ── JSOL parsing ─────────────────────────────────────────────────────

/// Relaxed object-literal syntax: bare keys, single or double quotes,
/// `/pattern/flags` regexes, trailing commas.
struct JsolParser {
    chars: Vec<char>,
    pos: usize,
}

impl JsolParser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn parse_document(&mut self) -> Result<Literal, String> {
        let value = self.parse_value()?;
        self.skip_ws();
        if self.pos < self.chars.len() {
            return Err(format!("unexpected '{}' after condition", self.rest()));
        }
        Ok(value)
    }

    fn rest(&self) -> String {
        self.chars[self.pos..].iter().take(16).collect()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<(), String> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{}' at '{}'", c, self.rest()))
        }
    }

    fn parse_value(&mut self) -> Result<Literal, String> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some(q @ ('"' | '\'')) => self.parse_string(q).map(Literal::Str),
            Some('/') => self.parse_regex(),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.parse_number(),
            Some(c) if is_bare_char(c) => {
                let word = self.parse_bare();
                Ok(match word.as_str() {
                    "true" => Literal::Bool(true),
                    "false" => Literal::Bool(false),
                    "null" => Literal::Null,
                    _ => Literal::Str(word),
                })
            }
            Some(c) => Err(format!("unexpected '{}'", c)),
            None => Err("unexpected end of condition".to_string()),
        }
    }

    fn parse_object(&mut self) -> Result<Literal, String> {
        self.expect('{')?;
        let mut fields = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(Literal::Object(fields));
                }
                Some(q @ ('"' | '\'')) => {
                    let key = self.parse_string(q)?;
                    self.expect(':')?;
                    fields.push((key, self.parse_value()?));
                }
                Some(c) if is_bare_char(c) => {
                    let key = self.parse_bare();
                    self.expect(':')?;
                    fields.push((key, self.parse_value()?));
                }
                Some(c) => return Err(format!("unexpected '{}' in object", c)),
                None => return Err("unclosed '{'".to_string()),
            }
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                _ => return Err(format!("expected ',' or '}}' at '{}'", self.rest())),
            }
        }
    }

    fn parse_array(&mut self) -> Result<Literal, String> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.pos += 1;
                return Ok(Literal::Array(items));
            }
            if self.peek().is_none() {
                return Err("unclosed '['".to_string());
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {}
                _ => return Err(format!("expected ',' or ']' at '{}'", self.rest())),
            }
        }
    }

    fn parse_string(&mut self, quote: char) -> Result<String, String> {
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    let escaped = self.peek().ok_or("unterminated string")?;
                    self.pos += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err("unterminated string".to_string())
    }

    fn parse_regex(&mut self) -> Result<Literal, String> {
        self.pos += 1;
        let mut source = String::new();
        let mut closed = false;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    source.push('\\');
                    if let Some(next) = self.peek() {
                        // `\/` is only an escape for the delimiter.
                        if next == '/' {
                            source.pop();
                        }
                        source.push(next);
                        self.pos += 1;
                    }
                }
                '/' => {
                    closed = true;
                    break;
                }
                c => source.push(c),
            }
        }
        if !closed {
            return Err("unterminated regex".to_string());
        }
        let mut flags = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_alphabetic) {
            flags.push(c);
            self.pos += 1;
        }
        build_regex(&source, &flags).map(Literal::Regex)
    }

    fn parse_number(&mut self) -> Result<Literal, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Literal::Number)
            .map_err(|_| format!("invalid number '{}'", text))
    }

    fn parse_bare(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_bare_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }
}

fn is_bare_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '#' | '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eval(gate: &str, bindings: &[(&str, Literal)]) -> GateOutcome {
        let compiled = CompiledGate::parse(gate).unwrap();
        compiled
            .evaluate::<_, ()>(|name| {
                Ok(bindings
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| v.clone()))
            })
            .unwrap()
    }

    fn s(v: &str) -> Literal {
        Literal::Str(v.to_string())
    }

    #[test]
    fn implicit_equality() {
        assert_eq!(eval("{mood: 'tense'}", &[("mood", s("tense"))]), GateOutcome::Accept);
        assert_eq!(eval("{mood: \"calm\"}", &[("mood", s("tense"))]), GateOutcome::Reject);
    }

    #[test]
    fn bare_word_values_are_strings() {
        assert_eq!(eval("{mood: tense}", &[("mood", s("tense"))]), GateOutcome::Accept);
    }

    #[test]
    fn exists_operator() {
        assert_eq!(eval("{a: {$exists: true}}", &[("a", s("x"))]), GateOutcome::Accept);
        assert_eq!(
            eval("{a: {$exists: true}}", &[]),
            GateOutcome::Defer(vec!["a".to_string()])
        );
    }

    #[test]
    fn defer_carries_only_unresolved_operands() {
        assert_eq!(
            eval("{a: 1, b: 2, c: 3}", &[("b", Literal::Number(2.0))]),
            GateOutcome::Defer(vec!["a".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn comparison_operators() {
        let n = |v: f64| Literal::Number(v);
        assert_eq!(eval("{x: {$gt: 3}}", &[("x", n(4.0))]), GateOutcome::Accept);
        assert_eq!(eval("{x: {$gte: 4, $lt: 5}}", &[("x", n(4.0))]), GateOutcome::Accept);
        assert_eq!(eval("{x: {$lte: 3}}", &[("x", n(4.0))]), GateOutcome::Reject);
        assert_eq!(eval("{x: {$ne: 3}}", &[("x", n(4.0))]), GateOutcome::Accept);
    }

    #[test]
    fn numeric_strings_are_retried_as_numbers() {
        assert_eq!(eval("{x: {$gt: 3}}", &[("x", s("10"))]), GateOutcome::Accept);
        assert_eq!(eval("{x: 10}", &[("x", s("10"))]), GateOutcome::Accept);
        assert_eq!(eval("{x: {$gt: 30}}", &[("x", s("10"))]), GateOutcome::Reject);
        // Non-numeric strings are never coerced.
        assert_eq!(eval("{x: {$gt: 3}}", &[("x", s("ten"))]), GateOutcome::Reject);
    }

    #[test]
    fn regex_match() {
        assert_eq!(eval("{name: /^jo/i}", &[("name", s("Joan"))]), GateOutcome::Accept);
        assert_eq!(eval("{name: /^jo/}", &[("name", s("Joan"))]), GateOutcome::Reject);
        assert_eq!(
            eval("{name: {$regex: 'an$', $options: 'i'}}", &[("name", s("JOAN"))]),
            GateOutcome::Accept
        );
    }

    #[test]
    fn composite_operators() {
        let env = [("a", s("1")), ("b", s("2"))];
        assert_eq!(eval("{$or: [{a: 'x'}, {b: '2'}]}", &env), GateOutcome::Accept);
        assert_eq!(eval("{$and: [{a: '1'}, {b: 'x'}]}", &env), GateOutcome::Reject);
    }

    #[test]
    fn empty_and_accepts_empty_or_rejects() {
        assert_eq!(eval("{$and: []}", &[]), GateOutcome::Accept);
        assert_eq!(eval("{$or: []}", &[]), GateOutcome::Reject);
    }

    #[test]
    fn in_and_nin() {
        assert_eq!(eval("{c: {$in: ['red', 'blue']}}", &[("c", s("red"))]), GateOutcome::Accept);
        assert_eq!(eval("{c: {$nin: ['red']}}", &[("c", s("red"))]), GateOutcome::Reject);
    }

    #[test]
    fn operands_are_deduplicated() {
        let gate = CompiledGate::parse("{$or: [{a: 1}, {a: 2}, {$b: 3}]}").unwrap();
        assert_eq!(gate.operands(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn malformed_conditions_are_errors() {
        assert!(CompiledGate::parse("{a: }").is_err());
        assert!(CompiledGate::parse("{a: {$bogus: 1}}").is_err());
        assert!(CompiledGate::parse("{$or: {a: 1}}").is_err());
        assert!(CompiledGate::parse("[1, 2]").is_err());
        assert!(CompiledGate::parse("{a: 'open}").is_err());
    }
}
