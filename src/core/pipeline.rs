/// The script pipeline: preprocess → repeated lex/parse/visit → settle →
/// decode.
///
/// `ScriptEngine` carries the caller's context, options and transform
/// overrides; each `evaluate` call runs on a fresh evaluator.

use lazy_static::lazy_static;
use regex::Regex;

use crate::core::context::Context;
use crate::core::entities::{EntityCodec, HtmlEntities};
use crate::core::evaluator::{EvalError, EvalOptions, Evaluator};
use crate::core::transforms::TransformRegistry;

/// Upper bound on lex/parse/visit passes per evaluation.
pub const MAX_PASSES: usize = 10;

/// Characters a backslash turns into literal text.
const RESERVED: &[char] = &[
    '[', ']', '{', '}', '|', '$', '#', '@', '(', ')', '=', '.', '&', '\\',
];

lazy_static! {
    static ref ASSIGNMENT_LINE: Regex =
        Regex::new(r"^[ \t]*([$#])([^\s=\[\]{}|.()]+)[ \t]*=[ \t]*(.*?)[ \t]*$").unwrap();
    static ref SYMBOL_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref SIGIL_NAME: Regex = Regex::new(r"[$#][A-Za-z_][A-Za-z0-9_]*").unwrap();
}

/// Result of an evaluation with its side channels.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub text: String,
    pub warnings: Vec<String>,
    /// Context after evaluation; holds resolved values when
    /// `preserve_lookups` is set.
    pub context: Context,
    pub passes: usize,
}

/// Evaluates scripts. Built via `ScriptEngine::builder()`.
#[derive(Debug)]
pub struct ScriptEngine {
    context: Context,
    options: EvalOptions,
    transforms: TransformRegistry,
    evaluation_count: u64,
}

/// Builder for constructing a `ScriptEngine`.
pub struct ScriptEngineBuilder {
    context: Context,
    options: EvalOptions,
    seed: Option<u64>,
    transforms: TransformRegistry,
}

impl ScriptEngine {
    pub fn builder() -> ScriptEngineBuilder {
        ScriptEngineBuilder {
            context: Context::new(),
            options: EvalOptions::default(),
            seed: None,
            transforms: TransformRegistry::new(),
        }
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Evaluate `script` to its final text.
    pub fn evaluate(&mut self, script: &str) -> Result<String, EvalError> {
        self.evaluate_detailed(script).map(|e| e.text)
    }

    /// Evaluate `script`, returning warnings and the final context as well.
    pub fn evaluate_detailed(&mut self, script: &str) -> Result<Evaluation, EvalError> {
        let mut options = self.options.clone();
        // Seeded engines stay reproducible per call while still varying
        // between successive calls.
        options.seed = options
            .seed
            .map(|seed| seed.wrapping_add(self.evaluation_count));
        self.evaluation_count += 1;

        let evaluator = Evaluator::new(self.context.clone(), options)
            .with_transforms(self.transforms.clone());
        run(evaluator, script)
    }
}

impl ScriptEngineBuilder {
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Replace all options. A seed set with `.seed()` still wins.
    pub fn options(mut self, options: EvalOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a transform for this engine only, shadowing any global
    /// transform of the same name.
    pub fn transform<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.transforms.register(name, f);
        self
    }

    pub fn build(self) -> Result<ScriptEngine, EvalError> {
        let mut options = self.options;
        check_options(&options)?;
        if self.seed.is_some() {
            options.seed = self.seed;
        }
        Ok(ScriptEngine {
            context: self.context,
            options,
            transforms: self.transforms,
            evaluation_count: 0,
        })
    }
}

/// One-shot evaluation without building an engine.
pub fn evaluate(script: &str, context: Context, options: EvalOptions) -> Result<String, EvalError> {
    ScriptEngine::builder()
        .context(context)
        .options(options)
        .build()?
        .evaluate(script)
}

fn check_options(options: &EvalOptions) -> Result<(), EvalError> {
    match options.compatibility_version {
        2 | 3 => Ok(()),
        v => Err(EvalError::InvalidOption(format!(
            "unsupported compatibility version {} (expected 2 or 3)",
            v
        ))),
    }
}

fn run(mut evaluator: Evaluator, script: &str) -> Result<Evaluation, EvalError> {
    check_options(evaluator.options())?;
    let options = evaluator.options().clone();

    let mut text = preprocess(script, &options)?;
    let mut passes = 0;
    while passes < MAX_PASSES {
        passes += 1;
        let out = evaluator.visit_source(&text)?;
        if options.trace {
            tracing::info!(pass = passes, output = %out, "pass complete");
        } else {
            tracing::trace!(pass = passes, output = %out, "pass complete");
        }
        let stable = out == text;
        text = out;
        if stable || options.onepass {
            break;
        }
    }
    tracing::debug!(passes, pending = evaluator.pending_count(), "evaluation settled");

    let text = evaluator.settle_pending(&text)?;

    let leftovers = leftover_symbols(&text);
    if !leftovers.is_empty() {
        let message = format!("unresolved symbol(s): {}", leftovers.join(", "));
        evaluator.warn(message);
    }

    let text = finish(&HtmlEntities.decode(&text), script.ends_with('\n'));
    Ok(Evaluation {
        text,
        warnings: evaluator.take_warnings(),
        context: evaluator.into_context(),
        passes,
    })
}

/// Sigil names still visible in `text`. `&#N;` entities are not symbols.
fn leftover_symbols(text: &str) -> Vec<&str> {
    SIGIL_NAME
        .find_iter(text)
        .filter(|m| m.start() == 0 || text.as_bytes()[m.start() - 1] != b'&')
        .map(|m| m.as_str())
        .collect()
}

/// Apply escapes, compatibility rewrites and assignment-line folding.
pub fn preprocess(script: &str, options: &EvalOptions) -> Result<String, EvalError> {
    let mut text = escape_reserved(script);
    if options.compatibility_version == 2 {
        text = parens_to_choices(&text);
    }
    fold_assignment_lines(&text)
}

/// `\[` → `&#91;` and so on; other backslashes are left alone.
fn escape_reserved(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut chars = script.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if RESERVED.contains(&next) {
                    chars.next();
                    out.push_str(&HtmlEntities.encode(next));
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// `(a|b)` → `[a|b]` for groups holding a top-level `|`.
fn parens_to_choices(text: &str) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    // (index of '(', saw a '|' at this level)
    let mut open: Vec<(usize, bool)> = Vec::new();
    for i in 0..chars.len() {
        match chars[i] {
            '(' => open.push((i, false)),
            '|' => {
                if let Some(top) = open.last_mut() {
                    top.1 = true;
                }
            }
            ')' => {
                if let Some((start, has_bar)) = open.pop() {
                    if has_bar {
                        chars[start] = '[';
                        chars[i] = ']';
                    }
                }
            }
            _ => {}
        }
    }
    chars.into_iter().collect()
}

/// Rewrite `$name = value` lines to `{$name=value}`, dropping the newline.
fn fold_assignment_lines(text: &str) -> Result<String, EvalError> {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let caps = match ASSIGNMENT_LINE.captures(body) {
            Some(caps) => caps,
            None => {
                out.push_str(line);
                continue;
            }
        };
        let sigil = &caps[1];
        let name = &caps[2];
        let value = &caps[3];
        if !SYMBOL_NAME.is_match(name) {
            return Err(EvalError::InvalidAssignment(format!(
                "invalid symbol name in '{}'",
                body.trim()
            )));
        }
        if value.is_empty() {
            return Err(EvalError::InvalidAssignment(format!(
                "missing value in '{}'",
                body.trim()
            )));
        }
        out.push_str(&format!("{{{}{}={}}}", sigil, name, value));
    }
    Ok(out)
}

/// Normalise exotic spaces and restore the input's trailing newline.
fn finish(text: &str, trailing_newline: bool) -> String {
    let mut out: String = text
        .chars()
        .map(|c| match c {
            '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}' => ' ',
            c => c,
        })
        .collect();
    let kept = out.trim_end_matches('\n').len();
    out.truncate(kept);
    if trailing_newline {
        out.push('\n');
    }
    out
}
