/// Script lexer — converts source text to a token stream.
///
/// Two modes: `Normal` scans text, symbols and choice punctuation;
/// `GateCapture` takes everything from a gate's opening brace up to the
/// brace that balances it as one opaque token.

use thiserror::Error;

use crate::schema::ast::Span;

/// Leading half of a pending-gate marker.
pub const PENDING_PREFIX: &str = "@@pending:";
/// Trailing half of a pending-gate marker.
pub const PENDING_SUFFIX: &str = "@@";

/// Render the placeholder emitted for a choice whose gate was deferred.
pub fn pending_marker(key: &str) -> String {
    format!("{}{}{}", PENDING_PREFIX, key, PENDING_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} at offset {offset}: '{snippet}'")]
pub struct LexError {
    pub reason: String,
    pub offset: usize,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Entity,
    Weight,
    ElseSep,
    OpenChoice,
    CloseChoice,
    OrSep,
    Eq,
    Symbol,
    Transform,
    OpenSilent,
    CloseSilent,
    PendingGate,
    Raw,
    Gate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    GateCapture,
}

/// Scan `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).lex()
}

pub struct Lexer<'src> {
    source: &'src str,
    pos: usize,
    mode: Mode,
    /// Start of the raw-text run currently being accumulated.
    raw_start: Option<usize>,
    tokens: Vec<Token>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            pos: 0,
            mode: Mode::Normal,
            raw_start: None,
            tokens: Vec::new(),
        }
    }

    pub fn lex(mut self) -> Result<Vec<Token>, LexError> {
        while self.pos < self.source.len() {
            match self.mode {
                Mode::Normal => self.scan_normal()?,
                Mode::GateCapture => self.scan_gate()?,
            }
        }
        self.flush_raw();
        Ok(self.tokens)
    }

    fn rest(&self) -> &'src str {
        &self.source[self.pos..]
    }

    fn error(&self, reason: &str, at: usize) -> LexError {
        LexError {
            reason: reason.to_string(),
            offset: at,
            snippet: self.source[at..].chars().take(24).collect(),
        }
    }

    fn push(&mut self, kind: TokenKind, len: usize) {
        let end = self.pos + len;
        self.tokens.push(Token {
            kind,
            text: self.source[self.pos..end].to_string(),
            span: Span::new(self.pos, end),
        });
        self.pos = end;
    }

    fn flush_raw(&mut self) {
        if let Some(start) = self.raw_start.take() {
            self.tokens.push(Token {
                kind: TokenKind::Raw,
                text: self.source[start..self.pos].to_string(),
                span: Span::new(start, self.pos),
            });
        }
    }

    fn scan_normal(&mut self) -> Result<(), LexError> {
        let rest = self.rest();
        if let Some((kind, len)) = match_token(rest) {
            self.flush_raw();
            self.push(kind, len);
            return Ok(());
        }

        if rest.starts_with('@') {
            if rest[1..].trim_start().starts_with('{') {
                self.flush_raw();
                self.mode = Mode::GateCapture;
                return Ok(());
            }
            return Err(self.error("unscannable '@' (expected a gate '@{...}')", self.pos));
        }

        if self.raw_start.is_none() {
            self.raw_start = Some(self.pos);
        }
        self.pos += rest.chars().next().map_or(1, char::len_utf8);
        Ok(())
    }

    /// Capture `@ {...}` as one `Gate` token whose text is the braced
    /// condition. Quoted strings are skipped when balancing braces.
    fn scan_gate(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let rest = self.rest();
        let open = match rest.find('{') {
            Some(i) => i,
            None => return Err(self.error("unterminated gate", start)),
        };

        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut close = None;

        for (i, c) in rest[open..].char_indices() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => quote = Some(c),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(open + i + 1);
                        break;
                    }
                }
                '@' => return Err(self.error("nested gate", start + open + i)),
                _ => {}
            }
        }

        let end = match close {
            Some(end) => end,
            None => return Err(self.error("unterminated gate", start)),
        };

        self.tokens.push(Token {
            kind: TokenKind::Gate,
            text: rest[open..end].to_string(),
            span: Span::new(start, start + end),
        });
        self.pos = start + end;
        self.mode = Mode::Normal;
        Ok(())
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Byte length of the identifier at the start of `s` (0 if none).
pub(crate) fn name_len(s: &str) -> usize {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_name_start(c) => {}
        _ => return 0,
    }
    1 + chars.take_while(|c| is_name_char(*c)).count()
}

/// Try each fixed token alternative, in priority order.
fn match_token(rest: &str) -> Option<(TokenKind, usize)> {
    let first = rest.chars().next()?;
    match first {
        '&' => entity_len(rest).map(|n| (TokenKind::Entity, n)),
        '(' => weight_len(rest).map(|n| (TokenKind::Weight, n)),
        '|' if rest.starts_with("||") => Some((TokenKind::ElseSep, 2)),
        '[' => Some((TokenKind::OpenChoice, 1)),
        ']' => Some((TokenKind::CloseChoice, 1)),
        '|' => Some((TokenKind::OrSep, 1)),
        '=' => Some((TokenKind::Eq, 1)),
        '$' | '#' => match name_len(&rest[1..]) {
            0 => None,
            n => Some((TokenKind::Symbol, 1 + n)),
        },
        '.' => match name_len(&rest[1..]) {
            0 => None,
            n if rest[1 + n..].starts_with("()") => Some((TokenKind::Transform, 3 + n)),
            n => Some((TokenKind::Transform, 1 + n)),
        },
        '{' => Some((TokenKind::OpenSilent, 1)),
        '}' => Some((TokenKind::CloseSilent, 1)),
        '@' => pending_len(rest).map(|n| (TokenKind::PendingGate, n)),
        _ => None,
    }
}

fn entity_len(rest: &str) -> Option<usize> {
    let body = &rest[1..];
    let n = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        let digits = hex.chars().take_while(char::is_ascii_hexdigit).count();
        if digits == 0 {
            return None;
        }
        2 + digits
    } else if let Some(dec) = body.strip_prefix('#') {
        let digits = dec.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        1 + digits
    } else {
        let alpha = body.chars().next().filter(char::is_ascii_alphabetic)?;
        alpha.len_utf8()
            + body[1..]
                .chars()
                .take_while(char::is_ascii_alphanumeric)
                .count()
    };
    if body[n..].starts_with(';') {
        Some(n + 2)
    } else {
        None
    }
}

fn weight_len(rest: &str) -> Option<usize> {
    let inner = &rest[1..];
    let lead = inner.len() - inner.trim_start().len();
    let digits = inner[lead..].chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let after = &inner[lead + digits..];
    let trail = after.len() - after.trim_start().len();
    if after[trail..].starts_with(')') {
        Some(1 + lead + digits + trail + 1)
    } else {
        None
    }
}

fn pending_len(rest: &str) -> Option<usize> {
    let key = rest.strip_prefix(PENDING_PREFIX)?;
    let digits = key.chars().take_while(char::is_ascii_hexdigit).count();
    if digits == 16 && key[digits..].starts_with(PENDING_SUFFIX) {
        Some(PENDING_PREFIX.len() + digits + PENDING_SUFFIX.len())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn plain_text_is_one_raw_token() {
        let toks = tokenize("Hello, world.").unwrap();
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenKind::Raw);
        assert_eq!(toks[0].text, "Hello, world.");
    }

    #[test]
    fn choice_with_weight() {
        use TokenKind::*;
        assert_eq!(
            kinds("[a|b (3)]"),
            vec![OpenChoice, Raw, OrSep, Raw, Weight, CloseChoice]
        );
    }

    #[test]
    fn symbol_with_transforms() {
        use TokenKind::*;
        let toks = tokenize("$hero.cap().s end").unwrap();
        assert_eq!(
            toks.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![Symbol, Transform, Transform, Raw]
        );
        assert_eq!(toks[1].text, ".cap()");
        assert_eq!(toks[0].span, Span::new(0, 5));
    }

    #[test]
    fn else_separator_beats_or() {
        use TokenKind::*;
        assert_eq!(kinds("a||b"), vec![Raw, ElseSep, Raw]);
    }

    #[test]
    fn entities() {
        use TokenKind::*;
        assert_eq!(kinds("&#91;&amp;&#x5D;"), vec![Entity, Entity, Entity]);
        // A bare ampersand is ordinary text.
        assert_eq!(kinds("fish & chips"), vec![Raw]);
    }

    #[test]
    fn lone_sigils_and_parens_are_text() {
        assert_eq!(kinds("costs $5 (approx). ok"), vec![TokenKind::Raw]);
    }

    #[test]
    fn gate_is_captured_whole() {
        let toks = tokenize("[@{a: {$exists: true}} hi]").unwrap();
        assert_eq!(toks[1].kind, TokenKind::Gate);
        assert_eq!(toks[1].text, "{a: {$exists: true}}");
        assert_eq!(toks[2].text, " hi");
    }

    #[test]
    fn gate_braces_inside_quotes_ignored() {
        let toks = tokenize("[@{a: '}'} x]").unwrap();
        assert_eq!(toks[1].text, "{a: '}'}");
    }

    #[test]
    fn pending_marker_token() {
        let src = format!("x {} y", pending_marker("00ff00ff00ff00ff"));
        let toks = tokenize(&src).unwrap();
        assert_eq!(toks[1].kind, TokenKind::PendingGate);
    }

    #[test]
    fn stray_at_is_error() {
        let err = tokenize("mail me @ home").unwrap_err();
        assert_eq!(err.offset, 8);
        assert!(err.snippet.starts_with("@ home"));
    }

    #[test]
    fn unterminated_gate_is_error() {
        assert!(tokenize("[@{a: 1 hi]").is_err());
    }

    #[test]
    fn nested_gate_is_error() {
        assert!(tokenize("[@{a: @{b: 1}} hi]").is_err());
    }
}
