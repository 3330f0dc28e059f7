/// Recursive-descent parser: token stream → typed syntax tree.
///
/// Stops at the first grammar mismatch; there is no recovery.

use thiserror::Error;

use crate::core::lexer::{Token, TokenKind};
use crate::schema::ast::{
    Assign, Atom, Choice, Expr, Gate, OrExpr, PendingGate, Script, Sigil, Silent, Span, Symbol,
    Text, Transform, WeightedExpr,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("parse error at offset {offset}: {message}")]
    Syntax { message: String, offset: usize },
    #[error("invalid choice at offset {offset}: {message}")]
    InvalidChoice { message: String, offset: usize },
}

/// Where an expression is being parsed; decides which tokens end it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    TopLevel,
    Choice,
    Silent,
}

pub struct Parser<'src> {
    source: &'src str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    /// `script = expr*`
    pub fn parse_script(mut self) -> Result<Script, ParseError> {
        let mut exprs = Vec::new();
        while let Some(token) = self.peek() {
            if is_closer(token.kind) {
                return Err(self.unexpected(token));
            }
            match self.parse_expr(Scope::TopLevel)? {
                Some(expr) => exprs.push(expr),
                None => break,
            }
        }
        Ok(Script {
            exprs,
            span: Span::new(0, self.source.len()),
        })
    }

    // ── Token cursor ─────────────────────────────────────────────────

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_kind_at(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + n).map(|t| t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.source.len(), |t| t.span.start)
    }

    fn syntax(&self, message: impl Into<String>, offset: usize) -> ParseError {
        ParseError::Syntax {
            message: message.into(),
            offset,
        }
    }

    fn unexpected(&self, token: &Token) -> ParseError {
        self.syntax(format!("unexpected '{}'", token.text), token.span.start)
    }

    /// Skip raw tokens made only of whitespace.
    fn skip_blank(&mut self) {
        while let Some(t) = self.peek() {
            if t.kind == TokenKind::Raw && t.text.trim().is_empty() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    // ── Grammar rules ────────────────────────────────────────────────

    /// `expr = atom+`; `None` when no atom could be read.
    fn parse_expr(&mut self, scope: Scope) -> Result<Option<Expr>, ParseError> {
        let mut atoms = Vec::new();
        while let Some(kind) = self.peek_kind() {
            if ends_expr(kind, scope) {
                break;
            }
            atoms.push(self.parse_atom(scope)?);
        }
        Ok(make_expr(atoms))
    }

    /// `atom = choice | assign | symbol | silent | pendingGate | text | entity`
    fn parse_atom(&mut self, scope: Scope) -> Result<Atom, ParseError> {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.syntax("unexpected end of input", self.source.len())),
        };
        match token.kind {
            TokenKind::OpenChoice => self.parse_choice().map(Atom::Choice),
            TokenKind::Symbol if self.peek_kind_at(1) == Some(TokenKind::Eq) => {
                self.parse_assign(scope).map(Atom::Assign)
            }
            TokenKind::Symbol => self.parse_symbol().map(Atom::Symbol),
            TokenKind::OpenSilent => self.parse_silent().map(Atom::Silent),
            TokenKind::PendingGate => {
                self.advance();
                let key = token.text[crate::core::lexer::PENDING_PREFIX.len()
                    ..token.text.len() - crate::core::lexer::PENDING_SUFFIX.len()]
                    .to_string();
                Ok(Atom::PendingGate(PendingGate {
                    key,
                    span: token.span,
                }))
            }
            TokenKind::Entity => {
                self.advance();
                Ok(Atom::Entity(Text {
                    text: token.text,
                    span: token.span,
                }))
            }
            // Suffix and weight tokens outside their positions are literal text.
            TokenKind::Raw | TokenKind::Transform | TokenKind::Eq | TokenKind::Weight => {
                self.advance();
                Ok(Atom::Text(Text {
                    text: token.text,
                    span: token.span,
                }))
            }
            TokenKind::Gate => Err(self.syntax(
                "a gate must directly follow '[' or '{'",
                token.span.start,
            )),
            TokenKind::ElseSep
            | TokenKind::OrSep
            | TokenKind::CloseChoice
            | TokenKind::CloseSilent => Err(self.unexpected(&token)),
        }
    }

    /// `choice = '[' gate? orExpr ('||' orExpr)? ']' transform*`
    fn parse_choice(&mut self) -> Result<Choice, ParseError> {
        let open = self.advance().map_or(self.source.len(), |t| t.span.start);
        let gate = self.parse_gate();
        let options = self.parse_or_expr()?;

        let mut else_options = None;
        if self.peek_kind() == Some(TokenKind::ElseSep) {
            let at = self.offset();
            if gate.is_none() {
                return Err(ParseError::InvalidChoice {
                    message: "'||' (else) is only valid in a gated choice".to_string(),
                    offset: at,
                });
            }
            self.advance();
            else_options = Some(self.parse_or_expr()?);
            if self.peek_kind() == Some(TokenKind::ElseSep) {
                return Err(ParseError::InvalidChoice {
                    message: "a choice may have only one '||' (else) branch".to_string(),
                    offset: self.offset(),
                });
            }
        }

        let mut end = match self.advance() {
            Some(t) if t.kind == TokenKind::CloseChoice => t.span.end,
            Some(t) => return Err(self.unexpected(&t)),
            None => return Err(self.syntax("unclosed '['", open)),
        };

        let transforms = self.parse_transforms();
        if let Some(last) = transforms.last() {
            end = last.span.end;
        }

        Ok(Choice {
            gate,
            options,
            else_options,
            transforms,
            source: self.source[open..end].to_string(),
            span: Span::new(open, end),
        })
    }

    fn parse_gate(&mut self) -> Option<Gate> {
        if self.peek_kind() != Some(TokenKind::Gate) {
            return None;
        }
        self.advance().map(|t| Gate {
            condition: t.text,
            span: t.span,
        })
    }

    /// `orExpr = weightedExpr ('|' weightedExpr)*`
    fn parse_or_expr(&mut self) -> Result<OrExpr, ParseError> {
        let first = self.parse_weighted()?;
        let mut span = first.span;
        let mut alternatives = vec![first];
        while self.peek_kind() == Some(TokenKind::OrSep) {
            self.advance();
            let next = self.parse_weighted()?;
            span = span.to(next.span);
            alternatives.push(next);
        }
        Ok(OrExpr { alternatives, span })
    }

    /// `weightedExpr = (expr | weightLiteral)*`
    fn parse_weighted(&mut self) -> Result<WeightedExpr, ParseError> {
        let start = self.offset();
        let mut atoms = Vec::new();
        let mut weight = 1;
        let mut end = start;
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::OrSep | TokenKind::ElseSep | TokenKind::CloseChoice => break,
                TokenKind::Weight => {
                    weight = parse_weight(&token.text).ok_or_else(|| {
                        self.syntax(format!("invalid weight '{}'", token.text), token.span.start)
                    })?;
                    end = token.span.end;
                    self.advance();
                }
                _ => {
                    let atom = self.parse_atom(Scope::Choice)?;
                    end = atom_span(&atom).end;
                    atoms.push(atom);
                }
            }
        }
        let span = Span::new(start, end.max(start));
        let expr = make_expr(atoms).unwrap_or(Expr {
            atoms: Vec::new(),
            span: Span::new(start, start),
        });
        Ok(WeightedExpr { expr, weight, span })
    }

    /// `assign = symbol '=' expr`
    fn parse_assign(&mut self, scope: Scope) -> Result<Assign, ParseError> {
        let symbol = self.parse_symbol()?;
        self.advance(); // '='
        let value = self.parse_expr(scope)?.unwrap_or(Expr {
            atoms: Vec::new(),
            span: Span::new(symbol.span.end + 1, symbol.span.end + 1),
        });
        let span = symbol.span.to(value.span);
        Ok(Assign {
            symbol,
            value,
            span,
        })
    }

    /// `silent = '{' gate? symbol ('=' expr)? '}'`
    fn parse_silent(&mut self) -> Result<Silent, ParseError> {
        let open = self.advance().map_or(self.source.len(), |t| t.span.start);
        let gate = self.parse_gate();
        self.skip_blank();

        let symbol = match self.peek().cloned() {
            Some(t) if t.kind == TokenKind::Symbol => self.parse_symbol()?,
            Some(t) => {
                return Err(self.syntax(
                    format!("expected a symbol in '{{...}}', found '{}'", t.text),
                    t.span.start,
                ))
            }
            None => return Err(self.syntax("unclosed '{'", open)),
        };

        let mut value = None;
        if self.peek_kind() == Some(TokenKind::Eq) {
            self.advance();
            value = Some(self.parse_expr(Scope::Silent)?.unwrap_or(Expr {
                atoms: Vec::new(),
                span: Span::new(self.offset(), self.offset()),
            }));
        } else {
            self.skip_blank();
        }

        match self.advance() {
            Some(t) if t.kind == TokenKind::CloseSilent => Ok(Silent {
                gate,
                symbol,
                value,
                span: Span::new(open, t.span.end),
            }),
            Some(t) => Err(self.unexpected(&t)),
            None => Err(self.syntax("unclosed '{'", open)),
        }
    }

    /// `symbol = sigilName transform*`
    fn parse_symbol(&mut self) -> Result<Symbol, ParseError> {
        let token = match self.advance() {
            Some(t) => t,
            None => return Err(self.syntax("expected a symbol", self.source.len())),
        };
        let mut chars = token.text.chars();
        let sigil = chars
            .next()
            .and_then(Sigil::from_char)
            .ok_or_else(|| self.syntax("expected a symbol", token.span.start))?;
        let name = chars.as_str().to_string();

        let transforms = self.parse_transforms();
        let end = transforms.last().map_or(token.span.end, |t| t.span.end);
        Ok(Symbol {
            sigil,
            name,
            transforms,
            source: self.source[token.span.start..end].to_string(),
            span: Span::new(token.span.start, end),
        })
    }

    fn parse_transforms(&mut self) -> Vec<Transform> {
        let mut transforms = Vec::new();
        while self.peek_kind() == Some(TokenKind::Transform) {
            if let Some(t) = self.advance() {
                let body = &t.text[1..];
                let (name, call) = match body.strip_suffix("()") {
                    Some(name) => (name, true),
                    None => (body, false),
                };
                transforms.push(Transform {
                    name: name.to_string(),
                    call,
                    span: t.span,
                });
            }
        }
        transforms
    }
}

fn is_closer(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::OrSep | TokenKind::ElseSep | TokenKind::CloseChoice | TokenKind::CloseSilent
    )
}

fn ends_expr(kind: TokenKind, scope: Scope) -> bool {
    match scope {
        Scope::TopLevel => is_closer(kind),
        Scope::Choice => matches!(
            kind,
            TokenKind::OrSep | TokenKind::ElseSep | TokenKind::CloseChoice | TokenKind::Weight
        ),
        Scope::Silent => kind == TokenKind::CloseSilent,
    }
}
fn parse_weight(text: &str) -> Option<u32> {
    text.trim_start_matches('(')
        .trim_end_matches(')')
        .trim()
        .parse()
        .ok()
}

fn atom_span(atom: &Atom) -> Span {
    match atom {
        Atom::Choice(c) => c.span,
        Atom::Assign(a) => a.span,
        Atom::Symbol(s) => s.span,
        Atom::Silent(s) => s.span,
        Atom::PendingGate(p) => p.span,
        Atom::Text(t) | Atom::Entity(t) => t.span,
    }
}

fn make_expr(atoms: Vec<Atom>) -> Option<Expr> {
    let first = atoms.first().map(atom_span)?;
    let last = atoms.last().map_or(first, atom_span);
    Some(Expr {
        span: first.to(last),
        atoms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> Result<Script, ParseError> {
        Parser::new(src, tokenize(src).unwrap()).parse_script()
    }

    fn atoms(src: &str) -> Vec<Atom> {
        let script = parse(src).unwrap();
        script.exprs.into_iter().flat_map(|e| e.atoms).collect()
    }

    #[test]
    fn parse_literal_only() {
        let a = atoms("Hello, world.");
        assert_eq!(a.len(), 1);
        assert!(matches!(&a[0], Atom::Text(t) if t.text == "Hello, world."));
    }

    #[test]
    fn parse_weighted_choice() {
        let a = atoms("[a|b(3)]");
        let Atom::Choice(choice) = &a[0] else {
            panic!("expected a choice, got {:?}", a[0]);
        };
        assert_eq!(choice.options.alternatives.len(), 2);
        assert_eq!(choice.options.alternatives[0].weight, 1);
        assert_eq!(choice.options.alternatives[1].weight, 3);
        assert_eq!(choice.source, "[a|b(3)]");
    }

    #[test]
    fn parse_empty_alternative() {
        let a = atoms("[quite|]");
        let Atom::Choice(choice) = &a[0] else {
            panic!("expected a choice");
        };
        assert!(choice.options.alternatives[1].expr.atoms.is_empty());
    }

    #[test]
    fn parse_gated_choice_with_else() {
        let a = atoms("[@{a: 1} yes || no].cap");
        let Atom::Choice(choice) = &a[0] else {
            panic!("expected a choice");
        };
        assert_eq!(choice.gate.as_ref().unwrap().condition, "{a: 1}");
        assert!(choice.else_options.is_some());
        assert_eq!(choice.transforms.len(), 1);
        assert_eq!(choice.source, "[@{a: 1} yes || no].cap");
    }

    #[test]
    fn parse_assign_and_symbol() {
        let a = atoms("$x=[a|b] and $x.cap()");
        let Atom::Assign(assign) = &a[0] else {
            panic!("expected an assignment");
        };
        assert_eq!(assign.symbol.name, "x");
        // The assignment's expression runs to the end of the enclosing scope.
        assert_eq!(assign.value.atoms.len(), 3);
    }

    #[test]
    fn parse_symbol_transforms() {
        let a = atoms("$hero.cap().s");
        let Atom::Symbol(sym) = &a[0] else {
            panic!("expected a symbol");
        };
        assert_eq!(sym.sigil, Sigil::Dynamic);
        assert_eq!(sym.transforms.len(), 2);
        assert!(sym.transforms[0].call);
        assert_eq!(sym.source, "$hero.cap().s");
    }

    #[test]
    fn parse_silent_static() {
        let a = atoms("{#x=[a|b]}");
        let Atom::Silent(silent) = &a[0] else {
            panic!("expected a silent block");
        };
        assert_eq!(silent.symbol.sigil, Sigil::Static);
        assert!(silent.value.is_some());
    }

    #[test]
    fn parse_nested_choice() {
        let a = atoms("[[a|b]|c]");
        let Atom::Choice(outer) = &a[0] else {
            panic!("expected a choice");
        };
        assert!(matches!(
            outer.options.alternatives[0].expr.atoms[0],
            Atom::Choice(_)
        ));
    }

    #[test]
    fn stray_or_is_parse_error() {
        assert!(matches!(parse("a | b"), Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn unclosed_choice_is_parse_error() {
        assert!(matches!(parse("[a|b"), Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn else_without_gate_is_invalid_choice() {
        assert!(matches!(
            parse("[a || b]"),
            Err(ParseError::InvalidChoice { .. })
        ));
    }

    #[test]
    fn misplaced_gate_is_parse_error() {
        assert!(parse("[a @{x: 1} b]").is_err());
    }

    #[test]
    fn transform_after_text_is_literal() {
        let a = atoms("end.of line");
        assert!(a.iter().all(|atom| matches!(atom, Atom::Text(_))));
    }
}
