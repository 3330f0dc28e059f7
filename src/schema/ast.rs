use serde::{Deserialize, Serialize};

/// Byte range into the text a node was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Symbol sigil: `$` re-evaluates on every reference, `#` evaluates once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sigil {
    Dynamic,
    Static,
}

impl Sigil {
    pub fn from_char(c: char) -> Option<Sigil> {
        match c {
            '$' => Some(Sigil::Dynamic),
            '#' => Some(Sigil::Static),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Sigil::Dynamic => '$',
            Sigil::Static => '#',
        }
    }
}

/// A parsed script: a sequence of expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub exprs: Vec<Expr>,
    pub span: Span,
}

/// One or more atoms, evaluated left to right and concatenated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub atoms: Vec<Atom>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Atom {
    /// `[a | b(2) | c].transform`
    Choice(Choice),
    /// `$name=expr` written inline.
    Assign(Assign),
    /// `$name.transform` / `#name`
    Symbol(Symbol),
    /// `{$name=expr}`: evaluated for its side effect only.
    Silent(Silent),
    /// A choice whose gate was deferred on an earlier pass.
    PendingGate(PendingGate),
    /// Literal text.
    Text(Text),
    /// An HTML-style entity, carried verbatim until final decoding.
    Entity(Text),
}

/// `[ gate? orExpr ('||' orExpr)? ] transform*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub gate: Option<Gate>,
    pub options: OrExpr,
    pub else_options: Option<OrExpr>,
    pub transforms: Vec<Transform>,
    /// Source text of the whole choice, transforms included.
    pub source: String,
    pub span: Span,
}

/// Raw condition text of a gate, braces included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub condition: String,
    pub span: Span,
}

/// Alternatives separated by `|`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrExpr {
    pub alternatives: Vec<WeightedExpr>,
    pub span: Span,
}

/// One alternative with its selection weight (default 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedExpr {
    pub expr: Expr,
    pub weight: u32,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub sigil: Sigil,
    pub name: String,
    pub transforms: Vec<Transform>,
    /// Source text, sigil and transforms included.
    pub source: String,
    pub span: Span,
}

impl Symbol {
    /// Whether a `.nr` / `.norepeat` suffix is attached.
    pub fn is_norepeat(&self) -> bool {
        self.transforms.iter().any(Transform::is_norepeat)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assign {
    pub symbol: Symbol,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silent {
    pub gate: Option<Gate>,
    pub symbol: Symbol,
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingGate {
    pub key: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub text: String,
    pub span: Span,
}

/// `.name` or `.name()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub name: String,
    pub call: bool,
    pub span: Span,
}

impl Transform {
    pub fn is_norepeat(&self) -> bool {
        matches!(self.name.as_str(), "nr" | "norepeat")
    }

    /// Re-render as written, e.g. `.cap()`.
    pub fn render(&self) -> String {
        if self.call {
            format!(".{}()", self.name)
        } else {
            format!(".{}", self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_union() {
        let a = Span::new(3, 7);
        let b = Span::new(5, 12);
        assert_eq!(a.to(b), Span::new(3, 12));
    }

    #[test]
    fn transform_render() {
        let t = Transform {
            name: "cap".to_string(),
            call: true,
            span: Span::default(),
        };
        assert_eq!(t.render(), ".cap()");
        assert!(!t.is_norepeat());
    }

    #[test]
    fn sigil_chars() {
        assert_eq!(Sigil::from_char('$'), Some(Sigil::Dynamic));
        assert_eq!(Sigil::from_char('#'), Some(Sigil::Static));
        assert_eq!(Sigil::from_char('@'), None);
        assert_eq!(Sigil::Static.as_char(), '#');
    }
}
