use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A host function exposed to scripts, either as a symbol (`$now`) or as a
/// transform (`$name.shout()`). Receives the current text value.
#[derive(Clone)]
pub struct Callable(Arc<dyn Fn(&str) -> String + Send + Sync>);

impl Callable {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, input: &str) -> String {
        (self.0)(input)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callable(..)")
    }
}

/// A value bound in the caller-supplied context, or produced while
/// resolving a symbol.
#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Number(f64),
    Bool(bool),
    Map(BTreeMap<String, Value>),
    Func(Callable),
}

impl Value {
    /// Render the value as script output text.
    pub fn render(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
            Value::Map(fields) => fields
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v.render()))
                .collect::<Vec<_>>()
                .join(", "),
            Value::Func(f) => f.call(""),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read a named property: a field of a map, or `length` of text.
    pub fn property(&self, name: &str) -> Option<Value> {
        match (self, name) {
            (Value::Map(fields), _) => fields.get(name).cloned(),
            (Value::Text(s), "length") => Some(Value::Number(s.chars().count() as f64)),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

/// Integers print without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Callable> for Value {
    fn from(f: Callable) -> Self {
        Value::Func(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_numbers() {
        assert_eq!(Value::Number(3.0).render(), "3");
        assert_eq!(Value::Number(2.5).render(), "2.5");
        assert_eq!(Value::from(-4i64).render(), "-4");
    }

    #[test]
    fn map_property_read() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from("Ada"));
        let hero = Value::Map(fields);
        assert_eq!(hero.property("name"), Some(Value::from("Ada")));
        assert_eq!(hero.property("age"), None);
    }

    #[test]
    fn text_length_property() {
        assert_eq!(
            Value::from("héllo").property("length"),
            Some(Value::Number(5.0))
        );
    }

    #[test]
    fn callable_renders_by_calling() {
        let f = Callable::new(|_| "tick".to_string());
        assert_eq!(Value::Func(f).render(), "tick");
    }
}
