/// Locale service — pluralization and indefinite-article lookups used by
/// the `pluralize` and `articlize` transforms.
///
/// Hosts install a real implementation with [`set_locale`]. Without one,
/// [`NaiveLocale`] applies English suffix rules and a warning is logged once.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::sync::{Arc, Once};

pub trait Locale: Send + Sync {
    /// Plural form of the last word of `phrase`.
    fn pluralize(&self, phrase: &str) -> String;
    /// Indefinite article ("a" or "an") for `phrase`.
    fn article(&self, phrase: &str) -> &'static str;
}

lazy_static! {
    static ref LOCALE: RwLock<Option<Arc<dyn Locale>>> = RwLock::new(None);
}

static NAIVE_WARNING: Once = Once::new();

/// Install the locale service used by all evaluators in this process.
pub fn set_locale(locale: Arc<dyn Locale>) {
    *LOCALE.write() = Some(locale);
}

/// Remove the installed locale, falling back to [`NaiveLocale`].
pub fn clear_locale() {
    *LOCALE.write() = None;
}

/// The installed locale, or the naive fallback.
pub fn current() -> Arc<dyn Locale> {
    if let Some(locale) = LOCALE.read().as_ref() {
        return Arc::clone(locale);
    }
    NAIVE_WARNING.call_once(|| {
        tracing::warn!("no locale service installed; using naive English heuristics");
    });
    Arc::new(NaiveLocale)
}

const IRREGULAR: &[(&str, &str)] = &[
    ("child", "children"),
    ("foot", "feet"),
    ("goose", "geese"),
    ("man", "men"),
    ("mouse", "mice"),
    ("ox", "oxen"),
    ("person", "people"),
    ("tooth", "teeth"),
    ("woman", "women"),
];

const UNCOUNTABLE: &[&str] = &["deer", "fish", "news", "series", "sheep", "species"];

/// Suffix-rule English, good enough for tests and simple scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveLocale;

impl NaiveLocale {
    fn plural_word(word: &str) -> String {
        let lower = word.to_lowercase();
        if UNCOUNTABLE.contains(&lower.as_str()) {
            return word.to_string();
        }
        if let Some((_, plural)) = IRREGULAR.iter().find(|(single, _)| *single == lower) {
            return match_case(word, plural);
        }

        let plural = if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
            format!("{}es", word)
        } else if lower.ends_with('y') && !ends_with_vowel_y(&lower) {
            format!("{}ies", &word[..word.len() - 1])
        } else if lower.ends_with("fe") {
            format!("{}ves", &word[..word.len() - 2])
        } else if lower.ends_with("lf") {
            format!("{}ves", &word[..word.len() - 1])
        } else {
            format!("{}s", word)
        };
        if word.len() > 1 && word.chars().all(|c| !c.is_lowercase()) {
            plural.to_uppercase()
        } else {
            plural
        }
    }
}

fn ends_with_vowel_y(lower: &str) -> bool {
    let mut rev = lower.chars().rev();
    rev.next();
    matches!(rev.next(), Some('a' | 'e' | 'i' | 'o' | 'u'))
}

fn match_case(original: &str, replacement: &str) -> String {
    let mut chars = original.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => {
            let mut out = String::with_capacity(replacement.len());
            let mut rep = replacement.chars();
            if let Some(r) = rep.next() {
                out.extend(r.to_uppercase());
            }
            out.extend(rep);
            out
        }
        _ => replacement.to_string(),
    }
}

impl Locale for NaiveLocale {
    fn pluralize(&self, phrase: &str) -> String {
        match phrase.rfind(char::is_whitespace) {
            Some(i) => {
                let (head, last) = phrase.split_at(i + 1);
                format!("{}{}", head, Self::plural_word(last))
            }
            None if phrase.is_empty() => String::new(),
            None => Self::plural_word(phrase),
        }
    }

    fn article(&self, phrase: &str) -> &'static str {
        let word = phrase
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_lowercase();
        if ["hour", "honest", "honor", "heir"]
            .iter()
            .any(|p| word.starts_with(p))
        {
            return "an";
        }
        if ["uni", "use", "usu", "eu", "one", "once"]
            .iter()
            .any(|p| word.starts_with(p))
        {
            return "a";
        }
        let mut chars = word.chars();
        match (chars.next(), chars.next()) {
            // Single letters are read by name: "an f", "a b".
            (Some(c), None) if "aefhilmnorsx".contains(c) => "an",
            (Some('a' | 'e' | 'i' | 'o' | 'u'), _) => "an",
            _ => "a",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn naive_plurals() {
        let l = NaiveLocale;
        assert_eq!(l.pluralize("dog"), "dogs");
        assert_eq!(l.pluralize("box"), "boxes");
        assert_eq!(l.pluralize("church"), "churches");
        assert_eq!(l.pluralize("city"), "cities");
        assert_eq!(l.pluralize("day"), "days");
        assert_eq!(l.pluralize("knife"), "knives");
        assert_eq!(l.pluralize("Child"), "Children");
        assert_eq!(l.pluralize("sheep"), "sheep");
        assert_eq!(l.pluralize("big red dog"), "big red dogs");
    }

    #[test]
    fn naive_articles() {
        let l = NaiveLocale;
        assert_eq!(l.article("apple"), "an");
        assert_eq!(l.article("pear"), "a");
        assert_eq!(l.article("hour"), "an");
        assert_eq!(l.article("unicorn"), "a");
        assert_eq!(l.article("a b"), "an");
        assert_eq!(l.article("b c"), "a");
    }
}
