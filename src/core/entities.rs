/// HTML-style character entities: escaped reserved characters travel
/// through every pass as `&#N;` and are decoded once at the end.

pub trait EntityCodec: Send + Sync {
    fn decode(&self, text: &str) -> String;
    fn encode(&self, c: char) -> String;
}

const NAMED: &[(&str, char)] = &[
    ("amp", '&'),
    ("apos", '\''),
    ("commat", '@'),
    ("dollar", '$'),
    ("gt", '>'),
    ("lcub", '{'),
    ("lsqb", '['),
    ("lt", '<'),
    ("nbsp", '\u{00A0}'),
    ("num", '#'),
    ("quot", '"'),
    ("rcub", '}'),
    ("rsqb", ']'),
    ("vert", '|'),
];

/// Numeric entities plus a small table of named ones. Unknown entities are
/// left as written.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEntities;

impl HtmlEntities {
    fn decode_one(body: &str) -> Option<char> {
        if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
            return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
        }
        if let Some(dec) = body.strip_prefix('#') {
            return dec.parse().ok().and_then(char::from_u32);
        }
        NAMED.iter().find(|(name, _)| *name == body).map(|(_, c)| *c)
    }
}

impl EntityCodec for HtmlEntities {
    fn decode(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            let tail = &rest[amp..];
            let decoded = tail.find(';').and_then(|semi| {
                let body = &tail[1..semi];
                let plausible = !body.is_empty()
                    && body.len() <= 10
                    && body.chars().all(|c| c.is_ascii_alphanumeric() || c == '#');
                if plausible {
                    Self::decode_one(body).map(|c| (c, semi + 1))
                } else {
                    None
                }
            });
            match decoded {
                Some((c, used)) => {
                    out.push(c);
                    rest = &tail[used..];
                }
                None => {
                    out.push('&');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn encode(&self, c: char) -> String {
        format!("&#{};", c as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_numeric_and_named() {
        let codec = HtmlEntities;
        assert_eq!(codec.decode("&#91;x&#x5D; &amp; &lt;b&gt;"), "[x] & <b>");
    }

    #[test]
    fn unknown_entities_untouched() {
        let codec = HtmlEntities;
        assert_eq!(codec.decode("&bogus; & more; &"), "&bogus; & more; &");
    }

    #[test]
    fn encode_is_numeric() {
        assert_eq!(HtmlEntities.encode('['), "&#91;");
        assert_eq!(HtmlEntities.decode(&HtmlEntities.encode('$')), "$");
    }
}
