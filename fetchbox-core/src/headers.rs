//! Ordered raw header storage.
//!
//! Cache metadata must round-trip response headers byte for byte: insertion
//! order preserved, duplicates allowed, lookups case-insensitive. The `http`
//! crate's `HeaderMap` normalizes names, so the cache contract keeps its own
//! ordered pair list and only converts at the protocol boundary.

use std::collections::HashMap;

use bytes::Bytes;

/// Ordered list of raw `(name, value)` header pairs.
///
/// Duplicate names are allowed and insertion order is preserved. Name
/// comparison is ASCII case-insensitive everywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    pairs: Vec<(Bytes, Bytes)>,
}

impl HeaderList {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored pairs, duplicates included.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` if no headers are stored.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Appends a pair, keeping any existing pairs with the same name.
    pub fn append(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Returns the value of the first header matching `name`.
    pub fn get(&self, name: &[u8]) -> Option<&Bytes> {
        self.pairs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Returns every value stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a [u8]) -> impl Iterator<Item = &'a Bytes> + 'a {
        self.pairs
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Returns `true` if at least one header matches `name`.
    pub fn contains(&self, name: &[u8]) -> bool {
        self.get(name).is_some()
    }

    /// Sets `name` to `value`, replacing the first existing occurrence in
    /// place and dropping any later duplicates. Appends when absent.
    pub fn set(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        let name = name.into();
        let value = value.into();
        let mut replaced = false;
        self.pairs.retain_mut(|(n, v)| {
            if n.eq_ignore_ascii_case(&name) {
                if replaced {
                    return false;
                }
                *v = value.clone();
                replaced = true;
            }
            true
        });
        if !replaced {
            self.pairs.push((name, value));
        }
    }

    /// Removes every header matching `name`.
    pub fn remove(&mut self, name: &[u8]) {
        self.pairs.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Iterates over all pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(Bytes, Bytes)> {
        self.pairs.iter()
    }

    /// Replaces the whole list.
    pub fn set_all(&mut self, pairs: Vec<(Bytes, Bytes)>) {
        self.pairs = pairs;
    }

    /// Consumes the list, returning the raw pairs.
    pub fn into_pairs(self) -> Vec<(Bytes, Bytes)> {
        self.pairs
    }
}

impl FromIterator<(Bytes, Bytes)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (Bytes, Bytes)>>(iter: T) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

/// Parses an option-style header value (`Cache-Control` and friends) into a
/// directive map.
///
/// Directives are comma-separated `token` or `token=value` items; keys are
/// lower-cased, quoted-string values are unescaped. A directive without a
/// value maps to an empty string.
pub fn parse_option_header(value: &[u8]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut rest = value;

    loop {
        rest = skip_ows_and_commas(rest);
        if rest.is_empty() {
            break;
        }

        let token_end = rest
            .iter()
            .position(|&b| b == b',' || b == b'=' || b.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let key = String::from_utf8_lossy(&rest[..token_end]).to_ascii_lowercase();
        rest = skip_ows(&rest[token_end..]);

        if rest.first() == Some(&b'=') {
            rest = skip_ows(&rest[1..]);
            let (val, remainder) = if rest.first() == Some(&b'"') {
                parse_quoted(&rest[1..])
            } else {
                let end = rest.iter().position(|&b| b == b',').unwrap_or(rest.len());
                (
                    String::from_utf8_lossy(rest[..end].trim_ascii()).into_owned(),
                    &rest[end..],
                )
            };
            rest = remainder;
            if !key.is_empty() {
                out.insert(key, val);
            }
        } else if !key.is_empty() {
            out.insert(key, String::new());
        }
    }

    out
}

fn parse_quoted(mut rest: &[u8]) -> (String, &[u8]) {
    let mut val = Vec::new();
    while let Some((&b, tail)) = rest.split_first() {
        rest = tail;
        match b {
            b'"' => break,
            b'\\' => {
                if let Some((&esc, tail)) = rest.split_first() {
                    val.push(esc);
                    rest = tail;
                }
            }
            _ => val.push(b),
        }
    }
    (String::from_utf8_lossy(&val).into_owned(), rest)
}

fn skip_ows(mut s: &[u8]) -> &[u8] {
    while let Some((&b, tail)) = s.split_first() {
        if b.is_ascii_whitespace() {
            s = tail;
        } else {
            break;
        }
    }
    s
}

fn skip_ows_and_commas(mut s: &[u8]) -> &[u8] {
    while let Some((&b, tail)) = s.split_first() {
        if b == b',' || b.is_ascii_whitespace() {
            s = tail;
        } else {
            break;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_order_and_duplicates() {
        let mut headers = HeaderList::new();
        headers.append(&b"Set-Cookie"[..], &b"a=1"[..]);
        headers.append(&b"Content-Type"[..], &b"text/html"[..]);
        headers.append(&b"set-cookie"[..], &b"b=2"[..]);

        assert_eq!(headers.len(), 3);
        let cookies: Vec<_> = headers.get_all(b"Set-Cookie").collect();
        assert_eq!(cookies, vec![&Bytes::from("a=1"), &Bytes::from("b=2")]);
        assert_eq!(headers.get(b"content-type"), Some(&Bytes::from("text/html")));
    }

    #[test]
    fn set_replaces_in_place_and_drops_later_duplicates() {
        let mut headers = HeaderList::new();
        headers.append(&b"Warning"[..], &b"110"[..]);
        headers.append(&b"Date"[..], &b"x"[..]);
        headers.append(&b"warning"[..], &b"113"[..]);

        headers.set(&b"Warning"[..], &b"199"[..]);

        assert_eq!(headers.len(), 2);
        let all: Vec<_> = headers.get_all(b"warning").collect();
        assert_eq!(all, vec![&Bytes::from("199")]);
        // position of the first occurrence is kept
        assert_eq!(headers.iter().next().unwrap().1, Bytes::from("199"));
    }

    #[test]
    fn option_header_directives() {
        let parsed = parse_option_header(b"no-cache, max-age=60, private=\"set-cookie\"");
        assert!(parsed.contains_key("no-cache"));
        assert_eq!(parsed.get("max-age").map(String::as_str), Some("60"));
        assert_eq!(parsed.get("private").map(String::as_str), Some("set-cookie"));
    }

    #[test]
    fn option_header_tolerates_whitespace_and_case() {
        let parsed = parse_option_header(b"  Must-Revalidate ,MAX-AGE = 0 ");
        assert!(parsed.contains_key("must-revalidate"));
        assert_eq!(parsed.get("max-age").map(String::as_str), Some("0"));
    }

    #[test]
    fn option_header_empty_input() {
        assert!(parse_option_header(b"").is_empty());
        assert!(parse_option_header(b" , ,, ").is_empty());
    }
}
