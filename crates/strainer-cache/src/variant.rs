//! `Vary` handling: which stored representation a request selects.

use http::header::{self, HeaderMap, HeaderName};

/// Parsed `Vary` of a stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vary {
    /// No `Vary`: every request matches.
    None,
    /// `Vary: *`: no request matches.
    Any,
    /// Sorted, deduplicated header names.
    Fields(Vec<HeaderName>),
}

impl Vary {
    /// Read every `Vary` line of `headers`. Names may be separated by commas
    /// and/or whitespace; invalid names are dropped.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut fields = Vec::new();
        for value in headers.get_all(header::VARY) {
            let Ok(value) = value.to_str() else { continue };
            for token in value.split(|c: char| c == ',' || c.is_ascii_whitespace()) {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                if token == "*" {
                    return Vary::Any;
                }
                if let Ok(name) = HeaderName::from_bytes(token.to_ascii_lowercase().as_bytes()) {
                    fields.push(name);
                }
            }
        }
        if fields.is_empty() {
            return Vary::None;
        }
        fields.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        fields.dedup();
        Vary::Fields(fields)
    }

    pub fn fields(&self) -> &[HeaderName] {
        match self {
            Vary::Fields(fields) => fields,
            _ => &[],
        }
    }

    /// The subset of `request_headers` this `Vary` names.
    pub fn fingerprint(&self, request_headers: &HeaderMap) -> HeaderMap {
        let mut out = HeaderMap::new();
        for name in self.fields() {
            for value in request_headers.get_all(name) {
                out.append(name.clone(), value.clone());
            }
        }
        out
    }

    /// A stored `fingerprint` matches `request_headers` when every varied
    /// header has the same values in the same order. Absent on both sides
    /// counts as equal.
    pub fn matches(&self, fingerprint: &HeaderMap, request_headers: &HeaderMap) -> bool {
        match self {
            Vary::None => true,
            Vary::Any => false,
            Vary::Fields(_) => self.same_fingerprint(fingerprint, request_headers),
        }
    }

    /// Whether two header sets agree on every varied field. Unlike
    /// [`matches`](Vary::matches), `*` compares equal so that a new `*`
    /// response supersedes the old one.
    pub fn same_fingerprint(&self, a: &HeaderMap, b: &HeaderMap) -> bool {
        self.fields()
            .iter()
            .all(|name| a.get_all(name).iter().eq(b.get_all(name).iter()))
    }
}
