use std::fmt;

/// Parsed `Cache-Control` header (request or response).
///
/// Directives keep the order they first appeared in so the header can be
/// written back without losing anything the engine does not understand.
/// When a directive repeats, the last value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<(String, Option<String>)>,
}

const NUMERIC: [&str; 2] = ["max-age", "s-maxage"];

impl CacheControl {
    /// Parse a single header value. Malformed pieces are skipped.
    pub fn parse(value: &str) -> Self {
        Self::from_values([value])
    }

    /// Parse every `Cache-Control` line of a message as one list.
    pub fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut cc = CacheControl::default();

        for part in values.into_iter().flat_map(|v| v.split(',')) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (name, value) = match part.split_once('=') {
                Some((name, value)) => {
                    let value = value.trim().trim_matches('"').to_string();
                    (name.trim().to_ascii_lowercase(), Some(value))
                }
                None => (part.to_ascii_lowercase(), None),
            };
            if name.is_empty() {
                continue;
            }

            // A numeric directive whose value does not parse is dropped.
            if NUMERIC.contains(&name.as_str())
                && value.as_deref().and_then(|v| v.parse::<u64>().ok()).is_none()
            {
                continue;
            }

            cc.set(&name, value);
        }

        cc
    }

    /// Raw lookup: `None` if absent, `Some(None)` for a bare directive.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.directives
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or overwrite a directive in place.
    pub fn set(&mut self, name: &str, value: Option<String>) {
        match self.directives.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.directives.push((name.to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.directives.retain(|(n, _)| n != name);
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.directives
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    /// `no-cache`, with or without a field list. A field list is treated
    /// as a full `no-cache`.
    pub fn no_cache(&self) -> bool {
        self.contains("no-cache")
    }

    pub fn no_store(&self) -> bool {
        self.contains("no-store")
    }

    pub fn must_revalidate(&self) -> bool {
        self.contains("must-revalidate")
    }

    pub fn private(&self) -> bool {
        self.contains("private")
    }

    pub fn public(&self) -> bool {
        self.contains("public")
    }

    pub fn max_age(&self) -> Option<u64> {
        self.numeric("max-age")
    }

    pub fn s_maxage(&self) -> Option<u64> {
        self.numeric("s-maxage")
    }

    fn numeric(&self, name: &str) -> Option<u64> {
        self.get(name).flatten().and_then(|v| v.parse().ok())
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.directives.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                None => f.write_str(name)?,
                Some(v) if needs_quotes(v) => write!(f, "{name}=\"{v}\"")?,
                Some(v) => write!(f, "{name}={v}")?,
            }
        }
        Ok(())
    }
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '=' | ';' | '"'))
}
