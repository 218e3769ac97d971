//! Header map with case-insensitive name lookup.
//!
//! Used both for outgoing request headers and for the headers parsed off a
//! response by the HTTP/1.1 transport.

use std::fmt;

/// A case-insensitive, multi-value header map.
///
/// Preserves insertion order. [`insert`](Self::insert) appends, while
/// [`set`](Self::set) replaces every existing value for the name.
///
/// # Examples
///
/// ```
/// use outpost::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Accept", "application/json");
/// headers.insert("X-Trace", "a");
/// headers.set("x-trace", "b");
///
/// assert_eq!(headers.get("accept"), Some("application/json"));
/// assert_eq!(headers.get_all("X-Trace").collect::<Vec<_>>(), vec!["b"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sized for a response head whose header count is already known.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Adds `name: value` after any existing values for `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Drops earlier values for `name`, then adds `name: value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.inner.push((name, value.into()));
    }

    /// Overlays `other`: its names win, everything else is kept.
    pub fn merge(&mut self, other: &Headers) {
        self.inner
            .retain(|(name, _)| !other.inner.iter().any(|(theirs, _)| named(theirs, name)));
        self.inner.extend(other.inner.iter().cloned());
    }

    /// First value sent under `name`, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.inner
            .iter()
            .filter(move |(k, _)| named(k, name))
            .map(|(_, v)| v.as_str())
    }

    /// `true` when something was dropped.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !named(k, name));
        before != self.inner.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Counts lines on the wire, so a repeated name counts once per value.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn named(header: &str, name: &str) -> bool {
    header.eq_ignore_ascii_case(name)
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.insert("Content-Type", "application/json");
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("application/json"));
        assert!(h.contains("Content-type"));
    }

    #[test]
    fn set_replaces_every_value() {
        let mut h = Headers::new();
        h.insert("X-Tag", "one");
        h.insert("x-tag", "two");
        h.set("X-TAG", "three");
        assert_eq!(h.get_all("x-tag").collect::<Vec<_>>(), vec!["three"]);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn merge_overrides_same_names_and_keeps_others() {
        let mut base: Headers = [("Accept", "text/plain"), ("X-Keep", "yes")]
            .into_iter()
            .collect();
        let overrides: Headers = [("accept", "application/json")].into_iter().collect();
        base.merge(&overrides);
        assert_eq!(base.get("Accept"), Some("application/json"));
        assert_eq!(base.get("x-keep"), Some("yes"));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn remove_reports_whether_anything_went() {
        let mut h = Headers::new();
        h.insert("Cookie", "a=1");
        assert!(h.remove("cookie"));
        assert!(h.is_empty());
        assert!(!h.remove("cookie"));
    }
}
