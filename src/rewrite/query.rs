//! Structured query mapping extracted from the final request URL.

use std::collections::HashMap;

/// Query parameters of the rewritten URL, attached to the request for
/// downstream stages.
///
/// Repeated keys keep every value in order of appearance; [`get`](Self::get)
/// returns the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestQuery {
    params: HashMap<String, Vec<String>>,
}

impl RequestQuery {
    /// Extract the query of `url`. Returns `None` when the URL has no `?`.
    pub fn from_url(url: &str) -> Option<Self> {
        let (_, query) = url.split_once('?')?;
        Some(Self::parse(query))
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    pub fn parse(query: &str) -> Self {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.entry(key.into_owned()).or_default().push(value.into_owned());
        }
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.params.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
