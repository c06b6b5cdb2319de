//! Multi-valued request parameters decoded from query strings and form bodies.

use serde_json::{Map, Value};
use std::str::Utf8Error;

/// What decoding does with bytes that are not valid UTF-8.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DecodeErrors {
    /// Refuse the input.
    #[default]
    Strict,
    /// Substitute U+FFFD.
    Replace,
}

impl DecodeErrors {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(DecodeErrors::Strict),
            "replace" => Some(DecodeErrors::Replace),
            _ => None,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<String, Utf8Error> {
        match self {
            DecodeErrors::Strict => std::str::from_utf8(bytes).map(str::to_string),
            DecodeErrors::Replace => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    items: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `a=1&b=two+words&a=3`. Pairs that fail to decode are kept raw.
    pub fn parse(query: &str) -> Self {
        let items = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (decode(k), decode(v))
            })
            .collect();
        Params { items }
    }

    /// Decode raw `application/x-www-form-urlencoded` bytes, escapes included, under `errors`.
    pub fn parse_with(raw: &[u8], errors: DecodeErrors) -> Result<Self, Utf8Error> {
        let text = errors.decode(raw)?;
        let mut items = Vec::new();
        for pair in text.split('&').filter(|pair| !pair.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            items.push((decode_with(k, errors)?, decode_with(v, errors)?));
        }
        Ok(Params { items })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.items
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.iter().any(|(k, _)| k == key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.items.push((key.into(), value.into()));
    }

    /// Replace every value of `key` with `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.items.retain(|(k, _)| *k != key);
        self.items.push((key, value.into()));
    }

    pub fn extend(&mut self, other: &Params) {
        self.items.extend(other.items.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Single values become strings, repeated keys become arrays.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (k, v) in &self.items {
            match out.get_mut(k) {
                None => {
                    out.insert(k.clone(), Value::String(v.clone()));
                }
                Some(Value::Array(values)) => values.push(Value::String(v.clone())),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(v.clone())]);
                }
            }
        }
        out
    }

    pub fn to_query(&self) -> String {
        self.items
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

fn decode_with(raw: &str, errors: DecodeErrors) -> Result<String, Utf8Error> {
    let spaced = raw.replace('+', " ");
    errors.decode(&urlencoding::decode_binary(spaced.as_bytes()))
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Params {
            items: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
