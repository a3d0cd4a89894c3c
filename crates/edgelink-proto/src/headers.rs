//! Header maps carried inside tunnel messages
//!
//! Header names are stored lowercase. A header that appeared more than once
//! (e.g. `set-cookie`) is kept as a list so no value is lost on the way through
//! the tunnel; everything else is a plain string.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Headers that only make sense for a single hop and must not be relayed
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A single header entry, either one value or several
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HeaderField {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderField {
    /// Iterate over every value of this header
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let values: Vec<&str> = match self {
            HeaderField::Single(value) => vec![value.as_str()],
            HeaderField::Multiple(values) => values.iter().map(String::as_str).collect(),
        };
        values.into_iter()
    }

    /// First value of this header, if any
    pub fn first(&self) -> Option<&str> {
        self.values().next()
    }

    /// Add another value, turning a single entry into a list
    pub fn push(&mut self, value: String) {
        match self {
            HeaderField::Single(existing) => {
                *self = HeaderField::Multiple(vec![std::mem::take(existing), value]);
            }
            HeaderField::Multiple(values) => values.push(value),
        }
    }
}

impl From<&str> for HeaderField {
    fn from(value: &str) -> Self {
        HeaderField::Single(value.to_string())
    }
}

impl From<String> for HeaderField {
    fn from(value: String) -> Self {
        HeaderField::Single(value)
    }
}

/// Header map as carried over the tunnel (order irrelevant)
pub type Headers = HashMap<String, HeaderField>;

/// Insert a header value, lowercasing the name and merging repeated headers
pub fn append_header(headers: &mut Headers, name: &str, value: String) {
    let name = name.to_ascii_lowercase();
    match headers.get_mut(&name) {
        Some(existing) => existing.push(value),
        None => {
            headers.insert(name, HeaderField::Single(value));
        }
    }
}

/// Case-insensitive lookup of the first value of a header
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, field)| field.first())
}

/// Whether a header must be dropped when crossing a hop
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}
