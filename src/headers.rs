//! Ordered, case-insensitive header multimap
//!
//! Captured exchanges store headers as name → list of values, which is also
//! their JSON shape. Conversion to and from [`http::HeaderMap`] is explicit.

use std::fmt;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMultimap {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderMultimap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, merging with an existing name regardless of case
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Replace all values for a name
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = values,
            None => self.entries.push((name, values)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|idx| self.entries[idx].1.as_slice())
    }

    /// First value for a name
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Build from an `http` header map, keeping first-seen name order
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut multimap = Self::new();
        for (name, value) in map {
            let value = match value.to_str() {
                Ok(v) => v.to_string(),
                Err(_) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
            };
            multimap.append(name.as_str(), value);
        }
        multimap
    }

    /// Convert to an `http` header map
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, values) in &self.entries {
            let header_name: HeaderName = name
                .parse()
                .map_err(|_| Error::UnsupportedShape(format!("invalid header name: {}", name)))?;
            for value in values {
                let header_value = HeaderValue::from_str(value).map_err(|_| {
                    Error::UnsupportedShape(format!("invalid header value for {}", name))
                })?;
                map.append(header_name.clone(), header_value);
            }
        }
        Ok(map)
    }
}

impl From<&HeaderMap> for HeaderMultimap {
    fn from(map: &HeaderMap) -> Self {
        Self::from_header_map(map)
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMultimap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut multimap = Self::new();
        for (name, value) in iter {
            multimap.append(name, value);
        }
        multimap
    }
}

impl Serialize for HeaderMultimap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HeaderMultimap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MultimapVisitor;

        impl<'de> Visitor<'de> for MultimapVisitor {
            type Value = HeaderMultimap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header names to string arrays")
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(HeaderMultimap::new())
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut multimap = HeaderMultimap::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<String>>()? {
                    for value in values {
                        multimap.append(name.clone(), value);
                    }
                }
                Ok(multimap)
            }
        }

        deserializer.deserialize_any(MultimapVisitor)
    }
}
