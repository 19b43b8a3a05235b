//! Front-matter values.
//!
//! [`Value`] is the tagged variant every metadata value is normalized into,
//! whichever syntax (YAML, TOML, JSON) it was written in. [`Metadata`] is an
//! insertion-ordered map of those values with explicit shallow-merge
//! semantics: merging replaces whole values key by key and never descends
//! into nested maps.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(DateTime<FixedOffset>),
    List(Vec<Value>),
    Map(Metadata),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Value::Date(date) => Some(*date),
            Value::String(text) => parse_date(text),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Metadata> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// A list of strings, or a single string split on whitespace.
    pub fn as_string_list(&self) -> Vec<String> {
        match self {
            Value::List(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect(),
            Value::String(text) => text.split_whitespace().map(String::from).collect(),
            _ => Vec::new(),
        }
    }

    pub fn from_yaml(value: serde_yml::Value) -> Self {
        match value {
            serde_yml::Value::Null => Value::Null,
            serde_yml::Value::Bool(flag) => Value::Bool(flag),
            serde_yml::Value::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    Value::Integer(integer)
                } else {
                    Value::Float(number.as_f64().unwrap_or_default())
                }
            }
            serde_yml::Value::String(text) => Value::String(text),
            serde_yml::Value::Sequence(items) => {
                Value::List(items.into_iter().map(Value::from_yaml).collect())
            }
            serde_yml::Value::Mapping(mapping) => {
                let mut map = Metadata::new();
                for (key, value) in mapping {
                    map.insert(yaml_key(key), Value::from_yaml(value));
                }
                Value::Map(map)
            }
            serde_yml::Value::Tagged(tagged) => Value::from_yaml(tagged.value),
        }
    }

    pub fn from_toml(value: toml::Value) -> Self {
        match value {
            toml::Value::String(text) => Value::String(text),
            toml::Value::Integer(integer) => Value::Integer(integer),
            toml::Value::Float(float) => Value::Float(float),
            toml::Value::Boolean(flag) => Value::Bool(flag),
            toml::Value::Datetime(datetime) => {
                let text = datetime.to_string();
                parse_date(&text)
                    .map(Value::Date)
                    .unwrap_or(Value::String(text))
            }
            toml::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_toml).collect())
            }
            toml::Value::Table(table) => Value::Map(Metadata::from_toml_table(table)),
        }
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Bool(flag),
            serde_json::Value::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    Value::Integer(integer)
                } else {
                    Value::Float(number.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(text) => Value::String(text),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(object) => {
                let mut map = Metadata::new();
                for (key, value) in object {
                    map.insert(key, Value::from_json(value));
                }
                Value::Map(map)
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Integer(integer) => serde_json::Value::from(*integer),
            Value::Float(float) => serde_json::Number::from_f64(*float)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(text) => serde_json::Value::String(text.clone()),
            Value::Date(date) => serde_json::Value::String(date.to_rfc3339()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => map.to_json(),
        }
    }
}

fn yaml_key(key: serde_yml::Value) -> String {
    match key {
        serde_yml::Value::String(text) => text,
        serde_yml::Value::Bool(flag) => flag.to_string(),
        serde_yml::Value::Number(number) => number.to_string(),
        serde_yml::Value::Null => "null".to_string(),
        other => serde_yml::to_string(&other)
            .map(|text| text.trim().to_string())
            .unwrap_or_default(),
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(integer: i64) -> Self {
        Value::Integer(integer)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(flag) => serializer.serialize_bool(*flag),
            Value::Integer(integer) => serializer.serialize_i64(*integer),
            Value::Float(float) => serializer.serialize_f64(*float),
            Value::String(text) => serializer.serialize_str(text),
            Value::Date(date) => serializer.serialize_str(&date.to_rfc3339()),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => map.serialize(serializer),
        }
    }
}

/// Insertion-ordered string-keyed map of [`Value`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<(String, Value)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<FixedOffset>> {
        self.get(key).and_then(Value::as_date)
    }

    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        self.get(key).map(Value::as_string_list).unwrap_or_default()
    }

    /// Inserts or replaces `key`; a replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Shallow merge: every key of `other` overwrites the same key here.
    pub fn merge(&mut self, other: &Metadata) {
        for (key, value) in &other.entries {
            self.insert(key.clone(), value.clone());
        }
    }

    pub fn from_toml_table(table: toml::Table) -> Self {
        let mut map = Metadata::new();
        for (key, value) in table {
            map.insert(key, Value::from_toml(value));
        }
        map
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            object.insert(key.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Metadata::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

const NAIVE_DATETIME_FORMATS: &[&str] =
    &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parses the date forms front matter commonly uses. Values without an
/// offset are taken as UTC.
pub fn parse_date(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();

    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date);
    }
    if let Ok(date) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z") {
        return Some(date);
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_position_on_replace() {
        let mut map = Metadata::new();
        map.insert("title", "First");
        map.insert("layout", "post");
        map.insert("title", "Second");

        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["title", "layout"]);
        assert_eq!(map.get_str("title"), Some("Second"));
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut base = Metadata::new();
        base.insert(
            "author",
            Value::Map([("name", "Ada"), ("email", "ada@example.com")].into_iter().collect()),
        );
        base.insert("layout", "default");

        let mut top = Metadata::new();
        top.insert("author", Value::Map([("name", "Grace")].into_iter().collect()));

        base.merge(&top);

        let author = base.get("author").and_then(Value::as_map).unwrap();
        assert_eq!(author.get_str("name"), Some("Grace"));
        assert!(!author.contains_key("email"));
        assert_eq!(base.get_str("layout"), Some("default"));
    }

    #[test]
    fn test_from_yaml_mapping() {
        let yaml: serde_yml::Value =
            serde_yml::from_str("title: Hello\ntags: [a, b]\ncount: 3\nratio: 0.5\n").unwrap();
        let Value::Map(map) = Value::from_yaml(yaml) else {
            panic!("expected map");
        };

        assert_eq!(map.get_str("title"), Some("Hello"));
        assert_eq!(map.get_string_list("tags"), vec!["a", "b"]);
        assert_eq!(map.get_i64("count"), Some(3));
        assert_eq!(map.get("ratio"), Some(&Value::Float(0.5)));
    }

    #[test]
    fn test_from_toml_datetime_becomes_date() {
        let table: toml::Table = toml::from_str("date = 2024-01-15\n").unwrap();
        let map = Metadata::from_toml_table(table);

        let date = map.get_date("date").unwrap();
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2024-01-15");
        assert!(matches!(map.get("date"), Some(Value::Date(_))));
    }

    #[test]
    fn test_parse_date_forms() {
        assert!(parse_date("2024-01-15").is_some());
        assert!(parse_date("2024-01-15 10:30:00").is_some());
        assert!(parse_date("2024-01-15 10:30:00 +0200").is_some());
        assert!(parse_date("2024-01-15T10:30:00Z").is_some());
        assert!(parse_date("not a date").is_none());
    }

    #[test]
    fn test_serialize_preserves_order_and_dates() {
        let mut map = Metadata::new();
        map.insert("b", 1_i64);
        map.insert("a", Value::Date(parse_date("2024-01-15").unwrap()));

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"b":1,"a":"2024-01-15T00:00:00+00:00"}"#);
    }

    #[test]
    fn test_string_list_from_space_separated_string() {
        let value = Value::from("rust web");
        assert_eq!(value.as_string_list(), vec!["rust", "web"]);
    }
}
