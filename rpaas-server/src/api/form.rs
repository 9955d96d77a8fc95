//! `application/x-www-form-urlencoded` decoding with nested keys
//!
//! Keys are dotted paths: `a.b=1&a.c=2` binds to `a = {b: 1, c: 2}` and
//! `tags.0=x&tags.1=y` binds to `tags = [x, y]`. A repeated key binds to a
//! list. Everything on the wire is a string; numbers and booleans are parsed
//! when the target type asks for them. Unknown keys are ignored by the usual
//! serde rules, and `#[serde(skip)]` fields are never bound.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, DeserializeOwned, IntoDeserializer, Visitor};

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    List(Vec<FormValue>),
    Map(BTreeMap<String, FormValue>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormError(String);

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for FormError {}

impl de::Error for FormError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        FormError(msg.to_string())
    }
}

pub fn from_bytes<T: DeserializeOwned>(input: &[u8]) -> Result<T, FormError> {
    from_pairs(url::form_urlencoded::parse(input).into_owned())
}

pub fn from_pairs<T, I, K, V>(pairs: I) -> Result<T, FormError>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    T::deserialize(build(pairs)?)
}

/// Folds flat `key=value` pairs into a tree, in order.
pub fn build<I, K, V>(pairs: I) -> Result<FormValue, FormError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut root = BTreeMap::new();
    for (key, value) in pairs {
        let key = key.as_ref();
        // PHP style `tags[]=a&tags[]=b` is just a repeated key
        let key = key.strip_suffix("[]").unwrap_or(key);
        if key.is_empty() {
            continue;
        }
        let segments: Vec<&str> = key.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FormError(format!("invalid form key {:?}", key)));
        }
        insert(&mut root, &segments, value.into(), key)?;
    }
    Ok(FormValue::Map(root))
}

fn insert(
    map: &mut BTreeMap<String, FormValue>,
    segments: &[&str],
    value: String,
    key: &str,
) -> Result<(), FormError> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        let merged = match map.remove(*head) {
            None => FormValue::Text(value),
            Some(FormValue::Text(previous)) => {
                FormValue::List(vec![FormValue::Text(previous), FormValue::Text(value)])
            }
            Some(FormValue::List(mut items)) => {
                items.push(FormValue::Text(value));
                FormValue::List(items)
            }
            Some(FormValue::Map(_)) => return Err(conflicting(key)),
        };
        map.insert(head.to_string(), merged);
        return Ok(());
    }

    let child = map
        .entry(head.to_string())
        .or_insert_with(|| FormValue::Map(BTreeMap::new()));
    match child {
        FormValue::Map(child) => insert(child, rest, value, key),
        _ => Err(conflicting(key)),
    }
}

fn conflicting(key: &str) -> FormError {
    FormError(format!("form key {:?} is both a value and a nested object", key))
}

fn is_indexed(map: &BTreeMap<String, FormValue>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.parse::<usize>().is_ok())
}

/// `{"1": b, "0": a}` -> `[a, b]`, ordered by index rather than by key text.
fn indexed_list(map: BTreeMap<String, FormValue>) -> Vec<FormValue> {
    let mut items: Vec<(usize, FormValue)> = map
        .into_iter()
        .filter_map(|(k, v)| k.parse().ok().map(|i| (i, v)))
        .collect();
    items.sort_by_key(|(i, _)| *i);
    items.into_iter().map(|(_, v)| v).collect()
}

impl FormValue {
    fn into_text(self) -> Result<String, FormError> {
        match self {
            FormValue::Text(s) => Ok(s),
            // scalar targets take the first of repeated values
            FormValue::List(items) => match items.into_iter().next() {
                Some(first) => first.into_text(),
                None => Ok(String::new()),
            },
            FormValue::Map(_) => Err(FormError(
                "expected a value, found nested keys".to_string(),
            )),
        }
    }

    fn into_list(self) -> Result<Vec<FormValue>, FormError> {
        match self {
            FormValue::Text(s) if s.is_empty() => Ok(Vec::new()),
            FormValue::Text(s) => Ok(vec![FormValue::Text(s)]),
            FormValue::List(items) => Ok(items),
            FormValue::Map(map) if map.is_empty() => Ok(Vec::new()),
            FormValue::Map(map) if is_indexed(&map) => Ok(indexed_list(map)),
            FormValue::Map(_) => Err(FormError(
                "expected a list, found nested keys".to_string(),
            )),
        }
    }
}

impl<'de> IntoDeserializer<'de, FormError> for FormValue {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! parse_number {
    ($($method:ident => $visit:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
                let text = self.into_text()?;
                let number = text
                    .trim()
                    .parse::<$ty>()
                    .map_err(|_| FormError(format!("invalid number {:?}", text)))?;
                visitor.$visit(number)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for FormValue {
    type Error = FormError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        match self {
            FormValue::Text(s) => visitor.visit_string(s),
            FormValue::List(items) => visitor.visit_seq(SeqDeserializer::new(items.into_iter())),
            FormValue::Map(map) if is_indexed(&map) => {
                visitor.visit_seq(SeqDeserializer::new(indexed_list(map).into_iter()))
            }
            FormValue::Map(map) => visitor.visit_map(MapDeserializer::new(map.into_iter())),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        let text = self.into_text()?;
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => visitor.visit_bool(true),
            "false" | "0" | "off" | "no" | "" => visitor.visit_bool(false),
            _ => Err(FormError(format!("invalid boolean {:?}", text))),
        }
    }

    parse_number! {
        deserialize_i8 => visit_i8(i8),
        deserialize_i16 => visit_i16(i16),
        deserialize_i32 => visit_i32(i32),
        deserialize_i64 => visit_i64(i64),
        deserialize_u8 => visit_u8(u8),
        deserialize_u16 => visit_u16(u16),
        deserialize_u32 => visit_u32(u32),
        deserialize_u64 => visit_u64(u64),
        deserialize_f32 => visit_f32(f32),
        deserialize_f64 => visit_f64(f64),
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        let text = self.into_text()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(FormError(format!("expected a single character, got {:?}", text))),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        visitor.visit_string(self.into_text()?)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        visitor.visit_string(self.into_text()?)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        visitor.visit_byte_buf(self.into_text()?.into_bytes())
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        visitor.visit_byte_buf(self.into_text()?.into_bytes())
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        match &self {
            FormValue::Text(s) if s.is_empty() => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, FormError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, FormError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        visitor.visit_seq(SeqDeserializer::new(self.into_list()?.into_iter()))
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, FormError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, FormError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        match self {
            FormValue::Map(map) => visitor.visit_map(MapDeserializer::new(map.into_iter())),
            FormValue::Text(s) if s.is_empty() => visitor.visit_map(MapDeserializer::new(
                BTreeMap::<String, FormValue>::new().into_iter(),
            )),
            _ => Err(FormError("expected nested keys".to_string())),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, FormError> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, FormError> {
        let text = self.into_text()?;
        visitor.visit_enum(IntoDeserializer::<'de, FormError>::into_deserializer(text))
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FormError> {
        visitor.visit_unit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpaas_models::{Autoscale, CreateArgs, ExecOptions, PurgeArgs};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Nested {
        name: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        complex: BTreeMap<String, serde_json::Value>,
        #[serde(skip)]
        ignored: bool,
    }

    #[test]
    fn nested_keys_and_indexed_lists() {
        let body = "name=my-instance&tags.0=tag1&tags.1=tag2&complex.key1=1&complex.other.key=value&ignored=true";
        let bound: Nested = from_bytes(body.as_bytes()).unwrap();
        assert_eq!(bound.name, "my-instance");
        assert_eq!(bound.tags, vec!["tag1", "tag2"]);
        assert_eq!(bound.complex.get("key1"), Some(&json!("1")));
        assert_eq!(bound.complex.get("other"), Some(&json!({ "key": "value" })));
        assert!(!bound.ignored);
    }

    #[test]
    fn indexes_sort_numerically() {
        let body = "name=x&tags.10=k&tags.2=c&tags.0=a";
        let bound: Nested = from_bytes(body.as_bytes()).unwrap();
        assert_eq!(bound.tags, vec!["a", "c", "k"]);
    }

    #[test]
    fn repeated_keys_become_lists() {
        let body = "name=x&tags=a&tags=b&tags[]=c";
        let bound: Nested = from_bytes(body.as_bytes()).unwrap();
        assert_eq!(bound.tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn create_args_from_tsuru_form() {
        let body = "name=my-instance&plan=small&team=team-one&description=some+words&tags=a&tags=b&parameters.flavors=orange,mango";
        let args: CreateArgs = from_bytes(body.as_bytes()).unwrap();
        assert_eq!(args.name, "my-instance");
        assert_eq!(args.description, "some words");
        assert_eq!(args.tags, vec!["a", "b"]);
        assert_eq!(args.all_flavors(), vec!["orange", "mango"]);
    }

    #[test]
    fn numbers_and_booleans_are_coerced() {
        let autoscale: Autoscale = from_bytes(b"min=2&max=10&cpu=").unwrap();
        assert_eq!(autoscale.min_replicas, Some(2));
        assert_eq!(autoscale.max_replicas, Some(10));
        assert_eq!(autoscale.cpu, None);

        let purge: PurgeArgs =
            from_bytes(b"path=/index.html&preserve_path=true&extra_headers.X-Host=a&extra_headers.X-Host=b")
                .unwrap();
        assert!(purge.preserve_path);
        assert_eq!(purge.extra_headers["X-Host"], vec!["a", "b"]);
    }

    #[test]
    fn single_value_binds_to_list() {
        let options: ExecOptions =
            from_bytes(b"command=bash&tty=true&width=80&height=24&interactive=true").unwrap();
        assert_eq!(options.command, vec!["bash"]);
        assert!(options.tty);
        assert_eq!(options.width, Some(80));
        assert_eq!(options.height, Some(24));
    }

    #[test]
    fn bad_values_are_errors() {
        let err = from_bytes::<Autoscale>(b"max=ten").unwrap_err();
        assert_eq!(err.to_string(), "invalid number \"ten\"");

        let err = from_bytes::<Nested>(b"name=x&name.first=y").unwrap_err();
        assert!(err.to_string().contains("both a value and a nested object"));

        let err = from_bytes::<Nested>(b"name=x&tags..0=y").unwrap_err();
        assert!(err.to_string().starts_with("invalid form key"));
    }

    #[test]
    fn missing_required_field() {
        let err = from_bytes::<Nested>(b"tags=a").unwrap_err();
        assert_eq!(err.to_string(), "missing field `name`");
    }
}
