use super::{parse_number, ApiValue, ApiValuePtr, ApiValueType, ValueEncoding};
use bytes::Bytes;
use indexmap::IndexMap;
use std::any::Any;

/// Payload of a [`StructApiValue`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StructData {
    #[default]
    Null,
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    Binary(Bytes),
    Object(IndexMap<String, StructApiValue>),
    Array(Vec<StructApiValue>),
}

/// Protobuf-struct-flavored API value: exact scalar types, raw binary data,
/// objects keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct StructApiValue {
    data: StructData,
    key_iter: usize,
}

impl PartialEq for StructApiValue {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl StructApiValue {
    pub fn new(value_type: ApiValueType) -> Self {
        let mut v = StructApiValue::default();
        v.set_type(value_type);
        v
    }

    pub fn with_data(data: StructData) -> Self {
        StructApiValue { data, key_iter: 0 }
    }

    pub fn data(&self) -> &StructData {
        &self.data
    }

    /// Copy any API value into the struct encoding.
    pub fn from_api_value(other: &dyn ApiValue) -> Self {
        let mut v = StructApiValue::default();
        v.set_value(other);
        v
    }

    /// Build from JSON; numbers keep their JSON integer/float kind.
    pub fn from_json(value: &serde_json::Value) -> ApiValuePtr {
        Box::new(Self::with_json(value))
    }

    pub fn with_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        let data = match value {
            Value::Null => StructData::Null,
            Value::Bool(b) => StructData::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    StructData::Int64(i)
                } else if let Some(u) = n.as_u64() {
                    StructData::Uint64(u)
                } else {
                    StructData::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => StructData::String(s.clone()),
            Value::Array(items) => StructData::Array(items.iter().map(Self::with_json).collect()),
            Value::Object(map) => StructData::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::with_json(v)))
                    .collect(),
            ),
        };
        StructApiValue::with_data(data)
    }

    fn member(value: ApiValuePtr) -> StructApiValue {
        if value.as_any().is::<StructApiValue>() {
            match value.into_any().downcast::<StructApiValue>() {
                Ok(v) => *v,
                Err(_) => StructApiValue::default(),
            }
        } else {
            StructApiValue::from_api_value(value.as_ref())
        }
    }

    fn object_mut(&mut self) -> &mut IndexMap<String, StructApiValue> {
        if !matches!(self.data, StructData::Object(_)) {
            self.data = StructData::Object(IndexMap::new());
            self.key_iter = 0;
        }
        match &mut self.data {
            StructData::Object(map) => map,
            _ => unreachable!("data was just made an object"),
        }
    }

    fn array_mut(&mut self) -> &mut Vec<StructApiValue> {
        if !matches!(self.data, StructData::Array(_)) {
            self.data = StructData::Array(Vec::new());
        }
        match &mut self.data {
            StructData::Array(items) => items,
            _ => unreachable!("data was just made an array"),
        }
    }
}

impl ApiValue for StructApiValue {
    fn encoding(&self) -> ValueEncoding {
        ValueEncoding::Struct
    }

    fn new_value(&self, value_type: ApiValueType) -> ApiValuePtr {
        Box::new(StructApiValue::new(value_type))
    }

    fn value_type(&self) -> ApiValueType {
        match self.data {
            StructData::Null => ApiValueType::Null,
            StructData::Bool(_) => ApiValueType::Bool,
            StructData::Int64(_) => ApiValueType::Int64,
            StructData::Uint64(_) => ApiValueType::Uint64,
            StructData::Double(_) => ApiValueType::Double,
            StructData::String(_) => ApiValueType::String,
            StructData::Binary(_) => ApiValueType::Binary,
            StructData::Object(_) => ApiValueType::Object,
            StructData::Array(_) => ApiValueType::Array,
        }
    }

    fn set_type(&mut self, value_type: ApiValueType) {
        self.data = match value_type {
            ApiValueType::Null => StructData::Null,
            ApiValueType::Bool => StructData::Bool(false),
            ApiValueType::Int64 => StructData::Int64(0),
            ApiValueType::Uint64 => StructData::Uint64(0),
            ApiValueType::Double => StructData::Double(0.0),
            ApiValueType::String => StructData::String(String::new()),
            ApiValueType::Binary => StructData::Binary(Bytes::new()),
            ApiValueType::Object => StructData::Object(IndexMap::new()),
            ApiValueType::Array => StructData::Array(Vec::new()),
        };
        self.key_iter = 0;
    }

    fn clone_value(&self) -> ApiValuePtr {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn assign_same_encoding(&mut self, other: &dyn ApiValue) -> bool {
        match other.as_any().downcast_ref::<StructApiValue>() {
            Some(v) => {
                self.data = v.data.clone();
                self.key_iter = 0;
                true
            }
            None => false,
        }
    }

    fn get(&self, key: &str) -> Option<ApiValuePtr> {
        match &self.data {
            StructData::Object(map) => map.get(key).map(|v| v.clone_value()),
            _ => None,
        }
    }

    fn add(&mut self, key: &str, value: ApiValuePtr) {
        let member = Self::member(value);
        self.object_mut().insert(key.to_string(), member);
    }

    fn del(&mut self, key: &str) {
        if let StructData::Object(map) = &mut self.data {
            map.shift_remove(key);
        }
    }

    fn keys(&self) -> Vec<String> {
        match &self.data {
            StructData::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn reset_key_iteration(&mut self) {
        self.key_iter = 0;
    }

    fn next_key_value(&mut self) -> Option<(String, ApiValuePtr)> {
        let StructData::Object(map) = &self.data else {
            return None;
        };
        let (key, value) = map.get_index(self.key_iter)?;
        let entry = (key.clone(), value.clone_value());
        self.key_iter += 1;
        Some(entry)
    }

    fn array_length(&self) -> usize {
        match &self.data {
            StructData::Array(items) => items.len(),
            _ => 0,
        }
    }

    fn array_get(&self, index: usize) -> Option<ApiValuePtr> {
        match &self.data {
            StructData::Array(items) => items.get(index).map(|v| v.clone_value()),
            _ => None,
        }
    }

    fn array_append(&mut self, value: ApiValuePtr) {
        let element = Self::member(value);
        self.array_mut().push(element);
    }

    fn array_put(&mut self, index: usize, value: ApiValuePtr) {
        let element = Self::member(value);
        let items = self.array_mut();
        if index >= items.len() {
            items.resize(index + 1, StructApiValue::default());
        }
        items[index] = element;
    }

    fn bool_value(&self) -> bool {
        match &self.data {
            StructData::Null => false,
            StructData::Bool(b) => *b,
            StructData::Int64(i) => *i != 0,
            StructData::Uint64(u) => *u != 0,
            StructData::Double(d) => *d != 0.0,
            StructData::String(s) => !s.is_empty(),
            StructData::Binary(b) => !b.is_empty(),
            StructData::Object(map) => !map.is_empty(),
            StructData::Array(items) => !items.is_empty(),
        }
    }

    fn int64_value(&self) -> i64 {
        match &self.data {
            StructData::Bool(b) => i64::from(*b),
            StructData::Int64(i) => *i,
            StructData::Uint64(u) => *u as i64,
            StructData::Double(d) => *d as i64,
            StructData::String(s) => parse_number(s),
            _ => 0,
        }
    }

    fn uint64_value(&self) -> u64 {
        match &self.data {
            StructData::Bool(b) => u64::from(*b),
            StructData::Int64(i) => *i as u64,
            StructData::Uint64(u) => *u,
            StructData::Double(d) => *d as u64,
            StructData::String(s) => parse_number(s),
            _ => 0,
        }
    }

    fn double_value(&self) -> f64 {
        match &self.data {
            StructData::Bool(b) => f64::from(u8::from(*b)),
            StructData::Int64(i) => *i as f64,
            StructData::Uint64(u) => *u as f64,
            StructData::Double(d) => *d,
            StructData::String(s) => parse_number(s),
            _ => 0.0,
        }
    }

    fn string_value(&self) -> String {
        match &self.data {
            StructData::Null => String::new(),
            StructData::Bool(b) => b.to_string(),
            StructData::Int64(i) => i.to_string(),
            StructData::Uint64(u) => u.to_string(),
            StructData::Double(d) => d.to_string(),
            StructData::String(s) => s.clone(),
            StructData::Binary(b) => hex::encode(b),
            StructData::Object(_) | StructData::Array(_) => self.to_json().to_string(),
        }
    }

    fn binary_value(&self) -> Vec<u8> {
        match &self.data {
            StructData::Binary(b) => b.to_vec(),
            StructData::String(s) => s.as_bytes().to_vec(),
            _ => Vec::new(),
        }
    }

    fn set_bool_value(&mut self, value: bool) {
        self.data = StructData::Bool(value);
    }

    fn set_int64_value(&mut self, value: i64) {
        self.data = StructData::Int64(value);
    }

    fn set_uint64_value(&mut self, value: u64) {
        self.data = StructData::Uint64(value);
    }

    fn set_double_value(&mut self, value: f64) {
        self.data = StructData::Double(value);
    }

    fn set_string_value(&mut self, value: &str) {
        self.data = StructData::String(value.to_string());
    }

    fn set_binary_value(&mut self, value: &[u8]) {
        self.data = StructData::Binary(Bytes::copy_from_slice(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_keeps_insertion_order() {
        let mut v = StructApiValue::new(ApiValueType::Object);
        v.add_int64("zeta", 1);
        v.add_int64("alpha", 2);
        v.add_int64("mid", 3);
        assert_eq!(v.keys(), vec!["zeta", "alpha", "mid"]);

        v.reset_key_iteration();
        let order: Vec<String> = std::iter::from_fn(|| v.next_key_value())
            .map(|(k, _)| k)
            .collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_same_encoding_assignment_is_deep_copy() {
        let mut source = StructApiValue::with_json(&json!({"a": {"b": [1, 2]}}));
        let mut target = StructApiValue::default();
        assert!(target.assign_same_encoding(&source));
        source.del("a");
        assert_eq!(target.to_json(), json!({"a": {"b": [1, 2]}}));
    }

    #[test]
    fn test_member_of_foreign_encoding_is_converted() {
        let mut v = StructApiValue::new(ApiValueType::Array);
        v.array_append(crate::value::JsonApiValue::from_json(json!({"x": 1})));
        let element = v.array_get(0).unwrap();
        assert_eq!(element.encoding(), ValueEncoding::Struct);
        assert_eq!(element.get("x").map(|x| x.int64_value()), Some(1));
    }

    #[test]
    fn test_uint64_keeps_full_range() {
        let mut v = StructApiValue::new(ApiValueType::Uint64);
        v.set_uint64_value(u64::MAX);
        assert_eq!(v.uint64_value(), u64::MAX);
        assert_eq!(v.value_type(), ApiValueType::Uint64);
    }
}
