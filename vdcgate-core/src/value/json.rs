use super::{parse_number, ApiValue, ApiValuePtr, ApiValueType, ValueEncoding};
use serde_json::{Map, Number, Value};
use std::any::Any;
use std::collections::BTreeMap;

/// JSON-flavored API value backed by `serde_json::Value`.
///
/// The declared type is tracked next to the JSON payload because JSON cannot
/// tell `uint64` from `int64` or binary data from strings. Values obtained
/// from a JSON document get their type inferred from the payload; direct
/// members and elements keep a declared type that inference would miss.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonApiValue {
    value: Value,
    value_type: ApiValueType,
    key_iter: usize,
    member_types: BTreeMap<String, ApiValueType>,
    element_types: BTreeMap<usize, ApiValueType>,
}

impl JsonApiValue {
    pub fn new(value_type: ApiValueType) -> Self {
        let mut v = JsonApiValue {
            value: Value::Null,
            value_type: ApiValueType::Null,
            key_iter: 0,
            member_types: BTreeMap::new(),
            element_types: BTreeMap::new(),
        };
        v.set_type(value_type);
        v
    }

    pub fn with_json(value: Value) -> Self {
        let value_type = infer_type(&value);
        JsonApiValue {
            value,
            value_type,
            key_iter: 0,
            member_types: BTreeMap::new(),
            element_types: BTreeMap::new(),
        }
    }

    fn typed(value: Value, declared: Option<ApiValueType>) -> ApiValuePtr {
        let mut member = Self::with_json(value);
        if let Some(value_type) = declared {
            member.value_type = value_type;
        }
        Box::new(member)
    }

    /// Replace the payload, forgetting member bookkeeping.
    fn replace(&mut self, value: Value, value_type: ApiValueType) {
        self.value = value;
        self.value_type = value_type;
        self.key_iter = 0;
        self.member_types.clear();
        self.element_types.clear();
    }

    pub fn from_json(value: Value) -> ApiValuePtr {
        Box::new(Self::with_json(value))
    }

    /// Copy any API value into the JSON encoding.
    pub fn from_api_value(other: &dyn ApiValue) -> Self {
        let mut v = JsonApiValue::new(ApiValueType::Null);
        v.set_value(other);
        v
    }

    pub fn json(&self) -> &Value {
        &self.value
    }

    /// Take ownership of a member's JSON payload, converting foreign
    /// encodings. The declared type comes along when inference would not
    /// recover it.
    fn member_value(value: ApiValuePtr) -> (Value, Option<ApiValueType>) {
        let declared = value.value_type();
        let payload = if value.as_any().is::<JsonApiValue>() {
            match value.into_any().downcast::<JsonApiValue>() {
                Ok(json) => json.value,
                Err(_) => Value::Null,
            }
        } else {
            JsonApiValue::from_api_value(value.as_ref()).value
        };
        let hint = (infer_type(&payload) != declared).then_some(declared);
        (payload, hint)
    }

    fn object_mut(&mut self) -> &mut Map<String, Value> {
        if !self.value.is_object() {
            self.replace(Value::Object(Map::new()), ApiValueType::Object);
        }
        match &mut self.value {
            Value::Object(map) => map,
            _ => unreachable!("value was just made an object"),
        }
    }

    fn array_mut(&mut self) -> &mut Vec<Value> {
        if !self.value.is_array() {
            self.replace(Value::Array(Vec::new()), ApiValueType::Array);
        }
        match &mut self.value {
            Value::Array(items) => items,
            _ => unreachable!("value was just made an array"),
        }
    }
}

fn infer_type(value: &Value) -> ApiValueType {
    match value {
        Value::Null => ApiValueType::Null,
        Value::Bool(_) => ApiValueType::Bool,
        Value::Number(n) if n.is_i64() => ApiValueType::Int64,
        Value::Number(n) if n.is_u64() => ApiValueType::Uint64,
        Value::Number(_) => ApiValueType::Double,
        Value::String(_) => ApiValueType::String,
        Value::Array(_) => ApiValueType::Array,
        Value::Object(_) => ApiValueType::Object,
    }
}

impl ApiValue for JsonApiValue {
    fn encoding(&self) -> ValueEncoding {
        ValueEncoding::Json
    }

    fn new_value(&self, value_type: ApiValueType) -> ApiValuePtr {
        Box::new(JsonApiValue::new(value_type))
    }

    fn value_type(&self) -> ApiValueType {
        self.value_type
    }

    fn set_type(&mut self, value_type: ApiValueType) {
        let value = match value_type {
            ApiValueType::Null => Value::Null,
            ApiValueType::Bool => Value::Bool(false),
            ApiValueType::Int64 => Value::from(0i64),
            ApiValueType::Uint64 => Value::from(0u64),
            ApiValueType::Double => Value::from(0.0f64),
            ApiValueType::String | ApiValueType::Binary => Value::String(String::new()),
            ApiValueType::Object => Value::Object(Map::new()),
            ApiValueType::Array => Value::Array(Vec::new()),
        };
        self.replace(value, value_type);
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
        match other.as_any().downcast_ref::<JsonApiValue>() {
            Some(json) => {
                self.value = json.value.clone();
                self.value_type = json.value_type;
                self.key_iter = 0;
                self.member_types = json.member_types.clone();
                self.element_types = json.element_types.clone();
                true
            }
            None => false,
        }
    }

    fn get(&self, key: &str) -> Option<ApiValuePtr> {
        self.value
            .as_object()
            .and_then(|map| map.get(key))
            .map(|v| Self::typed(v.clone(), self.member_types.get(key).copied()))
    }

    fn add(&mut self, key: &str, value: ApiValuePtr) {
        let (member, declared) = Self::member_value(value);
        self.object_mut().insert(key.to_string(), member);
        match declared {
            Some(value_type) => self.member_types.insert(key.to_string(), value_type),
            None => self.member_types.remove(key),
        };
    }

    fn del(&mut self, key: &str) {
        if let Value::Object(map) = &mut self.value {
            map.remove(key);
            self.member_types.remove(key);
        }
    }

    fn keys(&self) -> Vec<String> {
        self.value
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn reset_key_iteration(&mut self) {
        self.key_iter = 0;
    }

    fn next_key_value(&mut self) -> Option<(String, ApiValuePtr)> {
        let map = self.value.as_object()?;
        let (key, value) = map.iter().nth(self.key_iter)?;
        self.key_iter += 1;
        let declared = self.member_types.get(key).copied();
        Some((key.clone(), Self::typed(value.clone(), declared)))
    }

    fn array_length(&self) -> usize {
        self.value.as_array().map(Vec::len).unwrap_or(0)
    }

    fn array_get(&self, index: usize) -> Option<ApiValuePtr> {
        self.value
            .as_array()
            .and_then(|items| items.get(index))
            .map(|v| Self::typed(v.clone(), self.element_types.get(&index).copied()))
    }

    fn array_append(&mut self, value: ApiValuePtr) {
        let index = self.array_length();
        self.array_put(index, value);
    }

    fn array_put(&mut self, index: usize, value: ApiValuePtr) {
        let (element, declared) = Self::member_value(value);
        let items = self.array_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Null);
        }
        items[index] = element;
        match declared {
            Some(value_type) => self.element_types.insert(index, value_type),
            None => self.element_types.remove(&index),
        };
    }

    fn bool_value(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty(),
            Value::Null => false,
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }

    fn int64_value(&self) -> i64 {
        match &self.value {
            Value::Bool(b) => i64::from(*b),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|u| u as i64))
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Value::String(s) => parse_number(s),
            _ => 0,
        }
    }

    fn uint64_value(&self) -> u64 {
        match &self.value {
            Value::Bool(b) => u64::from(*b),
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_i64().map(|i| i as u64))
                .or_else(|| n.as_f64().map(|f| f as u64))
                .unwrap_or(0),
            Value::String(s) => parse_number(s),
            _ => 0,
        }
    }

    fn double_value(&self) -> f64 {
        match &self.value {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => parse_number(s),
            _ => 0.0,
        }
    }

    fn string_value(&self) -> String {
        match &self.value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn binary_value(&self) -> Vec<u8> {
        match &self.value {
            Value::String(s) => hex::decode(s).unwrap_or_else(|_| s.as_bytes().to_vec()),
            _ => Vec::new(),
        }
    }

    fn set_bool_value(&mut self, value: bool) {
        self.replace(Value::Bool(value), ApiValueType::Bool);
    }

    fn set_int64_value(&mut self, value: i64) {
        self.replace(Value::from(value), ApiValueType::Int64);
    }

    fn set_uint64_value(&mut self, value: u64) {
        self.replace(Value::from(value), ApiValueType::Uint64);
    }

    fn set_double_value(&mut self, value: f64) {
        // JSON has no NaN/inf, those degrade to null
        match Number::from_f64(value) {
            Some(n) => self.replace(Value::Number(n), ApiValueType::Double),
            None => self.replace(Value::Null, ApiValueType::Null),
        }
    }

    fn set_string_value(&mut self, value: &str) {
        self.replace(Value::String(value.to_string()), ApiValueType::String);
    }

    fn set_binary_value(&mut self, value: &[u8]) {
        self.replace(Value::String(hex::encode(value)), ApiValueType::Binary);
    }
}
