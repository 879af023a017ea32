//! Dynamically typed API values.
//!
//! Every value exchanged with a peer is an [`ApiValue`]. Two concrete
//! encodings implement the trait: [`JsonApiValue`] (used by the JSON-RPC
//! transport, binary data rendered as hex) and [`StructApiValue`] (used by
//! the binary transport, insertion-ordered objects, raw bytes). Values created
//! through [`ApiValue::new_value`] always share the encoding of the value they
//! were created from, so a whole value tree stays encoding-homogeneous.
//!
//! Scalar getters are lenient: reading a field that does not match the tag
//! converts or returns a type-appropriate default instead of failing.

mod json;
mod structured;

pub use json::JsonApiValue;
pub use structured::StructApiValue;

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

pub type ApiValuePtr = Box<dyn ApiValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiValueType {
    Null,
    Bool,
    Int64,
    Uint64,
    Double,
    String,
    Binary,
    Object,
    Array,
}

impl ApiValueType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ApiValueType::Bool | ApiValueType::Int64 | ApiValueType::Uint64 | ApiValueType::Double
        )
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, ApiValueType::Object | ApiValueType::Array)
    }
}

impl fmt::Display for ApiValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiValueType::Null => "null",
            ApiValueType::Bool => "bool",
            ApiValueType::Int64 => "int64",
            ApiValueType::Uint64 => "uint64",
            ApiValueType::Double => "double",
            ApiValueType::String => "string",
            ApiValueType::Binary => "binary",
            ApiValueType::Object => "object",
            ApiValueType::Array => "array",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueEncoding {
    Json,
    Struct,
}

/// Create an empty value of `value_type` in the given encoding.
pub fn new_api_value(encoding: ValueEncoding, value_type: ApiValueType) -> ApiValuePtr {
    match encoding {
        ValueEncoding::Json => Box::new(JsonApiValue::new(value_type)),
        ValueEncoding::Struct => Box::new(StructApiValue::new(value_type)),
    }
}

pub trait ApiValue: Send + Sync + fmt::Debug {
    fn encoding(&self) -> ValueEncoding;

    /// New empty value of `value_type` bound to the same encoding as `self`.
    fn new_value(&self, value_type: ApiValueType) -> ApiValuePtr;

    fn value_type(&self) -> ApiValueType;

    /// Change the type, resetting the content to that type's empty value.
    fn set_type(&mut self, value_type: ApiValueType);

    fn clone_value(&self) -> ApiValuePtr;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;

    /// Deep copy `other` into `self` if both share the same concrete
    /// encoding. Returns `false` (and leaves `self` untouched) otherwise.
    fn assign_same_encoding(&mut self, other: &dyn ApiValue) -> bool;

    // Objects

    fn get(&self, key: &str) -> Option<ApiValuePtr>;

    /// Add or replace a member. A non-object value becomes an empty object
    /// first.
    fn add(&mut self, key: &str, value: ApiValuePtr);

    fn del(&mut self, key: &str);

    fn keys(&self) -> Vec<String>;

    fn reset_key_iteration(&mut self);

    /// Next member of the single-pass iteration started by
    /// [`reset_key_iteration`](ApiValue::reset_key_iteration).
    fn next_key_value(&mut self) -> Option<(String, ApiValuePtr)>;

    // Arrays

    fn array_length(&self) -> usize;

    fn array_get(&self, index: usize) -> Option<ApiValuePtr>;

    /// Append an element. A non-array value becomes an empty array first.
    fn array_append(&mut self, value: ApiValuePtr);

    /// Replace the element at `index`, padding with nulls if the array is
    /// shorter.
    fn array_put(&mut self, index: usize, value: ApiValuePtr);

    // Scalars

    fn bool_value(&self) -> bool;
    fn int64_value(&self) -> i64;
    fn uint64_value(&self) -> u64;
    fn double_value(&self) -> f64;
    fn string_value(&self) -> String;
    fn binary_value(&self) -> Vec<u8>;

    fn set_bool_value(&mut self, value: bool);
    fn set_int64_value(&mut self, value: i64);
    fn set_uint64_value(&mut self, value: u64);
    fn set_double_value(&mut self, value: f64);
    fn set_string_value(&mut self, value: &str);
    fn set_binary_value(&mut self, value: &[u8]);

    fn is_null(&self) -> bool {
        self.value_type() == ApiValueType::Null
    }

    fn is_type(&self, value_type: ApiValueType) -> bool {
        self.value_type() == value_type
    }

    fn set_null(&mut self) {
        self.set_type(ApiValueType::Null);
    }

    fn clear(&mut self) {
        let value_type = self.value_type();
        self.set_type(value_type);
    }

    /// Number of members for objects, elements for arrays, 0 otherwise.
    fn num_keys(&self) -> usize {
        match self.value_type() {
            ApiValueType::Object => self.keys().len(),
            ApiValueType::Array => self.array_length(),
            _ => 0,
        }
    }

    /// Deep copy `other` into `self`, across encodings if necessary.
    fn set_value(&mut self, other: &dyn ApiValue) {
        if self.assign_same_encoding(other) {
            return;
        }
        match other.value_type() {
            ApiValueType::Null => self.set_null(),
            ApiValueType::Bool => self.set_bool_value(other.bool_value()),
            ApiValueType::Int64 => self.set_int64_value(other.int64_value()),
            ApiValueType::Uint64 => self.set_uint64_value(other.uint64_value()),
            ApiValueType::Double => self.set_double_value(other.double_value()),
            ApiValueType::String => self.set_string_value(&other.string_value()),
            ApiValueType::Binary => self.set_binary_value(&other.binary_value()),
            ApiValueType::Object => {
                self.set_type(ApiValueType::Object);
                for key in other.keys() {
                    if let Some(member) = other.get(&key) {
                        let mut copy = self.new_value(member.value_type());
                        copy.set_value(member.as_ref());
                        self.add(&key, copy);
                    }
                }
            }
            ApiValueType::Array => {
                self.set_type(ApiValueType::Array);
                for index in 0..other.array_length() {
                    if let Some(element) = other.array_get(index) {
                        let mut copy = self.new_value(element.value_type());
                        copy.set_value(element.as_ref());
                        self.array_append(copy);
                    }
                }
            }
        }
    }

    /// Encoding-independent JSON rendering, binary data as hex.
    fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self.value_type() {
            ApiValueType::Null => Value::Null,
            ApiValueType::Bool => Value::Bool(self.bool_value()),
            ApiValueType::Int64 => Value::from(self.int64_value()),
            ApiValueType::Uint64 => Value::from(self.uint64_value()),
            ApiValueType::Double => serde_json::Number::from_f64(self.double_value())
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ApiValueType::String => Value::String(self.string_value()),
            ApiValueType::Binary => Value::String(hex::encode(self.binary_value())),
            ApiValueType::Object => {
                let mut map = serde_json::Map::new();
                for key in self.keys() {
                    if let Some(member) = self.get(&key) {
                        map.insert(key, member.to_json());
                    }
                }
                Value::Object(map)
            }
            ApiValueType::Array => Value::Array(
                (0..self.array_length())
                    .filter_map(|i| self.array_get(i))
                    .map(|element| element.to_json())
                    .collect(),
            ),
        }
    }

    fn description(&self) -> String {
        self.to_json().to_string()
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)
            .filter(|v| !v.is_null())
            .map(|v| v.string_value())
    }

    fn add_null(&mut self, key: &str) {
        let v = self.new_value(ApiValueType::Null);
        self.add(key, v);
    }

    fn add_bool(&mut self, key: &str, value: bool) {
        let mut v = self.new_value(ApiValueType::Bool);
        v.set_bool_value(value);
        self.add(key, v);
    }

    fn add_int64(&mut self, key: &str, value: i64) {
        let mut v = self.new_value(ApiValueType::Int64);
        v.set_int64_value(value);
        self.add(key, v);
    }

    fn add_uint64(&mut self, key: &str, value: u64) {
        let mut v = self.new_value(ApiValueType::Uint64);
        v.set_uint64_value(value);
        self.add(key, v);
    }

    fn add_double(&mut self, key: &str, value: f64) {
        let mut v = self.new_value(ApiValueType::Double);
        v.set_double_value(value);
        self.add(key, v);
    }

    fn add_string(&mut self, key: &str, value: &str) {
        let mut v = self.new_value(ApiValueType::String);
        v.set_string_value(value);
        self.add(key, v);
    }
}

impl Clone for Box<dyn ApiValue> {
    fn clone(&self) -> Self {
        self.clone_value()
    }
}

/// Lenient string → number parsing shared by both encodings.
pub(crate) fn parse_number<T: std::str::FromStr + Default>(s: &str) -> T {
    s.trim().parse().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALL_TYPES: [ApiValueType; 9] = [
        ApiValueType::Null,
        ApiValueType::Bool,
        ApiValueType::Int64,
        ApiValueType::Uint64,
        ApiValueType::Double,
        ApiValueType::String,
        ApiValueType::Binary,
        ApiValueType::Object,
        ApiValueType::Array,
    ];

    #[test]
    fn test_new_value_keeps_type_and_encoding() {
        for encoding in [ValueEncoding::Json, ValueEncoding::Struct] {
            let factory = new_api_value(encoding, ApiValueType::Null);
            for t in ALL_TYPES {
                let v = factory.new_value(t);
                assert_eq!(v.value_type(), t, "{:?} {:?}", encoding, t);
                assert_eq!(v.encoding(), encoding);
                assert_eq!(v.num_keys(), 0);
                assert_eq!(v.array_length(), 0);
            }
        }
    }

    #[test]
    fn test_cross_encoding_assignment() {
        let source = JsonApiValue::from_json(json!({
            "name": "lamp",
            "on": true,
            "level": 42,
            "channels": [1.5, 2.5],
            "nested": {"x": null}
        }));
        let mut target = new_api_value(ValueEncoding::Struct, ApiValueType::Null);
        target.set_value(source.as_ref());
        assert_eq!(target.encoding(), ValueEncoding::Struct);
        assert_eq!(target.to_json(), source.to_json());

        let mut back = new_api_value(ValueEncoding::Json, ApiValueType::Null);
        back.set_value(target.as_ref());
        assert_eq!(back.to_json(), source.to_json());
    }

    #[test]
    fn test_lenient_cross_type_reads() {
        for encoding in [ValueEncoding::Json, ValueEncoding::Struct] {
            let mut v = new_api_value(encoding, ApiValueType::Int64);
            v.set_int64_value(7);
            assert_eq!(v.double_value(), 7.0);
            assert_eq!(v.uint64_value(), 7);
            assert!(v.bool_value());
            assert_eq!(v.string_value(), "7");

            v.set_double_value(3.75);
            assert_eq!(v.int64_value(), 3);

            v.set_string_value("12");
            assert_eq!(v.int64_value(), 12);

            v.set_null();
            assert_eq!(v.int64_value(), 0);
            assert_eq!(v.string_value(), "");
            assert!(!v.bool_value());
        }
    }

    #[test]
    fn test_binary_representation_depends_on_encoding() {
        let bytes = [0xde, 0xad, 0xbe, 0xef];

        let mut json_value = new_api_value(ValueEncoding::Json, ApiValueType::Binary);
        json_value.set_binary_value(&bytes);
        assert_eq!(json_value.binary_value(), bytes);
        assert_eq!(json_value.string_value(), "deadbeef");

        let mut struct_value = new_api_value(ValueEncoding::Struct, ApiValueType::Binary);
        struct_value.set_binary_value(&bytes);
        assert_eq!(struct_value.binary_value(), bytes);
        assert_eq!(struct_value.value_type(), ApiValueType::Binary);
    }

    #[test]
    fn test_convenience_accessors() {
        for encoding in [ValueEncoding::Json, ValueEncoding::Struct] {
            let mut obj = new_api_value(encoding, ApiValueType::Object);
            obj.add_string("dSUID", "abc");
            obj.add_bool("force", true);
            obj.add_int64("scene", 5);
            obj.add_null("nothing");
            assert_eq!(obj.get_string("dSUID").as_deref(), Some("abc"));
            assert_eq!(obj.get_string("nothing"), None);
            assert_eq!(obj.get("scene").map(|v| v.int64_value()), Some(5));
            assert_eq!(obj.num_keys(), 4);
            obj.del("force");
            assert!(obj.get("force").is_none());
        }
    }
}
