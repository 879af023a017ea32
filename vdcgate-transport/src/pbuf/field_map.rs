//! Generic mapping between API values and protobuf messages.
//!
//! Driven only by the schema tables: scalar fields map to scalars, nested
//! messages to objects and repeated fields to arrays. Repeated
//! `PropertyElement` fields are the exception and map to an object keyed by
//! element name, with nested elements becoming nested objects and leaf
//! elements carrying their scalar in a `PropertyValue`.

use super::message::{DynamicMessage, FieldValue};
use super::schema::{FieldKind, FieldLabel, FieldSchema, MessageSchema, PROPERTY_ELEMENT, PROPERTY_VALUE};
use bytes::Bytes;
use vdcgate_core::{ApiValue, ApiValuePtr, ApiValueType};

const ELEMENT_NAME: u32 = 1;
const ELEMENT_VALUE: u32 = 2;
const ELEMENT_ELEMENTS: u32 = 3;

const V_BOOL: u32 = 1;
const V_UINT64: u32 = 2;
const V_INT64: u32 = 3;
const V_DOUBLE: u32 = 4;
const V_STRING: u32 = 5;
const V_BYTES: u32 = 6;

fn is_element_list(field: &FieldSchema) -> bool {
    matches!(field.kind, FieldKind::Message(schema) if schema.is(&PROPERTY_ELEMENT))
        && field.label == FieldLabel::Repeated
}

/// Convert `message` into an object created through `factory`.
///
/// Absent optional scalars become null members, absent repeated or message
/// fields are left out.
pub fn message_to_value(message: &DynamicMessage, factory: &dyn ApiValue) -> ApiValuePtr {
    let mut object = factory.new_value(ApiValueType::Object);
    for field in message.schema().fields {
        let values = message.get_repeated(field.number);
        if is_element_list(field) {
            if !values.is_empty() {
                object.add(field.name, elements_to_value(values, factory));
            }
            continue;
        }
        match field.label {
            FieldLabel::Repeated => {
                if values.is_empty() {
                    continue;
                }
                let mut array = factory.new_value(ApiValueType::Array);
                for value in values {
                    array.array_append(field_to_value(value, factory));
                }
                object.add(field.name, array);
            }
            FieldLabel::Optional | FieldLabel::Required => match values.last() {
                Some(value) => object.add(field.name, field_to_value(value, factory)),
                None => {
                    if !matches!(field.kind, FieldKind::Message(_)) {
                        object.add_null(field.name);
                    }
                }
            },
        }
    }
    object
}

fn field_to_value(value: &FieldValue, factory: &dyn ApiValue) -> ApiValuePtr {
    match value {
        FieldValue::Bool(b) => {
            let mut v = factory.new_value(ApiValueType::Bool);
            v.set_bool_value(*b);
            v
        }
        FieldValue::Int(i) => {
            let mut v = factory.new_value(ApiValueType::Int64);
            v.set_int64_value(*i);
            v
        }
        FieldValue::Uint(u) => {
            let mut v = factory.new_value(ApiValueType::Uint64);
            v.set_uint64_value(*u);
            v
        }
        FieldValue::Double(d) => {
            let mut v = factory.new_value(ApiValueType::Double);
            v.set_double_value(*d);
            v
        }
        FieldValue::String(s) => {
            let mut v = factory.new_value(ApiValueType::String);
            v.set_string_value(s);
            v
        }
        FieldValue::Bytes(b) => {
            let mut v = factory.new_value(ApiValueType::Binary);
            v.set_binary_value(b);
            v
        }
        FieldValue::Message(message) => message_to_value(message, factory),
    }
}

fn elements_to_value(elements: &[FieldValue], factory: &dyn ApiValue) -> ApiValuePtr {
    let mut object = factory.new_value(ApiValueType::Object);
    for element in elements {
        let FieldValue::Message(element) = element else {
            continue;
        };
        let name = element.get_string(ELEMENT_NAME).unwrap_or_default();
        let children = element.get_repeated(ELEMENT_ELEMENTS);
        let member = if !children.is_empty() {
            elements_to_value(children, factory)
        } else if let Some(value) = element.get_message(ELEMENT_VALUE) {
            property_value_to_value(value, factory)
        } else {
            factory.new_value(ApiValueType::Null)
        };
        object.add(name, member);
    }
    object
}

fn property_value_to_value(value: &DynamicMessage, factory: &dyn ApiValue) -> ApiValuePtr {
    for slot in [V_BOOL, V_UINT64, V_INT64, V_DOUBLE, V_STRING, V_BYTES] {
        if let Some(field) = value.get(slot) {
            return field_to_value(field, factory);
        }
    }
    factory.new_value(ApiValueType::Null)
}

/// Fill a message of `schema` from the members of `value`. Members without
/// a matching field are ignored, null members leave the field absent.
pub fn value_to_message(value: &dyn ApiValue, schema: &'static MessageSchema) -> DynamicMessage {
    let mut message = DynamicMessage::new(schema);
    for field in schema.fields {
        let Some(member) = value.get(field.name) else {
            continue;
        };
        if member.is_null() {
            continue;
        }
        if is_element_list(field) {
            for element in value_to_elements(member.as_ref()) {
                message.push(field.number, FieldValue::Message(element));
            }
            continue;
        }
        match field.label {
            FieldLabel::Repeated => {
                if member.is_type(ApiValueType::Array) {
                    for index in 0..member.array_length() {
                        if let Some(item) = member.array_get(index) {
                            if let Some(v) = value_to_field(item.as_ref(), field) {
                                message.push(field.number, v);
                            }
                        }
                    }
                } else if let Some(v) = value_to_field(member.as_ref(), field) {
                    message.push(field.number, v);
                }
            }
            FieldLabel::Optional | FieldLabel::Required => {
                if let Some(v) = value_to_field(member.as_ref(), field) {
                    message.set(field.number, v);
                }
            }
        }
    }
    message
}

fn value_to_field(value: &dyn ApiValue, field: &FieldSchema) -> Option<FieldValue> {
    if value.is_null() {
        return None;
    }
    Some(match field.kind {
        FieldKind::Bool => FieldValue::Bool(value.bool_value()),
        FieldKind::Int32 | FieldKind::Int64 | FieldKind::Enum => FieldValue::Int(value.int64_value()),
        FieldKind::Uint32 | FieldKind::Uint64 => FieldValue::Uint(value.uint64_value()),
        FieldKind::Double => FieldValue::Double(value.double_value()),
        FieldKind::String => FieldValue::String(value.string_value()),
        FieldKind::Bytes => FieldValue::Bytes(Bytes::from(value.binary_value())),
        FieldKind::Message(schema) => FieldValue::Message(value_to_message(value, schema)),
    })
}

/// Objects become one element per member, arrays one element per entry
/// named by its index.
fn value_to_elements(value: &dyn ApiValue) -> Vec<DynamicMessage> {
    let mut elements = Vec::new();
    match value.value_type() {
        ApiValueType::Object => {
            for key in value.keys() {
                if let Some(member) = value.get(&key) {
                    elements.push(value_to_element(&key, member.as_ref()));
                }
            }
        }
        ApiValueType::Array => {
            for index in 0..value.array_length() {
                if let Some(item) = value.array_get(index) {
                    elements.push(value_to_element(&index.to_string(), item.as_ref()));
                }
            }
        }
        _ => {}
    }
    elements
}

fn value_to_element(name: &str, value: &dyn ApiValue) -> DynamicMessage {
    let mut element = DynamicMessage::new(&PROPERTY_ELEMENT);
    element.set(ELEMENT_NAME, FieldValue::String(name.to_string()));
    if value.value_type().is_structured() {
        for child in value_to_elements(value) {
            element.push(ELEMENT_ELEMENTS, FieldValue::Message(child));
        }
    } else if !value.is_null() {
        let mut property_value = DynamicMessage::new(&PROPERTY_VALUE);
        let (slot, field) = match value.value_type() {
            ApiValueType::Bool => (V_BOOL, FieldValue::Bool(value.bool_value())),
            ApiValueType::Uint64 => (V_UINT64, FieldValue::Uint(value.uint64_value())),
            ApiValueType::Int64 => (V_INT64, FieldValue::Int(value.int64_value())),
            ApiValueType::Double => (V_DOUBLE, FieldValue::Double(value.double_value())),
            ApiValueType::Binary => (V_BYTES, FieldValue::Bytes(Bytes::from(value.binary_value()))),
            _ => (V_STRING, FieldValue::String(value.string_value())),
        };
        property_value.set(slot, field);
        element.set(ELEMENT_VALUE, FieldValue::Message(property_value));
    }
    element
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pbuf::schema::{
        VDC_RESPONSE_GET_PROPERTY, VDSM_NOTIFICATION_CALL_SCENE, VDSM_REQUEST_HELLO,
    };
    use serde_json::json;
    use vdcgate_core::StructApiValue;

    fn factory() -> ApiValuePtr {
        StructApiValue::from_json(&json!(null))
    }

    fn round_trip(value: serde_json::Value, schema: &'static MessageSchema) -> serde_json::Value {
        let input = StructApiValue::from_json(&value);
        let message = value_to_message(input.as_ref(), schema);
        let decoded = DynamicMessage::decode(schema, message.encode_to_bytes()).unwrap();
        message_to_value(&decoded, factory().as_ref()).to_json()
    }

    #[test]
    fn test_scalar_fields_and_absent_optional() {
        let out = round_trip(json!({"dSUID": "abc"}), &VDSM_REQUEST_HELLO);
        assert_eq!(out, json!({"dSUID": "abc", "api_version": null}));

        let out = round_trip(json!({"dSUID": "abc", "api_version": 3}), &VDSM_REQUEST_HELLO);
        assert_eq!(out["api_version"], json!(3));
    }

    #[test]
    fn test_repeated_scalar_becomes_array() {
        let out = round_trip(
            json!({"dSUID": ["a", "b"], "scene": 5, "force": true, "group": -1}),
            &VDSM_NOTIFICATION_CALL_SCENE,
        );
        assert_eq!(out["dSUID"], json!(["a", "b"]));
        assert_eq!(out["group"], json!(-1));
        assert_eq!(out["zone_id"], json!(null));
    }

    #[test]
    fn test_property_elements_become_named_object() {
        let properties = json!({
            "name": "lamp",
            "outputDescription": {"function": 1, "maxPower": 60.5},
            "zoneID": null
        });
        let out = round_trip(json!({"properties": properties}), &VDC_RESPONSE_GET_PROPERTY);
        assert_eq!(out["properties"], properties);
    }

    #[test]
    fn test_array_value_becomes_index_named_elements() {
        let out = round_trip(json!({"properties": {"list": ["x", "y"]}}), &VDC_RESPONSE_GET_PROPERTY);
        assert_eq!(out["properties"]["list"], json!({"0": "x", "1": "y"}));
    }

    #[test]
    fn test_binary_uses_bytes_slot() {
        let mut props = StructApiValue::from_json(&json!({}));
        let mut binary = props.new_value(ApiValueType::Binary);
        binary.set_binary_value(&[1, 2, 3]);
        props.add("key", binary);
        let mut input = factory();
        input.add("properties", props);

        let message = value_to_message(input.as_ref(), &VDC_RESPONSE_GET_PROPERTY);
        let element = match &message.get_repeated(1)[0] {
            FieldValue::Message(m) => m.clone(),
            other => panic!("unexpected {:?}", other),
        };
        let value = element.get_message(ELEMENT_VALUE).unwrap();
        assert_eq!(value.get(V_BYTES), Some(&FieldValue::Bytes(Bytes::from_static(&[1, 2, 3]))));
    }
}
