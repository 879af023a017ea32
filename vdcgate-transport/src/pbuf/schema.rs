//! Message schemas of the binary API and the envelope type table.

use crate::transport::ApiRole;
use std::fmt;

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Bool,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    Bytes,
    /// Enumerations travel as int32 varints.
    Enum,
    Message(&'static MessageSchema),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLabel {
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSchema {
    pub number: u32,
    pub name: &'static str,
    pub kind: FieldKind,
    pub label: FieldLabel,
}

const fn optional(number: u32, name: &'static str, kind: FieldKind) -> FieldSchema {
    FieldSchema {
        number,
        name,
        kind,
        label: FieldLabel::Optional,
    }
}

const fn required(number: u32, name: &'static str, kind: FieldKind) -> FieldSchema {
    FieldSchema {
        number,
        name,
        kind,
        label: FieldLabel::Required,
    }
}

const fn repeated(number: u32, name: &'static str, kind: FieldKind) -> FieldSchema {
    FieldSchema {
        number,
        name,
        kind,
        label: FieldLabel::Repeated,
    }
}

pub struct MessageSchema {
    pub name: &'static str,
    pub fields: &'static [FieldSchema],
}

impl MessageSchema {
    pub fn field(&self, number: u32) -> Option<&'static FieldSchema> {
        self.fields.iter().find(|f| f.number == number)
    }

    pub fn is(&self, other: &MessageSchema) -> bool {
        std::ptr::eq(self, other)
    }
}

// Schemas may refer to themselves, so only the name is printed.
impl fmt::Debug for MessageSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageSchema({})", self.name)
    }
}

use FieldKind::*;

pub static PROPERTY_VALUE: MessageSchema = MessageSchema {
    name: "PropertyValue",
    fields: &[
        optional(1, "v_bool", Bool),
        optional(2, "v_uint64", Uint64),
        optional(3, "v_int64", Int64),
        optional(4, "v_double", Double),
        optional(5, "v_string", String),
        optional(6, "v_bytes", Bytes),
    ],
};

pub static PROPERTY_ELEMENT: MessageSchema = MessageSchema {
    name: "PropertyElement",
    fields: &[
        required(1, "name", String),
        optional(2, "value", Message(&PROPERTY_VALUE)),
        repeated(3, "elements", Message(&PROPERTY_ELEMENT)),
    ],
};

pub static GENERIC_RESPONSE: MessageSchema = MessageSchema {
    name: "GenericResponse",
    fields: &[
        required(1, "code", Enum),
        optional(2, "description", String),
        optional(3, "errorType", Enum),
        optional(4, "userMessageToBeTranslated", String),
    ],
};

pub static VDSM_REQUEST_HELLO: MessageSchema = MessageSchema {
    name: "vdsm_RequestHello",
    fields: &[
        optional(1, "dSUID", String),
        optional(2, "api_version", Uint32),
    ],
};

pub static VDC_RESPONSE_HELLO: MessageSchema = MessageSchema {
    name: "vdc_ResponseHello",
    fields: &[optional(1, "dSUID", String)],
};

pub static VDSM_REQUEST_GET_PROPERTY: MessageSchema = MessageSchema {
    name: "vdsm_RequestGetProperty",
    fields: &[
        optional(1, "dSUID", String),
        repeated(2, "query", Message(&PROPERTY_ELEMENT)),
    ],
};

pub static VDC_RESPONSE_GET_PROPERTY: MessageSchema = MessageSchema {
    name: "vdc_ResponseGetProperty",
    fields: &[repeated(1, "properties", Message(&PROPERTY_ELEMENT))],
};

pub static VDSM_REQUEST_SET_PROPERTY: MessageSchema = MessageSchema {
    name: "vdsm_RequestSetProperty",
    fields: &[
        optional(1, "dSUID", String),
        repeated(2, "properties", Message(&PROPERTY_ELEMENT)),
    ],
};

pub static VDSM_REQUEST_GENERIC_REQUEST: MessageSchema = MessageSchema {
    name: "vdsm_RequestGenericRequest",
    fields: &[
        optional(1, "dSUID", String),
        optional(2, "methodname", String),
        repeated(3, "params", Message(&PROPERTY_ELEMENT)),
    ],
};

/// Messages carrying nothing but the addressed dSUID.
pub static DSUID_ONLY: MessageSchema = MessageSchema {
    name: "dSUIDMessage",
    fields: &[optional(1, "dSUID", String)],
};

pub static VDC_SEND_ANNOUNCE_DEVICE: MessageSchema = MessageSchema {
    name: "vdc_SendAnnounceDevice",
    fields: &[
        optional(1, "dSUID", String),
        optional(2, "vdc_dSUID", String),
    ],
};

pub static VDC_SEND_PUSH_NOTIFICATION: MessageSchema = MessageSchema {
    name: "vdc_SendPushNotification",
    fields: &[
        optional(1, "dSUID", String),
        repeated(2, "changedproperties", Message(&PROPERTY_ELEMENT)),
        repeated(3, "deviceevents", Message(&PROPERTY_ELEMENT)),
    ],
};

pub static VDSM_NOTIFICATION_CALL_SCENE: MessageSchema = MessageSchema {
    name: "vdsm_NotificationCallScene",
    fields: &[
        repeated(1, "dSUID", String),
        optional(2, "scene", Int32),
        optional(3, "force", Bool),
        optional(4, "group", Int32),
        optional(5, "zone_id", Int32),
    ],
};

/// Save, undo, local priority and minimum scene share one layout.
pub static VDSM_NOTIFICATION_SCENE: MessageSchema = MessageSchema {
    name: "vdsm_NotificationScene",
    fields: &[
        repeated(1, "dSUID", String),
        optional(2, "scene", Int32),
        optional(3, "group", Int32),
        optional(4, "zone_id", Int32),
    ],
};

pub static VDSM_NOTIFICATION_IDENTIFY: MessageSchema = MessageSchema {
    name: "vdsm_NotificationIdentify",
    fields: &[
        repeated(1, "dSUID", String),
        optional(2, "group", Int32),
        optional(3, "zone_id", Int32),
    ],
};

pub static VDSM_NOTIFICATION_SET_CONTROL_VALUE: MessageSchema = MessageSchema {
    name: "vdsm_NotificationSetControlValue",
    fields: &[
        repeated(1, "dSUID", String),
        optional(2, "name", String),
        optional(3, "value", Double),
        optional(4, "group", Int32),
        optional(5, "zone_id", Int32),
    ],
};

pub static VDSM_NOTIFICATION_DIM_CHANNEL: MessageSchema = MessageSchema {
    name: "vdsm_NotificationDimChannel",
    fields: &[
        repeated(1, "dSUID", String),
        optional(2, "channel", Int32),
        optional(3, "mode", Int32),
        optional(4, "area", Int32),
        optional(5, "group", Int32),
        optional(6, "zone_id", Int32),
        optional(7, "channelId", String),
    ],
};

pub static VDSM_NOTIFICATION_SET_OUTPUT_CHANNEL_VALUE: MessageSchema = MessageSchema {
    name: "vdsm_NotificationSetOutputChannelValue",
    fields: &[
        repeated(1, "dSUID", String),
        optional(2, "apply_now", Bool),
        optional(3, "channel", Int32),
        optional(4, "value", Double),
        optional(5, "group", Int32),
        optional(6, "zone_id", Int32),
        optional(7, "channelId", String),
    ],
};

/// Envelope fields. Payload slot numbers are listed in [`MESSAGE_TYPES`].
pub const ENVELOPE_TYPE: u32 = 1;
pub const ENVELOPE_MESSAGE_ID: u32 = 2;
pub const ENVELOPE_GENERIC_RESPONSE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
}

/// One envelope type: tag, method name, sender and the payload slot.
#[derive(Debug, Clone, Copy)]
pub struct MessageType {
    pub tag: u32,
    pub method: &'static str,
    pub sender: ApiRole,
    pub kind: MessageKind,
    pub slot: u32,
    pub payload: &'static MessageSchema,
}

const fn entry(
    tag: u32,
    method: &'static str,
    sender: ApiRole,
    kind: MessageKind,
    slot: u32,
    payload: &'static MessageSchema,
) -> MessageType {
    MessageType {
        tag,
        method,
        sender,
        kind,
        slot,
        payload,
    }
}

use ApiRole::{Vdc, Vdsm};
use MessageKind::{Notification, Request, Response};

pub static MESSAGE_TYPES: &[MessageType] = &[
    entry(1, "", Vdc, Response, ENVELOPE_GENERIC_RESPONSE, &GENERIC_RESPONSE),
    entry(2, "hello", Vdsm, Request, 100, &VDSM_REQUEST_HELLO),
    entry(3, "hello", Vdc, Response, 101, &VDC_RESPONSE_HELLO),
    entry(4, "getProperty", Vdsm, Request, 102, &VDSM_REQUEST_GET_PROPERTY),
    entry(5, "getProperty", Vdc, Response, 103, &VDC_RESPONSE_GET_PROPERTY),
    entry(6, "setProperty", Vdsm, Request, 104, &VDSM_REQUEST_SET_PROPERTY),
    entry(8, "ping", Vdsm, Notification, 105, &DSUID_ONLY),
    entry(9, "pong", Vdc, Notification, 106, &DSUID_ONLY),
    entry(10, "announcedevice", Vdc, Request, 107, &VDC_SEND_ANNOUNCE_DEVICE),
    entry(11, "vanish", Vdc, Notification, 108, &DSUID_ONLY),
    entry(12, "pushNotification", Vdc, Notification, 109, &VDC_SEND_PUSH_NOTIFICATION),
    entry(13, "remove", Vdsm, Request, 110, &DSUID_ONLY),
    entry(14, "bye", Vdsm, Request, 111, &DSUID_ONLY),
    entry(15, "callScene", Vdsm, Notification, 112, &VDSM_NOTIFICATION_CALL_SCENE),
    entry(16, "saveScene", Vdsm, Notification, 113, &VDSM_NOTIFICATION_SCENE),
    entry(17, "undoScene", Vdsm, Notification, 114, &VDSM_NOTIFICATION_SCENE),
    entry(18, "setLocalPriority", Vdsm, Notification, 115, &VDSM_NOTIFICATION_SCENE),
    entry(19, "callSceneMin", Vdsm, Notification, 116, &VDSM_NOTIFICATION_SCENE),
    entry(20, "identify", Vdsm, Notification, 117, &VDSM_NOTIFICATION_IDENTIFY),
    entry(21, "setControlValue", Vdsm, Notification, 118, &VDSM_NOTIFICATION_SET_CONTROL_VALUE),
    entry(22, "identify", Vdc, Notification, 119, &DSUID_ONLY),
    entry(23, "announcevdc", Vdc, Request, 120, &DSUID_ONLY),
    entry(24, "dimChannel", Vdsm, Notification, 121, &VDSM_NOTIFICATION_DIM_CHANNEL),
    entry(
        25,
        "setOutputChannelValue",
        Vdsm,
        Notification,
        122,
        &VDSM_NOTIFICATION_SET_OUTPUT_CHANNEL_VALUE,
    ),
    entry(26, "genericRequest", Vdsm, Request, 123, &VDSM_REQUEST_GENERIC_REQUEST),
];

pub const GENERIC_RESPONSE_TAG: u32 = 1;

/// The top level `Message`: type tag, message id and one payload slot per
/// entry of [`MESSAGE_TYPES`].
pub static ENVELOPE: MessageSchema = MessageSchema {
    name: "Message",
    fields: &[
        required(ENVELOPE_TYPE, "type", Enum),
        optional(ENVELOPE_MESSAGE_ID, "message_id", Uint32),
        optional(ENVELOPE_GENERIC_RESPONSE, "generic_response", Message(&GENERIC_RESPONSE)),
        optional(100, "vdsm_request_hello", Message(&VDSM_REQUEST_HELLO)),
        optional(101, "vdc_response_hello", Message(&VDC_RESPONSE_HELLO)),
        optional(102, "vdsm_request_get_property", Message(&VDSM_REQUEST_GET_PROPERTY)),
        optional(103, "vdc_response_get_property", Message(&VDC_RESPONSE_GET_PROPERTY)),
        optional(104, "vdsm_request_set_property", Message(&VDSM_REQUEST_SET_PROPERTY)),
        optional(105, "vdsm_send_ping", Message(&DSUID_ONLY)),
        optional(106, "vdc_send_pong", Message(&DSUID_ONLY)),
        optional(107, "vdc_send_announce_device", Message(&VDC_SEND_ANNOUNCE_DEVICE)),
        optional(108, "vdc_send_vanish", Message(&DSUID_ONLY)),
        optional(109, "vdc_send_push_notification", Message(&VDC_SEND_PUSH_NOTIFICATION)),
        optional(110, "vdsm_send_remove", Message(&DSUID_ONLY)),
        optional(111, "vdsm_send_bye", Message(&DSUID_ONLY)),
        optional(112, "vdsm_send_call_scene", Message(&VDSM_NOTIFICATION_CALL_SCENE)),
        optional(113, "vdsm_send_save_scene", Message(&VDSM_NOTIFICATION_SCENE)),
        optional(114, "vdsm_send_undo_scene", Message(&VDSM_NOTIFICATION_SCENE)),
        optional(115, "vdsm_send_set_local_prio", Message(&VDSM_NOTIFICATION_SCENE)),
        optional(116, "vdsm_send_call_min_scene", Message(&VDSM_NOTIFICATION_SCENE)),
        optional(117, "vdsm_send_identify", Message(&VDSM_NOTIFICATION_IDENTIFY)),
        optional(118, "vdsm_send_set_control_value", Message(&VDSM_NOTIFICATION_SET_CONTROL_VALUE)),
        optional(119, "vdc_send_identify", Message(&DSUID_ONLY)),
        optional(120, "vdc_send_announce_vdc", Message(&DSUID_ONLY)),
        optional(121, "vdsm_send_dim_channel", Message(&VDSM_NOTIFICATION_DIM_CHANNEL)),
        optional(
            122,
            "vdsm_send_output_channel_value",
            Message(&VDSM_NOTIFICATION_SET_OUTPUT_CHANNEL_VALUE),
        ),
        optional(123, "vdsm_request_generic_request", Message(&VDSM_REQUEST_GENERIC_REQUEST)),
    ],
};

pub fn message_type_by_tag(tag: u32) -> Option<&'static MessageType> {
    MESSAGE_TYPES.iter().find(|t| t.tag == tag)
}

/// Envelope type `sender` uses for an outgoing call or notification.
pub fn outgoing_type(method: &str, sender: ApiRole) -> Option<&'static MessageType> {
    MESSAGE_TYPES
        .iter()
        .find(|t| t.kind != Response && t.sender == sender && t.method == method)
}

/// Typed response `sender` uses to answer `method`, if there is one.
pub fn typed_response(method: &str, sender: ApiRole) -> Option<&'static MessageType> {
    MESSAGE_TYPES.iter().find(|t| {
        t.kind == Response && t.tag != GENERIC_RESPONSE_TAG && t.sender == sender && t.method == method
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tags_and_slots_are_unique() {
        let tags: HashSet<u32> = MESSAGE_TYPES.iter().map(|t| t.tag).collect();
        let slots: HashSet<u32> = MESSAGE_TYPES.iter().map(|t| t.slot).collect();
        assert_eq!(tags.len(), MESSAGE_TYPES.len());
        assert_eq!(slots.len(), MESSAGE_TYPES.len());
    }

    #[test]
    fn test_each_method_has_one_tag_per_sender() {
        for t in MESSAGE_TYPES.iter().filter(|t| t.kind != MessageKind::Response) {
            let same: Vec<_> = MESSAGE_TYPES
                .iter()
                .filter(|o| o.kind != MessageKind::Response && o.method == t.method && o.sender == t.sender)
                .collect();
            assert_eq!(same.len(), 1, "{}", t.method);
        }
    }

    #[test]
    fn test_identify_exists_in_both_directions() {
        assert_eq!(outgoing_type("identify", ApiRole::Vdsm).map(|t| t.tag), Some(20));
        assert_eq!(outgoing_type("identify", ApiRole::Vdc).map(|t| t.tag), Some(22));
        assert!(outgoing_type("callScene", ApiRole::Vdc).is_none());
    }

    #[test]
    fn test_typed_responses() {
        assert_eq!(typed_response("hello", ApiRole::Vdc).map(|t| t.tag), Some(3));
        assert_eq!(typed_response("getProperty", ApiRole::Vdc).map(|t| t.tag), Some(5));
        assert!(typed_response("setProperty", ApiRole::Vdc).is_none());
    }

    #[test]
    fn test_envelope_has_a_slot_for_every_type() {
        for t in MESSAGE_TYPES {
            match ENVELOPE.field(t.slot).map(|f| f.kind) {
                Some(FieldKind::Message(schema)) => assert!(schema.is(t.payload), "{}", t.tag),
                other => panic!("slot {} missing: {:?}", t.slot, other),
            }
        }
    }

    #[test]
    fn test_property_element_refers_to_itself() {
        let elements = PROPERTY_ELEMENT.field(3).unwrap();
        match elements.kind {
            FieldKind::Message(schema) => assert!(schema.is(&PROPERTY_ELEMENT)),
            _ => panic!("elements must be a message field"),
        }
    }
}
