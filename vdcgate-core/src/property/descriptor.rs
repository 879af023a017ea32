use super::AccessMode;
use crate::ids::{FieldKey, ObjectKey};
use crate::value::ApiValueType;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

pub type PropertyDescriptorPtr = Arc<PropertyDescriptor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyFlags(u16);

impl PropertyFlags {
    pub const NONE: PropertyFlags = PropertyFlags(0);
    /// Skipped when a `*` or empty-name query enumerates this level; `#n`
    /// and literal names still address it.
    pub const NO_WILDCARD: PropertyFlags = PropertyFlags(0x01);
    pub const NEEDS_READ_PREP: PropertyFlags = PropertyFlags(0x02);
    pub const NEEDS_WRITE_PREP: PropertyFlags = PropertyFlags(0x04);
    pub const DELETABLE: PropertyFlags = PropertyFlags(0x08);
    /// Entry did not exist before this (write) access.
    pub const CREATED_NEW: PropertyFlags = PropertyFlags(0x10);

    pub const fn union(self, other: PropertyFlags) -> PropertyFlags {
        PropertyFlags(self.0 | other.0)
    }

    pub const fn contains(&self, other: PropertyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropertyFlags {
    type Output = PropertyFlags;

    fn bitor(self, rhs: PropertyFlags) -> PropertyFlags {
        self.union(rhs)
    }
}

/// One entry of a static, shared property table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDescription {
    pub name: &'static str,
    pub value_type: ApiValueType,
    pub flags: PropertyFlags,
    pub field_key: FieldKey,
    pub object_key: ObjectKey,
}

impl PropertyDescription {
    pub const fn new(
        name: &'static str,
        value_type: ApiValueType,
        field_key: usize,
        object_key: ObjectKey,
    ) -> Self {
        PropertyDescription {
            name,
            value_type,
            flags: PropertyFlags::NONE,
            field_key: FieldKey::new(field_key),
            object_key,
        }
    }

    pub const fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug, Clone)]
enum DescriptorKind {
    Root {
        api_version: u32,
    },
    Static(&'static PropertyDescription),
    Dynamic {
        name: String,
        value_type: ApiValueType,
        flags: PropertyFlags,
        field_key: FieldKey,
        object_key: ObjectKey,
    },
}

/// Per-access description of one node of the property tree.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    kind: DescriptorKind,
    parent: Option<PropertyDescriptorPtr>,
}

impl PropertyDescriptor {
    /// Start of one accessed object.
    pub fn root(api_version: u32) -> PropertyDescriptorPtr {
        Arc::new(PropertyDescriptor {
            kind: DescriptorKind::Root { api_version },
            parent: None,
        })
    }

    pub fn from_static(
        description: &'static PropertyDescription,
        parent: &PropertyDescriptorPtr,
    ) -> PropertyDescriptorPtr {
        Arc::new(PropertyDescriptor {
            kind: DescriptorKind::Static(description),
            parent: Some(parent.clone()),
        })
    }

    pub fn dynamic(
        name: impl Into<String>,
        value_type: ApiValueType,
        flags: PropertyFlags,
        field_key: FieldKey,
        object_key: ObjectKey,
        parent: &PropertyDescriptorPtr,
    ) -> PropertyDescriptorPtr {
        Arc::new(PropertyDescriptor {
            kind: DescriptorKind::Dynamic {
                name: name.into(),
                value_type,
                flags,
                field_key,
                object_key,
            },
            parent: Some(parent.clone()),
        })
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            DescriptorKind::Root { .. } => "",
            DescriptorKind::Static(d) => d.name,
            DescriptorKind::Dynamic { name, .. } => name,
        }
    }

    pub fn value_type(&self) -> ApiValueType {
        match &self.kind {
            DescriptorKind::Root { .. } => ApiValueType::Object,
            DescriptorKind::Static(d) => d.value_type,
            DescriptorKind::Dynamic { value_type, .. } => *value_type,
        }
    }

    pub fn flags(&self) -> PropertyFlags {
        match &self.kind {
            DescriptorKind::Root { .. } => PropertyFlags::NONE,
            DescriptorKind::Static(d) => d.flags,
            DescriptorKind::Dynamic { flags, .. } => *flags,
        }
    }

    pub fn field_key(&self) -> FieldKey {
        match &self.kind {
            DescriptorKind::Root { .. } => FieldKey::new(0),
            DescriptorKind::Static(d) => d.field_key,
            DescriptorKind::Dynamic { field_key, .. } => *field_key,
        }
    }

    pub fn object_key(&self) -> ObjectKey {
        match &self.kind {
            DescriptorKind::Root { .. } => ObjectKey::ROOT,
            DescriptorKind::Static(d) => d.object_key,
            DescriptorKind::Dynamic { object_key, .. } => *object_key,
        }
    }

    pub fn parent(&self) -> Option<&PropertyDescriptorPtr> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, DescriptorKind::Root { .. })
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, DescriptorKind::Static(_))
    }

    pub fn has_object_key(&self, object_key: ObjectKey) -> bool {
        self.object_key() == object_key
    }

    /// Object or array container, resolved through `get_container`.
    pub fn is_structured(&self) -> bool {
        !self.is_root() && self.value_type().is_structured()
    }

    pub fn is_array_container(&self) -> bool {
        self.value_type() == ApiValueType::Array
    }

    pub fn is_deletable(&self) -> bool {
        self.flags().contains(PropertyFlags::DELETABLE)
    }

    pub fn accepts_wildcard(&self) -> bool {
        !self.flags().contains(PropertyFlags::NO_WILDCARD)
    }

    pub fn was_created_new(&self) -> bool {
        self.flags().contains(PropertyFlags::CREATED_NEW)
    }

    pub fn needs_preparation(&self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Read => self.flags().contains(PropertyFlags::NEEDS_READ_PREP),
            AccessMode::Write | AccessMode::WritePreload | AccessMode::Delete => {
                self.flags().contains(PropertyFlags::NEEDS_WRITE_PREP)
            }
        }
    }

    /// API version of the access this descriptor belongs to.
    pub fn api_version(&self) -> u32 {
        match &self.kind {
            DescriptorKind::Root { api_version } => *api_version,
            _ => self.parent.as_ref().map(|p| p.api_version()).unwrap_or(0),
        }
    }

    /// Dotted path from the root, for diagnostics.
    pub fn path(&self) -> String {
        match &self.parent {
            Some(parent) if !parent.is_root() => format!("{}.{}", parent.path(), self.name()),
            _ => self.name().to_string(),
        }
    }
}

impl fmt::Display for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            if self.is_root() { "<root>".to_string() } else { self.path() },
            self.value_type(),
            self.object_key()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYER_A: ObjectKey = ObjectKey::new(1);
    const LAYER_B: ObjectKey = ObjectKey::new(2);

    static PROPS: [PropertyDescription; 2] = [
        PropertyDescription::new("name", ApiValueType::String, 0, LAYER_A),
        PropertyDescription::new("channels", ApiValueType::Array, 0, LAYER_B)
            .with_flags(PropertyFlags::NO_WILDCARD.union(PropertyFlags::NEEDS_READ_PREP)),
    ];

    #[test]
    fn test_static_descriptor() {
        let root = PropertyDescriptor::root(3);
        let name = PropertyDescriptor::from_static(&PROPS[0], &root);
        assert_eq!(name.name(), "name");
        assert!(name.is_static());
        assert!(!name.is_structured());
        assert!(name.accepts_wildcard());
        assert_eq!(name.api_version(), 3);
        assert!(root.is_root());
        assert_eq!(root.object_key(), ObjectKey::ROOT);
    }

    #[test]
    fn test_same_field_key_different_layers() {
        let root = PropertyDescriptor::root(1);
        let a = PropertyDescriptor::from_static(&PROPS[0], &root);
        let b = PropertyDescriptor::from_static(&PROPS[1], &root);
        assert_eq!(a.field_key(), b.field_key());
        assert!(!b.has_object_key(a.object_key()));
    }

    #[test]
    fn test_flags_and_preparation() {
        let root = PropertyDescriptor::root(1);
        let channels = PropertyDescriptor::from_static(&PROPS[1], &root);
        assert!(channels.is_structured());
        assert!(channels.is_array_container());
        assert!(!channels.accepts_wildcard());
        assert!(channels.needs_preparation(AccessMode::Read));
        assert!(!channels.needs_preparation(AccessMode::Write));
    }

    #[test]
    fn test_dynamic_descriptor_path() {
        let root = PropertyDescriptor::root(1);
        let channels = PropertyDescriptor::from_static(&PROPS[1], &root);
        let element = PropertyDescriptor::dynamic(
            "brightness",
            ApiValueType::Object,
            PropertyFlags::CREATED_NEW | PropertyFlags::DELETABLE,
            FieldKey::new(4),
            LAYER_B,
            &channels,
        );
        assert_eq!(element.path(), "channels.brightness");
        assert!(element.was_created_new());
        assert!(element.is_deletable());
        assert_eq!(element.api_version(), 1);
    }
}
