use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation id of a method call. `0` is reserved for "no id"
/// (notifications), so allocated ids start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u32);

/// Identity of one logical sub-object (class layer) contributing properties
/// to an API-visible object. Field keys are only meaningful relative to one
/// object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(u32);

/// Location of a property's value inside the container owning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldKey(usize);

/// Access-context selector; one container may expose different property sets
/// per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessDomain(u32);

impl MessageId {
    pub const NONE: MessageId = MessageId(0);

    pub fn new(value: u32) -> Self {
        MessageId(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl ObjectKey {
    /// Key of synthetic root descriptors.
    pub const ROOT: ObjectKey = ObjectKey(0);

    pub const fn new(value: u32) -> Self {
        ObjectKey(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl FieldKey {
    pub const fn new(value: usize) -> Self {
        FieldKey(value)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl AccessDomain {
    pub const DEFAULT: AccessDomain = AccessDomain(0);

    pub const fn new(value: u32) -> Self {
        AccessDomain(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({})", self.0)
    }
}

impl From<u32> for MessageId {
    fn from(value: u32) -> Self {
        MessageId::new(value)
    }
}

/// Monotonic per-connection message id source.
#[derive(Debug)]
pub struct MessageIdAllocator {
    next: u32,
}

impl MessageIdAllocator {
    pub fn new() -> Self {
        MessageIdAllocator { next: 1 }
    }

    pub fn allocate(&mut self) -> MessageId {
        let id = MessageId::new(self.next);
        self.next = self.next.wrapping_add(1);
        if self.next == 0 {
            self.next = 1;
        }
        id
    }

    pub fn peek_next(&self) -> u32 {
        self.next
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_creation_and_conversion() {
        let id = MessageId::new(42);
        assert_eq!(id.as_u32(), 42);
        assert_eq!(format!("{}", id), "MessageId(42)");
        assert!(MessageId::NONE.is_none());

        let okey = ObjectKey::new(7);
        assert_eq!(format!("{}", okey), "ObjectKey(7)");
        assert_ne!(okey, ObjectKey::ROOT);
    }

    #[test]
    fn test_id_equality_and_hash() {
        let mut set = HashSet::new();
        set.insert(MessageId::new(1));
        assert!(set.contains(&MessageId::from(1)));
        assert!(!set.contains(&MessageId::new(2)));
    }

    #[test]
    fn test_allocator_monotonic() {
        let mut allocator = MessageIdAllocator::new();
        assert_eq!(allocator.allocate().as_u32(), 1);
        assert_eq!(allocator.allocate().as_u32(), 2);
        assert_eq!(allocator.allocate().as_u32(), 3);
        assert_eq!(allocator.peek_next(), 4);
    }

    #[test]
    fn test_allocator_skips_zero_on_wrap() {
        let mut allocator = MessageIdAllocator { next: u32::MAX };
        assert_eq!(allocator.allocate().as_u32(), u32::MAX);
        assert_eq!(allocator.allocate().as_u32(), 1);
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&MessageId::new(42)).unwrap();
        assert_eq!(json, "42");
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MessageId::new(42));
    }
}
