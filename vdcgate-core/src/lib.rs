pub mod error;
pub mod ids;
pub mod property;
pub mod value;

pub use error::{ApiError, ErrorCode, ErrorType, ResultCode};
pub use ids::{AccessDomain, FieldKey, MessageId, MessageIdAllocator, ObjectKey};
pub use property::{
    access_property, AccessMode, NameMatch, PropertyContainer, PropertyDescription,
    PropertyDescriptor, PropertyDescriptorPtr, PropertyFlags, PropertyPreparation,
};
pub use value::{
    new_api_value, ApiValue, ApiValuePtr, ApiValueType, JsonApiValue, StructApiValue,
    ValueEncoding,
};
