use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP-status-like error namespace used internally by the property engine
/// and by request handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Ok,
    NoContent,
    BadRequest,
    NotAuthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    InvalidValueType,
    MissingSubmessage,
    Internal,
    NotImplemented,
    ServiceUnavailable,
    IncompatibleApi,
    InsufficientStorage,
    /// Any other numeric code received from a collaborator.
    Other(u16),
}

impl ErrorCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            ErrorCode::Ok => 200,
            ErrorCode::NoContent => 204,
            ErrorCode::BadRequest => 400,
            ErrorCode::NotAuthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::MethodNotAllowed => 405,
            ErrorCode::InvalidValueType => 415,
            ErrorCode::MissingSubmessage => 422,
            ErrorCode::Internal => 500,
            ErrorCode::NotImplemented => 501,
            ErrorCode::ServiceUnavailable => 503,
            ErrorCode::IncompatibleApi => 505,
            ErrorCode::InsufficientStorage => 507,
            ErrorCode::Other(code) => *code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            0 | 200 => ErrorCode::Ok,
            204 => ErrorCode::NoContent,
            400 => ErrorCode::BadRequest,
            401 => ErrorCode::NotAuthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            405 => ErrorCode::MethodNotAllowed,
            415 => ErrorCode::InvalidValueType,
            422 => ErrorCode::MissingSubmessage,
            500 => ErrorCode::Internal,
            501 => ErrorCode::NotImplemented,
            503 => ErrorCode::ServiceUnavailable,
            505 => ErrorCode::IncompatibleApi,
            507 => ErrorCode::InsufficientStorage,
            other => ErrorCode::Other(other),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::Ok)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Wire result codes of the binary API (`ResultCode` enum in the message
/// schema).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ResultCode {
    Ok = 0,
    MessageUnknown = 1,
    IncompatibleApi = 2,
    ServiceNotAvailable = 3,
    InsufficientStorage = 4,
    Forbidden = 5,
    NotImplemented = 6,
    NoContentForArray = 7,
    InvalidValueType = 8,
    MissingSubmessage = 9,
    MissingData = 10,
    NotFound = 11,
    NotAuthorized = 12,
}

impl ResultCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => ResultCode::Ok,
            1 => ResultCode::MessageUnknown,
            2 => ResultCode::IncompatibleApi,
            3 => ResultCode::ServiceNotAvailable,
            4 => ResultCode::InsufficientStorage,
            5 => ResultCode::Forbidden,
            6 => ResultCode::NotImplemented,
            7 => ResultCode::NoContentForArray,
            8 => ResultCode::InvalidValueType,
            9 => ResultCode::MissingSubmessage,
            10 => ResultCode::MissingData,
            11 => ResultCode::NotFound,
            12 => ResultCode::NotAuthorized,
            _ => return None,
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Map an internal error code to its wire counterpart. Codes without a
    /// direct counterpart fall back to `NotImplemented`.
    pub fn from_error_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Ok => ResultCode::Ok,
            ErrorCode::NoContent => ResultCode::NoContentForArray,
            ErrorCode::BadRequest => ResultCode::MissingData,
            ErrorCode::NotAuthorized => ResultCode::NotAuthorized,
            ErrorCode::Forbidden => ResultCode::Forbidden,
            ErrorCode::NotFound => ResultCode::NotFound,
            ErrorCode::MethodNotAllowed => ResultCode::MessageUnknown,
            ErrorCode::InvalidValueType => ResultCode::InvalidValueType,
            ErrorCode::MissingSubmessage => ResultCode::MissingSubmessage,
            ErrorCode::NotImplemented => ResultCode::NotImplemented,
            ErrorCode::ServiceUnavailable => ResultCode::ServiceNotAvailable,
            ErrorCode::IncompatibleApi => ResultCode::IncompatibleApi,
            ErrorCode::InsufficientStorage => ResultCode::InsufficientStorage,
            ErrorCode::Internal | ErrorCode::Other(_) => ResultCode::NotImplemented,
        }
    }

    pub fn to_error_code(self) -> ErrorCode {
        match self {
            ResultCode::Ok => ErrorCode::Ok,
            ResultCode::MessageUnknown => ErrorCode::MethodNotAllowed,
            ResultCode::IncompatibleApi => ErrorCode::IncompatibleApi,
            ResultCode::ServiceNotAvailable => ErrorCode::ServiceUnavailable,
            ResultCode::InsufficientStorage => ErrorCode::InsufficientStorage,
            ResultCode::Forbidden => ErrorCode::Forbidden,
            ResultCode::NotImplemented => ErrorCode::NotImplemented,
            ResultCode::NoContentForArray => ErrorCode::NoContent,
            ResultCode::InvalidValueType => ErrorCode::InvalidValueType,
            ResultCode::MissingSubmessage => ErrorCode::MissingSubmessage,
            ResultCode::MissingData => ErrorCode::BadRequest,
            ResultCode::NotFound => ErrorCode::NotFound,
            ResultCode::NotAuthorized => ErrorCode::NotAuthorized,
        }
    }
}

/// Recovery hint for the caller of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum ErrorType {
    #[default]
    Failed = 0,
    Overloaded = 1,
    Disconnected = 2,
    Unimplemented = 3,
}

impl ErrorType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => ErrorType::Overloaded,
            2 => ErrorType::Disconnected,
            3 => ErrorType::Unimplemented,
            _ => ErrorType::Failed,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub error_type: ErrorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            error_type: ErrorType::Failed,
            user_message: None,
        }
    }

    pub fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = error_type;
        self
    }

    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = Some(user_message.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_value_type(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidValueType, message)
    }

    pub fn no_content(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoContent, message)
    }

    pub fn method_unknown(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotAllowed,
            format!("unknown method '{}'", method),
        )
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message).with_type(ErrorType::Unimplemented)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message).with_type(ErrorType::Disconnected)
    }

    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message).with_type(ErrorType::Overloaded)
    }

    pub fn result_code(&self) -> ResultCode {
        ResultCode::from_error_code(self.code)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::bad_request(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::internal(format!("IO error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_RESULT_CODES: [ResultCode; 13] = [
        ResultCode::Ok,
        ResultCode::MessageUnknown,
        ResultCode::IncompatibleApi,
        ResultCode::ServiceNotAvailable,
        ResultCode::InsufficientStorage,
        ResultCode::Forbidden,
        ResultCode::NotImplemented,
        ResultCode::NoContentForArray,
        ResultCode::InvalidValueType,
        ResultCode::MissingSubmessage,
        ResultCode::MissingData,
        ResultCode::NotFound,
        ResultCode::NotAuthorized,
    ];

    #[test]
    fn test_result_code_mapping_is_bidirectional() {
        for rc in ALL_RESULT_CODES {
            let code = rc.to_error_code();
            assert_eq!(ResultCode::from_error_code(code), rc, "{:?}", rc);
            assert_eq!(ResultCode::from_u32(rc.as_u32()), Some(rc));
        }
    }

    #[test]
    fn test_unmapped_codes_fall_back_to_not_implemented() {
        assert_eq!(
            ResultCode::from_error_code(ErrorCode::Internal),
            ResultCode::NotImplemented
        );
        assert_eq!(
            ResultCode::from_error_code(ErrorCode::from_u16(418)),
            ResultCode::NotImplemented
        );
        assert_eq!(ResultCode::from_u32(99), None);
    }

    #[test]
    fn test_property_error_kinds_are_distinct() {
        let kinds = [
            ApiError::not_found("x").result_code(),
            ApiError::forbidden("x").result_code(),
            ApiError::invalid_value_type("x").result_code(),
            ApiError::no_content("x").result_code(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in kinds.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_numeric_code_round_trip() {
        for code in [200u16, 204, 400, 401, 403, 404, 405, 415, 422, 500, 501, 503, 505, 507, 418] {
            assert_eq!(ErrorCode::from_u16(code).as_u16(), code);
        }
    }

    #[test]
    fn test_error_builders() {
        let err = ApiError::disconnected("gone").with_user_message("device.offline");
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);
        assert_eq!(err.error_type, ErrorType::Disconnected);
        assert_eq!(err.user_message.as_deref(), Some("device.offline"));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_error_serialization() {
        let err = ApiError::not_found("no such property").with_type(ErrorType::Failed);
        let json = serde_json::to_string(&err).unwrap();
        let deserialized: ApiError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, deserialized);
        assert!(!json.contains("user_message"));
    }
}
