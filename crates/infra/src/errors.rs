//! Conversions from external infrastructure errors into domain errors.

use meetings_domain::MeetingsError;
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can
/// be converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub MeetingsError);

impl From<InfraError> for MeetingsError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<MeetingsError> for InfraError {
    fn from(value: MeetingsError) -> Self {
        InfraError(value)
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        let message = if value.is_timeout() {
            "request timed out".to_string()
        } else if value.is_connect() {
            format!("connection failed: {value}")
        } else if value.is_decode() {
            return InfraError(MeetingsError::InvalidInput(format!(
                "failed to decode provider response: {value}"
            )));
        } else {
            value.to_string()
        };
        InfraError(MeetingsError::Network(message))
    }
}
