//! Scheduler API encodings.
//!
//! Calls arrive as JSON or CBOR, selected by `Content-Type`. Event streams
//! are encoded as selected by `Accept` and framed as RecordIO: every record
//! is preceded by its length in bytes and a newline.

use axum::body::Bytes;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::ApiError;

/// `application/json`.
pub const APPLICATION_JSON: &str = "application/json";
/// `application/cbor`.
pub const APPLICATION_CBOR: &str = "application/cbor";

/// A supported message encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// JSON.
    Json,
    /// CBOR.
    Cbor,
}

impl ContentType {
    /// The media type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => APPLICATION_JSON,
            Self::Cbor => APPLICATION_CBOR,
        }
    }
}

/// Failure to encode a record.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// JSON serialization failed.
    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// CBOR serialization failed.
    #[error("failed to encode CBOR: {0}")]
    Cbor(String),
}

fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Encoding of the request body.
///
/// # Errors
///
/// Returns 400 without a `Content-Type` and 415 for an unsupported one.
pub fn request_encoding(headers: &HeaderMap) -> Result<ContentType, ApiError> {
    let value = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Expecting 'Content-Type' to be present".into()))?;

    match media_type(value).as_str() {
        APPLICATION_JSON => Ok(ContentType::Json),
        APPLICATION_CBOR => Ok(ContentType::Cbor),
        _ => Err(ApiError::UnsupportedMediaType(format!(
            "Expecting 'Content-Type' of {APPLICATION_JSON} or {APPLICATION_CBOR}"
        ))),
    }
}

/// Whether the `Accept` header allows `media`. A missing header allows
/// everything.
fn accepts(headers: &HeaderMap, media: &str) -> bool {
    let Some(accept) = headers.get(ACCEPT).and_then(|v| v.to_str().ok()) else {
        return true;
    };

    let (kind, _) = media.split_once('/').unwrap_or((media, ""));
    accept.split(',').any(|range| {
        let mut params = range.split(';');
        let candidate = params.next().unwrap_or_default().trim().to_ascii_lowercase();
        let refused = params.any(|p| {
            p.trim()
                .strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f64>().ok())
                .is_some_and(|q| q <= 0.0)
        });

        !refused
            && (candidate == "*/*"
                || candidate == media
                || candidate.strip_suffix("/*") == Some(kind))
    })
}

/// Encoding of an event stream, JSON preferred.
///
/// # Errors
///
/// Returns 406 if `Accept` allows neither encoding.
pub fn response_encoding(headers: &HeaderMap) -> Result<ContentType, ApiError> {
    if accepts(headers, APPLICATION_JSON) {
        Ok(ContentType::Json)
    } else if accepts(headers, APPLICATION_CBOR) {
        Ok(ContentType::Cbor)
    } else {
        Err(ApiError::NotAcceptable(format!(
            "Expecting 'Accept' to allow '{APPLICATION_CBOR}' or '{APPLICATION_JSON}'"
        )))
    }
}

/// Decode a request body.
///
/// # Errors
///
/// Returns 400 with the decoder's message.
pub fn decode<T: DeserializeOwned>(content_type: ContentType, body: &[u8]) -> Result<T, ApiError> {
    match content_type {
        ContentType::Json => {
            let value: serde_json::Value = serde_json::from_slice(body)
                .map_err(|e| ApiError::BadRequest(format!("Failed to parse body into JSON: {e}")))?;
            serde_json::from_value(value)
                .map_err(|e| ApiError::BadRequest(format!("Failed to convert JSON into Call: {e}")))
        }
        ContentType::Cbor => ciborium::from_reader(body)
            .map_err(|e| ApiError::BadRequest(format!("Failed to parse body into Call CBOR: {e}"))),
    }
}

/// Encode a value.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode<T: Serialize>(content_type: ContentType, value: &T) -> Result<Vec<u8>, EncodeError> {
    match content_type {
        ContentType::Json => Ok(serde_json::to_vec(value)?),
        ContentType::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf).map_err(|e| EncodeError::Cbor(e.to_string()))?;
            Ok(buf)
        }
    }
}

/// Frame one record.
#[must_use]
pub fn record(data: &[u8]) -> Bytes {
    let mut framed = format!("{}\n", data.len()).into_bytes();
    framed.extend_from_slice(data);
    Bytes::from(framed)
}

/// Encode a value and frame it as one record.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode_record<T: Serialize>(content_type: ContentType, value: &T) -> Result<Bytes, EncodeError> {
    encode(content_type, value).map(|data| record(&data))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use stratum_master::Event;

    use super::*;

    fn headers(name: axum::http::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn request_encoding_requires_content_type() {
        let err = request_encoding(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "Expecting 'Content-Type' to be present");

        assert_eq!(
            request_encoding(&headers(CONTENT_TYPE, "application/json; charset=utf-8")).unwrap(),
            ContentType::Json
        );
        assert_eq!(
            request_encoding(&headers(CONTENT_TYPE, "application/cbor")).unwrap(),
            ContentType::Cbor
        );

        let err = request_encoding(&headers(CONTENT_TYPE, "text/plain")).unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedMediaType(_)));
    }

    #[test]
    fn response_encoding_prefers_json() {
        assert_eq!(
            response_encoding(&HeaderMap::new()).unwrap(),
            ContentType::Json
        );
        assert_eq!(
            response_encoding(&headers(ACCEPT, "*/*")).unwrap(),
            ContentType::Json
        );
        assert_eq!(
            response_encoding(&headers(ACCEPT, "application/cbor")).unwrap(),
            ContentType::Cbor
        );
        assert_eq!(
            response_encoding(&headers(ACCEPT, "application/json;q=0, application/cbor")).unwrap(),
            ContentType::Cbor
        );

        let err = response_encoding(&headers(ACCEPT, "text/html")).unwrap_err();
        assert!(matches!(err, ApiError::NotAcceptable(_)));
    }

    #[test]
    fn records_are_length_prefixed() {
        assert_eq!(&record(b"{}")[..], b"2\n{}");

        let framed = encode_record(ContentType::Json, &Event::Heartbeat).unwrap();
        assert_eq!(&framed[..], b"20\n{\"type\":\"HEARTBEAT\"}");
    }

    #[test]
    fn cbor_events_decode() {
        let data = encode(ContentType::Cbor, &Event::Heartbeat).unwrap();
        let event: Event = decode(ContentType::Cbor, &data).unwrap();
        assert_eq!(event, Event::Heartbeat);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = decode::<Event>(ContentType::Json, b"{").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse body into JSON"));
    }
}
