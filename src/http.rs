//! Response interpretation helpers shared by the async and blocking clients.

use percent_encoding::percent_decode_str;
use reqwest::{header::HeaderMap, header::CONTENT_DISPOSITION, StatusCode};

use crate::errors::{ApiError, Error, TransportError, TransportErrorKind};

/// Classify a reqwest failure into a transport error. Shared by the async
/// and blocking clients.
pub(crate) fn to_transport_error(err: reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_request() {
        TransportErrorKind::Request
    } else {
        TransportErrorKind::Other
    };

    TransportError {
        kind,
        message: err.to_string(),
        source: Some(err),
    }
    .into()
}

/// Build an [`ApiError`] from a non-success response body.
///
/// The service is FastAPI-shaped: rejections usually carry a JSON
/// `{"detail": ...}` envelope (a string, or an array of validation issues).
/// A `{"message": ...}` envelope and plain-text bodies are tolerated too;
/// the raw body is always kept for diagnostics.
pub(crate) fn parse_api_error_parts(status: StatusCode, body: String) -> ApiError {
    let status_code = status.as_u16();
    let status_text = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();

    if body.is_empty() {
        return ApiError::new(status_code, status_text);
    }

    let message = match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => value
            .get("detail")
            .or_else(|| value.get("message"))
            .map(|detail| match detail {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| status_text.clone()),
        Err(_) => body.clone(),
    };

    ApiError {
        status: status_code,
        message,
        raw_body: Some(body),
        upload_field: None,
    }
}

/// Extract a download filename from a `Content-Disposition` header.
///
/// Understands both the plain `filename=` parameter and the RFC 5987
/// `filename*=charset''percent-encoded` form, preferring the latter when
/// both are present. Returns `None` when the header is absent or carries no
/// usable name.
pub(crate) fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;

    let mut plain: Option<String> = None;
    let mut extended: Option<String> = None;

    for param in header.split(';') {
        let param = param.trim();
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        match name.as_str() {
            "filename*" => extended = decode_ext_value(value),
            "filename" => {
                let value = strip_quotes(value);
                if !value.is_empty() {
                    plain = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    extended.or(plain)
}

fn strip_quotes(value: &str) -> &str {
    value
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
}

/// Decode an RFC 5987 `ext-value`: `charset'language'value-chars`.
fn decode_ext_value(value: &str) -> Option<String> {
    let value = strip_quotes(value);
    let mut parts = value.splitn(3, '\'');
    let encoded = match (parts.next(), parts.next(), parts.next()) {
        // Full charset'lang'value form; only the value part is encoded.
        (Some(_charset), Some(_lang), Some(rest)) => rest,
        // Servers in the wild also send a bare percent-encoded name.
        _ => value,
    };
    if encoded.is_empty() {
        return None;
    }
    match percent_decode_str(encoded).decode_utf8() {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(_) => Some(encoded.to_string()),
    }
}
