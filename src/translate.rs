//! Content translation: turns a raw inbound payload into an outbound request
//!
//! Textual payloads may be transcoded from a source to a target character set;
//! binary payloads always pass through untouched.

use crate::error::{BridgeError, Result};
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use http::Method;

/// Media types (besides `text/*`) whose payloads are treated as text
const TEXTUAL_MEDIA_TYPES: &[&str] = &[
    "text/",
    "application/xml",
    "application/json",
    "application/xhtml+xml",
    "application/javascript",
    "application/rss+xml",
    "application/soap+xml",
    "application/svg+xml",
];

/// An HTTP request ready to be decorated and sent upstream
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Request method
    pub method: Method,
    /// Absolute target URL
    pub url: reqwest::Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body; empty for methods without a body
    pub body: Bytes,
}

/// Per-listener forwarding settings: where to send and how to transcode
#[derive(Debug, Clone)]
pub struct TranslationProfile {
    /// Upstream URL every unit is sent to
    pub target_url: reqwest::Url,
    /// Character set of inbound text
    pub source_encoding: Option<&'static Encoding>,
    /// Character set text is converted to
    pub target_encoding: Option<&'static Encoding>,
}

impl TranslationProfile {
    /// Profile without transcoding
    pub fn new(target_url: reqwest::Url) -> Self {
        Self {
            target_url,
            source_encoding: None,
            target_encoding: None,
        }
    }

    /// Build an outbound request for one forwarding unit
    pub fn build(
        &self,
        method: &Method,
        payload: &[u8],
        media_type: Option<&str>,
    ) -> Result<OutboundRequest> {
        build(
            Some(&self.target_url),
            Some(method),
            payload,
            media_type,
            self.source_encoding,
            self.target_encoding,
        )
    }
}

/// Build an outbound request from a payload and its declared media type
///
/// Fails with [`BridgeError::InvalidRequest`] when the target or method is
/// missing, or when a body-carrying method has a non-empty payload but no
/// media type. Transcoding failures surface as [`BridgeError::Encoding`].
pub fn build(
    target_url: Option<&reqwest::Url>,
    method: Option<&Method>,
    payload: &[u8],
    media_type: Option<&str>,
    source_encoding: Option<&'static Encoding>,
    target_encoding: Option<&'static Encoding>,
) -> Result<OutboundRequest> {
    let url = target_url
        .ok_or_else(|| BridgeError::InvalidRequest("target URL is required".to_string()))?;
    let method = method
        .ok_or_else(|| BridgeError::InvalidRequest("HTTP method is required".to_string()))?;
    let media_type = media_type.map(str::trim).filter(|m| !m.is_empty());

    let mut headers = HeaderMap::new();
    let mut body = Bytes::new();

    if requires_body(method) {
        match media_type {
            Some(media_type) => {
                let value = HeaderValue::from_str(media_type).map_err(|_| {
                    BridgeError::InvalidRequest(format!(
                        "media type '{}' is not a valid header value",
                        media_type
                    ))
                })?;
                body = translate_content(payload, media_type, source_encoding, target_encoding)?;
                let value = match transcoding(media_type, source_encoding, target_encoding) {
                    Some((_, target)) => HeaderValue::from_str(&with_charset(media_type, target))
                        .map_err(|_| {
                            BridgeError::InvalidRequest(format!(
                                "media type '{}' is not a valid header value",
                                media_type
                            ))
                        })?,
                    None => value,
                };
                headers.insert(CONTENT_TYPE, value);
            }
            None if !payload.is_empty() => {
                return Err(BridgeError::InvalidRequest(format!(
                    "{} with a body requires a media type",
                    method
                )));
            }
            None => {}
        }
    }

    Ok(OutboundRequest {
        method: method.clone(),
        url: url.clone(),
        headers,
        body,
    })
}

/// Convert a payload for transmission according to its media type
pub fn translate_content(
    payload: &[u8],
    media_type: &str,
    source_encoding: Option<&'static Encoding>,
    target_encoding: Option<&'static Encoding>,
) -> Result<Bytes> {
    if !is_textual_media_type(media_type) {
        tracing::trace!(bytes = payload.len(), "Binary content passed through");
        return Ok(Bytes::copy_from_slice(payload));
    }

    match transcoding(media_type, source_encoding, target_encoding) {
        Some((source, target)) => {
            let converted = transcode(payload, source, target)?;
            tracing::debug!(
                from = source.name(),
                to = target.name(),
                bytes_in = payload.len(),
                bytes_out = converted.len(),
                "Textual content transcoded"
            );
            Ok(Bytes::from(converted))
        }
        None => Ok(Bytes::copy_from_slice(payload)),
    }
}

/// The (source, target) pair when a payload of this media type is re-encoded
fn transcoding(
    media_type: &str,
    source_encoding: Option<&'static Encoding>,
    target_encoding: Option<&'static Encoding>,
) -> Option<(&'static Encoding, &'static Encoding)> {
    match (source_encoding, target_encoding) {
        (Some(source), Some(target)) if source != target && is_textual_media_type(media_type) => {
            Some((source, target))
        }
        _ => None,
    }
}

/// Replace (or add) the `charset` parameter of a media type
pub fn with_charset(media_type: &str, encoding: &'static Encoding) -> String {
    let mut parts = media_type.split(';').map(str::trim);
    let mut out = parts.next().unwrap_or_default().to_string();
    for param in parts.filter(|p| !p.is_empty()) {
        let is_charset = param
            .split('=')
            .next()
            .is_some_and(|name| name.trim().eq_ignore_ascii_case("charset"));
        if !is_charset {
            out.push_str("; ");
            out.push_str(param);
        }
    }
    out.push_str("; charset=");
    out.push_str(&encoding.name().to_ascii_lowercase());
    out
}

/// Whether text can be encoded into `encoding`
///
/// UTF-16 is encoded directly; other encodings whose output form differs
/// from themselves (the "replacement" encoding) are decode-only.
pub fn can_encode(encoding: &'static Encoding) -> bool {
    encoding == UTF_16LE || encoding == UTF_16BE || encoding.output_encoding() == encoding
}

/// Decode `payload` as `source` and re-encode it as `target`
///
/// Malformed input and characters the target cannot represent are errors
/// rather than silently replaced.
pub fn transcode(
    payload: &[u8],
    source: &'static Encoding,
    target: &'static Encoding,
) -> Result<Vec<u8>> {
    if !can_encode(target) {
        return Err(BridgeError::Encoding(format!(
            "{} is decode-only and cannot be used as a target encoding",
            target.name()
        )));
    }

    let text = source
        .decode_without_bom_handling_and_without_replacement(payload)
        .ok_or_else(|| {
            BridgeError::Encoding(format!("payload is not valid {}", source.name()))
        })?;

    if target == UTF_16LE {
        return Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect());
    }
    if target == UTF_16BE {
        return Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }

    let (encoded, _, had_unmappable) = target.encode(&text);
    if had_unmappable {
        return Err(BridgeError::Encoding(format!(
            "payload contains characters not representable in {}",
            target.name()
        )));
    }

    Ok(encoded.into_owned())
}

/// Whether a media type carries text
pub fn is_textual_media_type(media_type: &str) -> bool {
    let media_type = media_type.trim().to_ascii_lowercase();
    TEXTUAL_MEDIA_TYPES
        .iter()
        .any(|prefix| media_type.starts_with(prefix))
}

/// Whether a method is expected to carry a request body
pub fn requires_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Resolve an optional encoding label ("utf-8", "latin1", "shift_jis", ...)
pub fn encoding_for_label(label: Option<&str>) -> Result<Option<&'static Encoding>> {
    match label.map(str::trim).filter(|l| !l.is_empty()) {
        None => Ok(None),
        Some(label) => Encoding::for_label(label.as_bytes())
            .map(Some)
            .ok_or_else(|| BridgeError::Encoding(format!("Unknown text encoding '{}'", label))),
    }
}
