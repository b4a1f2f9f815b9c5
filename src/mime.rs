//! Message formatting and MIME body extraction
//!
//! Projects a Gmail message resource onto a flat [`FormattedMessage`]. Walks
//! the MIME part tree, decodes base64url bodies, and resolves display
//! headers. Nothing in here fails: malformed input degrades to empty or
//! garbled text rather than an error.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::models::{FormattedMessage, Header, MimePart, RawMessage};

/// Standard-alphabet engine that accepts missing padding and stray trailing bits
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Bodies accumulated across a part tree, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedBodies {
    pub text: String,
    pub html: String,
}

/// Decode a base64url body segment into text
///
/// Translates the URL-safe alphabet to the standard one, ignores characters
/// outside the alphabet, and converts the bytes with lossy UTF-8. Decoding
/// stops at the first `=`.
pub fn decode_body_data(data: &str) -> String {
    let data = data.find('=').map_or(data, |end| &data[..end]);
    let mut standard: String = data
        .chars()
        .filter_map(|ch| match ch {
            '-' => Some('+'),
            '_' => Some('/'),
            c if c.is_ascii_alphanumeric() || c == '+' || c == '/' => Some(c),
            _ => None,
        })
        .collect();

    // A lone trailing sextet cannot encode a byte.
    if standard.len() % 4 == 1 {
        standard.pop();
    }

    match LENIENT_STANDARD.decode(standard.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "undecodable body data");
            String::new()
        }
    }
}

/// Walk a MIME part list, accumulating text/plain and text/html bodies
///
/// Pre-order, depth-first, left to right. A text leaf is consumed by its
/// mime type; any other part with children is descended into.
pub fn extract_parts(parts: &[MimePart]) -> ExtractedBodies {
    let mut out = ExtractedBodies::default();
    for part in parts {
        match (part.mime_type.as_str(), part.body_data()) {
            ("text/plain", Some(data)) => out.text.push_str(&decode_body_data(data)),
            ("text/html", Some(data)) => out.html.push_str(&decode_body_data(data)),
            _ => {
                if let Some(children) = part.parts.as_deref() {
                    let nested = extract_parts(children);
                    out.text.push_str(&nested.text);
                    out.html.push_str(&nested.html);
                }
            }
        }
    }
    out
}

/// Get header value by case-insensitive name; first match wins
pub fn header_value(headers: &[Header], wanted: &str) -> String {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(wanted))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

/// Project a raw Gmail message onto its display record
pub fn format_message(message: &RawMessage) -> FormattedMessage {
    let (headers, content) = match &message.payload {
        Some(payload) => (payload.headers.as_slice(), payload_content(payload)),
        None => (&[][..], String::new()),
    };

    FormattedMessage {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        from: header_value(headers, "From"),
        to: header_value(headers, "To"),
        subject: header_value(headers, "Subject"),
        date: header_value(headers, "Date"),
        content,
        snippet: message.snippet.clone(),
    }
}

fn payload_content(payload: &MimePart) -> String {
    if let Some(data) = payload.body_data() {
        return decode_body_data(data);
    }
    match payload.parts.as_deref() {
        Some(parts) => {
            let ExtractedBodies { text, html } = extract_parts(parts);
            if text.is_empty() { html } else { text }
        }
        None => String::new(),
    }
}
