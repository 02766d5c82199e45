//! Chunked base64 transport for image payloads.
//!
//! Images cross several boundaries as base64 (inline reference uploads,
//! managed inference JSON responses, remote `b64_json` payloads). Encoding
//! and decoding always walk the buffer in fixed-size windows so memory and
//! call depth stay bounded regardless of the image size.
//!
//! Encode windows are a multiple of 3 bytes and decode windows a multiple of
//! 4 characters, so chunk boundaries never split a base64 quantum and the
//! concatenated output is identical to a one-shot encoding.

use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

pub use base64::DecodeError;

/// Bytes consumed per encode window (produces 4096 characters).
pub const ENCODE_CHUNK_BYTES: usize = 3 * 1024;

/// Characters consumed per decode window (produces 3072 bytes).
pub const DECODE_CHUNK_CHARS: usize = 4 * 1024;

/// Standard alphabet that accepts both padded and unpadded input.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode `bytes` as padded standard base64, one window at a time.
pub fn encode_chunked(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for window in bytes.chunks(ENCODE_CHUNK_BYTES) {
        STANDARD.encode_string(window, &mut out);
    }
    out
}

/// Decode standard base64 (padded or not), one window at a time.
///
/// Accepts a `data:<mime>;base64,` prefix and ignores ASCII whitespace, so
/// line-wrapped payloads decode as well.
pub fn decode_chunked(input: &str) -> Result<Vec<u8>, DecodeError> {
    let (_, payload) = split_data_url(input);
    let cleaned: Vec<u8> = payload
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    let mut out = Vec::with_capacity(cleaned.len() / 4 * 3 + 3);
    for window in cleaned.chunks(DECODE_CHUNK_CHARS) {
        LENIENT.decode_vec(window, &mut out)?;
    }
    Ok(out)
}

/// Split an optional `data:` URL header from its payload.
///
/// Returns the declared media type (if any) and the remaining base64 text.
/// Input without a `data:` prefix is returned unchanged.
pub fn split_data_url(input: &str) -> (Option<&str>, &str) {
    let trimmed = input.trim_start();
    let Some(rest) = trimmed.strip_prefix("data:") else {
        return (None, input);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let media_type = header
                .split(';')
                .next()
                .filter(|media_type| !media_type.is_empty());
            (media_type, payload)
        }
        None => (None, input),
    }
}
