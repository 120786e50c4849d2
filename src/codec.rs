//! Base64 framing for surface payloads
//!
//! Captured frames come back from the surface as base64 (optionally wrapped
//! in a `data:` URL), and intercepted asset bodies are sent back the same way.

use crate::error::{ExportError, Result};

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Base64 encode bytes
#[must_use]
pub fn base64_encode(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let b0 = chunk[0] as usize;
        let b1 = chunk.get(1).copied().unwrap_or(0) as usize;
        let b2 = chunk.get(2).copied().unwrap_or(0) as usize;

        let combined = (b0 << 16) | (b1 << 8) | b2;

        result.push(ALPHABET[(combined >> 18) & 0x3F] as char);
        result.push(ALPHABET[(combined >> 12) & 0x3F] as char);

        if chunk.len() > 1 {
            result.push(ALPHABET[(combined >> 6) & 0x3F] as char);
        } else {
            result.push('=');
        }

        if chunk.len() > 2 {
            result.push(ALPHABET[combined & 0x3F] as char);
        } else {
            result.push('=');
        }
    }

    result
}

fn decode_symbol(c: u8) -> Option<u32> {
    match c {
        b'A'..=b'Z' => Some(u32::from(c - b'A')),
        b'a'..=b'z' => Some(u32::from(c - b'a') + 26),
        b'0'..=b'9' => Some(u32::from(c - b'0') + 52),
        b'+' | b'-' => Some(62),
        b'/' | b'_' => Some(63),
        _ => None,
    }
}

/// Base64 decode, accepting standard and URL-safe alphabets.
///
/// Whitespace is skipped and trailing padding is optional.
pub fn base64_decode(input: &str) -> Result<Vec<u8>> {
    let symbols: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let trimmed = match symbols.iter().position(|&b| b == b'=') {
        Some(pad) => {
            if symbols[pad..].iter().any(|&b| b != b'=') {
                return Err(ExportError::Surface("base64 padding in the middle of input".into()));
            }
            &symbols[..pad]
        }
        None => &symbols[..],
    };

    if trimmed.len() % 4 == 1 {
        return Err(ExportError::Surface("truncated base64 input".into()));
    }

    let mut out = Vec::with_capacity(trimmed.len() / 4 * 3 + 2);
    for chunk in trimmed.chunks(4) {
        let mut acc = 0u32;
        for (i, &c) in chunk.iter().enumerate() {
            let v = decode_symbol(c).ok_or_else(|| {
                ExportError::Surface(format!("invalid base64 character '{}'", c as char))
            })?;
            acc |= v << (18 - 6 * i);
        }
        out.push((acc >> 16) as u8);
        if chunk.len() > 2 {
            out.push((acc >> 8) as u8);
        }
        if chunk.len() > 3 {
            out.push(acc as u8);
        }
    }

    Ok(out)
}

/// Strip a `data:<mime>;base64,` prefix if present.
#[must_use]
pub fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:") {
        if let Some(idx) = payload.find(";base64,") {
            return &payload[idx + ";base64,".len()..];
        }
    }
    payload
}
