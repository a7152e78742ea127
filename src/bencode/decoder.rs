//! Bencode decoder
//!
//! Strict recursive-descent decoder. Dispatches on the leading byte of each
//! value and reports failures as `TorrentError::MalformedEncoding` carrying
//! the byte offset.

use anyhow::Result;
use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::trace;

use crate::bencode::value::Value;
use crate::error::TorrentError;

/// Maximum list/dictionary nesting accepted from untrusted input
const MAX_DEPTH: usize = 64;

/// Decode exactly one value; trailing bytes are an error
pub fn decode(data: &[u8]) -> Result<Value> {
    let (value, consumed) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(TorrentError::malformed_encoding_at(
            format!("{} trailing byte(s) after value", data.len() - consumed),
            consumed,
        )
        .into());
    }
    Ok(value)
}

/// Decode the value at the start of `data`, returning it together with the
/// number of bytes it occupied
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize)> {
    trace!("Decoding bencode value from {} bytes", data.len());
    let mut idx = 0;
    let value = decode_value(data, &mut idx, 0)?;
    Ok((value, idx))
}

fn malformed(message: impl Into<String>, idx: usize) -> anyhow::Error {
    TorrentError::malformed_encoding_at(message, idx).into()
}

fn decode_value(data: &[u8], idx: &mut usize, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(malformed("nesting too deep", *idx));
    }

    let Some(&byte) = data.get(*idx) else {
        return Err(malformed("unexpected end of input", *idx));
    };

    match byte {
        b'i' => decode_integer(data, idx),
        b'l' => decode_list(data, idx, depth),
        b'd' => decode_dict(data, idx, depth),
        b'0'..=b'9' => decode_bytes(data, idx),
        other => Err(malformed(format!("unexpected byte 0x{:02x}", other), *idx)),
    }
}

fn decode_integer(data: &[u8], idx: &mut usize) -> Result<Value> {
    let start = *idx + 1;
    let end = data[start..]
        .iter()
        .position(|&b| b == b'e')
        .map(|p| p + start)
        .ok_or_else(|| malformed("unterminated integer", *idx))?;

    let digits = &data[start..end];
    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);

    if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
        return Err(malformed("integer is not a decimal number", start));
    }
    if (unsigned[0] == b'0' && unsigned.len() > 1) || digits == b"-0" {
        return Err(malformed("integer has leading zero", start));
    }

    // digits are ASCII, so the slice is valid UTF-8
    let text = std::str::from_utf8(digits).map_err(|_| malformed("integer is not ASCII", start))?;
    let value: i64 = text
        .parse()
        .map_err(|_| malformed(format!("integer {} out of range", text), start))?;

    *idx = end + 1;
    Ok(Value::Integer(value))
}

fn decode_bytes(data: &[u8], idx: &mut usize) -> Result<Value> {
    let start = *idx;
    let colon = data[start..]
        .iter()
        .position(|&b| b == b':')
        .map(|p| p + start)
        .ok_or_else(|| malformed("byte string length is not terminated", start))?;

    let len_digits = &data[start..colon];
    if !len_digits.iter().all(u8::is_ascii_digit) {
        return Err(malformed("byte string length is not a number", start));
    }
    let length: usize = std::str::from_utf8(len_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed("byte string length is not a number", start))?;

    let body = colon + 1;
    let end = body
        .checked_add(length)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| malformed(format!("byte string of {} bytes is truncated", length), body))?;

    *idx = end;
    Ok(Value::Bytes(Bytes::copy_from_slice(&data[body..end])))
}

fn decode_list(data: &[u8], idx: &mut usize, depth: usize) -> Result<Value> {
    let open = *idx;
    *idx += 1;
    let mut list = Vec::new();

    loop {
        match data.get(*idx) {
            None => return Err(malformed("unterminated list", open)),
            Some(b'e') => break,
            Some(_) => list.push(decode_value(data, idx, depth + 1)?),
        }
    }

    *idx += 1;
    Ok(Value::List(list))
}

fn decode_dict(data: &[u8], idx: &mut usize, depth: usize) -> Result<Value> {
    let open = *idx;
    *idx += 1;
    let mut dict = BTreeMap::new();

    loop {
        match data.get(*idx) {
            None => return Err(malformed("unterminated dictionary", open)),
            Some(b'e') => break,
            Some(b'0'..=b'9') => {}
            Some(_) => return Err(malformed("dictionary key must be a byte string", *idx)),
        }

        let key = match decode_bytes(data, idx)? {
            Value::Bytes(key) => key,
            _ => return Err(malformed("dictionary key must be a byte string", *idx)),
        };
        let value = decode_value(data, idx, depth + 1)?;
        dict.insert(key, value);
    }

    *idx += 1;
    Ok(Value::Dict(dict))
}
