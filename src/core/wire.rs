//! Purpose: Define the line-delimited JSON messages exchanged with a child process.
//! Exports: `Request`, `ResponseLine`, `generate_key`, `decode_response_lines`, `encode_line`.
//! Role: Wire codec shared by the caller bridge and the responder.
//! Invariants: Field names on the wire are fixed (`key`, `optionalOutput`, `isUnique`, ...).
//! Invariants: One message per line; encoded lines never contain a raw newline.
//! Invariants: A line is a ResponseLine only if it is an object with a boolean `request_status`.

use bstr::ByteSlice;
use getrandom::fill as fill_random;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

const KEY_BYTES: usize = 16;

/// Caller → callee; exactly one per child process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub key: String,
    #[serde(rename = "optionalOutput")]
    pub optional_output: bool,
    #[serde(rename = "isUnique")]
    pub is_unique: bool,
    #[serde(default)]
    pub data: Value,
}

/// Callee → caller; zero or more per request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseLine {
    /// Absent only for failures raised before the request was parsed.
    #[serde(default)]
    pub key: Option<String>,
    pub request_status: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "optionalOutput", default)]
    pub optional_output: Option<bool>,
    #[serde(rename = "isUnique", default)]
    pub is_unique: Option<bool>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ResponseLine {
    /// Exact key match, or a key-less line from an early callee failure.
    pub fn matches_key(&self, key: &str) -> bool {
        match &self.key {
            Some(line_key) => line_key == key,
            None => true,
        }
    }
}

/// 128-bit random token, hex encoded.
pub fn generate_key() -> Result<String, Error> {
    let mut bytes = [0u8; KEY_BYTES];
    fill_random(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to generate request key: {err}"))
    })?;
    Ok(hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(nibble_hex(byte >> 4));
        out.push(nibble_hex(byte & 0x0f));
    }
    out
}

fn nibble_hex(nibble: u8) -> char {
    match nibble {
        0..=9 => char::from(b'0' + nibble),
        _ => char::from(b'a' + (nibble - 10)),
    }
}

/// Serialize one message followed by `\n`.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, Error> {
    let mut out = serde_json::to_vec(message).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode protocol message")
            .with_source(err)
    })?;
    out.push(b'\n');
    Ok(out)
}

pub fn decode_request(input: &[u8]) -> Result<Request, Error> {
    serde_json::from_slice(input.trim()).map_err(|err| {
        Error::new(ErrorKind::MalformedRequest)
            .with_message(format!("request could not be decoded: {err}"))
            .with_source(err)
    })
}

pub fn decode_response_line(line: &[u8]) -> Result<ResponseLine, Error> {
    serde_json::from_slice(line).map_err(|err| {
        Error::new(ErrorKind::MalformedResponse)
            .with_message("response line is not a protocol message")
            .with_source(err)
    })
}

/// Decode every protocol line addressed to `key`, in emission order.
///
/// Blank lines, non-protocol lines, and lines carrying a foreign key are dropped.
pub fn decode_response_lines(output: &[u8], key: &str) -> Vec<ResponseLine> {
    let mut accepted = Vec::new();
    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match decode_response_line(line) {
            Ok(response) if response.matches_key(key) => accepted.push(response),
            Ok(response) => {
                tracing::warn!(foreign_key = ?response.key, "dropping response for another request");
            }
            Err(err) => {
                tracing::debug!(error = %err, line = %line.as_bstr(), "dropping non-protocol output line");
            }
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::{
        Request, ResponseLine, decode_request, decode_response_lines, encode_line, generate_key,
    };
    use crate::core::error::ErrorKind;
    use serde_json::{Value, json};

    #[test]
    fn keys_are_unique_hex_tokens() {
        let a = generate_key().expect("key");
        let b = generate_key().expect("key");
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn request_uses_wire_field_names() {
        let request = Request {
            key: "abc".to_string(),
            optional_output: true,
            is_unique: false,
            data: json!({"n": 2}),
        };
        let line = encode_line(&request).expect("encode");
        assert_eq!(line.last(), Some(&b'\n'));
        let value: Value = serde_json::from_slice(&line).expect("json");
        assert_eq!(value["optionalOutput"], json!(true));
        assert_eq!(value["isUnique"], json!(false));
        assert_eq!(value["data"]["n"], json!(2));

        assert_eq!(decode_request(&line).expect("decode"), request);
    }

    #[test]
    fn malformed_request_is_reported() {
        let err = decode_request(b"not json").expect_err("malformed");
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);
        let err = decode_request(b"{\"data\": 1}").expect_err("missing key");
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);
    }

    #[test]
    fn decoding_filters_noise_and_foreign_keys() {
        let output = concat!(
            "starting up\n",
            "\n",
            "{\"debug\": true}\n",
            "{\"key\":\"k1\",\"request_status\":true,\"data\":1,\"optionalOutput\":true,\"isUnique\":false,\"errors\":[],\"warnings\":[]}\r\n",
            "{\"key\":\"other\",\"request_status\":true,\"data\":9,\"errors\":[],\"warnings\":[]}\n",
            "{\"key\":null,\"request_status\":false,\"data\":null,\"errors\":[\"early\"],\"warnings\":[]}\n",
            "[1,2,3]\n",
        );
        let lines = decode_response_lines(output.as_bytes(), "k1");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].data, json!(1));
        assert_eq!(lines[0].is_unique, Some(false));
        assert_eq!(lines[1].key, None);
        assert_eq!(lines[1].errors, vec!["early".to_string()]);
    }

    #[test]
    fn absent_key_matches_any_request() {
        let line = ResponseLine {
            key: None,
            request_status: false,
            data: Value::Null,
            optional_output: None,
            is_unique: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        };
        assert!(line.matches_key("anything"));
    }

    #[test]
    fn invalid_utf8_lines_are_skipped() {
        let mut output = b"\xff\xfe garbage\n".to_vec();
        output.extend_from_slice(b"{\"key\":\"k\",\"request_status\":true,\"data\":\"ok\"}\n");
        let lines = decode_response_lines(&output, "k");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].data, json!("ok"));
    }
}
