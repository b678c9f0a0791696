// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

//! The `key=value,key="value"` grammar shared by DIGEST-MD5 and SCRAM,
//! and the base64 envelope SASL payloads travel in.

use std::collections::HashMap;

use crate::error::AuthError;

/// Parses a comma separated attribute list.
///
/// Commas inside a quoted value do not split, a backslash inside quotes
/// escapes the next character. One layer of surrounding quotes is removed
/// from values. Later duplicates win. Pairs without a `=` or with an empty
/// key are dropped; real servers send all kinds of things here.
pub fn parse_fields(text: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for token in split_unquoted(text) {
        let token = token.trim();
        let (key, value) = match token.find('=') {
            Some(pos) => (token[..pos].trim(), token[pos + 1..].trim()),
            None => continue,
        };
        if key.is_empty() {
            continue;
        }
        fields.insert(key.to_string(), unquote(value));
    }
    fields
}

fn split_unquoted(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                tokens.push(&text[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    tokens.push(&text[start..]);
    tokens
}

fn unquote(value: &str) -> String {
    if value.len() < 2 || !value.starts_with('"') || !value.ends_with('"') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() - 2);
    let mut chars = value[1..value.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub fn encode_base64<T: AsRef<[u8]>>(data: T) -> String {
    base64::encode(data)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, AuthError> {
    base64::decode(text).map_err(|_| AuthError::MalformedPayload)
}

/// Encodes a SASL payload for an `<auth/>` or `<response/>` body.
/// An empty payload is sent as a single `=`.
pub fn encode_payload(data: &[u8]) -> String {
    if data.is_empty() {
        "=".to_string()
    } else {
        encode_base64(data)
    }
}

/// Decodes the text body of a `<challenge/>` or `<success/>`.
pub fn decode_payload(text: &str) -> Result<Vec<u8>, AuthError> {
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Ok(Vec::new());
    }
    decode_base64(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn digest_challenge() {
        let fields = parse_fields("realm=\"x\",nonce=\"y\",qop=\"auth\"");
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["realm"], "x");
        assert_eq!(fields["nonce"], "y");
        assert_eq!(fields["qop"], "auth");
    }

    #[test]
    fn empty_and_duplicates() {
        assert!(parse_fields("").is_empty());
        let fields = parse_fields("a=1,a=2");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["a"], "2");
    }

    #[test]
    fn quoted_commas_and_junk() {
        let fields = parse_fields("qop=\"auth,auth-int\", junk ,=x,k=\"a\\\"b\",r=abc=def");
        assert_eq!(fields["qop"], "auth,auth-int");
        assert_eq!(fields["k"], "a\"b");
        assert_eq!(fields["r"], "abc=def");
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let fields = parse_fields("Nonce=1,nonce=2");
        assert_eq!(fields["Nonce"], "1");
        assert_eq!(fields["nonce"], "2");
    }

    #[test]
    fn payload_envelope() {
        assert_eq!(encode_payload(b""), "=");
        assert_eq!(decode_payload("=").unwrap(), Vec::<u8>::new());
        assert_eq!(decode_payload("  ").unwrap(), Vec::<u8>::new());
        assert_eq!(decode_payload(" AGp1bGlldABzZWNyZXQ= ").unwrap(), b"\0juliet\0secret");
        assert!(matches!(decode_base64("not base64!"), Err(AuthError::MalformedPayload)));
    }

    #[test]
    fn no_line_wrapping() {
        let encoded = encode_base64(vec![0xa5u8; 200]);
        assert!(!encoded.contains('\n'));
    }

    proptest! {
        #[test]
        fn base64_round_trip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(decode_base64(&encode_base64(&data)).unwrap(), data);
        }
    }
}
