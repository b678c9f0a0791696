// rust-xmpp
// Copyright (c) 2014 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

//! Keyed hashing and key derivation used by the mechanisms.

use std::borrow::Cow;

use openssl::error::ErrorStack;
use openssl::hash::{hash, MessageDigest};
use openssl::pkcs5::pbkdf2_hmac;
use openssl::pkey::PKey;
use openssl::rand::rand_bytes;
use openssl::sign::Signer;

use crate::error::AuthError;
use crate::jid::Jid;

pub fn hmac(digest: MessageDigest, key: &[u8], data: &[u8]) -> Result<Vec<u8>, ErrorStack> {
    let pkey = PKey::hmac(key)?;
    let mut signer = Signer::new(digest, &pkey)?;
    signer.sign_oneshot_to_vec(data)
}

pub fn sha1_hex(data: &[u8]) -> Result<String, ErrorStack> {
    Ok(hex::encode(&*hash(MessageDigest::sha1(), data)?))
}

pub fn hmac_md5_hex(key: &[u8], data: &[u8]) -> Result<String, ErrorStack> {
    Ok(hex::encode(hmac(MessageDigest::md5(), key, data)?))
}

/// Random printable ASCII without `,`, safe inside attribute lists.
pub fn random_printable(len: usize) -> Result<String, ErrorStack> {
    let mut nonce = vec![0; len];
    rand_bytes(&mut nonce)?;

    for c in nonce.iter_mut() {
        // Restrict output to printable ASCII, excluding '~'
        *c = (*c % (b'~' - b'!')) + b'!';
        // Map occurences of ',' to '~'
        if *c == b',' {
            *c = b'~'
        }
    }
    Ok(nonce.into_iter().map(char::from).collect())
}

/// `bytes` random bytes, hex encoded. Safe inside quoted strings.
pub fn random_hex(bytes: usize) -> Result<String, ErrorStack> {
    let mut buf = vec![0; bytes];
    rand_bytes(&mut buf)?;
    Ok(hex::encode(buf))
}

// RFC 2831: with charset=utf-8 the username and password are converted
// to ISO-8859-1 whenever they can be represented in it.
fn latin1(s: &str) -> Cow<[u8]> {
    if s.chars().all(|c| (c as u32) < 0x100) {
        Cow::Owned(s.chars().map(|c| c as u8).collect())
    } else {
        Cow::Borrowed(s.as_bytes())
    }
}

/// The DIGEST-MD5 `response` value (RFC 2831 section 2.1.2.1) for the
/// given `a2` string, e.g. `AUTHENTICATE:xmpp/example.org` for the
/// client response or `:xmpp/example.org` for the expected `rspauth`.
pub fn digest_md5_response(
    identity: &Jid,
    password: &str,
    nonce: &str,
    cnonce: &str,
    a2: &str,
    realm: &str,
) -> Result<String, ErrorStack> {
    let md5 = MessageDigest::md5();

    let mut x = Vec::new();
    x.extend_from_slice(&latin1(identity.localpart()));
    x.push(b':');
    x.extend_from_slice(realm.as_bytes());
    x.push(b':');
    x.extend_from_slice(&latin1(password));
    let session_key = hash(md5, &x)?;

    let mut a1 = session_key.to_vec();
    a1.extend_from_slice(format!(":{}:{}", nonce, cnonce).as_bytes());

    let ha1 = hex::encode(&*hash(md5, &a1)?);
    let ha2 = hex::encode(&*hash(md5, a2.as_bytes())?);

    let kd = format!("{}:{}:00000001:{}:auth:{}", ha1, nonce, cnonce, ha2);
    Ok(hex::encode(&*hash(md5, kd.as_bytes())?))
}

/// Hi(password, salt, i) from RFC 5802, i.e. PBKDF2 with HMAC over
/// `digest`, producing `digest.size()` bytes.
pub fn scram_hi(
    digest: MessageDigest,
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Vec<u8>, AuthError> {
    if iterations == 0 {
        return Err(AuthError::malformed("SCRAM iteration count must be positive"));
    }
    let mut salted = vec![0; digest.size()];
    pbkdf2_hmac(password, salt, iterations as usize, digest, &mut salted)?;
    Ok(salted)
}

/// ClientKey XOR HMAC(H(ClientKey), AuthMessage)
pub fn scram_client_proof(
    digest: MessageDigest,
    salted_password: &[u8],
    auth_message: &[u8],
) -> Result<Vec<u8>, ErrorStack> {
    // ClientKey := HMAC(SaltedPassword, "Client Key")
    let client_key = hmac(digest, salted_password, b"Client Key")?;
    // StoredKey := H(ClientKey)
    let stored_key = hash(digest, &client_key)?;
    // ClientSignature := HMAC(StoredKey, AuthMessage)
    let client_signature = hmac(digest, &stored_key, auth_message)?;

    Ok(client_key
        .iter()
        .zip(client_signature.iter())
        .map(|(x, y)| *x ^ *y)
        .collect())
}

/// HMAC(HMAC(SaltedPassword, "Server Key"), AuthMessage)
pub fn scram_server_signature(
    digest: MessageDigest,
    salted_password: &[u8],
    auth_message: &[u8],
) -> Result<Vec<u8>, ErrorStack> {
    let server_key = hmac(digest, salted_password, b"Server Key")?;
    hmac(digest, &server_key, auth_message)
}
