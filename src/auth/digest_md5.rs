// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::collections::HashMap;
use std::mem;
use std::str;

use tracing::warn;

use super::crypto::{digest_md5_response, random_hex};
use super::{AuthContext, Authenticator, Step};
use crate::codec::parse_fields;
use crate::error::AuthError;
use crate::non_stanzas::Outgoing;

enum State {
    Initial,
    WaitChallenge,
    // Holds the rspauth the server has to present.
    WaitRspauth(String),
    Verified,
    Finished,
}

pub struct DigestMd5Auth {
    cnonce: Option<String>,
    state: State,
}

// RFC 2831 quoted-string
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn parse_utf8(data: &[u8]) -> Result<HashMap<String, String>, AuthError> {
    let text = str::from_utf8(data)
        .map_err(|_| AuthError::malformed("DIGEST-MD5: server sent non-UTF-8 data"))?;
    Ok(parse_fields(text))
}

impl DigestMd5Auth {
    pub fn new() -> DigestMd5Auth {
        DigestMd5Auth {
            cnonce: None,
            state: State::Initial,
        }
    }

    /// Uses `cnonce` instead of a random one, for reproducible exchanges.
    pub fn with_cnonce(cnonce: String) -> DigestMd5Auth {
        DigestMd5Auth {
            cnonce: Some(cnonce),
            state: State::Initial,
        }
    }

    fn handle_first(
        &mut self,
        ctx: &AuthContext,
        fields: &HashMap<String, String>,
    ) -> Result<Step, AuthError> {
        let passwd = ctx.password()?;
        let nonce = match fields.get("nonce") {
            Some(nonce) => nonce,
            None => return Err(AuthError::malformed("DIGEST-MD5: challenge without nonce")),
        };
        let realm = match fields.get("realm") {
            Some(realm) if !realm.is_empty() => realm.as_str(),
            _ => ctx.identity.domain(),
        };
        if let Some(qop) = fields.get("qop") {
            if !qop.split(',').any(|q| q.trim() == "auth") {
                return Err(AuthError::malformed("DIGEST-MD5: server does not offer qop=auth"));
            }
        }

        let cnonce = match self.cnonce.take() {
            Some(cnonce) => cnonce,
            None => random_hex(16)?,
        };
        let digest_uri = format!("xmpp/{}", realm);

        let response = digest_md5_response(
            &ctx.identity,
            passwd,
            nonce,
            &cnonce,
            &format!("AUTHENTICATE:{}", digest_uri),
            realm,
        )?;
        let rspauth = digest_md5_response(
            &ctx.identity,
            passwd,
            nonce,
            &cnonce,
            &format!(":{}", digest_uri),
            realm,
        )?;

        let reply = format!(
            "username={},realm={},nonce={},cnonce={},nc=00000001,qop=auth,digest-uri={},response={},charset=utf-8",
            quote(ctx.identity.localpart()),
            quote(realm),
            quote(nonce),
            quote(&cnonce),
            quote(&digest_uri),
            response
        );

        self.state = State::WaitRspauth(rspauth);
        Ok(Step::Send(Outgoing::response(reply.into_bytes())))
    }

    fn check_rspauth(&mut self, fields: &HashMap<String, String>) -> Result<(), AuthError> {
        let expected = match mem::replace(&mut self.state, State::Finished) {
            State::WaitRspauth(expected) => expected,
            _ => return Err(AuthError::malformed("DIGEST-MD5: unexpected rspauth")),
        };
        match fields.get("rspauth") {
            Some(rspauth) if *rspauth == expected => {
                self.state = State::Verified;
                Ok(())
            }
            _ => Err(AuthError::ServerAuthMismatch),
        }
    }
}

impl Default for DigestMd5Auth {
    fn default() -> DigestMd5Auth {
        DigestMd5Auth::new()
    }
}

impl Authenticator for DigestMd5Auth {
    fn name(&self) -> &str {
        "DIGEST-MD5"
    }

    fn start(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        ctx.password()?;
        self.state = State::WaitChallenge;
        Ok(Step::Send(Outgoing::auth("DIGEST-MD5", None)))
    }

    fn handle_challenge(&mut self, ctx: &AuthContext, data: &[u8]) -> Result<Step, AuthError> {
        let fields = parse_utf8(data)?;
        match self.state {
            State::WaitChallenge => self.handle_first(ctx, &fields),
            State::WaitRspauth(_) => {
                // Without rspauth the expected value stays pending for
                // <success/>.
                if fields.contains_key("rspauth") {
                    self.check_rspauth(&fields)?;
                }
                Ok(Step::Send(Outgoing::response(Vec::new())))
            }
            _ => Err(AuthError::malformed("DIGEST-MD5: unexpected challenge")),
        }
    }

    fn handle_success(&mut self, _ctx: &AuthContext, data: &[u8]) -> Result<(), AuthError> {
        match self.state {
            State::WaitRspauth(_) => {
                if data.is_empty() {
                    warn!("DIGEST-MD5: server skipped rspauth, it was not verified");
                    self.state = State::Finished;
                    return Ok(());
                }
                let fields = parse_utf8(data)?;
                self.check_rspauth(&fields)?;
            }
            State::Verified => (),
            _ => return Err(AuthError::malformed("DIGEST-MD5: success before the challenge")),
        }
        self.state = State::Finished;
        Ok(())
    }

    fn dispose(&mut self) {
        self.cnonce = None;
        self.state = State::Finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: &[u8] =
        b"realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",algorithm=md5-sess,charset=utf-8";

    fn ctx() -> AuthContext {
        AuthContext::new("chris@elwood.innosoft.com".parse().unwrap(), Some("secret".into()))
    }

    fn response_text(step: Step) -> String {
        match step {
            Step::Send(Outgoing::Response(r)) => String::from_utf8(r.data).unwrap(),
            other => panic!("unexpected step {:?}", other),
        }
    }

    fn started() -> DigestMd5Auth {
        let mut digest = DigestMd5Auth::with_cnonce("OA6MHXh6VqTrRk".into());
        match digest.start(&ctx()).unwrap() {
            Step::Send(Outgoing::Auth(auth)) => {
                assert_eq!(auth.mechanism, "DIGEST-MD5");
                assert_eq!(auth.data, None);
            }
            other => panic!("unexpected step {:?}", other),
        }
        digest
    }

    #[test]
    fn full_exchange() {
        let ctx = ctx();
        let mut digest = started();
        let reply = response_text(digest.handle_challenge(&ctx, CHALLENGE).unwrap());
        assert_eq!(
            reply,
            "username=\"chris\",realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",\
             cnonce=\"OA6MHXh6VqTrRk\",nc=00000001,qop=auth,\
             digest-uri=\"xmpp/elwood.innosoft.com\",\
             response=bd65b7e1e271da8472d909dbb269654f,charset=utf-8"
        );

        let second = digest
            .handle_challenge(&ctx, b"rspauth=663cd8e18c313aa9d485b90114f4ffae")
            .unwrap();
        assert_eq!(response_text(second), "");
        assert!(digest.handle_success(&ctx, b"").is_ok());
    }

    #[test]
    fn wrong_rspauth() {
        let ctx = ctx();
        let mut digest = started();
        digest.handle_challenge(&ctx, CHALLENGE).unwrap();
        assert!(matches!(
            digest.handle_challenge(&ctx, b"rspauth=00000000000000000000000000000000"),
            Err(AuthError::ServerAuthMismatch)
        ));
    }

    #[test]
    fn second_challenge_without_rspauth() {
        let ctx = ctx();
        let mut digest = started();
        digest.handle_challenge(&ctx, CHALLENGE).unwrap();
        let second = digest.handle_challenge(&ctx, b"qop=\"auth\"").unwrap();
        assert_eq!(response_text(second), "");
        assert!(digest
            .handle_success(&ctx, b"rspauth=663cd8e18c313aa9d485b90114f4ffae")
            .is_ok());

        let mut digest = started();
        digest.handle_challenge(&ctx, CHALLENGE).unwrap();
        digest.handle_challenge(&ctx, b"qop=\"auth\"").unwrap();
        assert!(matches!(
            digest.handle_success(&ctx, b"rspauth=00000000000000000000000000000000"),
            Err(AuthError::ServerAuthMismatch)
        ));
    }

    #[test]
    fn rspauth_in_success() {
        let ctx = ctx();
        let mut digest = started();
        digest.handle_challenge(&ctx, CHALLENGE).unwrap();
        assert!(digest
            .handle_success(&ctx, b"rspauth=663cd8e18c313aa9d485b90114f4ffae")
            .is_ok());

        let mut digest = started();
        digest.handle_challenge(&ctx, CHALLENGE).unwrap();
        assert!(matches!(
            digest.handle_success(&ctx, b"rspauth=663cd8e18c313aa9d485b90114f4fffe"),
            Err(AuthError::ServerAuthMismatch)
        ));
    }

    #[test]
    fn missing_nonce() {
        let mut digest = started();
        assert!(matches!(
            digest.handle_challenge(&ctx(), b"realm=\"elwood.innosoft.com\",qop=\"auth\""),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn realm_defaults_to_domain() {
        let mut digest = started();
        let reply = response_text(
            digest
                .handle_challenge(&ctx(), b"nonce=\"OA6MG9tEQGm2hh\",qop=\"auth,auth-int\"")
                .unwrap(),
        );
        assert!(reply.contains("realm=\"elwood.innosoft.com\""));
        assert!(reply.contains("response=bd65b7e1e271da8472d909dbb269654f"));
    }

    #[test]
    fn qop_without_auth() {
        let mut digest = started();
        assert!(matches!(
            digest.handle_challenge(&ctx(), b"nonce=\"abc\",qop=\"auth-conf\""),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }
}
