// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

//! Non-SASL authentication (XEP-0078), for servers that predate RFC 3920.

use std::str;

use xml;

use super::crypto::{hmac_md5_hex, sha1_hex};
use super::{AuthContext, Authenticator, Step};
use crate::error::AuthError;
use crate::non_stanzas::Outgoing;
use crate::ns;
use crate::stanzas::{child_named, parse_element, Iq, IqType, StanzaError};

/// Id of the `get` asking which credential fields the server accepts.
pub const FIELDS_ID: &str = "auth1";
/// Id of the `set` carrying the credentials.
pub const CREDENTIALS_ID: &str = "auth2";

/// Resource bound at login when the account has none configured.
pub const DEFAULT_RESOURCE: &str = "rust-xmpp";

enum State {
    Initial,
    WaitFields,
    WaitConsent,
    WaitResult,
    Finished,
}

pub struct LegacyAuth {
    state: State,
}

fn query(ty: IqType, id: &str, fields: &[(&str, &str)]) -> Outgoing {
    let mut query = xml::Element::new("query".into(), Some(ns::IQ_AUTH.into()), vec![]);
    for &(name, value) in fields {
        query
            .tag(xml::Element::new(name.into(), Some(ns::IQ_AUTH.into()), vec![]))
            .text(value.into());
    }
    let mut iq = Iq::new(ty, id);
    iq.tag(query);
    Outgoing::Iq(iq)
}

impl LegacyAuth {
    pub fn new() -> LegacyAuth {
        LegacyAuth {
            state: State::Initial,
        }
    }

    fn credentials(&mut self, ctx: &AuthContext, field: &str, value: &str) -> Step {
        self.state = State::WaitResult;
        let resource = ctx.identity.resource().unwrap_or(DEFAULT_RESOURCE);
        Step::Send(query(
            IqType::Set,
            CREDENTIALS_ID,
            &[
                ("username", ctx.identity.localpart()),
                ("resource", resource),
                (field, value),
            ],
        ))
    }
}

impl Default for LegacyAuth {
    fn default() -> LegacyAuth {
        LegacyAuth::new()
    }
}

impl Authenticator for LegacyAuth {
    fn name(&self) -> &str {
        "jabber:iq:auth"
    }

    fn start(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        ctx.password()?;
        self.state = State::WaitFields;
        Ok(Step::Send(query(
            IqType::Get,
            FIELDS_ID,
            &[("username", ctx.identity.localpart())],
        )))
    }

    /// `data` is the serialized `<query/>` of the server's answer to the
    /// fields request.
    fn handle_challenge(&mut self, ctx: &AuthContext, data: &[u8]) -> Result<Step, AuthError> {
        match self.state {
            State::WaitFields => (),
            _ => return Err(AuthError::malformed("unexpected jabber:iq:auth reply")),
        }
        let passwd = ctx.password()?;
        let fields = str::from_utf8(data)
            .ok()
            .and_then(parse_element)
            .ok_or_else(|| AuthError::malformed("unreadable jabber:iq:auth fields"))?;

        if let (Some(stream_id), Some(_)) = (ctx.stream_id.as_deref(), child_named(&fields, "digest")) {
            let digest = sha1_hex(format!("{}{}", stream_id, passwd).as_bytes())?;
            return Ok(self.credentials(ctx, "digest", &digest));
        }

        let challenge = child_named(&fields, "crammd5").and_then(|c| c.get_attribute("challenge", None));
        if let (Some(_), Some(challenge)) = (ctx.stream_id.as_deref(), challenge) {
            let digest = hmac_md5_hex(passwd.as_bytes(), challenge.as_bytes())?;
            return Ok(self.credentials(ctx, "crammd5", &digest));
        }

        if child_named(&fields, "password").is_some() {
            if !ctx.may_send_plaintext() {
                self.state = State::WaitConsent;
                return Ok(Step::NeedsConsent);
            }
            return Ok(self.credentials(ctx, "password", passwd));
        }

        Err(AuthError::NoCommonMechanism)
    }

    fn handle_success(&mut self, _ctx: &AuthContext, _data: &[u8]) -> Result<(), AuthError> {
        match self.state {
            State::WaitResult => {
                self.state = State::Finished;
                Ok(())
            }
            _ => Err(AuthError::malformed("unexpected jabber:iq:auth result")),
        }
    }

    /// `failure` is the `type='error'` IQ.
    fn handle_failure(&mut self, _ctx: &AuthContext, failure: &xml::Element) -> AuthError {
        self.state = State::Finished;
        let error = match child_named(failure, "error") {
            Some(error) => StanzaError::from_element(error),
            None => return AuthError::malformed("jabber:iq:auth error without <error/>"),
        };
        if error.code.as_deref() == Some("401") {
            AuthError::LegacyUnauthorized
        } else {
            AuthError::Refused(error.describe())
        }
    }

    fn resume_plaintext(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        match self.state {
            State::WaitConsent if ctx.may_send_plaintext() => {
                let passwd = ctx.password()?;
                Ok(self.credentials(ctx, "password", passwd))
            }
            State::WaitConsent => Err(AuthError::PlaintextRefused),
            _ => Err(AuthError::malformed("jabber:iq:auth is not waiting for consent")),
        }
    }

    fn dispose(&mut self) {
        self.state = State::Finished;
    }
}
