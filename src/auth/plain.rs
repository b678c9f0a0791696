// rust-xmpp
// Copyright (c) 2014 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use super::{AuthContext, Authenticator, Step};
use crate::error::AuthError;
use crate::non_stanzas::Outgoing;

pub struct PlainAuth {
    authzid: Option<String>,
}

impl PlainAuth {
    pub fn new() -> PlainAuth {
        PlainAuth { authzid: None }
    }

    pub fn with_authzid(authzid: String) -> PlainAuth {
        PlainAuth {
            authzid: Some(authzid),
        }
    }

    fn initial(&self, authcid: &str, passwd: &str) -> Vec<u8> {
        let mut data: Vec<u8> = Vec::new();
        if let Some(ref authzid) = self.authzid {
            data.extend(authzid.bytes());
        }
        data.push(0);
        data.extend(authcid.bytes());
        data.push(0);
        data.extend(passwd.bytes());
        data
    }
}

impl Default for PlainAuth {
    fn default() -> PlainAuth {
        PlainAuth::new()
    }
}

impl Authenticator for PlainAuth {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn start(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        let passwd = ctx.password()?;
        if !ctx.may_send_plaintext() {
            return Ok(Step::NeedsConsent);
        }
        let data = self.initial(ctx.identity.localpart(), passwd);
        Ok(Step::Send(Outgoing::auth("PLAIN", Some(data))))
    }

    fn handle_success(&mut self, _ctx: &AuthContext, _data: &[u8]) -> Result<(), AuthError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_base64;

    fn ctx() -> AuthContext {
        AuthContext::new("juliet@capulet.example".parse().unwrap(), Some("secret".into()))
    }

    #[test]
    fn waits_for_consent_in_the_clear() {
        let mut plain = PlainAuth::new();
        assert!(matches!(plain.start(&ctx()).unwrap(), Step::NeedsConsent));
    }

    #[test]
    fn single_message_over_tls() {
        let mut ctx = ctx();
        ctx.encrypted = true;
        let mut plain = PlainAuth::new();
        match plain.start(&ctx).unwrap() {
            Step::Send(Outgoing::Auth(auth)) => {
                assert_eq!(auth.mechanism, "PLAIN");
                let data = auth.data.unwrap();
                assert_eq!(encode_base64(&data), "AGp1bGlldABzZWNyZXQ=");
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(matches!(
            plain.handle_challenge(&ctx, b"more?"),
            Err(AuthError::Malformed(_))
        ));
        assert!(plain.handle_success(&ctx, b"").is_ok());
    }

    #[test]
    fn authzid_leads() {
        let mut ctx = ctx();
        ctx.plaintext_allowed = true;
        let mut plain = PlainAuth::with_authzid("romeo@montague.example".into());
        match plain.resume_plaintext(&ctx).unwrap() {
            Step::Send(Outgoing::Auth(auth)) => {
                assert_eq!(auth.data.unwrap(), b"romeo@montague.example\0juliet\0secret".to_vec());
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn no_password() {
        let ctx = AuthContext::new("juliet@capulet.example".parse().unwrap(), None);
        assert!(matches!(PlainAuth::new().start(&ctx), Err(AuthError::NoCredentials)));
    }
}
