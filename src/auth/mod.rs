// rust-xmpp
// Copyright (c) 2014 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::time::Duration;

use xml;

use crate::config::{AccountConfig, ConfigError};
use crate::error::{AuthError, SaslCondition};
use crate::jid::Jid;
use crate::non_stanzas::Outgoing;

pub use self::digest_md5::DigestMd5Auth;
pub use self::external::{ExternalAuth, ExternalError, ExternalSasl, SaslCallbacks, SecurityProps};
pub use self::legacy::LegacyAuth;
pub use self::plain::PlainAuth;
pub use self::scram::ScramAuth;

pub mod crypto;
pub mod digest_md5;
pub mod external;
pub mod legacy;
pub mod plain;
pub mod scram;

/// What a mechanism gets to see of the session it runs in.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub identity: Jid,
    pub password: Option<String>,
    /// The stream is protected by TLS.
    pub encrypted: bool,
    /// The id of the most recently received stream header.
    pub stream_id: Option<String>,
    /// The user agreed to credentials in the clear, now or earlier.
    pub plaintext_allowed: bool,
    /// Upper bound for a single call into an external SASL engine.
    pub external_budget: Duration,
}

impl AuthContext {
    pub fn new(identity: Jid, password: Option<String>) -> AuthContext {
        AuthContext {
            identity,
            password,
            encrypted: false,
            stream_id: None,
            plaintext_allowed: false,
            external_budget: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &AccountConfig) -> Result<AuthContext, ConfigError> {
        let mut ctx = AuthContext::new(config.identity()?, config.password.clone());
        ctx.plaintext_allowed = config.auth_plain_in_clear;
        ctx.external_budget = config.external_step_budget();
        Ok(ctx)
    }

    pub fn may_send_plaintext(&self) -> bool {
        self.encrypted || self.plaintext_allowed
    }

    pub fn password(&self) -> Result<&str, AuthError> {
        self.password.as_deref().ok_or(AuthError::NoCredentials)
    }
}

/// The outcome of driving a mechanism one step.
#[derive(Debug)]
pub enum Step {
    /// Put this on the wire and wait for the server.
    Send(Outgoing),
    /// Nothing can be sent until the user allows plaintext credentials.
    /// Continue with `resume_plaintext`.
    NeedsConsent,
}

pub trait Authenticator {
    fn name(&self) -> &str;

    fn start(&mut self, ctx: &AuthContext) -> Result<Step, AuthError>;

    fn handle_challenge(&mut self, _ctx: &AuthContext, _data: &[u8]) -> Result<Step, AuthError> {
        Err(AuthError::malformed(format!("unexpected challenge during {}", self.name())))
    }

    fn handle_success(&mut self, ctx: &AuthContext, data: &[u8]) -> Result<(), AuthError>;

    fn handle_failure(&mut self, _ctx: &AuthContext, failure: &xml::Element) -> AuthError {
        let (condition, text) = SaslCondition::from_failure(failure);
        AuthError::Sasl { condition, text }
    }

    /// Picks up where `NeedsConsent` left off, once the context permits
    /// plaintext.
    fn resume_plaintext(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        self.start(ctx)
    }

    fn dispose(&mut self) {}
}

/// The built-in SASL mechanisms, ordered from weakest to strongest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MechanismKind {
    Plain,
    DigestMd5,
    ScramSha1,
}

impl MechanismKind {
    pub fn name(self) -> &'static str {
        match self {
            MechanismKind::Plain => "PLAIN",
            MechanismKind::DigestMd5 => "DIGEST-MD5",
            MechanismKind::ScramSha1 => "SCRAM-SHA-1",
        }
    }

    pub fn from_name(name: &str) -> Option<MechanismKind> {
        match name {
            "PLAIN" => Some(MechanismKind::Plain),
            "DIGEST-MD5" => Some(MechanismKind::DigestMd5),
            "SCRAM-SHA-1" => Some(MechanismKind::ScramSha1),
            _ => None,
        }
    }

    pub fn instantiate(self) -> Mechanism {
        match self {
            MechanismKind::Plain => Mechanism::Plain(PlainAuth::new()),
            MechanismKind::DigestMd5 => Mechanism::DigestMd5(DigestMd5Auth::new()),
            MechanismKind::ScramSha1 => Mechanism::ScramSha1(ScramAuth::new()),
        }
    }
}

/// The mechanism driving the current exchange. A session owns at most one.
pub enum Mechanism {
    LegacyIq(LegacyAuth),
    Plain(PlainAuth),
    DigestMd5(DigestMd5Auth),
    ScramSha1(ScramAuth),
    External(ExternalAuth),
}

impl Mechanism {
    fn inner(&self) -> &dyn Authenticator {
        match *self {
            Mechanism::LegacyIq(ref m) => m,
            Mechanism::Plain(ref m) => m,
            Mechanism::DigestMd5(ref m) => m,
            Mechanism::ScramSha1(ref m) => m,
            Mechanism::External(ref m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Authenticator {
        match *self {
            Mechanism::LegacyIq(ref mut m) => m,
            Mechanism::Plain(ref mut m) => m,
            Mechanism::DigestMd5(ref mut m) => m,
            Mechanism::ScramSha1(ref mut m) => m,
            Mechanism::External(ref mut m) => m,
        }
    }

    pub fn name(&self) -> &str {
        self.inner().name()
    }

    pub fn is_legacy(&self) -> bool {
        matches!(*self, Mechanism::LegacyIq(_))
    }

    pub fn start(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        self.inner_mut().start(ctx)
    }

    pub fn handle_challenge(&mut self, ctx: &AuthContext, data: &[u8]) -> Result<Step, AuthError> {
        self.inner_mut().handle_challenge(ctx, data)
    }

    pub fn handle_success(&mut self, ctx: &AuthContext, data: &[u8]) -> Result<(), AuthError> {
        self.inner_mut().handle_success(ctx, data)
    }

    pub fn handle_failure(&mut self, ctx: &AuthContext, failure: &xml::Element) -> AuthError {
        self.inner_mut().handle_failure(ctx, failure)
    }

    pub fn resume_plaintext(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        self.inner_mut().resume_plaintext(ctx)
    }

    /// Releases the mechanism. Exchange state does not outlive this call.
    pub fn dispose(mut self) {
        self.inner_mut().dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_by_name() {
        for kind in [MechanismKind::Plain, MechanismKind::DigestMd5, MechanismKind::ScramSha1] {
            assert_eq!(MechanismKind::from_name(kind.name()), Some(kind));
            assert_eq!(kind.instantiate().name(), kind.name());
        }
        assert_eq!(MechanismKind::from_name("plain"), None);
        assert!(MechanismKind::ScramSha1 > MechanismKind::DigestMd5);
        assert!(MechanismKind::DigestMd5 > MechanismKind::Plain);
    }

    #[test]
    fn plaintext_permission() {
        let mut ctx = AuthContext::new("juliet@capulet.example".parse().unwrap(), None);
        assert!(!ctx.may_send_plaintext());
        assert!(matches!(ctx.password(), Err(AuthError::NoCredentials)));
        ctx.encrypted = true;
        assert!(ctx.may_send_plaintext());
        ctx.encrypted = false;
        ctx.plaintext_allowed = true;
        assert!(ctx.may_send_plaintext());
    }

    #[test]
    fn context_from_config() {
        let mut config = AccountConfig::new("juliet@capulet.example/balcony", Some("secret"));
        config.auth_plain_in_clear = true;
        config.external_step_budget_ms = 500;
        let ctx = AuthContext::from_config(&config).unwrap();
        assert_eq!(ctx.identity.resource(), Some("balcony"));
        assert_eq!(ctx.password().unwrap(), "secret");
        assert!(ctx.plaintext_allowed);
        assert!(!ctx.encrypted);
        assert_eq!(ctx.external_budget, Duration::from_millis(500));
    }
}
