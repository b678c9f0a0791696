// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

//! Delegation to a SASL engine supplied by the host, for mechanisms this
//! crate does not implement itself (GSSAPI and friends).

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use super::{AuthContext, Authenticator, Step};
use crate::error::AuthError;
use crate::non_stanzas::Outgoing;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExternalError {
    /// None of the offered mechanisms can work with these properties.
    #[error("no usable mechanism")]
    NoMechanism,
    /// This particular mechanism failed, others may still work.
    #[error("mechanism {0} is unusable")]
    Unusable(String),
    #[error("{0}")]
    Fatal(String),
}

/// Security properties handed to the engine when it picks a mechanism.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityProps {
    pub min_ssf: u32,
    pub max_ssf: u32,
    pub max_buf_size: u32,
    pub no_anonymous: bool,
    /// Mechanisms that reveal the password are off limits.
    pub no_plaintext: bool,
}

impl SecurityProps {
    pub fn for_context(ctx: &AuthContext) -> SecurityProps {
        if ctx.encrypted {
            // TLS already protects the stream, no security layer wanted.
            SecurityProps {
                min_ssf: 0,
                max_ssf: 0,
                max_buf_size: 0,
                no_anonymous: true,
                no_plaintext: false,
            }
        } else {
            SecurityProps {
                min_ssf: 0,
                max_ssf: u32::MAX,
                max_buf_size: 4096,
                no_anonymous: true,
                no_plaintext: !ctx.plaintext_allowed,
            }
        }
    }
}

/// Answers the engine's questions about the account.
pub trait SaslCallbacks {
    fn realm(&self) -> &str;
    fn authname(&self) -> &str;
    fn user(&self) -> &str;
    fn secret(&self) -> Option<&str>;
}

impl SaslCallbacks for AuthContext {
    fn realm(&self) -> &str {
        self.identity.domain()
    }

    fn authname(&self) -> &str {
        self.identity.localpart()
    }

    fn user(&self) -> &str {
        self.identity.localpart()
    }

    fn secret(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

/// A host-supplied SASL client engine.
pub trait ExternalSasl {
    /// Picks one of `mechanisms` and returns its name together with the
    /// initial response. `None` means the mechanism has no initial
    /// response, which is different from an empty one.
    fn start(
        &mut self,
        mechanisms: &[String],
        props: &SecurityProps,
        callbacks: &dyn SaslCallbacks,
    ) -> Result<(String, Option<Vec<u8>>), ExternalError>;

    fn step(&mut self, challenge: &[u8], callbacks: &dyn SaslCallbacks) -> Result<Vec<u8>, ExternalError>;

    /// Additional data carried in `<success/>`.
    fn finish(&mut self, data: &[u8], callbacks: &dyn SaslCallbacks) -> Result<(), ExternalError>;

    /// Forgets the current mechanism. The engine may be started again.
    fn dispose(&mut self);
}

fn timed<T, F: FnOnce() -> T>(budget: Duration, what: &str, f: F) -> Result<T, AuthError> {
    let started = Instant::now();
    let result = f();
    let elapsed = started.elapsed();
    if elapsed > budget {
        return Err(AuthError::External(format!(
            "{} took {} ms, the limit is {} ms",
            what,
            elapsed.as_millis(),
            budget.as_millis()
        )));
    }
    Ok(result)
}

fn engine_error(e: ExternalError) -> AuthError {
    AuthError::External(e.to_string())
}

pub struct ExternalAuth {
    engine: Box<dyn ExternalSasl>,
    candidates: Vec<String>,
    selected: Option<String>,
    initial: Option<Option<Vec<u8>>>,
}

impl ExternalAuth {
    pub fn new(engine: Box<dyn ExternalSasl>, candidates: Vec<String>) -> ExternalAuth {
        ExternalAuth {
            engine,
            candidates,
            selected: None,
            initial: None,
        }
    }

    /// Lets the engine choose among the remaining candidates. A mechanism
    /// it reports unusable is dropped and the engine restarted. Returns
    /// `false` when nothing usable is left.
    pub fn negotiate(&mut self, ctx: &AuthContext) -> Result<bool, AuthError> {
        self.selected = None;
        self.initial = None;
        loop {
            if self.candidates.is_empty() {
                return Ok(false);
            }
            let props = SecurityProps::for_context(ctx);
            let engine = &mut self.engine;
            let candidates = &self.candidates;
            let result = timed(ctx.external_budget, "SASL engine start", || {
                engine.start(candidates, &props, ctx)
            })?;
            match result {
                Ok((mechanism, initial)) => {
                    debug!("SASL engine chose {}", mechanism);
                    self.selected = Some(mechanism);
                    self.initial = Some(initial);
                    return Ok(true);
                }
                Err(ExternalError::NoMechanism) => return Ok(false),
                Err(ExternalError::Unusable(mechanism)) => {
                    warn!("SASL engine cannot use {}, trying the others", mechanism);
                    self.engine.dispose();
                    let before = self.candidates.len();
                    self.candidates.retain(|m| *m != mechanism);
                    if self.candidates.len() == before {
                        return Err(AuthError::External(format!(
                            "engine rejected {}, which was not offered",
                            mechanism
                        )));
                    }
                }
                Err(e) => return Err(engine_error(e)),
            }
        }
    }

    pub fn mechanism(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Gives the engine back, disposed.
    pub fn into_engine(mut self) -> Box<dyn ExternalSasl> {
        self.engine.dispose();
        self.engine
    }

    /// Drops the mechanism the server just refused. Returns whether any
    /// candidates remain.
    pub fn reject_current(&mut self) -> bool {
        if let Some(rejected) = self.selected.take() {
            self.candidates.retain(|m| *m != rejected);
        }
        self.initial = None;
        self.engine.dispose();
        !self.candidates.is_empty()
    }
}

impl Authenticator for ExternalAuth {
    fn name(&self) -> &str {
        self.mechanism().unwrap_or("external")
    }

    fn start(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        if self.selected.is_none() && !self.negotiate(ctx)? {
            return Err(AuthError::NoCommonMechanism);
        }
        let mechanism = match self.selected {
            Some(ref mechanism) => mechanism.clone(),
            None => return Err(AuthError::NoCommonMechanism),
        };
        let initial = self.initial.take().unwrap_or(None);
        Ok(Step::Send(Outgoing::auth(&mechanism, initial)))
    }

    fn handle_challenge(&mut self, ctx: &AuthContext, data: &[u8]) -> Result<Step, AuthError> {
        let engine = &mut self.engine;
        let reply = timed(ctx.external_budget, "SASL engine step", || engine.step(data, ctx))?
            .map_err(engine_error)?;
        Ok(Step::Send(Outgoing::response(reply)))
    }

    fn handle_success(&mut self, ctx: &AuthContext, data: &[u8]) -> Result<(), AuthError> {
        let engine = &mut self.engine;
        timed(ctx.external_budget, "SASL engine finish", || engine.finish(data, ctx))?
            .map_err(engine_error)
    }

    fn resume_plaintext(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        self.selected = None;
        self.start(ctx)
    }

    fn dispose(&mut self) {
        self.selected = None;
        self.initial = None;
        self.engine.dispose();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;

    /// Scripted engine: mechanisms in `broken` are reported unusable,
    /// anything in `plaintext` needs `no_plaintext == false`.
    #[derive(Default)]
    pub(crate) struct FakeEngine {
        pub broken: Vec<String>,
        pub plaintext: Vec<String>,
        pub delay: Option<Duration>,
        pub log: Rc<RefCell<Vec<String>>>,
    }

    impl ExternalSasl for FakeEngine {
        fn start(
            &mut self,
            mechanisms: &[String],
            props: &SecurityProps,
            callbacks: &dyn SaslCallbacks,
        ) -> Result<(String, Option<Vec<u8>>), ExternalError> {
            self.log.borrow_mut().push(format!("start {}", mechanisms.join(" ")));
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            for mechanism in mechanisms {
                if self.plaintext.contains(mechanism) && props.no_plaintext {
                    continue;
                }
                if self.broken.contains(mechanism) {
                    return Err(ExternalError::Unusable(mechanism.clone()));
                }
                let initial = format!("{}@{}", callbacks.user(), callbacks.realm());
                return Ok((mechanism.clone(), Some(initial.into_bytes())));
            }
            Err(ExternalError::NoMechanism)
        }

        fn step(&mut self, challenge: &[u8], callbacks: &dyn SaslCallbacks) -> Result<Vec<u8>, ExternalError> {
            self.log.borrow_mut().push("step".into());
            if challenge == b"fail" {
                return Err(ExternalError::Fatal("token expired".into()));
            }
            Ok(callbacks.secret().unwrap_or("").as_bytes().to_vec())
        }

        fn finish(&mut self, data: &[u8], _callbacks: &dyn SaslCallbacks) -> Result<(), ExternalError> {
            self.log.borrow_mut().push("finish".into());
            if data == b"bad" {
                return Err(ExternalError::Fatal("server not verified".into()));
            }
            Ok(())
        }

        fn dispose(&mut self) {
            self.log.borrow_mut().push("dispose".into());
        }
    }

    fn ctx() -> AuthContext {
        AuthContext::new("juliet@capulet.example".parse().unwrap(), Some("secret".into()))
    }

    fn offered(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn prunes_unusable_mechanisms() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let engine = FakeEngine {
            broken: offered(&["GSSAPI"]),
            log: log.clone(),
            ..FakeEngine::default()
        };
        let mut auth = ExternalAuth::new(Box::new(engine), offered(&["GSSAPI", "X-TOKEN"]));
        assert!(auth.negotiate(&ctx()).unwrap());
        assert_eq!(auth.mechanism(), Some("X-TOKEN"));
        assert_eq!(auth.candidates(), &offered(&["X-TOKEN"])[..]);
        assert_eq!(
            *log.borrow(),
            vec!["start GSSAPI X-TOKEN", "dispose", "start X-TOKEN"]
        );

        match auth.start(&ctx()).unwrap() {
            Step::Send(Outgoing::Auth(a)) => {
                assert_eq!(a.mechanism, "X-TOKEN");
                assert_eq!(a.data.unwrap(), b"juliet@capulet.example".to_vec());
            }
            other => panic!("unexpected step {:?}", other),
        }
        match auth.handle_challenge(&ctx(), b"token?").unwrap() {
            Step::Send(Outgoing::Response(r)) => assert_eq!(r.data, b"secret".to_vec()),
            other => panic!("unexpected step {:?}", other),
        }
        assert!(auth.handle_success(&ctx(), b"").is_ok());
    }

    #[test]
    fn plaintext_mechanisms_need_permission() {
        let engine = FakeEngine {
            plaintext: offered(&["X-CLEAR"]),
            ..FakeEngine::default()
        };
        let mut ctx = ctx();
        let mut auth = ExternalAuth::new(Box::new(engine), offered(&["X-CLEAR"]));
        assert!(!auth.negotiate(&ctx).unwrap());
        ctx.plaintext_allowed = true;
        assert!(auth.negotiate(&ctx).unwrap());
        assert_eq!(auth.mechanism(), Some("X-CLEAR"));
    }

    #[test]
    fn engine_errors_are_fatal() {
        let mut auth = ExternalAuth::new(Box::new(FakeEngine::default()), offered(&["X-TOKEN"]));
        auth.start(&ctx()).unwrap();
        assert!(matches!(
            auth.handle_challenge(&ctx(), b"fail"),
            Err(AuthError::External(_))
        ));
        assert!(matches!(auth.handle_success(&ctx(), b"bad"), Err(AuthError::External(_))));
    }

    #[test]
    fn slow_engine() {
        let engine = FakeEngine {
            delay: Some(Duration::from_millis(50)),
            ..FakeEngine::default()
        };
        let mut ctx = ctx();
        ctx.external_budget = Duration::from_millis(1);
        let mut auth = ExternalAuth::new(Box::new(engine), offered(&["X-TOKEN"]));
        assert!(matches!(auth.negotiate(&ctx), Err(AuthError::External(_))));
    }

    #[test]
    fn reject_and_retry() {
        let mut auth = ExternalAuth::new(
            Box::new(FakeEngine::default()),
            offered(&["X-ONE", "X-TWO"]),
        );
        assert!(auth.negotiate(&ctx()).unwrap());
        assert_eq!(auth.mechanism(), Some("X-ONE"));
        assert!(auth.reject_current());
        assert!(auth.negotiate(&ctx()).unwrap());
        assert_eq!(auth.mechanism(), Some("X-TWO"));
        assert!(!auth.reject_current());
    }

    #[test]
    fn security_properties() {
        let mut ctx = ctx();
        assert!(SecurityProps::for_context(&ctx).no_plaintext);
        ctx.encrypted = true;
        let props = SecurityProps::for_context(&ctx);
        assert!(!props.no_plaintext);
        assert_eq!(props.max_ssf, 0);
        assert_eq!(ctx.authname(), "juliet");
        assert_eq!(ctx.realm(), "capulet.example");
        assert_eq!(ctx.secret(), Some("secret"));
    }
}
