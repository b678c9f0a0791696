// rust-xmpp
// Copyright (c) 2014-2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

//! The authentication lifecycle of one connection attempt.
//!
//! A [`Controller`] is fed stream headers and top-level elements and
//! answers with [`Action`]s for the host to carry out. It never does I/O
//! itself.

use tracing::{debug, error, info, warn};
use xml;

use crate::auth::legacy::{CREDENTIALS_ID, FIELDS_ID};
use crate::auth::{AuthContext, ExternalSasl, Mechanism, Step};
use crate::codec::decode_payload;
use crate::config::{AccountConfig, ConfigError};
use crate::error::{is_sasl, stream_condition_text, AuthError, SaslCondition};
use crate::negotiator::{MechanismRegistry, Negotiation, Negotiator, Offer, Pending};
use crate::non_stanzas::{AuthAbort, Outgoing, StartTls};
use crate::ns;
use crate::policy::{self, Consent, PlaintextPolicy};
use crate::stanzas::{Iq, IqType, Stanza};

// After the first mechanism picked by the external engine is refused,
// the engine may choose again at most five times. A sixth refusal ends
// the session.
const MAX_EXTERNAL_RETRIES: u32 = 5;

// Longest mechanism name RFC 4422 allows.
const MAX_MECHANISM_NAME: usize = 20;

/// Whether `name` is a well-formed SASL mechanism name: upper case
/// letters, digits, `-` and `_`, at most 20 of them.
pub fn is_mechanism_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_MECHANISM_NAME
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Unauthenticated,
    MechanismsAdvertised,
    Negotiating,
    Exchanging,
    Authenticated,
    Failed,
}

/// Something the host has to do on the controller's behalf.
#[derive(Debug)]
pub enum Action {
    Send(Outgoing),
    /// Perform the TLS handshake on the socket, then call
    /// [`Controller::tls_established`].
    UpgradeTls,
    /// Ask the user, then call [`Controller::answer_plaintext`].
    PromptPlaintext { account: String, message: String },
    /// Open a new stream over the same connection.
    RestartStream,
    Authenticated,
    Failed { error: AuthError, reconnect: bool },
}

/// The state of one connection attempt. Never reused across attempts.
pub struct Session {
    ctx: AuthContext,
    advertised: Vec<String>,
    mechanism: Option<Mechanism>,
    state: State,
}

impl Session {
    pub fn new(ctx: AuthContext) -> Session {
        Session {
            ctx,
            advertised: Vec::new(),
            mechanism: None,
            state: State::Unauthenticated,
        }
    }

    pub fn context(&self) -> &AuthContext {
        &self.ctx
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn advertised(&self) -> &[String] {
        &self.advertised
    }

    pub fn mechanism_name(&self) -> Option<&str> {
        self.mechanism.as_ref().map(|m| m.name())
    }

    pub fn is_terminal(&self) -> bool {
        self.state == State::Authenticated || self.state == State::Failed
    }
}

enum Suspended {
    Negotiation(Pending),
    Mechanism,
}

pub struct Controller {
    session: Session,
    config: AccountConfig,
    policy: PlaintextPolicy,
    negotiator: Negotiator,
    suspended: Option<Suspended>,
    tls_available: bool,
    external_attempts: u32,
}

impl Controller {
    pub fn new(config: AccountConfig) -> Result<Controller, ConfigError> {
        let ctx = AuthContext::from_config(&config)?;
        Ok(Controller {
            session: Session::new(ctx),
            policy: PlaintextPolicy::from_config(&config),
            config,
            negotiator: Negotiator::default(),
            suspended: None,
            tls_available: false,
            external_attempts: 0,
        })
    }

    /// The host can perform a TLS handshake when asked to.
    pub fn with_tls(mut self, available: bool) -> Controller {
        self.tls_available = available;
        self
    }

    pub fn with_registry(mut self, registry: MechanismRegistry) -> Controller {
        self.negotiator = Negotiator::new(registry);
        self
    }

    pub fn with_external(mut self, engine: Box<dyn ExternalSasl>) -> Controller {
        self.negotiator = self.negotiator.with_external(engine);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> State {
        self.session.state
    }

    /// The account settings, including a remembered plaintext consent.
    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// A stream header arrived. Its id is kept for digest authentication;
    /// a header without `version='1.0'` means the server only speaks
    /// jabber:iq:auth.
    pub fn handle_stream_start(&mut self, id: Option<&str>, version: Option<&str>) -> Vec<Action> {
        if let Some(id) = id {
            self.session.ctx.stream_id = Some(id.to_string());
        }
        if self.session.is_terminal() {
            return Vec::new();
        }
        let major = version
            .and_then(|v| v.split('.').next())
            .and_then(|major| major.trim().parse::<u32>().ok());
        if major.map_or(false, |major| major >= 1) {
            return Vec::new();
        }
        if self.session.state != State::Unauthenticated {
            return Vec::new();
        }
        info!("Server does not support XMPP 1.0 streams");
        if self.config.require_tls && !self.session.ctx.encrypted {
            return self.fail(AuthError::EncryptionUnavailable);
        }
        self.session.state = State::MechanismsAdvertised;
        self.negotiate(Offer::Legacy)
    }

    pub fn handle_element(&mut self, e: &xml::Element) -> Vec<Action> {
        if self.session.is_terminal() {
            debug!("Ignoring <{}/> after authentication ended", e.name);
            return Vec::new();
        }
        match e.ns.as_deref() {
            Some(ns::STREAMS) if e.name == "features" => self.handle_features(e),
            Some(ns::STREAMS) if e.name == "error" => self.handle_stream_error(e),
            Some(ns::FEATURE_TLS) => self.handle_tls(e),
            _ if is_sasl(e) => self.handle_sasl(e),
            Some(ns::JABBER_CLIENT) if e.name == "iq" => self.handle_iq(e),
            _ => {
                debug!("Ignoring <{}/> during authentication", e.name);
                Vec::new()
            }
        }
    }

    /// The socket is encrypted now. The stream has to be reopened.
    pub fn tls_established(&mut self) -> Vec<Action> {
        info!("TLS established");
        self.session.ctx.encrypted = true;
        vec![Action::RestartStream]
    }

    /// The TLS handshake could not be completed.
    pub fn tls_failed(&mut self) -> Vec<Action> {
        self.fail(AuthError::TlsFailed)
    }

    /// The user's answer to [`Action::PromptPlaintext`]. `None` when no
    /// one could be asked.
    pub fn answer_plaintext(&mut self, answer: Option<bool>) -> Vec<Action> {
        let suspended = match self.suspended.take() {
            Some(suspended) => suspended,
            None => {
                warn!("Plaintext answer without a question");
                return Vec::new();
            }
        };
        let consent = Consent::from(answer);
        if let Err(e) = self.policy.decide(consent) {
            if let Suspended::Negotiation(pending) = suspended {
                pending.dispose();
            }
            return self.fail(e);
        }
        self.policy.apply(&mut self.config);
        self.session.ctx.plaintext_allowed = true;

        match suspended {
            Suspended::Negotiation(pending) => {
                match self.negotiator.resume(&self.session.ctx, pending, consent) {
                    Ok(mechanism) => self.begin(mechanism),
                    Err(e) => self.fail(e),
                }
            }
            Suspended::Mechanism => {
                let result = match self.session.mechanism {
                    Some(ref mut mechanism) => mechanism.resume_plaintext(&self.session.ctx),
                    None => Err(AuthError::malformed("no mechanism waiting for consent")),
                };
                self.step(result)
            }
        }
    }

    /// Gives up on this attempt. An exchange in progress is aborted.
    pub fn cancel(&mut self) -> Vec<Action> {
        if self.session.is_terminal() {
            return Vec::new();
        }
        let mut actions = Vec::new();
        let sasl_in_progress = match self.session.mechanism {
            Some(ref mechanism) => !mechanism.is_legacy(),
            None => false,
        };
        if self.session.state == State::Exchanging && sasl_in_progress {
            actions.push(Action::Send(Outgoing::Abort(AuthAbort)));
        }
        actions.extend(self.fail(AuthError::Cancelled));
        actions
    }

    fn handle_features(&mut self, features: &xml::Element) -> Vec<Action> {
        if self.session.state != State::Unauthenticated {
            debug!("Ignoring stream features during authentication");
            return Vec::new();
        }

        if !self.session.ctx.encrypted {
            if let Some(starttls) = features.get_child("starttls", Some(ns::FEATURE_TLS)) {
                if self.tls_available && self.config.use_tls {
                    return vec![Action::Send(Outgoing::StartTls(StartTls))];
                }
                if starttls.get_child("required", Some(ns::FEATURE_TLS)).is_some() {
                    return self.fail(AuthError::TlsRequired);
                }
            }
            if self.config.require_tls {
                return self.fail(AuthError::EncryptionUnavailable);
            }
        }

        let iq_auth = features.get_child("auth", Some(ns::FEATURE_IQ_AUTH)).is_some();
        let offer = match features.get_child("mechanisms", Some(ns::FEATURE_SASL)) {
            Some(list) => {
                let mut mechanisms = Vec::new();
                for mechanism in list.get_children("mechanism", Some(ns::FEATURE_SASL)) {
                    let name = mechanism.content_str().trim().to_string();
                    if is_mechanism_name(&name) {
                        mechanisms.push(name);
                    } else {
                        warn!("Ignoring invalid SASL mechanism name {:?}", name);
                    }
                }
                Offer::Sasl { mechanisms, iq_auth }
            }
            None => {
                warn!("No SASL mechanisms advertised, trying jabber:iq:auth");
                Offer::Legacy
            }
        };
        self.session.state = State::MechanismsAdvertised;
        self.negotiate(offer)
    }

    fn handle_stream_error(&mut self, e: &xml::Element) -> Vec<Action> {
        let mut condition = None;
        let mut text = None;
        for child in &e.children {
            if let xml::Xml::ElementNode(ref c) = *child {
                if c.ns.as_deref() != Some(ns::STREAM_ERRORS) {
                    continue;
                }
                if c.name == "text" {
                    text = Some(c.content_str());
                } else if condition.is_none() {
                    condition = Some(c.name.clone());
                }
            }
        }
        let condition = stream_condition_text(condition.as_deref().unwrap_or(""));
        let description = match text.filter(|t| !t.is_empty()) {
            Some(text) => format!("{}: {}", condition, text),
            None => condition.to_string(),
        };
        self.fail(AuthError::Stream(description))
    }

    fn handle_tls(&mut self, e: &xml::Element) -> Vec<Action> {
        match &e.name[..] {
            "proceed" if !self.session.ctx.encrypted => vec![Action::UpgradeTls],
            "failure" => self.fail(AuthError::TlsFailed),
            _ => {
                debug!("Ignoring unexpected <{}/> for STARTTLS", e.name);
                Vec::new()
            }
        }
    }

    fn handle_sasl(&mut self, e: &xml::Element) -> Vec<Action> {
        let exchanging = self.session.state == State::Exchanging
            && self.session.mechanism.as_ref().map_or(false, |m| !m.is_legacy());
        if !exchanging {
            return self.fail(AuthError::malformed(format!("unexpected SASL <{}/>", e.name)));
        }
        match &e.name[..] {
            "challenge" => {
                let data = match decode_payload(&e.content_str()) {
                    Ok(data) => data,
                    Err(err) => return self.fail(err),
                };
                let result = match self.session.mechanism {
                    Some(ref mut mechanism) => mechanism.handle_challenge(&self.session.ctx, &data),
                    None => Err(AuthError::malformed("challenge without a mechanism")),
                };
                self.step(result)
            }
            "success" => {
                let data = match decode_payload(&e.content_str()) {
                    Ok(data) => data,
                    Err(err) => return self.fail(err),
                };
                let result = match self.session.mechanism {
                    Some(ref mut mechanism) => mechanism.handle_success(&self.session.ctx, &data),
                    None => Err(AuthError::malformed("success without a mechanism")),
                };
                match result {
                    Ok(()) => {
                        self.finish();
                        vec![Action::RestartStream, Action::Authenticated]
                    }
                    Err(err) => self.fail(err),
                }
            }
            "failure" => {
                let err = match self.session.mechanism {
                    Some(ref mut mechanism) => mechanism.handle_failure(&self.session.ctx, e),
                    None => AuthError::malformed("failure without a mechanism"),
                };
                if let Some(actions) = self.retry_external(&err) {
                    return actions;
                }
                self.fail(err)
            }
            _ => {
                debug!("Ignoring SASL <{}/>", e.name);
                Vec::new()
            }
        }
    }

    fn handle_iq(&mut self, e: &xml::Element) -> Vec<Action> {
        let legacy = self.session.state == State::Exchanging
            && self.session.mechanism.as_ref().map_or(false, |m| m.is_legacy());
        if !legacy {
            debug!("Ignoring IQ during authentication");
            return Vec::new();
        }
        let iq: Iq = match Stanza::from_element(e.clone()) {
            Ok(iq) => iq,
            Err(_) => return Vec::new(),
        };
        let fields_reply = match iq.id() {
            Some(FIELDS_ID) => true,
            Some(CREDENTIALS_ID) => false,
            _ => {
                debug!("Ignoring unrelated IQ");
                return Vec::new();
            }
        };

        let ctx = &self.session.ctx;
        let mechanism = match self.session.mechanism {
            Some(ref mut mechanism) => mechanism,
            None => return Vec::new(),
        };
        match iq.stanza_type() {
            Some(IqType::Result) if fields_reply => {
                let result = match iq.query(ns::IQ_AUTH) {
                    Some(query) => mechanism.handle_challenge(ctx, query.to_string().as_bytes()),
                    None => Err(AuthError::malformed("jabber:iq:auth reply without a query")),
                };
                self.step(result)
            }
            // jabber:iq:auth has no stream restart.
            Some(IqType::Result) => match mechanism.handle_success(ctx, &[]) {
                Ok(()) => {
                    self.finish();
                    vec![Action::Authenticated]
                }
                Err(err) => self.fail(err),
            },
            Some(IqType::Error) => {
                let err = mechanism.handle_failure(ctx, e);
                self.fail(err)
            }
            _ => self.fail(AuthError::malformed("invalid jabber:iq:auth reply")),
        }
    }

    fn negotiate(&mut self, offer: Offer) -> Vec<Action> {
        self.session.state = State::Negotiating;
        if let Offer::Sasl { ref mechanisms, .. } = offer {
            self.session.advertised = mechanisms.clone();
        }
        match self.negotiator.negotiate(&self.session.ctx, &offer) {
            Ok(Negotiation::Selected(mechanism)) => self.begin(mechanism),
            Ok(Negotiation::NeedsConsent(pending)) => {
                self.suspended = Some(Suspended::Negotiation(pending));
                self.prompt()
            }
            Err(e) => self.fail(e),
        }
    }

    fn begin(&mut self, mut mechanism: Mechanism) -> Vec<Action> {
        info!("Authenticating with {}", mechanism.name());
        let result = mechanism.start(&self.session.ctx);
        self.session.mechanism = Some(mechanism);
        self.session.state = State::Exchanging;
        self.step(result)
    }

    fn step(&mut self, result: Result<Step, AuthError>) -> Vec<Action> {
        match result {
            Ok(Step::Send(outgoing)) => vec![Action::Send(outgoing)],
            Ok(Step::NeedsConsent) => {
                self.suspended = Some(Suspended::Mechanism);
                self.prompt()
            }
            Err(e) => self.fail(e),
        }
    }

    fn prompt(&self) -> Vec<Action> {
        let account = self.config.jid.clone();
        let message = policy::prompt(&account);
        info!("Asking whether {} may authenticate in the clear", account);
        vec![Action::PromptPlaintext { account, message }]
    }

    // The server turned down the mechanism the external engine picked.
    // Another offered mechanism may still work. Rejected credentials are
    // final.
    fn retry_external(&mut self, err: &AuthError) -> Option<Vec<Action>> {
        match *err {
            AuthError::Sasl {
                condition: SaslCondition::InvalidMechanism,
                ..
            }
            | AuthError::Sasl {
                condition: SaslCondition::MechanismTooWeak,
                ..
            }
            | AuthError::Sasl {
                condition: SaslCondition::EncryptionRequired,
                ..
            } => (),
            _ => return None,
        }
        if self.external_attempts >= MAX_EXTERNAL_RETRIES {
            return None;
        }
        let mut external = match self.session.mechanism.take() {
            Some(Mechanism::External(external)) => external,
            other => {
                self.session.mechanism = other;
                return None;
            }
        };
        if external.reject_current() {
            if let Ok(true) = external.negotiate(&self.session.ctx) {
                self.external_attempts += 1;
                warn!("{}, trying {}", err, external.mechanism().unwrap_or("another mechanism"));
                return Some(self.begin(Mechanism::External(external)));
            }
        }
        self.session.mechanism = Some(Mechanism::External(external));
        None
    }

    fn finish(&mut self) {
        if let Some(mechanism) = self.session.mechanism.take() {
            info!("Authenticated with {}", mechanism.name());
            mechanism.dispose();
        }
        self.session.state = State::Authenticated;
    }

    fn fail(&mut self, err: AuthError) -> Vec<Action> {
        error!("Authentication failed: {}", err);
        if let Some(mechanism) = self.session.mechanism.take() {
            mechanism.dispose();
        }
        if let Some(Suspended::Negotiation(pending)) = self.suspended.take() {
            pending.dispose();
        }
        self.session.state = State::Failed;
        let reconnect = err.allows_reconnect();
        vec![Action::Failed { error: err, reconnect }]
    }
}
