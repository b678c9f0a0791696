// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

//! Picks the mechanism for a session out of what the server offers.

use tracing::{info, warn};

use crate::auth::{AuthContext, ExternalAuth, ExternalSasl, LegacyAuth, Mechanism, MechanismKind};
use crate::error::AuthError;
use crate::policy::Consent;

/// What the server's stream features allow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Offer {
    Sasl {
        mechanisms: Vec<String>,
        /// `<auth xmlns='http://jabber.org/features/iq-auth'/>` was
        /// advertised too.
        iq_auth: bool,
    },
    /// A pre-1.0 stream, or features without SASL.
    Legacy,
}

/// The built-in mechanisms a session may use.
#[derive(Clone, Debug)]
pub struct MechanismRegistry {
    kinds: Vec<MechanismKind>,
}

impl MechanismRegistry {
    pub fn builtin() -> MechanismRegistry {
        MechanismRegistry {
            kinds: vec![MechanismKind::ScramSha1, MechanismKind::DigestMd5, MechanismKind::Plain],
        }
    }

    pub fn empty() -> MechanismRegistry {
        MechanismRegistry { kinds: Vec::new() }
    }

    pub fn with(mut self, kind: MechanismKind) -> MechanismRegistry {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    pub fn without(mut self, kind: MechanismKind) -> MechanismRegistry {
        self.kinds.retain(|k| *k != kind);
        self
    }

    /// The strongest registered mechanism among `offered`.
    pub fn select(&self, offered: &[String]) -> Option<MechanismKind> {
        self.kinds
            .iter()
            .cloned()
            .filter(|kind| offered.iter().any(|name| name == kind.name()))
            .max()
    }
}

impl Default for MechanismRegistry {
    fn default() -> MechanismRegistry {
        MechanismRegistry::builtin()
    }
}

/// A negotiation suspended on the plaintext question.
pub struct Pending {
    mechanism: Mechanism,
    iq_auth: bool,
}

impl Pending {
    pub fn mechanism_name(&self) -> &str {
        self.mechanism.name()
    }

    pub fn dispose(self) {
        self.mechanism.dispose();
    }
}

pub enum Negotiation {
    Selected(Mechanism),
    NeedsConsent(Pending),
}

pub struct Negotiator {
    registry: MechanismRegistry,
    external: Option<Box<dyn ExternalSasl>>,
}

impl Negotiator {
    pub fn new(registry: MechanismRegistry) -> Negotiator {
        Negotiator {
            registry,
            external: None,
        }
    }

    pub fn with_external(mut self, engine: Box<dyn ExternalSasl>) -> Negotiator {
        self.external = Some(engine);
        self
    }

    pub fn negotiate(&mut self, ctx: &AuthContext, offer: &Offer) -> Result<Negotiation, AuthError> {
        ctx.password()?;

        let (mechanisms, iq_auth) = match *offer {
            Offer::Legacy => {
                info!("Using jabber:iq:auth");
                return Ok(Negotiation::Selected(Mechanism::LegacyIq(LegacyAuth::new())));
            }
            Offer::Sasl {
                ref mechanisms,
                iq_auth,
            } => (mechanisms, iq_auth),
        };

        if let Some(kind) = self.registry.select(mechanisms) {
            info!("Selected SASL mechanism {}", kind.name());
            let mechanism = kind.instantiate();
            if kind == MechanismKind::Plain && !ctx.may_send_plaintext() {
                return Ok(Negotiation::NeedsConsent(Pending { mechanism, iq_auth }));
            }
            return Ok(Negotiation::Selected(mechanism));
        }

        if let Some(engine) = self.external.take() {
            let mut external = ExternalAuth::new(engine, mechanisms.clone());
            if external.negotiate(ctx)? {
                info!(
                    "Selected SASL mechanism {} via the SASL engine",
                    external.mechanism().unwrap_or("?")
                );
                return Ok(Negotiation::Selected(Mechanism::External(external)));
            }
            if !ctx.may_send_plaintext() {
                return Ok(Negotiation::NeedsConsent(Pending {
                    mechanism: Mechanism::External(external),
                    iq_auth,
                }));
            }
            self.external = Some(external.into_engine());
        }

        self.fallback(iq_auth)
    }

    /// Continues after the user answered. `ctx` must already reflect a
    /// yes.
    pub fn resume(
        &mut self,
        ctx: &AuthContext,
        pending: Pending,
        consent: Consent,
    ) -> Result<Mechanism, AuthError> {
        let Pending { mechanism, iq_auth } = pending;
        if consent != Consent::Allow || !ctx.may_send_plaintext() {
            mechanism.dispose();
            return Err(AuthError::PlaintextRefused);
        }
        match mechanism {
            Mechanism::External(mut external) => {
                if external.negotiate(ctx)? {
                    return Ok(Mechanism::External(external));
                }
                self.external = Some(external.into_engine());
                match self.fallback(iq_auth)? {
                    Negotiation::Selected(mechanism) => Ok(mechanism),
                    Negotiation::NeedsConsent(_) => Err(AuthError::NoCommonMechanism),
                }
            }
            mechanism => Ok(mechanism),
        }
    }

    fn fallback(&self, iq_auth: bool) -> Result<Negotiation, AuthError> {
        if iq_auth {
            warn!("No usable SASL mechanism, falling back to jabber:iq:auth");
            Ok(Negotiation::Selected(Mechanism::LegacyIq(LegacyAuth::new())))
        } else {
            Err(AuthError::NoCommonMechanism)
        }
    }
}

impl Default for Negotiator {
    fn default() -> Negotiator {
        Negotiator::new(MechanismRegistry::builtin())
    }
}
