// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

//! Whether credentials may cross an unencrypted stream.

use crate::config::AccountConfig;
use crate::error::AuthError;

/// The user's answer to the plaintext question.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Consent {
    Allow,
    Deny,
    /// Nobody is around to ask.
    Unavailable,
}

impl From<Option<bool>> for Consent {
    fn from(answer: Option<bool>) -> Consent {
        match answer {
            Some(true) => Consent::Allow,
            Some(false) => Consent::Deny,
            None => Consent::Unavailable,
        }
    }
}

/// The question put to the user for `account`.
pub fn prompt(account: &str) -> String {
    format!(
        "{} requires plaintext authentication over an unencrypted connection.  \
         Allow this and continue authentication?",
        account
    )
}

#[derive(Clone, Debug, Default)]
pub struct PlaintextPolicy {
    remembered: bool,
}

impl PlaintextPolicy {
    pub fn new(remembered: bool) -> PlaintextPolicy {
        PlaintextPolicy { remembered }
    }

    pub fn from_config(config: &AccountConfig) -> PlaintextPolicy {
        PlaintextPolicy::new(config.auth_plain_in_clear)
    }

    pub fn remembered(&self) -> bool {
        self.remembered
    }

    pub fn permits(&self, encrypted: bool) -> bool {
        encrypted || self.remembered
    }

    /// Records the answer. Only a yes is remembered.
    pub fn decide(&mut self, consent: Consent) -> Result<(), AuthError> {
        match consent {
            Consent::Allow => {
                self.remembered = true;
                Ok(())
            }
            Consent::Deny | Consent::Unavailable => Err(AuthError::PlaintextRefused),
        }
    }

    /// Persists a remembered yes into the account settings.
    pub fn apply(&self, config: &mut AccountConfig) {
        if self.remembered {
            config.auth_plain_in_clear = true;
        }
    }
}
