// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::fmt;
use std::io;

use openssl::error::ErrorStack;
use thiserror::Error;
use xml;

use crate::config::ConfigError;
use crate::ns;

/// Defined conditions a server may put inside a SASL `<failure/>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaslCondition {
    Aborted,
    AccountDisabled,
    BadProtocol,
    CredentialsExpired,
    EncryptionRequired,
    IncorrectEncoding,
    InvalidAuthzid,
    InvalidMechanism,
    InvalidRealm,
    MalformedRequest,
    MechanismTooWeak,
    NotAuthorized,
    TemporaryAuthFailure,
    Other(String),
}

impl SaslCondition {
    pub fn from_name(name: &str) -> SaslCondition {
        match name {
            "aborted" => SaslCondition::Aborted,
            "account-disabled" => SaslCondition::AccountDisabled,
            "bad-protocol" => SaslCondition::BadProtocol,
            "credentials-expired" => SaslCondition::CredentialsExpired,
            "encryption-required" => SaslCondition::EncryptionRequired,
            "incorrect-encoding" => SaslCondition::IncorrectEncoding,
            "invalid-authzid" => SaslCondition::InvalidAuthzid,
            "invalid-mechanism" => SaslCondition::InvalidMechanism,
            "invalid-realm" => SaslCondition::InvalidRealm,
            "malformed-request" => SaslCondition::MalformedRequest,
            "mechanism-too-weak" => SaslCondition::MechanismTooWeak,
            "not-authorized" => SaslCondition::NotAuthorized,
            "temporary-auth-failure" => SaslCondition::TemporaryAuthFailure,
            other => SaslCondition::Other(other.to_string()),
        }
    }

    /// Reads the condition and optional `<text/>` out of a `<failure/>`.
    pub fn from_failure(failure: &xml::Element) -> (SaslCondition, Option<String>) {
        let mut condition = None;
        let mut text = None;
        for child in &failure.children {
            if let xml::Xml::ElementNode(ref e) = *child {
                if e.name == "text" {
                    text = Some(e.content_str());
                } else if condition.is_none() {
                    condition = Some(SaslCondition::from_name(&e.name));
                }
            }
        }
        let condition = condition.unwrap_or_else(|| SaslCondition::Other(String::new()));
        (condition, text.filter(|t| !t.is_empty()))
    }

    fn description(&self) -> &str {
        match *self {
            SaslCondition::Aborted => "Authorization Aborted",
            SaslCondition::AccountDisabled => "Account disabled",
            SaslCondition::BadProtocol => "Bad protocol",
            SaslCondition::CredentialsExpired => "Credentials expired",
            SaslCondition::EncryptionRequired => "Encryption required for authentication",
            SaslCondition::IncorrectEncoding => "Incorrect encoding in authorization",
            SaslCondition::InvalidAuthzid => "Invalid authzid",
            SaslCondition::InvalidMechanism => "Invalid Authorization Mechanism",
            SaslCondition::InvalidRealm => "Invalid realm",
            SaslCondition::MalformedRequest => "Malformed authentication request",
            SaslCondition::MechanismTooWeak => "Authorization mechanism too weak",
            SaslCondition::NotAuthorized => "Not Authorized",
            SaslCondition::TemporaryAuthFailure => "Temporary Authentication Failure",
            SaslCondition::Other(_) => "Authentication Failure",
        }
    }
}

impl fmt::Display for SaslCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Human readable text for a stream error condition.
pub fn stream_condition_text(condition: &str) -> &'static str {
    match condition {
        "bad-format" => "Bad Format",
        "bad-namespace-prefix" => "Bad Namespace Prefix",
        "conflict" => "Resource Conflict",
        "connection-timeout" => "Connection Timeout",
        "host-gone" => "Host Gone",
        "host-unknown" => "Host Unknown",
        "improper-addressing" => "Improper Addressing",
        "internal-server-error" => "Internal Server Error",
        "invalid-id" => "Invalid ID",
        "invalid-namespace" => "Invalid Namespace",
        "invalid-xml" => "Invalid XML",
        "nonmatching-hosts" => "Non-matching Hosts",
        "not-authorized" => "Not Authorized",
        "policy-violation" => "Policy Violation",
        "remote-connection-failed" => "Remote Connection Failed",
        "resource-constraint" => "Resource Constraint",
        "restricted-xml" => "Restricted XML",
        "see-other-host" => "See Other Host",
        "system-shutdown" => "System Shutdown",
        "undefined-condition" => "Undefined Condition",
        "unsupported-encoding" => "Unsupported Encoding",
        "unsupported-stanza-type" => "Unsupported Stanza Type",
        "unsupported-version" => "Unsupported Version",
        "xml-not-well-formed" => "XML Not Well Formed",
        _ => "Stream Error",
    }
}

/// Coarse classification of an [`AuthError`], used for reconnect policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ProtocolMalformed,
    NegotiationImpossible,
    CryptoMismatch,
    SaslFailure,
    LocalFailure,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid response from server: {0}")]
    Malformed(String),
    #[error("Invalid response from server: malformed base64 payload")]
    MalformedPayload,
    #[error("Password is required to sign on")]
    NoCredentials,
    #[error("Server does not use any supported authentication method")]
    NoCommonMechanism,
    #[error("Server requires plaintext authentication over an unencrypted stream")]
    PlaintextRefused,
    #[error("Server requires TLS/SSL for login. No TLS/SSL support found")]
    TlsRequired,
    #[error("You require encryption, but it is not available on this server")]
    EncryptionUnavailable,
    #[error("TLS negotiation failed")]
    TlsFailed,
    #[error("Invalid challenge from server: rspauth mismatch")]
    ServerAuthMismatch,
    #[error("Server sent an invalid SCRAM verifier")]
    ServerSignatureMismatch,
    #[error("Server replied with an invalid SCRAM nonce")]
    ServerNonceMismatch,
    #[error("Not Authorized")]
    LegacyUnauthorized,
    #[error("Authentication refused: {0}")]
    Refused(String),
    #[error("{}", sasl_message(.condition, .text))]
    Sasl {
        condition: SaslCondition,
        text: Option<String>,
    },
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("SASL error: {0}")]
    External(String),
    #[error("Cryptographic library failure: {0}")]
    Crypto(#[from] ErrorStack),
    #[error("Authentication cancelled")]
    Cancelled,
}

fn sasl_message(condition: &SaslCondition, text: &Option<String>) -> String {
    match *text {
        Some(ref text) => format!("{}: {}", condition, text),
        None => condition.to_string(),
    }
}

impl AuthError {
    pub fn malformed<S: Into<String>>(what: S) -> AuthError {
        AuthError::Malformed(what.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match *self {
            AuthError::Malformed(_) | AuthError::MalformedPayload | AuthError::Stream(_) => {
                ErrorKind::ProtocolMalformed
            }
            AuthError::NoCredentials
            | AuthError::NoCommonMechanism
            | AuthError::PlaintextRefused
            | AuthError::TlsRequired
            | AuthError::EncryptionUnavailable
            | AuthError::Cancelled => ErrorKind::NegotiationImpossible,
            AuthError::ServerAuthMismatch
            | AuthError::ServerSignatureMismatch
            | AuthError::ServerNonceMismatch
            | AuthError::LegacyUnauthorized => ErrorKind::CryptoMismatch,
            AuthError::Sasl { .. } | AuthError::Refused(_) => ErrorKind::SaslFailure,
            AuthError::TlsFailed | AuthError::External(_) | AuthError::Crypto(_) => {
                ErrorKind::LocalFailure
            }
        }
    }

    /// Whether the host may schedule another connection attempt.
    pub fn allows_reconnect(&self) -> bool {
        match *self {
            AuthError::Sasl {
                condition: SaslCondition::TemporaryAuthFailure,
                ..
            } => true,
            _ => self.kind() == ErrorKind::LocalFailure,
        }
    }
}

/// Errors surfaced by [`XmppStream`](crate::XmppStream).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("XML error: {0}")]
    Xml(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<xml::BuilderError> for Error {
    fn from(e: xml::BuilderError) -> Error {
        Error::Xml(e.to_string())
    }
}

pub(crate) fn is_sasl(e: &xml::Element) -> bool {
    e.ns.as_deref() == Some(ns::FEATURE_SASL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanzas::parse_element;

    #[test]
    fn failure_condition_and_text() {
        let failure = parse_element(
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <not-authorized/><text>Bad password</text></failure>",
        )
        .unwrap();
        let (cond, text) = SaslCondition::from_failure(&failure);
        assert_eq!(cond, SaslCondition::NotAuthorized);
        assert_eq!(text.as_deref(), Some("Bad password"));
    }

    #[test]
    fn only_temporary_failure_reconnects() {
        let temporary = AuthError::Sasl {
            condition: SaslCondition::TemporaryAuthFailure,
            text: None,
        };
        let denied = AuthError::Sasl {
            condition: SaslCondition::NotAuthorized,
            text: None,
        };
        assert!(temporary.allows_reconnect());
        assert!(!denied.allows_reconnect());
        assert!(!AuthError::LegacyUnauthorized.allows_reconnect());
        assert!(!AuthError::ServerSignatureMismatch.allows_reconnect());
        assert!(AuthError::External("gone".into()).allows_reconnect());
    }

    #[test]
    fn stream_conditions() {
        assert_eq!(stream_condition_text("system-shutdown"), "System Shutdown");
        assert_eq!(stream_condition_text("conflict"), "Resource Conflict");
        assert_eq!(stream_condition_text("made-up"), "Stream Error");
    }

    #[test]
    fn conditions_have_distinct_messages() {
        let names = [
            "not-authorized",
            "invalid-mechanism",
            "mechanism-too-weak",
            "encryption-required",
            "invalid-realm",
            "temporary-auth-failure",
            "bad-protocol",
            "invalid-authzid",
        ];
        let mut messages: Vec<String> = names
            .iter()
            .map(|n| SaslCondition::from_name(n).to_string())
            .collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), names.len());
    }
}
