// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::fmt;

use crate::codec::encode_payload;
use crate::ns;
use crate::stanzas::Iq;

#[derive(Debug)]
pub struct StreamStart<'a> {
    pub to: &'a str,
}

impl<'a> fmt::Display for StreamStart<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<?xml version='1.0'?>\n\
             <stream:stream xmlns:stream='{}' xmlns='{}' version='1.0' to='{}'>",
            ns::STREAMS,
            ns::JABBER_CLIENT,
            self.to
        )
    }
}

#[derive(Debug)]
pub struct StreamEnd;

impl fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "</stream:stream>")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartTls;

impl fmt::Display for StartTls {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<starttls xmlns='{}'/>", ns::FEATURE_TLS)
    }
}

/// `<auth/>`. Without `data` the server is expected to challenge first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthStart {
    pub mechanism: String,
    pub data: Option<Vec<u8>>,
}

impl fmt::Display for AuthStart {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.data {
            Some(ref data) => write!(
                f,
                "<auth xmlns='{}' mechanism='{}'>{}</auth>",
                ns::FEATURE_SASL,
                self.mechanism,
                encode_payload(data)
            ),
            None => write!(f, "<auth xmlns='{}' mechanism='{}'/>", ns::FEATURE_SASL, self.mechanism),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthResponse {
    pub data: Vec<u8>,
}

impl fmt::Display for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<response xmlns='{}'>{}</response>",
            ns::FEATURE_SASL,
            encode_payload(&self.data)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthAbort;

impl fmt::Display for AuthAbort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<abort xmlns='{}'/>", ns::FEATURE_SASL)
    }
}

/// Everything the authentication engine asks the host to put on the wire.
#[derive(Clone)]
pub enum Outgoing {
    StartTls(StartTls),
    Auth(AuthStart),
    Response(AuthResponse),
    Abort(AuthAbort),
    Iq(Iq),
}

impl Outgoing {
    pub fn auth(mechanism: &str, data: Option<Vec<u8>>) -> Outgoing {
        Outgoing::Auth(AuthStart {
            mechanism: mechanism.to_string(),
            data,
        })
    }

    pub fn response(data: Vec<u8>) -> Outgoing {
        Outgoing::Response(AuthResponse { data })
    }

    /// A log-safe rendering. Payloads and IQ bodies may carry
    /// credentials and are left out.
    pub fn summary(&self) -> String {
        match *self {
            Outgoing::StartTls(ref s) => s.to_string(),
            Outgoing::Auth(ref a) => format!("<auth mechanism='{}'/>", a.mechanism),
            Outgoing::Response(ref r) => format!("<response/> ({} bytes)", r.data.len()),
            Outgoing::Abort(ref a) => a.to_string(),
            Outgoing::Iq(ref iq) => format!("<iq id='{}'/>", iq.get_attribute("id", None).unwrap_or("")),
        }
    }
}

impl fmt::Display for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Outgoing::StartTls(ref s) => fmt::Display::fmt(s, f),
            Outgoing::Auth(ref a) => fmt::Display::fmt(a, f),
            Outgoing::Response(ref r) => fmt::Display::fmt(r, f),
            Outgoing::Abort(ref a) => fmt::Display::fmt(a, f),
            Outgoing::Iq(ref iq) => fmt::Display::fmt(iq, f),
        }
    }
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
