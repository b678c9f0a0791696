// rust-xmpp
// Copyright (c) 2014-2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::fmt;
use std::io;

use tracing::debug;

use crate::non_stanzas::Outgoing;

pub trait XmppSend {
    fn xmpp_send<W: io::Write>(&self, w: &mut W) -> io::Result<()>;
}

impl<T> XmppSend for T
where
    T: fmt::Display,
{
    fn xmpp_send<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        write!(w, "{}", self)
    }
}

/// Writes `data` and flushes. Only a summary is logged since the
/// payload may carry credentials.
pub fn send_outgoing<W: io::Write>(w: &mut W, data: &Outgoing) -> io::Result<()> {
    debug!("Out: {}", data.summary());
    data.xmpp_send(w)?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::non_stanzas::StartTls;

    #[test]
    fn writes_serialized_form() {
        let mut out = Vec::new();
        send_outgoing(&mut out, &Outgoing::StartTls(StartTls)).unwrap();
        assert_eq!(out, b"<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>");
    }
}
