// rust-xmpp
// Copyright (c) 2014-2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

//! Client-side XMPP authentication: STARTTLS, SASL (PLAIN, DIGEST-MD5,
//! SCRAM-SHA-1 or an external engine) and jabber:iq:auth for old servers.
//!
//! [`session::Controller`] is the sans-I/O core. [`XmppStream`] drives it
//! over a TCP connection.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::TcpStream;

use tracing::{debug, info, warn};

use crate::non_stanzas::{StreamEnd, StreamStart};
use crate::read_str::ReadString;
use crate::session::{Action, Controller};
use crate::xmpp_send::{send_outgoing, XmppSend};
use crate::xmpp_socket::XmppSocket;

pub use crate::config::{AccountConfig, ConfigError};
pub use crate::error::{AuthError, Error, ErrorKind, SaslCondition};
pub use crate::jid::{Jid, JidError};

pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod jid;
pub mod negotiator;
pub mod non_stanzas;
pub mod ns;
pub mod policy;
pub mod session;
pub mod stanzas;
mod read_str;
mod xmpp_send;
mod xmpp_socket;

const CLIENT_PORT: u16 = 5222;

/// What [`XmppStream::handle`] stopped for.
#[derive(Debug)]
pub enum Event {
    Authenticated,
    /// Answer with [`XmppStream::answer_plaintext`].
    PlaintextConsentRequired(String),
    Failed { error: AuthError, reconnect: bool },
    StreamClosed,
}

struct XmppHandler {
    domain: String,
    socket: XmppSocket,
    controller: Controller,
    events: VecDeque<Event>,
}

pub struct XmppStream {
    parser: xml::Parser,
    builder: xml::ElementBuilder,
    handler: XmppHandler,
}

impl XmppStream {
    pub fn new(config: AccountConfig) -> Result<XmppStream, Error> {
        let domain = config.identity()?.domain().to_string();
        let controller = Controller::new(config)?.with_tls(true);
        Ok(XmppStream::with_controller(domain, controller))
    }

    /// Uses a preconfigured controller, e.g. one with an external SASL
    /// engine attached.
    pub fn with_controller(domain: String, controller: Controller) -> XmppStream {
        XmppStream {
            parser: xml::Parser::new(),
            builder: xml::ElementBuilder::new(),
            handler: XmppHandler {
                domain,
                socket: XmppSocket::NoSock,
                controller,
                events: VecDeque::new(),
            },
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.handler.controller
    }

    pub fn connect(&mut self) -> Result<(), Error> {
        let stream = {
            let address = &self.handler.domain[..];
            TcpStream::connect((address, CLIENT_PORT))?
        };
        info!("Connected to {}", self.handler.domain);

        self.handler.socket = XmppSocket::Tcp(BufReader::new(stream));
        self.handler.start_stream()
    }

    /// Processes input until something needs the caller's attention.
    pub fn handle(&mut self) -> Result<Event, Error> {
        loop {
            if let Some(event) = self.handler.events.pop_front() {
                return Ok(event);
            }

            let string = self.handler.socket.read_str()?;
            if string.is_empty() {
                info!("Connection closed by server");
                return Ok(Event::StreamClosed);
            }

            let mut actions = Vec::new();
            let builder = &mut self.builder;
            let handler = &mut self.handler;
            self.parser.feed_str(&string);
            for event in &mut self.parser {
                match event {
                    Ok(xml::Event::ElementStart(xml::StartTag {
                        ref name,
                        ns: Some(ref ns),
                        ref prefix,
                        ref attributes,
                    })) if *name == "stream" && *ns == ns::STREAMS => {
                        debug!("In: Stream start");
                        *builder = xml::ElementBuilder::new();
                        match *prefix {
                            Some(ref prefix) => {
                                builder.set_default_ns(ns::JABBER_CLIENT.to_string());
                                builder.define_prefix(prefix.clone(), ns::STREAMS.to_string());
                            }
                            None => builder.set_default_ns(ns::STREAMS.to_string()),
                        }
                        let id = attributes.get(&("id".to_string(), None));
                        let version = attributes.get(&("version".to_string(), None));
                        actions.extend(
                            handler
                                .controller
                                .handle_stream_start(id.map(|s| &s[..]), version.map(|s| &s[..])),
                        );
                    }
                    Ok(xml::Event::ElementEnd(xml::EndTag {
                        ref name,
                        ns: Some(ref ns),
                        ..
                    })) if *name == "stream" && *ns == ns::STREAMS => {
                        debug!("In: Stream end");
                        handler.close_stream()?;
                        handler.events.push_back(Event::StreamClosed);
                    }
                    event => match builder.handle_event(event) {
                        Some(Ok(e)) => {
                            debug!("In: {}", e);
                            actions.extend(handler.controller.handle_element(&e));
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => (),
                    },
                }
            }

            if self.handler.perform(actions)? {
                self.parser = xml::Parser::new();
                self.builder = xml::ElementBuilder::new();
            }
        }
    }

    /// Continues after [`Event::PlaintextConsentRequired`]. `None` when
    /// nobody could be asked.
    pub fn answer_plaintext(&mut self, answer: Option<bool>) -> Result<(), Error> {
        let actions = self.handler.controller.answer_plaintext(answer);
        self.handler.perform(actions)?;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), Error> {
        let actions = self.handler.controller.cancel();
        self.handler.perform(actions)?;
        Ok(())
    }
}

impl XmppHandler {
    fn start_stream(&mut self) -> Result<(), Error> {
        let stream_start = StreamStart { to: &self.domain };
        debug!("Out: {}", stream_start);
        stream_start.xmpp_send(&mut self.socket)?;
        self.socket.flush()?;
        Ok(())
    }

    fn close_stream(&mut self) -> Result<(), Error> {
        debug!("Out: {}", StreamEnd);
        StreamEnd.xmpp_send(&mut self.socket)?;
        self.socket.flush()?;
        Ok(())
    }

    /// Carries out the controller's actions. Returns whether a new stream
    /// was opened, in which case the parser has to start over.
    fn perform(&mut self, actions: Vec<Action>) -> Result<bool, Error> {
        let mut queue: VecDeque<Action> = actions.into();
        let mut restarted = false;
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(data) => send_outgoing(&mut self.socket, &data)?,
                Action::UpgradeTls => match self.socket.starttls(&self.domain) {
                    Ok(()) => queue.extend(self.controller.tls_established()),
                    Err(e) => {
                        warn!("TLS handshake failed: {}", e);
                        queue.extend(self.controller.tls_failed());
                    }
                },
                Action::PromptPlaintext { message, .. } => {
                    self.events.push_back(Event::PlaintextConsentRequired(message));
                }
                Action::RestartStream => {
                    restarted = true;
                    self.start_stream()?;
                }
                Action::Authenticated => self.events.push_back(Event::Authenticated),
                Action::Failed { error, reconnect } => {
                    if let Err(e) = self.close_stream() {
                        debug!("Could not close stream: {}", e);
                    }
                    self.events.push_back(Event::Failed { error, reconnect });
                }
            }
        }
        Ok(restarted)
    }
}
