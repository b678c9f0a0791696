// rust-xmpp
// Copyright (c) 2014-2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::io;
use std::io::{BufReader, Write};
use std::mem;
use std::net::TcpStream;

use openssl::ssl::{SslConnector, SslMethod, SslStream};

use crate::read_str::ReadString;

pub enum XmppSocket {
    Tcp(BufReader<TcpStream>),
    Tls(BufReader<SslStream<TcpStream>>),
    NoSock,
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "No socket yet")
}

impl XmppSocket {
    /// Runs the TLS handshake over the plain connection, verifying the
    /// certificate against `domain`.
    pub fn starttls(&mut self, domain: &str) -> io::Result<()> {
        let socket = mem::replace(self, XmppSocket::NoSock);
        let tcp = match socket {
            XmppSocket::Tcp(stream) => stream.into_inner(),
            other => {
                *self = other;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "No socket, or TLS already negotiated",
                ));
            }
        };
        let connector = SslConnector::builder(SslMethod::tls())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
            .build();
        let ssl = connector
            .connect(domain, tcp)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        *self = XmppSocket::Tls(BufReader::new(ssl));
        Ok(())
    }
}

impl Write for XmppSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            XmppSocket::Tcp(ref mut stream) => stream.get_mut().write(buf),
            XmppSocket::Tls(ref mut stream) => stream.get_mut().write(buf),
            XmppSocket::NoSock => Err(not_connected()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            XmppSocket::Tcp(ref mut stream) => stream.get_mut().flush(),
            XmppSocket::Tls(ref mut stream) => stream.get_mut().flush(),
            XmppSocket::NoSock => Err(not_connected()),
        }
    }
}

impl ReadString for XmppSocket {
    fn read_str(&mut self) -> io::Result<String> {
        match *self {
            XmppSocket::Tcp(ref mut stream) => stream.read_str(),
            XmppSocket::Tls(ref mut stream) => stream.read_str(),
            XmppSocket::NoSock => Err(not_connected()),
        }
    }
}
