// rust-xmpp
// Copyright (c) 2014-2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::env;
use std::io::{self, BufRead, Write};

use tracing_subscriber::EnvFilter;
use xmpp_auth::{AccountConfig, Event, XmppStream};

fn ask(question: &str) -> Option<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush().ok()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    Some(line.trim().eq_ignore_ascii_case("y"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = env::args().nth(1).unwrap_or_else(|| "account.toml".to_string());
    let config = match AccountConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };

    let mut stream = match XmppStream::new(config) {
        Ok(stream) => stream,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };
    if let Err(e) = stream.connect() {
        println!("{}", e);
        return;
    }

    loop {
        match stream.handle() {
            Ok(Event::PlaintextConsentRequired(question)) => {
                if let Err(e) = stream.answer_plaintext(ask(&question)) {
                    println!("{}", e);
                    return;
                }
            }
            Ok(Event::Authenticated) => {
                println!("Authenticated");
                let config = stream.controller().config();
                if config.auth_plain_in_clear {
                    if let Err(e) = config.save(&path) {
                        println!("{}", e);
                    }
                }
                return;
            }
            Ok(Event::Failed { error, reconnect }) => {
                println!("{} (reconnect: {})", error, reconnect);
                return;
            }
            Ok(Event::StreamClosed) => return,
            Err(e) => {
                println!("{}", e);
                return;
            }
        }
    }
}
