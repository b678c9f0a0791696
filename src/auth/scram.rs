// rust-xmpp
// Copyright (c) 2014 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::mem;
use std::str;

use openssl::hash::MessageDigest;
use stringprep::saslprep;

use super::crypto::{random_printable, scram_client_proof, scram_hi, scram_server_signature};
use super::{AuthContext, Authenticator, Step};
use crate::codec::{decode_base64, encode_base64};
use crate::error::AuthError;
use crate::non_stanzas::Outgoing;

macro_rules! check (
    ($e:expr, $s:expr) => (match $e { Some(s) => s, None => return Err(AuthError::malformed($s)) })
);

// "n,," without channel binding, base64
const CHANNEL_BINDING: &str = "biws";

enum State {
    Initial,
    // cnonce, transcript so far
    WaitFirst(String, Vec<u8>),
    // expected ServerSignature
    WaitFinal(Vec<u8>),
    Verified,
    Finished
}

pub struct ScramAuth {
    cnonce: Option<String>,
    state: State
}

struct ServerFirst<'a> {
    nonce: &'a str,
    salt: Vec<u8>,
    iterations: u32,
}

fn parse_server_first(data: &str) -> Result<ServerFirst<'_>, AuthError> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations: Option<u32> = None;
    for sub in data.split(',') {
        if let Some(value) = sub.strip_prefix("r=") {
            nonce = Some(value);
        } else if let Some(value) = sub.strip_prefix("s=") {
            salt = Some(decode_base64(value)?);
        } else if let Some(value) = sub.strip_prefix("i=") {
            iterations = match value.parse().ok() {
                None => return Err(AuthError::malformed("SCRAM: Iteration count is not a number")),
                Some(0) => return Err(AuthError::malformed("SCRAM: Iteration count must be positive")),
                it => it,
            };
        } else if sub.starts_with("m=") {
            return Err(AuthError::malformed("SCRAM: Unsupported mandatory extension found"));
        } else if let Some(value) = sub.strip_prefix("e=") {
            return Err(AuthError::Refused(value.to_string()));
        }
    }

    let nonce = check!(nonce, "SCRAM: No nonce found");
    let salt = check!(salt, "SCRAM: No salt found");
    let iterations = check!(iterations, "SCRAM: No iteration count found");

    Ok(ServerFirst { nonce, salt, iterations })
}

/// RFC 5802 saslname: SASLprep, then `=` and `,` escaped.
fn saslname(name: &str) -> Result<String, AuthError> {
    let prepped = saslprep(name)
        .map_err(|_| AuthError::malformed("SCRAM: username is not valid under SASLprep"))?;
    Ok(prepped.replace('=', "=3D").replace(',', "=2C"))
}

impl ScramAuth {
    pub fn new() -> ScramAuth {
        ScramAuth {
            cnonce: None,
            state: State::Initial
        }
    }

    /// Uses `cnonce` instead of a random one, for reproducible exchanges.
    pub fn with_cnonce(cnonce: String) -> ScramAuth {
        ScramAuth {
            cnonce: Some(cnonce),
            state: State::Initial
        }
    }

    fn handle_server_first(&mut self, ctx: &AuthContext, data: &[u8]) -> Result<Step, AuthError> {
        let sha1 = MessageDigest::sha1();

        let data = check!(str::from_utf8(data).ok(), "SCRAM: Server sent non-UTF-8 data");
        let first = parse_server_first(data)?;

        let (cnonce, mut auth_message) = match mem::replace(&mut self.state, State::Finished) {
            State::WaitFirst(cnonce, transcript) => (cnonce, transcript),
            _ => return Err(AuthError::malformed("SCRAM: unexpected server-first-message")),
        };

        if !first.nonce.starts_with(cnonce.as_str()) || first.nonce.len() == cnonce.len() {
            return Err(AuthError::ServerNonceMismatch);
        }

        let mut result: Vec<u8> = Vec::new();
        // Add c=<base64(GS2Header+channelBindingData)>
        result.extend("c=".bytes());
        result.extend(CHANNEL_BINDING.bytes());
        // Add r=<nonce>
        result.extend(",r=".bytes());
        result.extend(first.nonce.bytes());

        // SaltedPassword := Hi(Normalize(password), salt, i)
        let passwd = saslprep(ctx.password()?)
            .map_err(|_| AuthError::malformed("SCRAM: password is not valid under SASLprep"))?;
        let salted_passwd = scram_hi(sha1, passwd.as_bytes(), &first.salt, first.iterations)?;

        /*
         * AuthMessage := client-first-message-bare + "," +
         *		  server-first-message + "," +
         *		  client-final-message-without-proof
         */
        auth_message.push(b',');
        auth_message.extend(data.bytes());
        auth_message.push(b',');
        auth_message.extend(result.iter().cloned());

        let client_proof = scram_client_proof(sha1, &salted_passwd, &auth_message)?;
        let server_signature = scram_server_signature(sha1, &salted_passwd, &auth_message)?;

        // Add p=<base64(ClientProof)>
        result.extend(",p=".bytes());
        result.extend(encode_base64(client_proof).bytes());

        self.state = State::WaitFinal(server_signature);

        Ok(Step::Send(Outgoing::response(result)))
    }

    fn handle_server_final(&mut self, data: &[u8]) -> Result<(), AuthError> {
        let data = check!(str::from_utf8(data).ok(), "SCRAM: Server sent non-UTF-8 data");
        if let Some(err) = data.strip_prefix("e=") {
            return Err(AuthError::Refused(err.to_string()));
        }
        let verifier = match data.strip_prefix("v=") {
            Some(v) => decode_base64(v)?,
            None => return Err(AuthError::malformed("SCRAM: Server didn't send a verifier")),
        };

        let server_signature = match mem::replace(&mut self.state, State::Finished) {
            State::WaitFinal(s) => s,
            _ => return Err(AuthError::malformed("SCRAM: unexpected server-final-message")),
        };
        if server_signature != verifier {
            return Err(AuthError::ServerSignatureMismatch);
        }

        self.state = State::Verified;
        Ok(())
    }
}

impl Default for ScramAuth {
    fn default() -> ScramAuth {
        ScramAuth::new()
    }
}

impl Authenticator for ScramAuth {
    fn name(&self) -> &str {
        "SCRAM-SHA-1"
    }

    fn start(&mut self, ctx: &AuthContext) -> Result<Step, AuthError> {
        ctx.password()?;
        let cnonce = match self.cnonce.take() {
            Some(cnonce) => cnonce,
            None => random_printable(64)?,
        };

        let client_first_message_bare =
            format!("n={},r={}", saslname(ctx.identity.localpart())?, cnonce);

        let mut ret = Vec::new();
        ret.extend("n,,".bytes());
        ret.extend(client_first_message_bare.bytes());

        self.state = State::WaitFirst(cnonce, client_first_message_bare.into_bytes());

        Ok(Step::Send(Outgoing::auth("SCRAM-SHA-1", Some(ret))))
    }

    fn handle_challenge(&mut self, ctx: &AuthContext, data: &[u8]) -> Result<Step, AuthError> {
        match self.state {
            State::WaitFirst(..) => self.handle_server_first(ctx, data),
            // Some servers send server-final as a challenge rather than
            // inside <success/>.
            State::WaitFinal(_) => {
                self.handle_server_final(data)?;
                Ok(Step::Send(Outgoing::response(Vec::new())))
            }
            _ => Err(AuthError::malformed("SCRAM: unexpected challenge")),
        }
    }

    fn handle_success(&mut self, _ctx: &AuthContext, data: &[u8]) -> Result<(), AuthError> {
        match self.state {
            State::WaitFinal(_) => self.handle_server_final(data)?,
            State::Verified if data.is_empty() => (),
            State::Verified => return Err(AuthError::malformed("SCRAM: second server-final-message")),
            _ => return Err(AuthError::malformed("SCRAM: success without a server signature")),
        }
        self.state = State::Finished;
        Ok(())
    }

    fn dispose(&mut self) {
        self.cnonce = None;
        self.state = State::Finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CNONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";
    const SERVER_FIRST: &[u8] = b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
    const CLIENT_FINAL: &str =
        "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts=";
    const SERVER_FINAL: &[u8] = b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ=";

    fn ctx() -> AuthContext {
        AuthContext::new("user@example.com".parse().unwrap(), Some("pencil".into()))
    }

    fn started() -> ScramAuth {
        let mut scram = ScramAuth::with_cnonce(CNONCE.into());
        match scram.start(&ctx()).unwrap() {
            Step::Send(Outgoing::Auth(auth)) => {
                assert_eq!(auth.mechanism, "SCRAM-SHA-1");
                assert_eq!(auth.data.unwrap(), b"n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL".to_vec());
            }
            other => panic!("unexpected step {:?}", other),
        }
        scram
    }

    fn response(step: Step) -> Vec<u8> {
        match step {
            Step::Send(Outgoing::Response(r)) => r.data,
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn rfc5802_exchange() {
        let ctx = ctx();
        let mut scram = started();
        let reply = response(scram.handle_challenge(&ctx, SERVER_FIRST).unwrap());
        assert_eq!(str::from_utf8(&reply).unwrap(), CLIENT_FINAL);
        assert!(scram.handle_success(&ctx, SERVER_FINAL).is_ok());
    }

    #[test]
    fn server_final_as_challenge() {
        let ctx = ctx();
        let mut scram = started();
        scram.handle_challenge(&ctx, SERVER_FIRST).unwrap();
        assert!(response(scram.handle_challenge(&ctx, SERVER_FINAL).unwrap()).is_empty());
        assert!(scram.handle_success(&ctx, b"").is_ok());
    }

    #[test]
    fn flipped_signature() {
        let ctx = ctx();
        let mut signature = decode_base64("rmF9pqV8S7suAoZWja4dJRkFsKQ=").unwrap();
        signature[7] ^= 0x01;
        let tampered = format!("v={}", encode_base64(signature));

        let mut scram = started();
        scram.handle_challenge(&ctx, SERVER_FIRST).unwrap();
        assert!(matches!(
            scram.handle_success(&ctx, tampered.as_bytes()),
            Err(AuthError::ServerSignatureMismatch)
        ));
    }

    #[test]
    fn success_without_signature() {
        let ctx = ctx();
        let mut scram = started();
        scram.handle_challenge(&ctx, SERVER_FIRST).unwrap();
        assert!(scram.handle_success(&ctx, b"").is_err());
    }

    #[test]
    fn foreign_nonce() {
        let mut scram = started();
        assert!(matches!(
            scram.handle_challenge(&ctx(), b"r=somebodyelse,s=QSXCR+Q6sek8bf92,i=4096"),
            Err(AuthError::ServerNonceMismatch)
        ));
    }

    #[test]
    fn bad_server_first() {
        let cases: [&[u8]; 5] = [
            b"r=fyko+d2lbbFgONRv9qkxdawLabc,s=QSXCR+Q6sek8bf92",
            b"r=fyko+d2lbbFgONRv9qkxdawLabc,i=4096",
            b"r=fyko+d2lbbFgONRv9qkxdawLabc,s=QSXCR+Q6sek8bf92,i=0",
            b"r=fyko+d2lbbFgONRv9qkxdawLabc,s=QSXCR+Q6sek8bf92,i=many",
            b"m=ext,r=fyko+d2lbbFgONRv9qkxdawLabc,s=QSXCR+Q6sek8bf92,i=4096",
        ];
        for case in cases.iter() {
            let mut scram = started();
            assert!(matches!(
                scram.handle_challenge(&ctx(), case),
                Err(AuthError::Malformed(_))
            ));
        }
    }

    #[test]
    fn server_error() {
        let mut scram = started();
        assert!(matches!(
            scram.handle_challenge(&ctx(), b"e=unknown-user"),
            Err(AuthError::Refused(ref e)) if e == "unknown-user"
        ));
    }

    #[test]
    fn username_escaping() {
        assert_eq!(saslname("a=b,c").unwrap(), "a=3Db=2Cc");
    }

    #[test]
    fn random_nonce() {
        let mut scram = ScramAuth::new();
        let first = match scram.start(&ctx()).unwrap() {
            Step::Send(Outgoing::Auth(auth)) => String::from_utf8(auth.data.unwrap()).unwrap(),
            other => panic!("unexpected step {:?}", other),
        };
        let nonce = first.strip_prefix("n,,n=user,r=").unwrap();
        assert_eq!(nonce.len(), 64);
        assert!(!nonce.contains(','));
    }
}
