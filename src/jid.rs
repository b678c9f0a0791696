// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const MAX_PART_LEN: usize = 1023;
const LOCALPART_FORBIDDEN: &[char] = &['"', '&', '\'', '/', ':', '<', '>', '@'];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JidError {
    #[error("JID has no domain")]
    NoDomain,
    #[error("JID {0} is empty")]
    EmptyPart(&'static str),
    #[error("JID {0} is longer than 1023 bytes")]
    TooLong(&'static str),
    #[error("JID {0} contains a forbidden character {1:?}")]
    Forbidden(&'static str, char),
    #[error("JID {0} failed stringprep: {1}")]
    Prep(&'static str, String),
}

/// An account address `localpart@domain/resource`, validated and
/// normalized on construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    pub fn new(node: Option<&str>, domain: &str, resource: Option<&str>) -> Result<Jid, JidError> {
        let node = match node {
            Some(node) => Some(prep_node(node)?),
            None => None,
        };
        let domain = prep_domain(domain)?;
        let resource = match resource {
            Some(resource) => Some(prep_resource(resource)?),
            None => None,
        };
        Ok(Jid {
            node,
            domain,
            resource,
        })
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The localpart, or the empty string for a domain-only JID.
    pub fn localpart(&self) -> &str {
        self.node().unwrap_or("")
    }

    pub fn with_resource(&self, resource: &str) -> Result<Jid, JidError> {
        Jid::new(self.node(), self.domain(), Some(resource))
    }

    pub fn bare(&self) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Re-runs validation and normalization. Idempotent on anything
    /// this type holds.
    pub fn normalize(&self) -> Result<Jid, JidError> {
        Jid::new(self.node(), self.domain(), self.resource())
    }
}

fn check_part(part: &str, what: &'static str) -> Result<(), JidError> {
    if part.is_empty() {
        return Err(JidError::EmptyPart(what));
    }
    if part.len() > MAX_PART_LEN {
        return Err(JidError::TooLong(what));
    }
    if let Some(c) = part.chars().find(|c| c.is_control()) {
        return Err(JidError::Forbidden(what, c));
    }
    Ok(())
}

fn prep_node(node: &str) -> Result<String, JidError> {
    check_part(node, "localpart")?;
    if let Some(c) = node
        .chars()
        .find(|c| LOCALPART_FORBIDDEN.contains(c) || c.is_whitespace())
    {
        return Err(JidError::Forbidden("localpart", c));
    }
    let prepped = stringprep::nodeprep(node)
        .map_err(|e| JidError::Prep("localpart", e.to_string()))?
        .into_owned();
    check_part(&prepped, "localpart")?;
    Ok(prepped)
}

fn prep_domain(domain: &str) -> Result<String, JidError> {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() {
        return Err(JidError::NoDomain);
    }
    check_part(domain, "domain")?;
    let prepped = stringprep::nameprep(domain)
        .map_err(|e| JidError::Prep("domain", e.to_string()))?
        .into_owned();
    check_part(&prepped, "domain")?;
    Ok(prepped)
}

fn prep_resource(resource: &str) -> Result<String, JidError> {
    check_part(resource, "resource")?;
    let prepped = stringprep::resourceprep(resource)
        .map_err(|e| JidError::Prep("resource", e.to_string()))?
        .into_owned();
    check_part(&prepped, "resource")?;
    Ok(prepped)
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Jid, JidError> {
        let (bare, resource) = match s.find('/') {
            Some(pos) => (&s[..pos], Some(&s[pos + 1..])),
            None => (s, None),
        };
        let (node, domain) = match bare.find('@') {
            Some(pos) => (Some(&bare[..pos]), &bare[pos + 1..]),
            None => (None, bare),
        };
        Jid::new(node, domain, resource)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref node) = self.node {
            write!(f, "{}@", node)?;
        }
        f.write_str(&self.domain)?;
        if let Some(ref resource) = self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_full() {
        let jid: Jid = "Juliet@Capulet.Example/Balcony/2".parse().unwrap();
        assert_eq!(jid.node(), Some("juliet"));
        assert_eq!(jid.domain(), "capulet.example");
        assert_eq!(jid.resource(), Some("Balcony/2"));
        assert_eq!(jid.to_string(), "juliet@capulet.example/Balcony/2");
    }

    #[test]
    fn domain_only() {
        let jid: Jid = "example.org.".parse().unwrap();
        assert_eq!(jid.node(), None);
        assert_eq!(jid.localpart(), "");
        assert_eq!(jid.domain(), "example.org");
    }

    #[test]
    fn rejects_bad_parts() {
        assert_eq!("@example.org".parse::<Jid>(), Err(JidError::EmptyPart("localpart")));
        assert_eq!("juliet@".parse::<Jid>(), Err(JidError::NoDomain));
        assert_eq!("ju:liet@example.org".parse::<Jid>(), Err(JidError::Forbidden("localpart", ':')));
        assert_eq!("ju liet@example.org".parse::<Jid>(), Err(JidError::Forbidden("localpart", ' ')));
        assert_eq!(
            "juliet@example.org/\u{7}".parse::<Jid>(),
            Err(JidError::Forbidden("resource", '\u{7}'))
        );
        let long = "a".repeat(1024);
        assert_eq!(format!("{}@example.org", long).parse::<Jid>(), Err(JidError::TooLong("localpart")));
    }

    #[test]
    fn unicode_case_folding() {
        let jid: Jid = "ÉLISE@Example.org".parse().unwrap();
        assert_eq!(jid.node(), Some("élise"));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(
            node in "[a-zA-Z0-9._-]{1,16}",
            domain in "[a-zA-Z0-9-]{1,12}\\.[a-zA-Z]{2,6}",
            resource in "[ -~]{1,20}",
        ) {
            let jid = Jid::new(Some(&node), &domain, Some(&resource)).unwrap();
            let once = jid.normalize().unwrap();
            let twice = once.normalize().unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(&once, &jid);
        }
    }
}
