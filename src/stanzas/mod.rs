// rust-xmpp
// Copyright (c) 2014-2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use xml;

use crate::ns;

pub use self::iq::Iq;
pub use self::iq::IqType;

/// Parses a single element out of a string, the same way the stream
/// driver builds stanzas.
pub fn parse_element(s: &str) -> Option<xml::Element> {
    let mut parser = xml::Parser::new();
    let mut builder = xml::ElementBuilder::new();
    parser.feed_str(s);
    for event in parser {
        match builder.handle_event(event) {
            Some(Ok(e)) => return Some(e),
            Some(Err(_)) => return None,
            None => (),
        }
    }
    None
}

/// First child element called `name`, in whatever namespace the server
/// chose to put it.
pub fn child_named<'a>(e: &'a xml::Element, name: &str) -> Option<&'a xml::Element> {
    e.children.iter().find_map(|child| match *child {
        xml::Xml::ElementNode(ref c) if c.name == name => Some(c),
        _ => None,
    })
}

/// The `<error/>` child of a stanza, legacy `code` attribute included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StanzaError {
    pub code: Option<String>,
    pub condition: Option<String>,
    pub text: Option<String>,
}

impl StanzaError {
    pub(crate) fn from_element(error: &xml::Element) -> StanzaError {
        let mut condition = None;
        let mut text = None;
        for child in &error.children {
            if let xml::Xml::ElementNode(ref e) = *child {
                if e.ns.as_deref() != Some(ns::STANZA_ERRORS) {
                    continue;
                }
                if e.name == "text" {
                    text = Some(e.content_str());
                } else if condition.is_none() {
                    condition = Some(e.name.clone());
                }
            }
        }
        // Pre-RFC servers put a human readable message in the body.
        if text.is_none() && condition.is_none() {
            let body = error.content_str();
            if !body.trim().is_empty() {
                text = Some(body.trim().to_string());
            }
        }
        StanzaError {
            code: error.get_attribute("code", None).map(|c| c.to_string()),
            condition,
            text,
        }
    }

    pub fn describe(&self) -> String {
        let what = self
            .condition
            .as_deref()
            .or(self.code.as_deref())
            .unwrap_or("unknown error");
        match self.text {
            Some(ref text) => format!("{}: {}", what, text),
            None => what.to_string(),
        }
    }
}

pub trait StanzaType {
    fn attr_string(&self) -> Option<&'static str>;
}

pub trait Stanza {
    type Ty: StanzaType;

    fn from_element(e: xml::Element) -> Result<Self, xml::Element>
    where
        Self: Sized;
    fn as_element(&self) -> &xml::Element;
    fn into_inner(self) -> xml::Element;

    fn id(&self) -> Option<&str>;
    fn stanza_type(&self) -> Option<<Self as Stanza>::Ty>;
    fn error(&self) -> Option<StanzaError>;
}

macro_rules! impl_Stanza(
    ($name: expr, $kind: ident, $ty: ty, $ty_some: expr, $ty_none: expr) => (
        impl Stanza for $kind {
            type Ty = $ty;
            fn from_element(e: xml::Element) -> ::std::result::Result<$kind, xml::Element> {
                match e.ns {
                    Some(ref ns) if *ns == ns::JABBER_CLIENT
                                    || *ns == ns::JABBER_SERVER => (),
                    _ => return Err(e)
                }

                if e.name == $name {
                    Ok($kind { elem: e })
                } else {
                    Err(e)
                }
            }

            fn as_element(&self) -> &xml::Element {
                &self.elem
            }

            fn into_inner(self) -> xml::Element {
                self.elem
            }

            fn id(&self) -> Option<&str> {
                self.elem.get_attribute("id", None)
            }

            fn stanza_type(&self) -> Option<$ty> {
                match self.elem.get_attribute("type", None) {
                    Some(ty) => ($ty_some)(ty),
                    None => $ty_none
                }
            }

            fn error(&self) -> Option<$crate::stanzas::StanzaError> {
                $crate::stanzas::child_named(&self.elem, "error")
                    .map($crate::stanzas::StanzaError::from_element)
            }
        }

        impl ::std::ops::Deref for $kind {
            type Target = xml::Element;
            fn deref(&self) -> &xml::Element {
                &self.elem
            }
        }

        impl ::std::ops::DerefMut for $kind {
            fn deref_mut(&mut self) -> &mut xml::Element {
                &mut self.elem
            }
        }

        impl ::std::fmt::Display for $kind {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(&self.elem, f)
            }
        }
    );
);

// Has to be after impl_Stanza!
mod iq;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_error_code() {
        let iq = parse_element(
            "<iq xmlns='jabber:client' type='error' id='auth2'>\
             <error code='401' type='auth'>\
             <not-authorized xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
             </error></iq>",
        )
        .unwrap();
        let iq: Iq = Stanza::from_element(iq).ok().unwrap();
        assert_eq!(iq.stanza_type(), Some(IqType::Error));
        let error = iq.error().unwrap();
        assert_eq!(error.code.as_deref(), Some("401"));
        assert_eq!(error.condition.as_deref(), Some("not-authorized"));
        assert_eq!(error.describe(), "not-authorized");
    }

    #[test]
    fn old_style_error_body() {
        let iq = parse_element(
            "<iq xmlns='jabber:client' type='error' id='auth1'>\
             <error code='406'>Not Acceptable</error></iq>",
        )
        .unwrap();
        let iq: Iq = Stanza::from_element(iq).ok().unwrap();
        assert_eq!(iq.error().unwrap().describe(), "406: Not Acceptable");
    }

    #[test]
    fn foreign_namespace_is_not_a_stanza() {
        let e = parse_element("<iq xmlns='urn:example' type='get'/>").unwrap();
        assert!(<Iq as Stanza>::from_element(e).is_err());
    }
}
