//! Typed SIP messages
//!
//! Just enough of the SIP message model for the call-flow controllers: the
//! seven headers they build or copy, requests, responses and a parameter list
//! with typed lookup. Wire parsing and encoding belong to the transaction
//! layer; the `Display` impls here only render messages for logs.
//!
//! - [`Params`]: ordered `name[=value]` list with [`Params::get`]
//! - [`SipUri`], [`NameAddr`], [`Via`], [`CSeq`]: header values
//! - [`Header`] / [`HeaderName`]: the typed header set
//! - [`Request`] / [`Response`]: messages, with `short()` one-line forms
//! - [`builder`]: functions that assemble headers from an endpoint identity

pub mod builder;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Protocol name and version carried by every message
pub const SIP_VERSION: &str = "SIP/2.0";

/// Request methods
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    Info,
    Extension(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Info => "INFO",
            Method::Extension(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            "REGISTER" => Method::Register,
            "INFO" => Method::Info,
            other => Method::Extension(other.to_string()),
        })
    }
}

/// Ordered list of `;name[=value]` parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params(Vec<(String, Option<String>)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a parameter, builder style
    pub fn add(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, Some(value.into()));
        self
    }

    /// Set a parameter, replacing any existing one with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Look up a parameter by name (case-insensitive)
    ///
    /// `None` means the parameter is absent. A valueless flag parameter
    /// yields `Some("")`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.0 {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

/// `sip:user@host[:port][;params]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipUri {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
}

impl SipUri {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            host: host.into(),
            port: None,
            params: Params::new(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sip:")?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.params)
    }
}

/// Display name plus address, the value of To, From and Contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: SipUri,
    pub params: Params,
}

impl NameAddr {
    pub fn new(display_name: Option<String>, uri: SipUri) -> Self {
        Self { display_name, uri, params: Params::new() }
    }

    /// The `tag` parameter, if one is present and non-empty
    pub fn tag(&self) -> Option<&str> {
        self.params.get("tag").filter(|t| !t.is_empty())
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.params.insert("tag", Some(tag.into()));
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.is_empty()) {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>{}", self.uri, self.params)
    }
}

/// One Via hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    pub protocol_name: String,
    pub protocol_version: String,
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
}

impl Via {
    pub fn branch(&self) -> Option<&str> {
        self.params.get("branch").filter(|b| !b.is_empty())
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{} {}", self.protocol_name, self.protocol_version, self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

/// Names of the headers this crate understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    Via,
    To,
    From,
    Contact,
    CSeq,
    CallId,
    ContentLength,
}

impl HeaderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::To => "To",
            HeaderName::From => "From",
            HeaderName::Contact => "Contact",
            HeaderName::CSeq => "CSeq",
            HeaderName::CallId => "Call-ID",
            HeaderName::ContentLength => "Content-Length",
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Header {
    Via(Via),
    To(NameAddr),
    From(NameAddr),
    Contact(NameAddr),
    CSeq(CSeq),
    CallId(String),
    ContentLength(u32),
}

impl Header {
    pub fn name(&self) -> HeaderName {
        match self {
            Header::Via(_) => HeaderName::Via,
            Header::To(_) => HeaderName::To,
            Header::From(_) => HeaderName::From,
            Header::Contact(_) => HeaderName::Contact,
            Header::CSeq(_) => HeaderName::CSeq,
            Header::CallId(_) => HeaderName::CallId,
            Header::ContentLength(_) => HeaderName::ContentLength,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name())?;
        match self {
            Header::Via(v) => write!(f, "{}", v),
            Header::To(a) | Header::From(a) | Header::Contact(a) => write!(f, "{}", a),
            Header::CSeq(c) => write!(f, "{}", c),
            Header::CallId(id) => f.write_str(id),
            Header::ContentLength(len) => write!(f, "{}", len),
        }
    }
}

/// Ordered header list shared by requests and responses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// First header with the given name
    pub fn get(&self, name: HeaderName) -> Option<&Header> {
        self.0.iter().find(|h| h.name() == name)
    }

    pub fn get_mut(&mut self, name: HeaderName) -> Option<&mut Header> {
        self.0.iter_mut().find(|h| h.name() == name)
    }

    /// All headers with the given name, in order
    pub fn all(&self, name: HeaderName) -> impl Iterator<Item = &Header> + '_ {
        self.0.iter().filter(move |h| h.name() == name)
    }

    /// Append every `name` header of `source`, preserving order
    pub fn copy_from(&mut self, name: HeaderName, source: &Headers) {
        self.0.extend(source.all(name).cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> + '_ {
        self.0.iter()
    }

    pub fn via(&self) -> Option<&Via> {
        match self.get(HeaderName::Via) {
            Some(Header::Via(v)) => Some(v),
            _ => None,
        }
    }

    pub fn to_addr(&self) -> Option<&NameAddr> {
        match self.get(HeaderName::To) {
            Some(Header::To(a)) => Some(a),
            _ => None,
        }
    }

    pub fn from_addr(&self) -> Option<&NameAddr> {
        match self.get(HeaderName::From) {
            Some(Header::From(a)) => Some(a),
            _ => None,
        }
    }

    pub fn contact(&self) -> Option<&NameAddr> {
        match self.get(HeaderName::Contact) {
            Some(Header::Contact(a)) => Some(a),
            _ => None,
        }
    }

    pub fn cseq(&self) -> Option<&CSeq> {
        match self.get(HeaderName::CSeq) {
            Some(Header::CSeq(c)) => Some(c),
            _ => None,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self.get(HeaderName::CallId) {
            Some(Header::CallId(id)) => Some(id),
            _ => None,
        }
    }

    pub fn content_length(&self) -> Option<u32> {
        match self.get(HeaderName::ContentLength) {
            Some(Header::ContentLength(len)) => Some(*len),
            _ => None,
        }
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for header in &self.0 {
            write!(f, "{}\r\n", header)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: SipUri,
    pub version: String,
    pub headers: Headers,
    pub body: String,
}

impl Request {
    pub fn new(method: Method, uri: SipUri, headers: Headers) -> Self {
        Self {
            method,
            uri,
            version: SIP_VERSION.to_string(),
            headers,
            body: String::new(),
        }
    }

    /// Request line only, for logs
    pub fn short(&self) -> String {
        format!("{} {} {}", self.method, self.uri, self.version)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n{}\r\n{}", self.short(), self.headers, self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>, headers: Headers) -> Self {
        Self {
            version: SIP_VERSION.to_string(),
            status,
            reason: reason.into(),
            headers,
            body: String::new(),
        }
    }

    /// 1xx
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Status line only, for logs
    pub fn short(&self) -> String {
        format!("{} {} {}", self.version, self.status, self.reason)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n{}\r\n{}", self.short(), self.headers, self.body)
    }
}
