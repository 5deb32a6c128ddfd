//! Header and message construction
//!
//! Pure functions over an [`EndpointIdentity`] and caller-supplied dialog
//! values. Nothing here generates identifiers or touches a dialog: the caller
//! picks the branch, tags and sequence number and advances its own counter.

use crate::config::EndpointIdentity;

use super::{
    CSeq, Header, HeaderName, Headers, Method, NameAddr, Params, Request, Response, SipUri, Via,
};

/// Via for a request sent by `endpoint`, carrying `branch`
pub fn via(endpoint: &EndpointIdentity, branch: &str) -> Header {
    Header::Via(Via {
        protocol_name: "SIP".to_string(),
        protocol_version: "2.0".to_string(),
        transport: endpoint.transport.to_string(),
        host: endpoint.host.clone(),
        port: Some(endpoint.port),
        params: Params::new().add("branch", branch),
    })
}

/// To header naming `endpoint`; an empty `tag` means "no tag yet"
pub fn to(endpoint: &EndpointIdentity, tag: &str) -> Header {
    Header::To(tagged_addr(endpoint, SipUri::new(&endpoint.user_name, &endpoint.host), tag))
}

/// From header naming `endpoint`; the URI carries its transport
pub fn from(endpoint: &EndpointIdentity, tag: &str) -> Header {
    let uri = SipUri::new(&endpoint.user_name, &endpoint.host)
        .with_params(Params::new().add("transport", endpoint.transport.as_str()));
    Header::From(tagged_addr(endpoint, uri, tag))
}

/// Contact for `endpoint`: display name and address, no parameters
pub fn contact(endpoint: &EndpointIdentity) -> Header {
    Header::Contact(NameAddr::new(
        Some(endpoint.display_name.clone()),
        SipUri::new(&endpoint.user_name, &endpoint.host),
    ))
}

pub fn cseq(seq: u32, method: Method) -> Header {
    Header::CSeq(CSeq { seq, method })
}

pub fn call_id(call_id: &str) -> Header {
    Header::CallId(call_id.to_string())
}

pub fn content_length(len: u32) -> Header {
    Header::ContentLength(len)
}

fn tagged_addr(endpoint: &EndpointIdentity, uri: SipUri, tag: &str) -> NameAddr {
    let mut addr = NameAddr::new(Some(endpoint.display_name.clone()), uri);
    if !tag.is_empty() {
        addr.set_tag(tag);
    }
    addr
}

/// Dialog values a request is built from
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub method: &'a Method,
    pub branch: &'a str,
    pub call_id: &'a str,
    pub local_tag: &'a str,
    pub remote_tag: &'a str,
    pub cseq: u32,
}

/// In-dialog request from `local` to `remote`
///
/// Headers in order: Via, To, From, Contact, CSeq, Call-ID, Content-Length.
/// The request-URI is `sip:<remote user>@<remote host>`.
pub fn request(local: &EndpointIdentity, remote: &EndpointIdentity, parts: RequestParts<'_>) -> Request {
    let headers: Headers = [
        via(local, parts.branch),
        to(remote, parts.remote_tag),
        from(local, parts.local_tag),
        contact(local),
        cseq(parts.cseq, parts.method.clone()),
        call_id(parts.call_id),
        content_length(0),
    ]
    .into_iter()
    .collect();

    Request::new(
        parts.method.clone(),
        SipUri::new(&remote.user_name, &remote.host),
        headers,
    )
}

/// Response that copies Via, From, To, Call-ID and CSeq verbatim from `request`
pub fn response_from_request(request: &Request, status: u16, reason: &str) -> Response {
    let mut headers = Headers::new();
    for name in [
        HeaderName::Via,
        HeaderName::From,
        HeaderName::To,
        HeaderName::CallId,
        HeaderName::CSeq,
    ] {
        headers.copy_from(name, &request.headers);
    }
    Response::new(status, reason, headers)
}

/// Automatic 200 OK from a server endpoint
///
/// Adds `local_tag` to the copied To header only when the request's To has
/// no tag, then appends this endpoint's Contact.
pub fn ok_response(request: &Request, local: &EndpointIdentity, local_tag: &str) -> Response {
    let mut response = response_from_request(request, 200, "OK");
    if let Some(Header::To(to)) = response.headers.get_mut(HeaderName::To) {
        if to.tag().is_none() && !local_tag.is_empty() {
            to.set_tag(local_tag);
        }
    }
    response.headers.push(contact(local));
    response
}

/// ACK for the final response to `invite`
///
/// Same request-URI, Via, From and Call-ID as the INVITE; To comes from the
/// response so it carries the remote tag; CSeq keeps the number with method
/// ACK.
pub fn ack_request(invite: &Request, response: &Response) -> Request {
    let mut headers = Headers::new();
    headers.copy_from(HeaderName::Via, &invite.headers);
    match response.headers.get(HeaderName::To) {
        Some(to) => headers.push(to.clone()),
        None => headers.copy_from(HeaderName::To, &invite.headers),
    }
    headers.copy_from(HeaderName::From, &invite.headers);
    headers.copy_from(HeaderName::CallId, &invite.headers);
    if let Some(seq) = invite.headers.cseq().map(|c| c.seq) {
        headers.push(cseq(seq, Method::Ack));
    }
    headers.push(content_length(0));

    Request::new(Method::Ack, invite.uri.clone(), headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportProtocol;

    fn alice() -> EndpointIdentity {
        EndpointIdentity::new("Alice Phone", "alice", "127.0.0.1", 5062)
    }

    fn bob() -> EndpointIdentity {
        let mut bob = EndpointIdentity::new("Bob Phone", "bob", "127.0.0.2", 5060);
        bob.transport = TransportProtocol::Tcp;
        bob
    }

    #[test]
    fn test_via_carries_branch_and_transport() {
        let Header::Via(via) = via(&bob(), "z9hG4bKAaBb") else {
            panic!("expected Via");
        };
        assert_eq!(via.branch(), Some("z9hG4bKAaBb"));
        assert_eq!(via.to_string(), "SIP/2.0/TCP 127.0.0.2:5060;branch=z9hG4bKAaBb");
    }

    #[test]
    fn test_empty_tag_is_omitted() {
        let Header::To(untagged) = to(&bob(), "") else { panic!("expected To") };
        assert!(!untagged.params.contains("tag"));

        let Header::To(tagged) = to(&bob(), "AbCd") else { panic!("expected To") };
        assert_eq!(tagged.tag(), Some("AbCd"));
    }

    #[test]
    fn test_from_uri_carries_transport() {
        let Header::From(from) = from(&alice(), "XyZw") else { panic!("expected From") };
        assert_eq!(from.uri.params.get("transport"), Some("UDP"));
        assert_eq!(from.tag(), Some("XyZw"));
    }

    #[test]
    fn test_contact_has_no_params() {
        let Header::Contact(contact) = contact(&alice()) else { panic!("expected Contact") };
        assert!(contact.params.is_empty());
        assert!(contact.uri.params.is_empty());
        assert_eq!(contact.to_string(), "\"Alice Phone\" <sip:alice@127.0.0.1>");
    }

    #[test]
    fn test_request_header_order_and_values() {
        let method = Method::Invite;
        let req = request(
            &alice(),
            &bob(),
            RequestParts {
                method: &method,
                branch: "z9hG4bKQqWw",
                call_id: "call-1",
                local_tag: "local",
                remote_tag: "",
                cseq: 3,
            },
        );

        let names: Vec<_> = req.headers.iter().map(|h| h.name()).collect();
        assert_eq!(
            names,
            vec![
                HeaderName::Via,
                HeaderName::To,
                HeaderName::From,
                HeaderName::Contact,
                HeaderName::CSeq,
                HeaderName::CallId,
                HeaderName::ContentLength,
            ]
        );
        assert_eq!(req.short(), "INVITE sip:bob@127.0.0.2 SIP/2.0");
        assert_eq!(req.headers.cseq(), Some(&CSeq { seq: 3, method: Method::Invite }));
        assert_eq!(req.headers.call_id(), Some("call-1"));
        assert_eq!(req.headers.to_addr().and_then(|t| t.tag()), None);
        assert_eq!(req.headers.from_addr().and_then(|f| f.tag()), Some("local"));
        assert_eq!(req.headers.content_length(), Some(0));
    }

    #[test]
    fn test_ok_response_copies_and_tags() {
        let method = Method::Invite;
        let req = request(
            &alice(),
            &bob(),
            RequestParts {
                method: &method,
                branch: "z9hG4bKQqWw",
                call_id: "call-1",
                local_tag: "alice-tag",
                remote_tag: "",
                cseq: 0,
            },
        );

        let resp = ok_response(&req, &bob(), "bob-tag");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers.via(), req.headers.via());
        assert_eq!(resp.headers.from_addr(), req.headers.from_addr());
        assert_eq!(resp.headers.call_id(), Some("call-1"));
        assert_eq!(resp.headers.cseq(), req.headers.cseq());
        assert_eq!(resp.headers.to_addr().and_then(|t| t.tag()), Some("bob-tag"));
        assert_eq!(
            resp.headers.contact().map(|c| c.uri.to_string()),
            Some("sip:bob@127.0.0.2".to_string())
        );
    }

    #[test]
    fn test_ok_response_keeps_existing_to_tag() {
        let method = Method::Bye;
        let req = request(
            &alice(),
            &bob(),
            RequestParts {
                method: &method,
                branch: "z9hG4bKQqWw",
                call_id: "call-1",
                local_tag: "alice-tag",
                remote_tag: "bob-tag",
                cseq: 1,
            },
        );

        let resp = ok_response(&req, &bob(), "other-tag");
        assert_eq!(resp.headers.to_addr(), req.headers.to_addr());
    }

    #[test]
    fn test_ack_takes_to_from_response() {
        let method = Method::Invite;
        let invite = request(
            &alice(),
            &bob(),
            RequestParts {
                method: &method,
                branch: "z9hG4bKQqWw",
                call_id: "call-9",
                local_tag: "alice-tag",
                remote_tag: "",
                cseq: 4,
            },
        );
        let ok = ok_response(&invite, &bob(), "bob-tag");

        let ack = ack_request(&invite, &ok);
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.uri, invite.uri);
        assert_eq!(ack.headers.cseq(), Some(&CSeq { seq: 4, method: Method::Ack }));
        assert_eq!(ack.headers.to_addr().and_then(|t| t.tag()), Some("bob-tag"));
        assert_eq!(ack.headers.call_id(), Some("call-9"));
    }
}
