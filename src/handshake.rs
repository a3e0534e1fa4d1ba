//! Server side of the RFC 6455 opening handshake.

use http::header::{CONNECTION, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::config::AcceptorConfig;
use crate::request::Request;

/// What the acceptor agreed to during the handshake.
#[derive(Debug, PartialEq)]
pub(crate) struct Accepted {
    pub(crate) accept_key: String,
    pub(crate) protocol: Option<String>,
}

/// True when the request asks to switch to the `websocket` protocol.
pub(crate) fn is_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get_all(UPGRADE)
        .iter()
        .any(|v| has_token(v, "websocket"));
    let connection = headers
        .get_all(CONNECTION)
        .iter()
        .any(|v| has_token(v, "upgrade"));
    upgrade && connection
}

/// Validates an upgrade request and negotiates its sub-protocol.
///
/// `Err` carries the status to reject with: `400` for malformed handshakes,
/// `401` when client verification or protocol negotiation declines.
pub(crate) fn negotiate(req: &Request, config: &AcceptorConfig) -> Result<Accepted, StatusCode> {
    if req.method() != Method::GET {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.header(SEC_WEBSOCKET_VERSION.as_str()).map(str::trim) != Some("13") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let key = match req.headers().get(SEC_WEBSOCKET_KEY) {
        Some(key) if !key.is_empty() => key,
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    if let Some(verify) = config.client_verifier() {
        if !verify(req) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let offered = offered_protocols(req.headers());
    let protocol = if offered.is_empty() {
        None
    } else {
        match config.protocol_handler() {
            Some(choose) => Some(choose(&offered).ok_or(StatusCode::UNAUTHORIZED)?),
            None => offered.into_iter().next(),
        }
    };

    Ok(Accepted {
        accept_key: derive_accept_key(key.as_bytes()),
        protocol,
    })
}

/// Protocol names from every `Sec-WebSocket-Protocol` header, in offer order.
pub(crate) fn offered_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}

fn has_token(value: &HeaderValue, token: &str) -> bool {
    value
        .to_str()
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;

    use super::*;

    const BASE: [(&str, &str); 4] = [
        ("connection", "keep-alive, Upgrade"),
        ("upgrade", "websocket"),
        ("sec-websocket-version", "13"),
        ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
    ];

    fn request(method: Method, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/abc");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        Request::from_parts(parts, Bytes::new(), HashMap::new(), ([127, 0, 0, 1], 9).into())
    }

    fn upgrade_request(extra: &[(&str, &str)]) -> Request {
        let headers: Vec<_> = BASE.iter().chain(extra).copied().collect();
        request(Method::GET, &headers)
    }

    fn reject_bad(offered: &[String]) -> Option<String> {
        if offered.iter().any(|p| p == "bad_protocol") {
            return None;
        }
        offered.last().cloned()
    }

    #[test]
    fn detects_upgrade_with_token_lists() {
        let req = upgrade_request(&[]);
        assert!(is_upgrade(req.headers()));

        let mut plain = HeaderMap::new();
        plain.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!is_upgrade(&plain));
    }

    #[test]
    fn derives_rfc_accept_key() {
        let accepted = negotiate(&upgrade_request(&[]), &AcceptorConfig::new()).unwrap();
        assert_eq!(accepted.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(accepted.protocol, None);
    }

    #[test]
    fn negotiation_rejection_is_unauthorized() {
        let config = AcceptorConfig::new().handle_protocols(reject_bad);
        let req = upgrade_request(&[("sec-websocket-protocol", "bad_protocol")]);
        assert_eq!(negotiate(&req, &config), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn negotiation_picks_callback_choice() {
        let config = AcceptorConfig::new().handle_protocols(reject_bad);
        let req = upgrade_request(&[("sec-websocket-protocol", "chat, superchat")]);
        assert_eq!(negotiate(&req, &config).unwrap().protocol.as_deref(), Some("superchat"));
    }

    #[test]
    fn first_offer_wins_without_callback() {
        let req = upgrade_request(&[("sec-websocket-protocol", "chat, superchat")]);
        let accepted = negotiate(&req, &AcceptorConfig::new()).unwrap();
        assert_eq!(accepted.protocol.as_deref(), Some("chat"));
    }

    #[test]
    fn callback_is_skipped_when_nothing_offered() {
        let config = AcceptorConfig::new().handle_protocols(|_| None);
        assert!(negotiate(&upgrade_request(&[]), &config).is_ok());
    }

    #[test]
    fn malformed_handshakes_are_bad_requests() {
        let config = AcceptorConfig::new();
        let post = request(Method::POST, &BASE);
        assert_eq!(negotiate(&post, &config), Err(StatusCode::BAD_REQUEST));

        let wrong_version = request(Method::GET, &[BASE[0], BASE[1], ("sec-websocket-version", "8"), BASE[3]]);
        assert_eq!(negotiate(&wrong_version, &config), Err(StatusCode::BAD_REQUEST));

        let no_key = request(Method::GET, &BASE[..3]);
        assert_eq!(negotiate(&no_key, &config), Err(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn verify_client_can_refuse() {
        let config = AcceptorConfig::new().verify_client(|req| req.header("origin") == Some("https://ok"));
        assert_eq!(
            negotiate(&upgrade_request(&[]), &config),
            Err(StatusCode::UNAUTHORIZED),
        );
        assert!(negotiate(&upgrade_request(&[("origin", "https://ok")]), &config).is_ok());
    }

    #[test]
    fn protocols_split_across_headers() {
        let req = upgrade_request(&[
            ("sec-websocket-protocol", "a, b"),
            ("sec-websocket-protocol", "c"),
        ]);
        assert_eq!(offered_protocols(req.headers()), ["a", "b", "c"]);
    }
}
