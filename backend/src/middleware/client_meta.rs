//! Captures device metadata (user agent, client address) for session records.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use std::{convert::Infallible, net::SocketAddr};

use crate::models::ClientMeta;

const FORWARDED_FOR: &str = "x-forwarded-for";
const MAX_USER_AGENT_LEN: usize = 512;

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(client_meta(&parts.headers, peer))
    }
}

/// User agent from `User-Agent`; address from the first `X-Forwarded-For`
/// hop, else the peer address.
pub fn client_meta(headers: &HeaderMap, peer: Option<String>) -> ClientMeta {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.chars().take(MAX_USER_AGENT_LEN).collect());

    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    ClientMeta {
        user_agent,
        ip_address: forwarded.or(peer),
    }
}
