use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use aegis_core::{AuditEvent, AuditOutcome, SecurityError, SecurityResult};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Correlation id for the current request, stored in request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

// Ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    let value = req
        .headers()
        .get(&header_name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(value.clone()));
    let mut res = next.run(req).await;
    if let Ok(header) = HeaderValue::from_str(&value) {
        res.headers_mut().insert(header_name, header);
    }
    res
}

/// Bearer token from the `Authorization` header.
///
/// `Ok(None)` when the header is absent; a present but malformed header is
/// an error rather than an anonymous request.
fn bearer_token(headers: &HeaderMap) -> SecurityResult<Option<&str>> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| SecurityError::token_invalid("malformed Authorization header"))?;
    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim())),
        _ => Err(SecurityError::token_invalid(
            "invalid Authorization header format",
        )),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Authenticates the caller and applies the rate limit for the route.
///
/// A valid bearer token yields a [`RequestContext`] in the request
/// extensions. Requests without a token pass through anonymously; handlers
/// that need a caller reject them through the
/// [`Authenticated`](crate::extract::Authenticated) extractor. The rate limit
/// is checked before a verification failure is reported, so bad tokens count
/// against the client's budget too.
pub async fn gateway(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    let (client_ip, user_agent, correlation_id, token) = {
        let headers = req.headers();
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let client_ip = state
            .policy
            .client_ip(peer, header_str(headers, FORWARDED_FOR));
        let correlation_id = req
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        (
            client_ip,
            header_str(headers, "user-agent").map(str::to_owned),
            correlation_id,
            bearer_token(headers).map(|t| t.map(str::to_owned)),
        )
    };

    let auth = match token {
        Ok(Some(token)) => Some(
            state
                .tokens
                .verify(&token)
                .await
                .and_then(|claims| claims.to_context()),
        ),
        Ok(None) => None,
        Err(e) => Some(Err(e)),
    };
    let auth = auth.map(|result| {
        result.map(|ctx| {
            let ctx = ctx
                .with_ip_address(client_ip.to_string())
                .with_correlation_id(correlation_id.clone());
            match &user_agent {
                Some(ua) => ctx.with_user_agent(ua.clone()),
                None => ctx,
            }
        })
    });

    let tenant = match &auth {
        Some(Ok(ctx)) => state
            .tenants
            .tenant(ctx.tenant_id())
            .await
            .ok()
            .map(|t| (t.id, t.tier)),
        _ => None,
    };

    let mut limit_headers = None;
    if let Some(target) = state.policy.target(&path, client_ip, tenant) {
        let decision = state
            .limiter
            .check_route(&target.identifier, &target.route_class, target.window, target.limit)
            .await;
        if !decision.allowed {
            tracing::warn!(
                identifier = %target.identifier,
                route_class = %target.route_class,
                limit = target.limit,
                "Rate limit exceeded"
            );
            let mut event = AuditEvent::builder("rate_limit.exceeded")
                .resource("route", &target.route_class)
                .outcome(AuditOutcome::Denied)
                .ip_address(client_ip.to_string())
                .correlation_id(correlation_id.clone())
                .details(json!({ "identifier": target.identifier, "limit": target.limit }));
            if let Some(Ok(ctx)) = &auth {
                event = event.context(ctx);
            }
            state.audit.record(event.build());
            return ApiError(SecurityError::rate_limited(decision.retry_after_secs()))
                .into_response();
        }
        limit_headers = Some((
            target.limit,
            decision.remaining,
            decision.reset_time.unix_timestamp(),
        ));
    }

    match auth {
        Some(Ok(ctx)) => {
            tracing::debug!(
                tenant_id = %ctx.tenant_id(),
                correlation_id = %ctx.correlation_id(),
                "Request authenticated"
            );
            req.extensions_mut().insert(ctx);
        }
        Some(Err(e)) => {
            tracing::debug!(error = %e, path = %path, "Token verification failed");
            return ApiError(e).into_response();
        }
        None => {}
    }

    let mut res = next.run(req).await;
    if let Some((limit, remaining, reset)) = limit_headers {
        let headers = res.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
        headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers).unwrap(), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert!(matches!(
            bearer_token(&headers),
            Err(SecurityError::TokenInvalid { .. })
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());
    }
}
