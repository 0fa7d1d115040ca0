//! Bearer-token gate for the protected route group.
//!
//! The token is read from the env var named by
//! `config.server.api_token_env` once at startup; only its SHA-256
//! digest is kept in `AppState`. With no token configured the gate is
//! inert and requests pass through (the default bind is loopback-only).

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::api::error::ApiError;
use crate::state::AppState;

/// The bearer credential carried by a request, or an empty string when
/// the header is absent or malformed. Empty never matches a configured
/// digest, so the failure paths all converge on one comparison.
fn bearer_credential(req: &Request<Body>) -> &str {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return "";
    };
    match value.to_str() {
        Ok(raw) => raw.strip_prefix("Bearer ").unwrap_or(""),
        Err(_) => "",
    }
}

/// Digest the presented token and compare against the configured hash
/// in constant time. Digesting first keeps the comparison fixed-length.
fn credential_matches(presented: &str, want: &[u8]) -> bool {
    let got = Sha256::digest(presented.as_bytes());
    got.as_slice().ct_eq(want).into()
}

/// Middleware for all protected routes; attach via
/// `middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(want) = state.api_token_hash.as_deref() else {
        // Dev mode: nothing configured, nothing enforced.
        return next.run(req).await;
    };

    if credential_matches(bearer_credential(&req), want) {
        return next.run(req).await;
    }

    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "validation",
        "invalid or missing API token",
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/metrics");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn credential_extraction() {
        assert_eq!(bearer_credential(&request(Some("Bearer s3cret"))), "s3cret");
        assert_eq!(bearer_credential(&request(Some("Basic s3cret"))), "");
        assert_eq!(bearer_credential(&request(None)), "");
    }

    #[test]
    fn digest_comparison() {
        let want = Sha256::digest(b"s3cret").to_vec();
        assert!(credential_matches("s3cret", &want));
        assert!(!credential_matches("wrong", &want));
        assert!(!credential_matches("", &want));
    }
}
