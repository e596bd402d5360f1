use axum::extract::{ Request, State };
use axum::http::{ HeaderMap, StatusCode };
use axum::middleware::Next;
use axum::response::{ IntoResponse, Response };
use axum::Json;
use chrono::Utc;
use constant_time_eq::constant_time_eq;
use hmac::{ Hmac, Mac };
use log::warn;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

pub const PASSWORD_HEADER: &str = "x-access-password";
pub const TIMESTAMP_HEADER: &str = "x-api-ts";
pub const SIGNATURE_HEADER: &str = "x-api-sign";

/// Maximum clock skew accepted for signed requests, in seconds.
const MAX_SKEW_SECS: i64 = 300;

/// Shared-secret check in front of the transcript endpoints.
///
/// A caller proves the secret either directly in `X-Access-Password`, or with
/// `X-Api-Ts` plus `X-Api-Sign` = hex(HMAC-SHA256(secret, ts)).
#[derive(Clone, Default)]
pub struct AccessGate {
    secret: Option<Arc<str>>,
}

impl AccessGate {
    pub fn new(secret: Option<&str>) -> Self {
        Self { secret: secret.filter(|s| !s.is_empty()).map(Arc::from) }
    }

    pub fn is_open(&self) -> bool {
        self.secret.is_none()
    }

    pub fn check(&self, headers: &HeaderMap, now: i64) -> Result<(), &'static str> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(());
        };

        if let Some(password) = header(headers, PASSWORD_HEADER) {
            return if constant_time_eq(password.as_bytes(), secret.as_bytes()) {
                Ok(())
            } else {
                Err("invalid access password")
            };
        }

        let (Some(ts), Some(sig)) = (header(headers, TIMESTAMP_HEADER), header(headers, SIGNATURE_HEADER)) else {
            return Err("missing credentials");
        };
        let ts_i: i64 = ts.parse().map_err(|_| "invalid timestamp")?;
        if (now - ts_i).abs() > MAX_SKEW_SECS {
            return Err("timestamp out of range");
        }
        let sig = hex::decode(sig).map_err(|_| "bad signature")?;
        let mut mac = keyed(secret);
        mac.update(ts.as_bytes());
        mac.verify_slice(&sig).map_err(|_| "bad signature")
    }

    /// Signs a timestamp the way clients are expected to.
    pub fn sign(secret: &str, ts: i64) -> String {
        let mut mac = keyed(secret);
        mac.update(ts.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn keyed(secret: &str) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub async fn require_access(State(gate): State<AccessGate>, req: Request, next: Next) -> Response {
    match gate.check(req.headers(), Utc::now().timestamp()) {
        Ok(()) => next.run(req).await,
        Err(reason) => {
            warn!("Access denied for {} {}: {}", req.method(), req.uri().path(), reason);
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": format!("Access denied: {}", reason) })),
            ).into_response()
        }
    }
}
