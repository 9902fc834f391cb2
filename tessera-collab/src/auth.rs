//! Token acquisition and parsing.
//!
//! A token is three `.`-separated segments. The middle one is base64 JSON
//! carrying the actor number this connection writes under, plus the optional
//! user id and info the server shares with the other participants.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AuthError;

/// Exchanges a room name for a signed token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, room_id: &str) -> Result<String, AuthError>;
}

/// Hands out the same token on every call.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl Authenticator for StaticToken {
    async fn authenticate(&self, _room_id: &str) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// Payload of a token.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenClaims {
    pub actor: u64,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub info: Option<Value>,
}

pub fn parse_token(token: &str) -> Result<TokenClaims, AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }
    let payload = decode_segment(segments[1])?;
    serde_json::from_slice(&payload)
        .map_err(|e| AuthError::MalformedToken(format!("invalid payload: {e}")))
}

/// Accepts url-safe and standard alphabets, with or without padding.
fn decode_segment(segment: &str) -> Result<Vec<u8>, AuthError> {
    let trimmed = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| AuthError::MalformedToken(format!("invalid base64: {e}")))
}
