//! Connection authentication.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use murmur_protocol::UserId;
use std::collections::HashMap;
use thiserror::Error;

/// Authentication failures. Both reject the upgrade with 401.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingToken,

    #[error("Invalid credentials")]
    InvalidToken,
}

/// Resolves a bearer token to a user.
#[async_trait]
pub trait AuthVerifier: Send + Sync + 'static {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Verifier backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    #[must_use]
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }

    /// Add a token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user: UserId) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }
}

#[async_trait]
impl AuthVerifier for StaticTokenVerifier {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .copied()
            .ok_or(AuthError::InvalidToken)
    }
}

/// Pull the bearer token from the `token` query parameter, falling back to
/// the `Authorization` header.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] if neither carries a token.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(AuthError::MissingToken)
}
