//! Access token verification.
//!
//! Parley never issues tokens. It only asks an [`Authenticator`] who a bearer token belongs to.
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

impl User {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            wallet_address: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No access token provided")]
    MissingToken,

    #[error("Access token was rejected")]
    InvalidToken,

    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<User, AuthError>;
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// A fixed token table, for development and tests
#[derive(Debug, Default, Clone)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, User>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token<S: Into<String>>(mut self, token: S, user: User) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }

    /// Parse `token=user_id` pairs separated by commas. Malformed pairs are skipped.
    pub fn parse(spec: &str) -> Self {
        let tokens = spec
            .split(',')
            .filter_map(|pair| {
                let (token, user) = pair.split_once('=')?;
                let (token, user) = (token.trim(), user.trim());
                if token.is_empty() || user.is_empty() {
                    tracing::warn!("Skipping malformed static token entry");
                    return None;
                }
                Some((token.to_string(), User::new(user)))
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<User, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Verifies tokens by asking an OIDC userinfo endpoint who they belong to
pub struct UserInfoAuthenticator {
    client: Client,
    endpoint: Url,
}

impl UserInfoAuthenticator {
    pub fn new(endpoint: Url) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Authenticator for UserInfoAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<User, AuthError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(AuthError::InvalidToken),
            status if !status.is_success() => {
                return Err(AuthError::Unavailable(format!(
                    "userinfo responded with {}",
                    status
                )))
            }
            _ => {}
        }

        let claims: Value = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        user_from_claims(&claims).ok_or(AuthError::InvalidToken)
    }
}

fn user_from_claims(claims: &Value) -> Option<User> {
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| claims.get(*key).and_then(Value::as_str))
            .map(String::from)
    };

    Some(User {
        id: text(&["sub", "id"])?,
        name: text(&["name"]),
        email: text(&["email"]),
        wallet_address: text(&["walletAddress", "wallet_address", "ethWalletAddress"]),
    })
}
