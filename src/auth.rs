use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::GateError;
use crate::models::{Identity, UserProfile};

const ACCESS_CODE_PREFIX: &str = "ak-";

// `None` means no valid session, whatever the reason
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Identity>;
}

// Asks the identity provider's "me" endpoint, forwarding the session cookie
pub struct HttpSessionResolver {
    client: reqwest::Client,
    session_url: String,
}

impl HttpSessionResolver {
    pub fn new(client: reqwest::Client, session_url: impl Into<String>) -> Self {
        Self {
            client,
            session_url: session_url.into(),
        }
    }

    pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder().timeout(timeout).build()
    }
}

#[async_trait]
impl SessionResolver for HttpSessionResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Identity> {
        let mut request = self.client.get(&self.session_url);
        if let Some(cookie) = headers.get(header::COOKIE) {
            request = request.header(header::COOKIE, cookie.clone());
        }

        let res = match request.send().await {
            Ok(res) => res,
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                return None;
            }
        };
        if !res.status().is_success() {
            debug!(status = res.status().as_u16(), "no valid session");
            return None;
        }

        match res.json::<UserProfile>().await {
            Ok(profile) => Some(profile.into()),
            Err(e) => {
                warn!(error = %e, "unreadable session profile");
                None
            }
        }
    }
}

// Which key the upstream call should carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    // caller brought their own upstream API key
    UserKey,
    // caller is on an access code (or none was required)
    ServerKey,
}

// Access codes are kept as sha256 hex digests only
#[derive(Debug, Clone, Default)]
pub struct CredentialPolicy {
    code_hashes: HashSet<String>,
}

pub fn hash_access_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim());
    format!("{:x}", hasher.finalize())
}

impl CredentialPolicy {
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            code_hashes: codes
                .into_iter()
                .map(|c| c.as_ref().trim().to_string())
                .filter(|c| !c.is_empty())
                .map(|c| hash_access_code(&c))
                .collect(),
        }
    }

    pub fn needs_code(&self) -> bool {
        !self.code_hashes.is_empty()
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<Credential, GateError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

        let (access_code, user_key) = match token.strip_prefix(ACCESS_CODE_PREFIX) {
            Some(code) => (Some(code), None),
            None if token.is_empty() => (None, None),
            None => (None, Some(token)),
        };

        if user_key.is_some() {
            debug!("caller supplied own api key");
            return Ok(Credential::UserKey);
        }
        if !self.needs_code() {
            return Ok(Credential::ServerKey);
        }
        match access_code {
            Some(code) if self.code_hashes.contains(&hash_access_code(code)) => {
                Ok(Credential::ServerKey)
            }
            Some(_) => Err(GateError::Unauthorized("wrong access code")),
            None => Err(GateError::Unauthorized("empty access code")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verified {
    pub identity: Identity,
    pub credential: Credential,
}

pub struct AuthGate {
    sessions: Arc<dyn SessionResolver>,
    credentials: CredentialPolicy,
}

impl AuthGate {
    pub fn new(sessions: Arc<dyn SessionResolver>, credentials: CredentialPolicy) -> Self {
        Self {
            sessions,
            credentials,
        }
    }

    // Session first, then the access code / api key
    pub async fn verify(&self, headers: &HeaderMap) -> Result<Verified, GateError> {
        let identity = self
            .sessions
            .resolve(headers)
            .await
            .ok_or(GateError::Unauthenticated)?;
        let credential = self.credentials.check(headers)?;
        Ok(Verified {
            identity,
            credential,
        })
    }
}
