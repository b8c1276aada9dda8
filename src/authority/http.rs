use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::SessionAuthority;
use crate::error::AuthorityError;
use crate::identity::{PrivilegeKind, PrivilegeRecord, SessionRecord};

#[derive(Debug, Serialize, Deserialize)]
pub struct WireUser {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// Session payload exchanged with the authority.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch seconds.
    pub expires_at: i64,
    pub user: WireUser,
}

impl From<WireSession> for SessionRecord {
    fn from(w: WireSession) -> Self {
        SessionRecord {
            access_token: w.access_token,
            refresh_token: w.refresh_token,
            expires_at: w.expires_at,
            subject_id: w.user.id,
            subject_contact: w.user.email,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WirePrivilege {
    pub subject_id: String,
    pub kind: PrivilegeKind,
}

/// JSON-over-HTTP implementation of the authority contract.
///
/// Requests carry the access token of the last adopted session as a bearer token.
/// Responses never change it; only `adopt_session` and `sign_out` do.
/// Deadlines are not applied here; wrap in an `AuthorityClient`.
pub struct HttpAuthority {
    base: Url,
    client: reqwest::Client,
    bearer: RwLock<Option<String>>,
}

fn transport(e: reqwest::Error) -> AuthorityError {
    AuthorityError::unavailable(e.to_string())
}

impl HttpAuthority {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).context("invalid authority base URL")?;
        let client = reqwest::Client::builder().build().context("building http client")?;
        Ok(Self { base, client, bearer: RwLock::new(None) })
    }

    pub fn base(&self) -> &Url { &self.base }

    fn url(&self, path: &str) -> Result<Url, AuthorityError> {
        self.base.join(path).map_err(|e| AuthorityError::unavailable(format!("bad url {path}: {e}")))
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.bearer.read().as_deref() {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, v);
            }
        }
        headers
    }

    async fn read_session(resp: reqwest::Response) -> Result<SessionRecord, AuthorityError> {
        let wire: WireSession = resp.json().await.map_err(transport)?;
        Ok(wire.into())
    }

    fn unexpected(op: &str, status: StatusCode) -> AuthorityError {
        AuthorityError::unavailable(format!("{op}: HTTP {status}"))
    }
}

#[async_trait]
impl SessionAuthority for HttpAuthority {
    async fn get_current_session(&self) -> Result<Option<SessionRecord>, AuthorityError> {
        if self.bearer.read().is_none() {
            return Ok(None);
        }
        let resp = self.client.get(self.url("/auth/session")?).headers(self.headers()).send().await.map_err(transport)?;
        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            s if s.is_success() => {
                Ok(Some(Self::read_session(resp).await?))
            }
            s => Err(Self::unexpected("get_current_session", s)),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<SessionRecord, AuthorityError> {
        let resp = self
            .client
            .post(self.url("/auth/refresh")?)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(AuthorityError::InvalidRefreshCredential),
            s if s.is_success() => {
                Self::read_session(resp).await
            }
            s => Err(Self::unexpected("refresh", s)),
        }
    }

    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<SessionRecord, AuthorityError> {
        let resp = self
            .client
            .post(self.url("/auth/sign-in")?)
            .json(&serde_json::json!({ "identifier": identifier, "secret": secret }))
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(AuthorityError::InvalidCredentials),
            s if s.is_success() => {
                Self::read_session(resp).await
            }
            s => Err(Self::unexpected("sign_in", s)),
        }
    }

    async fn sign_out(&self) -> Result<(), AuthorityError> {
        let headers = self.headers();
        // local credential goes away whatever the remote says
        *self.bearer.write() = None;
        let resp = self.client.post(self.url("/auth/sign-out")?).headers(headers).send().await.map_err(transport)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::unexpected("sign_out", resp.status()))
        }
    }

    async fn fetch_privilege(&self, subject_id: &str) -> Result<Option<PrivilegeRecord>, AuthorityError> {
        let path = format!("/privileges/{}", urlencoding::encode(subject_id));
        let resp = self.client.get(self.url(&path)?).headers(self.headers()).send().await.map_err(transport)?;
        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            s if s.is_success() => {
                let wire: WirePrivilege = resp.json().await.map_err(transport)?;
                Ok(Some(PrivilegeRecord::new(wire.subject_id, wire.kind, 0)))
            }
            s => Err(Self::unexpected("fetch_privilege", s)),
        }
    }

    fn adopt_session(&self, session: Option<&SessionRecord>) {
        *self.bearer.write() = session.map(|s| s.access_token.clone());
    }
}
