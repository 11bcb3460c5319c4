//! HTTP client for the japa backend.
//!
//! Owns the session (access token, refresh token, user identity) and keeps
//! the session file in step with it. Requests that come back 401 trigger one
//! refresh through `/auth/refresh` and are then replayed once; if that is not
//! possible the session is wiped and [`ClientError::Unauthorized`] is
//! returned so the caller can route back to login.

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::models::{
    BeadCountRequest, CounterTotals, ErrorBody, HistoryRecord, LifetimeProgress, LoginRequest,
    LoginResponse, RefreshRequest, RefreshResponse, RegisterRequest, StoredSession, TodayProgress,
    UserProfile,
};
use crate::storage::{clear_session, load_session, persist_session};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub struct ApiClient {
    http: Client,
    base_url: String,
    session_path: PathBuf,
    session: RwLock<StoredSession>,
    refresh_lock: Mutex<()>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: StoredSession) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.api_base(),
            session_path: config.session_path.clone(),
            session: RwLock::new(session),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Builds a client seeded from the session file.
    pub async fn open(config: &ClientConfig) -> Result<Self, ClientError> {
        let session = load_session(&config.session_path).await;
        Self::new(config, session)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn session(&self) -> StoredSession {
        self.session.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.jwt_token.is_some()
    }

    pub async fn user_id(&self) -> Option<String> {
        self.session.read().await.user_id.clone()
    }

    pub async fn set_tokens(
        &self,
        jwt_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<(), ClientError> {
        let mut session = self.session.write().await;
        session.jwt_token = Some(jwt_token.into());
        session.refresh_token = Some(refresh_token.into());
        persist_session(&self.session_path, &session).await
    }

    pub async fn set_user_info(
        &self,
        user_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Result<(), ClientError> {
        let mut session = self.session.write().await;
        session.user_id = Some(user_id.into());
        session.username = Some(username.into());
        persist_session(&self.session_path, &session).await
    }

    pub async fn clear_tokens(&self) -> Result<(), ClientError> {
        *self.session.write().await = StoredSession::default();
        clear_session(&self.session_path).await
    }

    // AUTH

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let body = serde_json::to_value(LoginRequest { username, password })?;
        let login: LoginResponse = self
            .send_public(Method::POST, self.endpoint("/auth/login", None)?, &body)
            .await?;

        {
            let mut session = self.session.write().await;
            session.jwt_token = Some(login.jwt_token.clone());
            session.refresh_token = Some(login.refresh_token.clone());
            session.user_id = Some(login.id.clone());
            session.username = Some(login.username.clone());
            persist_session(&self.session_path, &session).await?;
        }
        info!(user_id = %login.id, "logged in");
        Ok(login)
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, ClientError> {
        let body = serde_json::to_value(RegisterRequest {
            username,
            email,
            password,
        })?;
        self.send_public(Method::POST, self.endpoint("/user/register", None)?, &body)
            .await
    }

    /// Exchanges the stored refresh token for a new token pair.
    pub async fn refresh_access_token(&self) -> Result<(), ClientError> {
        let refresh_token = self
            .session
            .read()
            .await
            .refresh_token
            .clone()
            .ok_or(ClientError::Unauthorized)?;

        let response = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let tokens: RefreshResponse = response.json().await?;
        self.set_tokens(tokens.jwt_token, tokens.refresh_token).await?;
        debug!("access token refreshed");
        Ok(())
    }

    // USER

    pub async fn user_by_id(&self, user_id: &str) -> Result<UserProfile, ClientError> {
        self.send(Method::GET, self.endpoint("/user/getById", Some(user_id))?, None)
            .await
    }

    // JAPA

    pub async fn increment_beads(
        &self,
        user_id: &str,
        bead_count: u64,
    ) -> Result<CounterTotals, ClientError> {
        let body = serde_json::to_value(BeadCountRequest { bead_count })?;
        self.send(Method::POST, self.endpoint("/japa/increment", Some(user_id))?, Some(body))
            .await
    }

    pub async fn decrement_beads(
        &self,
        user_id: &str,
        bead_count: u64,
    ) -> Result<CounterTotals, ClientError> {
        let body = serde_json::to_value(BeadCountRequest { bead_count })?;
        self.send(Method::POST, self.endpoint("/japa/decrement", Some(user_id))?, Some(body))
            .await
    }

    pub async fn reset_beads(&self, user_id: &str) -> Result<CounterTotals, ClientError> {
        self.send(Method::POST, self.endpoint("/japa/reset", Some(user_id))?, None)
            .await
    }

    pub async fn today_progress(&self, user_id: &str) -> Result<TodayProgress, ClientError> {
        self.send(Method::GET, self.endpoint("/japa/today", Some(user_id))?, None)
            .await
    }

    pub async fn lifetime_progress(&self, user_id: &str) -> Result<LifetimeProgress, ClientError> {
        self.send(Method::GET, self.endpoint("/japa/lifetime", Some(user_id))?, None)
            .await
    }

    pub async fn history(
        &self,
        user_id: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<HistoryRecord>, ClientError> {
        // The backend route really is spelled "histroy".
        let mut url = self.endpoint("/japa/histroy", Some(user_id))?;
        url.query_pairs_mut()
            .append_pair("start", start)
            .append_pair("end", end);
        self.send(Method::GET, url, None).await
    }

    /// Sends without a bearer token; a 401 here is a plain API error.
    async fn send_public<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: &serde_json::Value,
    ) -> Result<T, ClientError> {
        let response = self.request(method, url, Some(body), None).send().await?;
        Self::decode(response).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<T, ClientError> {
        let path = url.path().to_string();
        let token = self.session.read().await.jwt_token.clone();
        let response = self
            .request(method.clone(), url.clone(), body.as_ref(), token.as_deref())
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::decode(response).await;
        }

        debug!(%path, "request unauthorized, attempting token refresh");
        self.recover_session(token.as_deref()).await?;

        let token = self.session.read().await.jwt_token.clone();
        let response = self
            .request(method, url, body.as_ref(), token.as_deref())
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(%path, "request still unauthorized after refresh");
            self.expire_session().await;
            return Err(ClientError::Unauthorized);
        }
        Self::decode(response).await
    }

    /// Makes sure the stored access token is newer than `stale_token`,
    /// refreshing at most once across concurrent callers.
    async fn recover_session(&self, stale_token: Option<&str>) -> Result<(), ClientError> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.session.read().await.jwt_token.clone();
        if current.is_some() && current.as_deref() != stale_token {
            return Ok(());
        }

        match self.refresh_access_token().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("token refresh failed: {err}");
                self.expire_session().await;
                Err(ClientError::Unauthorized)
            }
        }
    }

    async fn expire_session(&self) {
        if let Err(err) = self.clear_tokens().await {
            warn!("failed to clear session: {err}");
        }
    }

    fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        token: Option<&str>,
    ) -> RequestBuilder {
        let mut request = self
            .http
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `route` under the API base, with `user_id` appended as one
    /// percent-encoded path segment.
    fn endpoint(&self, route: &str, user_id: Option<&str>) -> Result<Url, ClientError> {
        let invalid = |reason: String| ClientError::Transport(format!("invalid request url: {reason}"));
        let mut url = Url::parse(&self.url(route)).map_err(|err| invalid(err.to_string()))?;
        if let Some(user_id) = user_id {
            url.path_segments_mut()
                .map_err(|()| invalid(self.base_url.clone()))?
                .push(user_id);
        }
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn error_from(response: Response) -> ClientError {
        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_slice(&body).unwrap_or_default();
        ClientError::api(status, parsed.message)
    }
}
