//! Typed async REST transport.
//!
//! The wire format of the remote API is not defined here; callers see domain
//! DTOs or one of the closed [`TransportError`] variants. `Scope` and the
//! refresh coordinator depend only on the [`RewardsApi`] trait, so tests
//! drive them with hand-rolled mocks.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SessionTokens;
use crate::util::{compact_text, is_http_url};

/// Transport-level failures, closed set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The access token was rejected.
    #[error("Unauthorized")]
    Unauthorized,
    /// The server answered with a non-success status.
    #[error("Server error (HTTP {0})")]
    ServerError(u16),
    /// The network is unreachable.
    #[error("Network unavailable")]
    NetworkUnavailable,
    /// The request timed out.
    #[error("Request timed out")]
    Timeout,
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Remote view of a loyalty account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDto {
    pub external_id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Result of a successful login or registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub account: AccountDto,
    pub tokens: SessionTokens,
}

/// The outbound API surface the engine depends on.
#[async_trait]
pub trait RewardsApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> TransportResult<TokenGrant>;
    async fn register(&self, name: &str, email: &str, password: &str)
        -> TransportResult<TokenGrant>;
    async fn refresh(&self, refresh_token: &str) -> TransportResult<SessionTokens>;
    async fn logout(&self, access_token: &str) -> TransportResult<()>;
    async fn fetch_account(&self, access_token: &str) -> TransportResult<AccountDto>;
    async fn update_account(
        &self,
        access_token: &str,
        account: &AccountDto,
    ) -> TransportResult<AccountDto>;
    /// Fetch binary content (attachment bytes) from a URL.
    async fn fetch_image(&self, url: &str) -> TransportResult<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct TokenGrantResponse {
    access_token: String,
    refresh_token: String,
    account: AccountDto,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
}

/// reqwest-backed implementation of [`RewardsApi`].
#[derive(Clone)]
pub struct HttpRewardsApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRewardsApi {
    /// Build a client for an explicit API base URL.
    pub fn new(base_url: impl AsRef<str>) -> TransportResult<Self> {
        let base_url = normalize_base_url(base_url.as_ref())
            .ok_or(TransportError::NetworkUnavailable)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|_| TransportError::NetworkUnavailable)?;
        Ok(Self { base_url, client })
    }

    /// The base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> TransportResult<T> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|_| TransportError::ServerError(StatusCode::OK.as_u16()))
    }
}

#[async_trait]
impl RewardsApi for HttpRewardsApi {
    async fn login(&self, email: &str, password: &str) -> TransportResult<TokenGrant> {
        let payload = serde_json::json!({ "email": email, "password": password });
        let response: TokenGrantResponse = self
            .send_json(
                self.client
                    .post(format!("{}/v1/auth/login", self.base_url))
                    .json(&payload),
            )
            .await?;
        Ok(TokenGrant {
            account: response.account,
            tokens: SessionTokens::new(response.access_token, response.refresh_token),
        })
    }

    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> TransportResult<TokenGrant> {
        let payload = serde_json::json!({ "name": name, "email": email, "password": password });
        let response: TokenGrantResponse = self
            .send_json(
                self.client
                    .post(format!("{}/v1/auth/register", self.base_url))
                    .json(&payload),
            )
            .await?;
        Ok(TokenGrant {
            account: response.account,
            tokens: SessionTokens::new(response.access_token, response.refresh_token),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> TransportResult<SessionTokens> {
        let payload = serde_json::json!({ "refresh_token": refresh_token });
        let response: RefreshResponse = self
            .send_json(
                self.client
                    .post(format!("{}/v1/auth/refresh", self.base_url))
                    .json(&payload),
            )
            .await?;
        Ok(SessionTokens::new(
            response.access_token,
            response.refresh_token,
        ))
    }

    async fn logout(&self, access_token: &str) -> TransportResult<()> {
        let response = self
            .client
            .post(format!("{}/v1/auth/logout", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch_account(&self, access_token: &str) -> TransportResult<AccountDto> {
        self.send_json(
            self.client
                .get(format!("{}/v1/account", self.base_url))
                .bearer_auth(access_token),
        )
        .await
    }

    async fn update_account(
        &self,
        access_token: &str,
        account: &AccountDto,
    ) -> TransportResult<AccountDto> {
        self.send_json(
            self.client
                .put(format!("{}/v1/account", self.base_url))
                .bearer_auth(access_token)
                .json(account),
        )
        .await
    }

    async fn fetch_image(&self, url: &str) -> TransportResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(bytes.to_vec())
    }
}

async fn check_status(response: reqwest::Response) -> TransportResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!("API error {}: {}", status.as_u16(), compact_text(&body));
    Err(TransportError::ServerError(status.as_u16()))
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::NetworkUnavailable
    }
}

fn normalize_base_url(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() || !is_http_url(trimmed) {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let api = HttpRewardsApi::new("https://api.nsp.com/").unwrap();
        assert_eq!(api.base_url(), "https://api.nsp.com");
        assert!(HttpRewardsApi::new("api.nsp.com").is_err());
        assert!(HttpRewardsApi::new("   ").is_err());
    }

    #[test]
    fn account_dto_tolerates_missing_optionals() {
        let dto: AccountDto = serde_json::from_str(
            r#"{"external_id": "acct-1", "name": "Dana", "email": "dana@nsp.com"}"#,
        )
        .unwrap();
        assert_eq!(dto.points, 0);
        assert_eq!(dto.phone, None);
        assert_eq!(dto.image_url, None);
    }
}
