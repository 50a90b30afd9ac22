use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, StatusCode, Uri};
use http_body_util::Full;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use url::form_urlencoded;

use crate::http::{HttpClient, HttpError};

pub const DEFAULT_TOKEN_URL: &str = "https://auth.scp.splunk.com/token";

/// Refresh this long before the token actually expires.
const EXPIRY_LEEWAY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Request(#[from] HttpError),
    #[error("token endpoint returned {status}")]
    Status { status: StatusCode },
    #[error("failed to decode token response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("access token is not a valid header value")]
    InvalidToken,
}

impl TokenError {
    pub fn is_retriable(&self) -> bool {
        match self {
            TokenError::Request(_) => true,
            TokenError::Status { status } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            TokenError::Decode(_) => false,
            TokenError::InvalidToken => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() + EXPIRY_LEEWAY < at,
            None => true,
        }
    }
}

/// OAuth2 client-credentials token source.
///
/// The access token is cached and refreshed ahead of expiry, so callers
/// always see a live credential without hitting the auth endpoint on
/// every delivery.
pub struct TokenSource {
    client: HttpClient,
    token_url: Uri,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(
        client: HttpClient,
        token_url: Uri,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            client,
            token_url,
            client_id,
            client_secret,
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<String, TokenError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = &*cached {
            if token.fresh() {
                return Ok(token.access_token.clone());
            }
        }

        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .finish();
        let req = Request::post(self.token_url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Full::new(Bytes::from(body)))
            .map_err(HttpError::BuildRequest)?;

        let resp = self.client.send(req).await?;
        if !resp.status().is_success() {
            warn!(message = "token refresh failed", status = %resp.status());

            return Err(TokenError::Status {
                status: resp.status(),
            });
        }

        let token: TokenResponse = serde_json::from_slice(resp.body())?;
        debug!(
            message = "access token refreshed",
            expires_in = ?token.expires_in
        );

        let expires_at = token
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let access = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });

        Ok(access)
    }
}
