use async_trait::async_trait;
use bytes::Bytes;
use headers::{Authorization, HeaderMapExt};
use http::header::CONTENT_TYPE;
use http::{Request, Uri};
use http_body_util::Full;

use super::{DeliveryError, DeliveryService, TokenError, TokenSource};
use crate::batch::EventBatch;
use crate::http::{HttpClient, HttpError};

/// Splunk Cloud ingest API client.
///
/// Posts each sealed batch as a JSON array of events to
/// `POST {endpoint}/{tenant}/ingest/v1beta2/events` with a bearer token
/// from the [`TokenSource`]. Never retries, retry is the writer's job.
pub struct IngestClient {
    client: HttpClient,
    endpoint: Uri,
    tokens: TokenSource,
}

impl IngestClient {
    pub fn new(
        client: HttpClient,
        endpoint: &str,
        tenant: &str,
        tokens: TokenSource,
    ) -> Result<Self, HttpError> {
        let endpoint = format!(
            "{}/{}/ingest/v1beta2/events",
            endpoint.trim_end_matches('/'),
            tenant
        )
        .parse::<Uri>()?;

        Ok(Self {
            client,
            endpoint,
            tokens,
        })
    }

    /// Validate the configured credentials by acquiring a token once.
    pub async fn authenticate(&self) -> Result<(), TokenError> {
        self.tokens.access_token().await.map(|_| ())
    }
}

#[async_trait]
impl DeliveryService for IngestClient {
    async fn deliver(&self, batch: &EventBatch) -> Result<(), DeliveryError> {
        let token = self.tokens.access_token().await?;
        let payload = serde_json::to_vec(batch.events())?;

        let mut req = Request::post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(HttpError::BuildRequest)?;
        match Authorization::bearer(&token) {
            Ok(auth) => req.headers_mut().typed_insert(auth),
            Err(_) => return Err(TokenError::InvalidToken.into()),
        }

        let resp = self.client.send(req).await.map_err(DeliveryError::Transport)?;
        match DeliveryError::from_status(resp.status()) {
            None => Ok(()),
            Some(err) => {
                warn!(
                    message = "events post failed",
                    status = %resp.status(),
                    count = batch.len(),
                    size = batch.bytes()
                );

                Err(err)
            }
        }
    }
}
