use bytes::Bytes;
use http::header::USER_AGENT;
use http::{HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls::ClientConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to load native certificates: {0}")]
    NativeCerts(#[source] std::io::Error),
    #[error("failed to make HTTP(S) request: {0}")]
    CallRequest(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read response body: {0}")]
    ReadBody(#[source] hyper::Error),
    #[error("failed to build HTTP request: {0}")]
    BuildRequest(#[from] http::Error),
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
}

/// Thin wrapper over the hyper client with rustls and default headers.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    user_agent: HeaderValue,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        let config = ClientConfig::builder()
            .with_native_roots()
            .map_err(HttpError::NativeCerts)?
            .with_no_client_auth();

        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let https = HttpsConnector::from((http, config));
        let client = Client::builder(TokioExecutor::new()).build(https);
        let user_agent = HeaderValue::from_str(&format!("Sluice/{}", crate::get_version()))
            .expect("Invalid header value for version!");

        Ok(Self { client, user_agent })
    }

    /// Send a request and collect the response body.
    pub async fn send(&self, mut req: Request<Full<Bytes>>) -> Result<Response<Bytes>, HttpError> {
        if !req.headers().contains_key(USER_AGENT) {
            req.headers_mut().insert(USER_AGENT, self.user_agent.clone());
        }

        debug!(message = "sending request", method = %req.method(), uri = %req.uri());

        let resp = self.client.request(req).await?;
        let (parts, body) = resp.into_parts();
        let body = body.collect().await.map_err(HttpError::ReadBody)?.to_bytes();

        debug!(message = "got response", status = %parts.status);

        Ok(Response::from_parts(parts, body))
    }
}
