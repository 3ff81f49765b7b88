//! HTTP fallback channel.
//!
//! Implements [`FallbackChannel`] against the chat server's JSON API with
//! `reqwest`. Responses carry a `success` flag; `false` becomes
//! [`TransportError::Rejected`] with the server's reason.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use herochat_proto::api::{
    ApiAck, MarkReadRequest, MessagesResponse, PresenceResponse, SendOutcome, SendRequest,
    SendResponse, StatusRequest, StatusResponse,
};
use herochat_proto::message::{CorrelationId, LifecycleState, ServerMessage};
use herochat_proto::presence::PresenceStatus;

use super::{FallbackChannel, SendReceipt, TransportError};

/// Header carrying the CSRF token expected by the server.
const CSRF_HEADER: &str = "x-csrftoken";

/// Connection options for [`HttpFallback::new`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// CSRF token sent as `X-CSRFToken`, if any.
    pub csrf_token: Option<String>,
    /// Value of the `Cookie` header carrying the session, if any.
    pub session_cookie: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            csrf_token: None,
            session_cookie: None,
        }
    }
}

/// Request/response channel to the chat server.
pub struct HttpFallback {
    client: reqwest::Client,
    base: Url,
}

impl HttpFallback {
    /// Build a fallback channel rooted at `base_url` (e.g. `http://host:5000/`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the URL, a header value, or the
    /// client configuration is invalid.
    pub fn new(base_url: &str, options: &HttpOptions) -> Result<Self, TransportError> {
        let mut base =
            Url::parse(base_url).map_err(|e| TransportError::Http(format!("invalid url: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &options.csrf_token {
            headers.insert(HeaderName::from_static(CSRF_HEADER), header_value(token)?);
        }
        if let Some(cookie) = &options.session_cookie {
            headers.insert(COOKIE, header_value(cookie)?);
        }

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self { client, base })
    }

    /// The base URL all endpoints are resolved against.
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|e| TransportError::Http(format!("invalid endpoint {path}: {e}")))
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, TransportError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        decode_body(response).await
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, TransportError> {
        let url = self.endpoint(path)?;
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        decode_body(response).await
    }
}

impl FallbackChannel for HttpFallback {
    async fn send(&self, receiver_id: u64, content: &str) -> Result<SendReceipt, TransportError> {
        let body = SendRequest {
            receiver_id,
            content: content.to_owned(),
        };
        let resp: SendResponse = self.post_json("api/chat/send", &body).await?;
        match (resp.success, resp.message) {
            (true, Some(SendOutcome::Stored(stored))) => Ok(SendReceipt {
                message_id: stored.id,
            }),
            (true, _) => Err(TransportError::Http(
                "send succeeded without a stored message".into(),
            )),
            (false, Some(SendOutcome::Reason(reason))) => Err(TransportError::Rejected(reason)),
            (false, _) => Err(TransportError::Rejected("send refused".into())),
        }
    }

    async fn get_status(
        &self,
        ids: &[CorrelationId],
    ) -> Result<HashMap<CorrelationId, LifecycleState>, TransportError> {
        let body = StatusRequest {
            message_ids: ids.to_vec(),
        };
        let resp: StatusResponse = self.post_json("api/chat/status", &body).await?;
        if !resp.success {
            return Err(rejected(resp.message));
        }
        Ok(resp.statuses)
    }

    async fn mark_read(&self, peer_id: u64) -> Result<(), TransportError> {
        let body = MarkReadRequest { sender_id: peer_id };
        let resp: ApiAck = self
            .post_json(&format!("api/chat/{peer_id}/mark-read"), &body)
            .await?;
        if !resp.success {
            return Err(rejected(resp.message));
        }
        Ok(())
    }

    async fn fetch_messages(&self, peer_id: u64) -> Result<Vec<ServerMessage>, TransportError> {
        let resp: MessagesResponse = self
            .get_json(&format!("api/chat/{peer_id}/messages"))
            .await?;
        if !resp.success {
            return Err(rejected(resp.message));
        }
        Ok(resp.messages)
    }

    async fn get_presence(&self, peer_id: u64) -> Result<PresenceStatus, TransportError> {
        let resp: PresenceResponse = self.get_json(&format!("api/user/{peer_id}/status")).await?;
        match (resp.success, resp.status) {
            (true, Some(status)) => Ok(status),
            (true, None) => Err(TransportError::Http(
                "presence lookup succeeded without a status".into(),
            )),
            (false, _) => Err(rejected(resp.message)),
        }
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(raw).map_err(|e| TransportError::Http(format!("invalid header: {e}")))
}

fn rejected(message: Option<String>) -> TransportError {
    TransportError::Rejected(message.unwrap_or_else(|| "request refused".into()))
}

/// Decode a JSON body. Error statuses still carry `{success, message}`
/// bodies, so the body is tried first and the status only reported when it
/// does not parse.
async fn decode_body<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, TransportError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    match serde_json::from_slice(&bytes) {
        Ok(body) => Ok(body),
        Err(e) if status.is_success() => {
            Err(TransportError::Http(format!("invalid response body: {e}")))
        }
        Err(_) => Err(TransportError::Http(format!("server returned {status}"))),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(err.to_string())
    }
}
