//! HTTP client for the app-IO protocol.

use serde::de::DeserializeOwned;
use serde::Serialize;

use leasehold_core::wire::{
    paths, Ack, ErrorBody, PendingRunsResponse, PullMessageResponse, PushMessageRequest,
    PushOutputsRequest, PushOutputsResponse, RequestTokenRequest, RequestTokenResponse,
    TokenRequest,
};
use leasehold_core::{
    ClientAppInputs, Context, ExchangeApi, ExchangeError, ExchangeResult, Message,
    OutcomeStatus, RunId, Token,
};

pub const DEFAULT_PORT: u16 = 9091;

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/api", port)
}

/// Talks to `leaseholdd` over JSON/HTTP. Protocol errors come back as the
/// same [`ExchangeError`] variant the server raised.
#[derive(Clone)]
pub struct ExchangeClient {
    http: reqwest::Client,
    base: String,
}

impl ExchangeClient {
    /// `base` is the API root, e.g. `http://127.0.0.1:9091/api`.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn local(port: u16) -> Self {
        Self::new(base_url(port))
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn call<B, R>(&self, path: &str, body: &B) -> ExchangeResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(format!("{}: {}", url, e)))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<R>()
                .await
                .map_err(|e| ExchangeError::Transport(format!("malformed response: {}", e)));
        }

        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(ExchangeError::from_body(body)),
            Err(_) if status.is_server_error() => {
                Err(ExchangeError::Transport(format!("HTTP {}: {}", status, text)))
            }
            Err(_) => Err(ExchangeError::Internal(format!("HTTP {}: {}", status, text))),
        }
    }
}

impl ExchangeApi for ExchangeClient {
    async fn get_run_ids_with_pending_messages(&self) -> ExchangeResult<Vec<RunId>> {
        let resp: PendingRunsResponse = self
            .call(paths::GET_RUNS_WITH_PENDING_MESSAGES, &Ack {})
            .await?;
        Ok(resp.run_ids)
    }

    async fn request_token(&self, run_id: RunId) -> ExchangeResult<Token> {
        let resp: RequestTokenResponse = self
            .call(paths::REQUEST_TOKEN, &RequestTokenRequest { run_id })
            .await?;
        Ok(resp.token)
    }

    async fn pull_client_app_inputs(&self, token: &Token) -> ExchangeResult<ClientAppInputs> {
        let req = TokenRequest {
            token: token.clone(),
        };
        self.call(paths::PULL_INPUTS, &req).await
    }

    async fn push_client_app_outputs(
        &self,
        token: &Token,
        context: Context,
    ) -> ExchangeResult<OutcomeStatus> {
        let req = PushOutputsRequest {
            token: token.clone(),
            context,
        };
        let resp: PushOutputsResponse = self.call(paths::PUSH_OUTPUTS, &req).await?;
        Ok(resp.status)
    }

    async fn pull_message(&self, token: &Token) -> ExchangeResult<Message> {
        let req = TokenRequest {
            token: token.clone(),
        };
        let resp: PullMessageResponse = self.call(paths::PULL_MESSAGE, &req).await?;
        Ok(resp.message)
    }

    async fn push_message(&self, token: &Token, message: Message) -> ExchangeResult<()> {
        let req = PushMessageRequest {
            token: token.clone(),
            message,
        };
        let _: Ack = self.call(paths::PUSH_MESSAGE, &req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed() {
        let client = ExchangeClient::new("http://localhost:1/api/");
        assert_eq!(client.base(), "http://localhost:1/api");
        assert_eq!(ExchangeClient::local(9091).base(), "http://127.0.0.1:9091/api");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // port 9 (discard) is closed on any sane test host
        let client = ExchangeClient::new("http://127.0.0.1:9/api");
        let err = client.get_run_ids_with_pending_messages().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Transport(_)));
    }
}
