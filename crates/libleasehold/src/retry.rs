//! Retry with exponential backoff and jitter for transport failures.
//!
//! Only `Transport` errors are retried. Protocol answers (conflicts, invalid
//! tokens, empty queues) reach the caller on the first attempt. Outputs pushes
//! are never retried.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use leasehold_core::{
    ClientAppInputs, Context, ExchangeApi, ExchangeError, ExchangeResult, Message,
    OutcomeStatus, RunId, Token,
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): half the capped
    /// exponential delay, plus up to the other half at random.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
            .min(self.max_delay);
        let half = exp / 2;
        let jitter_ms = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter_ms)
    }

    pub async fn run<T, F, Fut>(&self, op: &str, mut f: F) -> ExchangeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Err(ExchangeError::Transport(msg)) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %msg, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Any [`ExchangeApi`] with every call wrapped in a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryingExchange<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: ExchangeApi> RetryingExchange<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: ExchangeApi> ExchangeApi for RetryingExchange<E> {
    async fn get_run_ids_with_pending_messages(&self) -> ExchangeResult<Vec<RunId>> {
        self.policy
            .run("get_run_ids_with_pending_messages", || {
                self.inner.get_run_ids_with_pending_messages()
            })
            .await
    }

    async fn request_token(&self, run_id: RunId) -> ExchangeResult<Token> {
        self.policy
            .run("request_token", || self.inner.request_token(run_id))
            .await
    }

    async fn pull_client_app_inputs(&self, token: &Token) -> ExchangeResult<ClientAppInputs> {
        self.policy
            .run("pull_client_app_inputs", || {
                self.inner.pull_client_app_inputs(token)
            })
            .await
    }

    /// Sent once. The push consumes the lease, so a retry after a lost
    /// response would only ever see `InvalidToken`.
    async fn push_client_app_outputs(
        &self,
        token: &Token,
        context: Context,
    ) -> ExchangeResult<OutcomeStatus> {
        let run_id = context.run_id;
        let result = self.inner.push_client_app_outputs(token, context).await;
        if let Err(ExchangeError::Transport(msg)) = &result {
            tracing::warn!(
                run_id,
                lease = %token.fingerprint(),
                error = %msg,
                "outputs push failed in transit, the server may have accepted it"
            );
        }
        result
    }

    async fn pull_message(&self, token: &Token) -> ExchangeResult<Message> {
        self.policy
            .run("pull_message", || self.inner.pull_message(token))
            .await
    }

    async fn push_message(&self, token: &Token, message: Message) -> ExchangeResult<()> {
        self.policy
            .run("push_message", || {
                self.inner.push_message(token, message.clone())
            })
            .await
    }
}
