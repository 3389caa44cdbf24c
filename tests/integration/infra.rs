use anyhow::{Context as _, Result};
use bytes::Bytes;
use serde_json::Value;
use tokio::task::JoinHandle;

use leasehold_api::ApiState;
use leasehold_core::config::LeaseholdConfig;
use leasehold_core::wire::RegisterRunRequest;
use leasehold_core::{Context, Run, RunId};
use leasehold_services::ExchangeService;
use libleasehold::ExchangeClient;

// ── Daemon ────────────────────────────────────────────────────────────────────

/// A daemon serving on `127.0.0.1:<random>`.
pub struct TestDaemon {
    pub service: ExchangeService,
    pub base: String,
    pub shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    server: JoinHandle<()>,
}

impl TestDaemon {
    pub async fn start() -> Result<Self> {
        Self::start_with(LeaseholdConfig::default()).await
    }

    pub async fn with_ttl(ttl_secs: u64) -> Result<Self> {
        let mut config = LeaseholdConfig::default();
        config.lease.ttl_secs = ttl_secs;
        Self::start_with(config).await
    }

    pub async fn start_with(config: LeaseholdConfig) -> Result<Self> {
        let service = ExchangeService::new(&config);
        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
        let state = ApiState {
            service: service.clone(),
            shutdown_tx,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind test listener")?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let _ = leasehold_api::serve_listener(state, listener).await;
        });

        Ok(Self {
            service,
            base: format!("http://{}/api", addr),
            shutdown_rx,
            server,
        })
    }

    pub fn client(&self) -> ExchangeClient {
        ExchangeClient::new(self.base.clone())
    }

    /// Register a run through the admin API.
    pub async fn register(&self, run_id: RunId, context: Option<Context>) -> Result<Run> {
        let req = RegisterRunRequest {
            run_id: Some(run_id),
            fab_id: "acme/echo".into(),
            fab_version: "1.0.0".into(),
            fab_content: Bytes::from_static(b"fab-bytes"),
            override_config: Default::default(),
            context,
        };
        let resp = reqwest::Client::new()
            .post(format!("{}/admin/runs", self.base))
            .json(&req)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn get(&self, path: &str) -> Result<(u16, Value)> {
        let resp = reqwest::Client::new()
            .get(format!("{}{}", self.base, path))
            .send()
            .await?;
        let status = resp.status().as_u16();
        Ok((status, resp.json().await?))
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<(u16, Value)> {
        let resp = reqwest::Client::new()
            .post(format!("{}{}", self.base, path))
            .json(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        Ok((status, resp.json().await?))
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Context carrying `state` for `run_id`.
pub fn context(run_id: RunId, state: Value) -> Context {
    Context {
        run_id,
        state,
        ..Context::default()
    }
}
