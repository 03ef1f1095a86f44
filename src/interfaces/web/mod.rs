mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::lifecycle::LifecycleComponent;
use crate::core::telemetry::Telemetry;

pub struct ApiServer {
    telemetry: Arc<Telemetry>,
    api_host: String,
    api_port: u16,
    allowed_origins: Vec<String>,
    shutdown: CancellationToken,
}

pub struct ApiServerConfig {
    pub telemetry: Arc<Telemetry>,
    pub api_host: String,
    pub api_port: u16,
    pub allowed_origins: Vec<String>,
    pub shutdown: CancellationToken,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) allowed_origins: Arc<Vec<String>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            telemetry: config.telemetry,
            api_host: config.api_host,
            api_port: config.api_port,
            allowed_origins: config.allowed_origins,
            shutdown: config.shutdown,
        }
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding API server to {}", addr))?;

        let state = AppState {
            telemetry: self.telemetry.clone(),
            allowed_origins: Arc::new(self.allowed_origins.clone()),
        };
        let app = router::build_api_router(state);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                tracing::error!("API Server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        self.shutdown.cancel();
        Ok(())
    }
}
