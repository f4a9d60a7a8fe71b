//! JSON-RPC Server
//!
//! Serves the Control API over HTTP/WebSocket on a TCP address.

use crate::handler::RpcHandler;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::error::INVALID_PARAMS_CODE;
use jsonrpsee::types::{ErrorObjectOwned, Params};
use jsonrpsee::RpcModule;
use kairos_core::application::ControlService;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9527;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcServerError {
    #[error("Failed to build server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to register method {method}: {reason}")]
    Register { method: &'static str, reason: String },
}

/// Missing params are read as `{}` so every request type with only optional
/// fields can be called without params.
fn parse_params<P: DeserializeOwned>(params: Params<'_>) -> Result<P, ErrorObjectOwned> {
    if params.as_str().is_none() {
        return serde_json::from_str("{}").map_err(|e| {
            ErrorObjectOwned::owned(INVALID_PARAMS_CODE, e.to_string(), None::<()>)
        });
    }
    params.parse()
}

fn register<P, T, F, Fut>(
    module: &mut RpcModule<()>,
    method: &'static str,
    handler: &Arc<RpcHandler>,
    call: F,
) -> Result<(), RpcServerError>
where
    P: DeserializeOwned + Send + 'static,
    T: Serialize + Clone + 'static,
    F: Fn(Arc<RpcHandler>, P) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ErrorObjectOwned>> + Send + 'static,
{
    let handler = handler.clone();
    module
        .register_async_method(method, move |params, _, _| {
            let handler = handler.clone();
            let call = call.clone();
            async move {
                let req: P = parse_params(params)?;
                call(handler, req).await
            }
        })
        .map_err(|e| RpcServerError::Register {
            method,
            reason: e.to_string(),
        })?;
    Ok(())
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, control: Arc<ControlService>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(control)),
        }
    }

    fn module(&self) -> Result<RpcModule<()>, RpcServerError> {
        let mut module = RpcModule::new(());
        let m = &mut module;
        let h = &self.handler;

        register(m, "jobs.create.v1", h, |h, req| async move { h.create_job(req).await })?;
        register(m, "jobs.get.v1", h, |h, req| async move { h.get_job(req).await })?;
        register(m, "jobs.list.v1", h, |h, req| async move { h.list_jobs(req).await })?;
        register(m, "jobs.count.v1", h, |h, req| async move { h.count_jobs(req).await })?;
        register(m, "jobs.update.v1", h, |h, req| async move { h.update_job(req).await })?;
        register(m, "jobs.delete.v1", h, |h, req| async move { h.delete_job(req).await })?;
        register(m, "jobs.schedule.v1", h, |h, req| async move { h.schedule_job(req).await })?;
        register(m, "jobs.execute_now.v1", h, |h, req| async move { h.execute_now(req).await })?;
        register(m, "jobs.cancel.v1", h, |h, req| async move { h.cancel_job(req).await })?;
        register(m, "jobs.history.v1", h, |h, req| async move { h.history(req).await })?;
        register(m, "jobs.ready.v1", h, |h, req| async move { h.ready(req).await })?;
        register(m, "jobs.timed_out.v1", h, |h, req| async move { h.timed_out(req).await })?;
        register(m, "jobs.retry_ready.v1", h, |h, req| async move { h.retry_ready(req).await })?;
        register(m, "stats.overall.v1", h, |h, req| async move { h.stats_overall(req).await })?;
        register(m, "stats.by_type.v1", h, |h, req| async move { h.stats_by_type(req).await })?;
        register(m, "admin.reset_breakers.v1", h, |h, req| async move {
            h.reset_breakers(req).await
        })?;
        register(m, "admin.cleanup.v1", h, |h, req| async move { h.cleanup(req).await })?;
        register(m, "admin.archive.v1", h, |h, req| async move { h.archive(req).await })?;
        register(m, "admin.health.v1", h, |h, req| async move { h.health(req).await })?;

        Ok(module)
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the bound address (useful with port 0) and the handle used to stop it.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), RpcServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let module = self.module()?;

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|source| RpcServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = server.local_addr().map_err(|source| RpcServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

        info!(
            addr = %local_addr,
            methods = crate::METHODS.len(),
            "JSON-RPC server started"
        );

        Ok((local_addr, server.start(module)))
    }
}
