//! JSON-RPC API Layer
//!
//! Exposes the Kairos Control API as JSON-RPC 2.0 methods (`<area>.<verb>.v1`).

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig, RpcServerError};

/// Every method the server registers
pub const METHODS: &[&str] = &[
    "jobs.create.v1",
    "jobs.get.v1",
    "jobs.list.v1",
    "jobs.count.v1",
    "jobs.update.v1",
    "jobs.delete.v1",
    "jobs.schedule.v1",
    "jobs.execute_now.v1",
    "jobs.cancel.v1",
    "jobs.history.v1",
    "jobs.ready.v1",
    "jobs.timed_out.v1",
    "jobs.retry_ready.v1",
    "stats.overall.v1",
    "stats.by_type.v1",
    "admin.reset_breakers.v1",
    "admin.cleanup.v1",
    "admin.archive.v1",
    "admin.health.v1",
];
