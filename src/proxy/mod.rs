//! HTTP proxy in front of the decision pipeline.
//!
//! # Endpoints
//!
//! | Endpoint         | Method | Description                           |
//! |------------------|--------|---------------------------------------|
//! | `/api/proxy`     | POST   | Run a tool call through the pipeline  |
//! | `/api/register`  | POST   | Register an agent, returns its key    |
//! | `/api/threats`   | GET    | Threat feed (`?limit=&type=`)         |
//! | `/api/stats`     | GET    | Totals across all agents              |
//! | `/health`        | GET    | Health check                          |
//! | `/metrics`       | GET    | Decision counts and latencies         |
//! | `/metrics/reset` | POST   | Reset process metrics                 |
//!
//! Agents authenticate with `Authorization: Bearer <api key>`. Every
//! `/api/proxy` response carries `ok`, a stable `code` and, on refusal, a
//! `message`.

mod server;
mod stats;

pub use server::{ProxyConfig, ProxyServer};
pub use stats::{Percentiles, ProxyStats, StatsSummary};
