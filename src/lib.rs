//! # wharfgate
//!
//! **On-Demand Package-Registry Runtime Proxy**
//!
//! A reverse proxy that fronts package registries (npm, pip) and, per
//! request, materializes an ephemeral container instance to serve it.
//! State-changing client actions (`npm publish`, `npm adduser`) get their
//! serving container's mutated filesystem captured as a new image and
//! pushed to a backing registry. Everything else proxies unchanged to a
//! default upstream.
//!
//! # Architecture Overview
//!
//! ```text
//!  client ──▶ ProxyServer ──▶ ParserChain ──▶ ScheduleDriver
//!                │                                  │
//!                │                            SchedulePolicy
//!                │                                  ▼
//!                │                             Scheduler ──▶ RuntimePool
//!                │                                  │        ImageStore
//!                │                              Executor ──▶ ContainerEngine
//!                ▼                                             (docker CLI)
//!          upstream container
//!                │
//!                └─ response ──▶ (async) Packer rebuild, idle marking
//! ```
//!
//! Background: the scheduler runs two sweepers — one idle-evicts pooled
//! runtimes, one expires cached session images — each terminated through
//! a two-signal shutdown (shared cancellation plus a private exit token
//! acknowledged on a completion channel).
//!
//! # Request Lifecycle
//!
//! 1. The parser chain classifies the request (npm, pip, or default) and
//!    extracts command metadata from headers, path, and selected bodies.
//! 2. The registry's schedule driver maps the metadata to a policy:
//!    image, tag, reuse identity, ports, env, and an optional rebuild
//!    plan.
//! 3. The scheduler reuses a live pooled instance for the policy's
//!    identity, or launches one and readiness-probes it.
//! 4. The proxy rewrites the request URL to the instance and forwards.
//! 5. On response, detached tasks mark the instance idle (delayed) and,
//!    for successful state-changing requests, commit and push the
//!    container's new state.
//!
//! # Reuse Keys
//!
//! Live instances are addressed as `"<registry-type>:<identity>"`, where
//! the identity is an npm session ID, a pip package name, or — when a
//! request carries no reuse identity — the container ID itself, so the
//! sweeper can always reach the instance.

pub mod api;
pub mod config;
pub mod constants;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod image_store;
pub mod packer;
pub mod parser;
pub mod pool;
pub mod proxy;
pub mod schedule;
pub mod scheduler;

pub use config::Config;
pub use error::{Error, Result};
pub use proxy::{AppState, ProxyServer};
pub use scheduler::{Scheduler, ServeEnvironment};
