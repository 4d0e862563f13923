//! proxyhost is a lifecycle controller for an embedded reverse proxy.
//!
//! A host hands it a JSON configuration (listeners, routes, upstreams,
//! middleware) and drives the engine through start, stop, reload and
//! environment staging. Reloads are applied as a diff: unchanged
//! listeners keep their sockets and connections, and a failed reload
//! rolls back to the previous configuration.
//!
//! # Architecture
//!
//! - [`bridge`] -- Text-in, text-out boundary for embedding hosts, plus an
//!   owned [`Bridge`](bridge::Bridge) with its own runtime.
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, validate).
//! - [`config`] -- Raw model, translation, validation, diffing, and
//!   file-backed sources via the [`ConfigSource`](config::ConfigSource) trait.
//! - [`controller`] -- The lifecycle state machine serializing every operation.
//! - [`engine`] -- The [`ProxyEngine`](engine::ProxyEngine) trait and the
//!   hyper/Tokio implementation with drainable listeners.
//! - [`environment`] -- Staged environment overlay and `{env.NAME}` expansion.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`events`] -- Broadcast stream of lifecycle transitions.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`proxy`] -- Request handling: route matching, middleware, header
//!   construction, and upstream forwarding.
//! - [`state`] -- Engine states and the operations each one accepts.
//! - [`status`] -- Status record, snapshots, and the watch-based reporter.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `toml` | TOML config file support |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

#![allow(clippy::missing_errors_doc)]

pub mod bridge;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod controller;
pub mod engine;
pub mod environment;
pub mod error;
pub mod events;
pub mod logging;
pub mod proxy;
pub mod state;
pub mod status;
