//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, validate), and their associated argument structs.
//! Every tuning flag has an environment variable equivalent for container
//! deployments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::controller::{ContentionPolicy, ControllerSettings};

#[derive(Parser)]
#[command(
    name = "proxyhost",
    version,
    about = "Embedded reverse proxy with a hot-reloadable lifecycle",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        proxyhost validate proxy.yaml              Check a config file\n  \
        proxyhost run -c proxy.yaml                Serve and reload on change\n  \
        proxyhost run -c proxy.yaml -e env.json    Serve with an environment overlay"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the engine and reload it whenever the config file changes
    Run(Box<RunArgs>),

    /// Validate a config file without binding anything
    Validate(ValidateArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        proxyhost run -c proxy.yaml                        Serve proxy.yaml\n  \
        proxyhost run -c proxy.yaml --pretty               Local dev mode\n  \
        proxyhost run -c proxy.json --drain-timeout-ms 2000  Short drain on stop")]
pub struct RunArgs {
    /// Config file path (.json, .yaml, .toml)
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: PathBuf,

    /// Environment overlay file (flat JSON object of string to string)
    #[arg(short, long, env = "ENV_FILE")]
    pub env_file: Option<PathBuf>,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,

    // -- Tuning --
    /// Grace period for in-flight connections on stop and listener removal
    #[arg(
        long,
        env = "DRAIN_TIMEOUT_MS",
        default_value_t = 10_000,
        help_heading = "Tuning"
    )]
    pub drain_timeout_ms: u64,

    /// Upper bound for applying a reload before it is rolled back
    #[arg(
        long,
        env = "RELOAD_TIMEOUT_MS",
        default_value_t = 30_000,
        help_heading = "Tuning"
    )]
    pub reload_timeout_ms: u64,

    /// Config file poll interval in seconds
    #[arg(
        long,
        env = "POLL_INTERVAL_SECS",
        default_value_t = 5,
        help_heading = "Tuning"
    )]
    pub poll_interval: u64,

    /// Fail overlapping lifecycle calls instead of queueing them
    #[arg(long, help_heading = "Tuning")]
    pub reject_concurrent: bool,
}

impl RunArgs {
    #[must_use]
    pub const fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            drain_grace: Duration::from_millis(self.drain_timeout_ms),
            reload_timeout: Duration::from_millis(self.reload_timeout_ms),
            contention: if self.reject_concurrent {
                ContentionPolicy::Reject
            } else {
                ContentionPolicy::Queue
            },
        }
    }
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Config file to validate
    #[arg(default_value = "proxyhost.yaml")]
    pub config: PathBuf,

    /// Environment overlay used to resolve `{env.NAME}` placeholders
    #[arg(short, long, env = "ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}
