//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`] or [`validate`]. Each handler lives in its
//! own submodule.

pub mod run;
pub mod validate;

use std::path::Path;

use crate::cli::{Cli, Commands};
use crate::environment::EnvironmentOverlay;
use crate::error::ProxyHostError;

pub async fn dispatch(cli: Cli) -> Result<(), ProxyHostError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Validate(ref args)) => validate::execute(args),
        None => {
            print_welcome();
            Ok(())
        }
    }
}

/// Read an environment overlay file, or an empty overlay when none is given.
pub(crate) fn read_env_file(path: Option<&Path>) -> Result<EnvironmentOverlay, ProxyHostError> {
    let Some(path) = path else {
        return Ok(EnvironmentOverlay::new());
    };
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProxyHostError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ProxyHostError::Io(e)
        }
    })?;
    EnvironmentOverlay::parse(&content)
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  proxyhost v{version}: embedded reverse proxy with a hot-reloadable lifecycle\n\n  \
         No command provided. To get started:\n\n    \
         proxyhost validate proxy.yaml       Check a config file\n    \
         proxyhost run -c proxy.yaml         Serve it, reloading on change\n    \
         proxyhost --help                    See all commands and options\n"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_file_argument_is_empty_overlay() {
        assert!(read_env_file(None).unwrap().is_empty());
    }

    #[test]
    fn env_file_is_parsed_as_flat_map() {
        let path = std::env::temp_dir().join(format!("proxyhost-env-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"PORT":"8080"}"#).unwrap();
        let overlay = read_env_file(Some(&path)).unwrap();
        assert_eq!(overlay.get("PORT"), Some("8080"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn absent_env_file_is_reported() {
        let err = read_env_file(Some(Path::new("/nonexistent/env.json"))).unwrap_err();
        assert!(matches!(err, ProxyHostError::ConfigFileNotFound { .. }));
    }
}
