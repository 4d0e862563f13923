//! `proxyhost validate`: check a configuration file for errors.
//!
//! Parses and translates the config file exactly as `start` would, with
//! placeholders resolved against the optional environment file, reporting
//! results in either human-readable text or machine-readable JSON format.
//! Nothing is bound.

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::config::sources::parse_config_str;
use crate::config::{translate, validation};
use crate::error::ProxyHostError;

pub fn execute(args: &ValidateArgs) -> Result<(), ProxyHostError> {
    let path = &args.config;

    if !path.exists() {
        return Err(ProxyHostError::ConfigFileNotFound { path: path.clone() });
    }

    let content = std::fs::read_to_string(path)?;
    let env = super::read_env_file(args.env_file.as_deref())?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let translated = parse_config_str(ext, &content, &path.display().to_string())
        .and_then(|raw| translate(&raw, &env));

    let config = match translated {
        Ok(config) => config,
        Err(ProxyHostError::ConfigValidation { errors }) => {
            match args.format {
                ValidateFormat::Text => {
                    eprintln!("\u{2717} {} has {} errors\n", path.display(), errors.len());
                    for error in &errors {
                        eprintln!("{error}");
                    }
                }
                ValidateFormat::Json => {
                    let json_errors: Vec<serde_json::Value> = errors
                        .iter()
                        .map(|e| {
                            serde_json::json!({
                                "field": e.field,
                                "message": e.message,
                                "suggestion": e.suggestion,
                            })
                        })
                        .collect();
                    println!(
                        "{}",
                        serde_json::json!({
                            "valid": false,
                            "errors": json_errors,
                        })
                    );
                }
            }
            return Err(ProxyHostError::ConfigValidation { errors });
        }
        Err(other) => return Err(other),
    };

    match args.format {
        ValidateFormat::Text => {
            println!(
                "\u{2713} {}",
                validation::format_validation_report(&path.display().to_string(), &config)
            );
        }
        ValidateFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "valid": true,
                    "listeners": config.listeners.len(),
                    "routes": config.routes.len(),
                    "version": config.version.as_str(),
                })
            );
        }
    }

    Ok(())
}
