use std::path::Path;

use certhop_core::Configuration;
use certhop_core::client::validate_domains;
use tracing::info;

/// Read the store settings file; no file means the in-process memory store
fn load_store(path: Option<&Path>) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(serde_json::Value::Null);
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn run(
    email: Option<String>,
    store: Option<&Path>,
    output: Option<&Path>,
    domains: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    validate_domains(&domains)?;
    let store = load_store(store)?;

    let configuration = Configuration::generate(email, store, domains)?;
    configuration.store_config()?;

    match output {
        Some(path) => {
            configuration.save(path)?;
            info!(path = %path.display(), "Wrote configuration");
        }
        None => println!("{}", configuration.to_json_pretty()?),
    }
    Ok(())
}
