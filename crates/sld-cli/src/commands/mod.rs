//! Command handler modules for the `sld` CLI.
//!
//! Small handlers live here; anything with its own state gets a submodule.

pub mod db;
pub mod orders;
pub mod sim;

use anyhow::{Context, Result};

/// `sld config show`: hash of the file layers plus the typed, redacted view
/// after env overrides.
pub fn config_show(paths: &[String]) -> Result<()> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let (cfg, loaded) = sld_config::load_app_config(&path_refs)?;

    println!("config_hash={}", loaded.config_hash);
    let pretty = serde_json::to_string_pretty(&cfg.redacted()).context("config serialize failed")?;
    println!("{pretty}");
    Ok(())
}
