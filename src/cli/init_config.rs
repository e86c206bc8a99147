//! `courier init-config` — write a starter configuration.

use super::config::CourierConfig;
use std::path::PathBuf;

pub fn execute(path: Option<String>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => CourierConfig::default_path()?,
    };

    if path.exists() && !force {
        return Err(format!(
            "Config file already exists at {} (use --force to overwrite)",
            path.display()
        )
        .into());
    }

    let config = CourierConfig::generate(&path)?;
    config.save(&path)?;

    println!("Wrote config to {}", path.display());
    println!("Session database: {}", config.database.path.display());
    println!();
    println!("A random session key was generated. Back it up: losing it");
    println!("orphans every stored credential set and forces re-pairing.");
    Ok(())
}
