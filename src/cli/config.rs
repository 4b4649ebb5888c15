use crate::config::generate::generate_starter_config;
use crate::config::{user_config_path, SYSTEM_CONFIG};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let content = generate_starter_config();
    if stdout {
        print!("{}", content);
        return Ok(());
    }

    let path = user_config_path().unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG));
    let written = write_config(&content, &path)?;
    println!("Config file written to {}", written.display());
    Ok(())
}

/// Writes `content` to `path` unless a file is already there.
pub fn write_config(content: &str, path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(path.to_path_buf())
}
