use anyhow::{Context, Result};
use assetcache::config::Config;
use std::path::Path;

pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "'{}' already exists (use --force to overwrite)",
            path.display()
        );
    }

    let content = format!(
        "# assetcache configuration\n#\n# [cacher] assets_origin and max_storage_age_secs are required.\n\n{}",
        Config::default().to_toml()?
    );
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write '{}'", path.display()))?;

    println!("Configuration written to {}", path.display());
    Ok(())
}
