use anyhow::Result;
use assetcache::config::Config;
use tracing::info;

use super::build_cacher;

pub async fn cache_once(
    config: Config,
    url: String,
    session: Option<u64>,
    script: bool,
) -> Result<()> {
    let handle = build_cacher(&config).await?;
    let cacher = handle.cacher;
    let mut errors = handle.errors;

    let collector = tokio::spawn(async move {
        let mut collected = Vec::new();
        while let Some(error) = errors.recv().await {
            collected.push(error);
        }
        collected
    });

    let submitted = match (script, session) {
        (true, _) => cacher.cache_script(&url).await,
        (false, Some(session_id)) => cacher.cache_session_asset(session_id, &url).await,
        (false, None) => anyhow::bail!("Either --session or --script is required"),
    };
    if !submitted {
        info!("Nothing submitted for {}", url);
    }

    cacher.wait_idle().await;
    cacher.shutdown().await;
    let stats = cacher.stats();
    drop(cacher);

    let errors = collector.await?;
    let snapshot = handle.metrics.snapshot();

    for error in &errors {
        println!("error: {}", error);
    }
    println!(
        "Saved {} assets ({} fetched, {} skipped as fresh, {} already in window)",
        snapshot.assets_saved, snapshot.downloads_total, stats.fresh_skipped, stats.dedup_skipped
    );

    if !errors.is_empty() {
        anyhow::bail!("{} assets failed to cache", errors.len());
    }
    Ok(())
}
