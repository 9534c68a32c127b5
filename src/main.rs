// src/main.rs

use anyhow::Result;
use crossing_confirm::replay::{find_replay_logs, replay_file};
use crossing_confirm::types::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("crossing_confirm={}", config.logging.level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚦 Crossing confirmation replay starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Window: depth={}, search_range={}, chooser={:?}, stride={}, jitter_threshold={:.2}",
        config.buffer.depth,
        config.confirmation.search_range,
        config.chooser.strategy,
        config.chooser.stride,
        config.chooser.jitter_threshold
    );

    let logs = find_replay_logs(&config.replay.input_dir)?;
    if logs.is_empty() {
        error!("No replay logs found in {}", config.replay.input_dir);
        return Ok(());
    }

    let mut failed = 0usize;
    for (idx, path) in logs.iter().enumerate() {
        info!("========================================");
        info!("Replaying {}/{}: {}", idx + 1, logs.len(), path.display());

        match replay_file(path, &config) {
            Ok(summary) => {
                info!("✓ Replay finished");
                info!("  Frames: {}", summary.frames);
                info!("  Confirmations: {}", summary.confirmations);
                info!(
                    "  Searches: {} confirmed, {} exhausted, {} abandoned",
                    summary.confirmed_steps, summary.exhausted_steps, summary.abandoned_steps
                );
                info!(
                    "  Analyzer calls: {} ({:.3} per frame)",
                    summary.analyzer_calls,
                    summary.analyzer_calls as f64 / summary.frames.max(1) as f64
                );
                info!("  Items written: {}", summary.items);
            }
            Err(e) => {
                failed += 1;
                error!("Replay of {} failed: {:#}", path.display(), e);
            }
        }
    }

    info!(
        "Done: {} log(s) replayed, {} failed",
        logs.len() - failed,
        failed
    );
    Ok(())
}
