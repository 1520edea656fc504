use super::require_config_path;
use super::run::open_storage;
use crate::config::load_config;
use crate::storage::{LogStats, MessageLog};
use std::path::PathBuf;
use tracing::info;

pub async fn stats(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    let config = load_config(&config_path)?;
    let storage = open_storage(&config).await?;

    let stats = storage.stats().await?;
    print!("{}", format_stats(&stats));
    Ok(())
}

pub async fn dedupe(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    let config = load_config(&config_path)?;
    let storage = open_storage(&config).await?;

    let removed = storage.remove_duplicates().await?;
    info!(removed, "Duplicate sweep finished");
    if removed == 0 {
        println!("No duplicate message rows found");
    } else {
        println!("Removed {} duplicate message rows", removed);
    }
    Ok(())
}

fn format_stats(stats: &LogStats) -> String {
    let mut out = String::new();
    out.push_str(&format!("Total messages: {}\n", stats.total_messages));

    out.push_str("\nMessages per channel:\n");
    if stats.channels.is_empty() {
        out.push_str("  (none)\n");
    }
    for channel in &stats.channels {
        let last = channel
            .last_ingested_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "  {:<24} {:>8} messages  max id {:>10}  last ingested {}\n",
            channel.source_name, channel.message_count, channel.max_message_id, last
        ));
    }

    out.push_str("\nWatermarks:\n");
    if stats.watermarks.is_empty() {
        out.push_str("  (none)\n");
    }
    for watermark in &stats.watermarks {
        out.push_str(&format!(
            "  {:<24} {:>10}  updated {}\n",
            watermark.source_name,
            watermark.last_message_id,
            watermark.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }

    out.push_str(&format!(
        "\nDuplicate message ids: {}\n",
        stats.duplicate_message_ids
    ));
    out
}
