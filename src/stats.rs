use anyhow::Result;

use rag_retrieval_core::models::IndexHealth;

use crate::config::Config;
use crate::services::Services;

/// `status`: collection health plus the configured providers.
pub async fn run_status(config: &Config) -> Result<()> {
    let services = Services::from_config(config).await?;
    let status = services.index.status().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("RAG Retrieval: Index Status");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Collection:  {}", status.collection_name);
    println!("  Documents:   {}", status.document_count);
    match status.status {
        IndexHealth::Active => println!("  Status:      active"),
        IndexHealth::Error => println!(
            "  Status:      error ({})",
            status.error.as_deref().unwrap_or("unknown")
        ),
    }
    println!();
    println!("  Embedding:   {}", config.embedding.provider);
    println!("  Web search:  {}", config.web_search.provider);
    println!(
        "  Completion:  {} ({})",
        config.completion.provider, config.completion.deployment
    );

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
