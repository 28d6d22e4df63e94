use anyhow::Result;

use rag_retrieval_core::models::SearchResult;

use crate::config::Config;
use crate::services::Services;

const EXCERPT_CHARS: usize = 200;

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f64>,
    no_web: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let services = Services::from_config(config).await?;
    let limit = limit.unwrap_or(services.search_limit);
    let threshold = threshold.unwrap_or(services.search_threshold);

    let response = services
        .retriever
        .search(query, limit, threshold, !no_web)
        .await?;

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in response.results.iter().enumerate() {
        print_result(i + 1, result);
    }

    println!(
        "{} result(s){}",
        response.total_found,
        if response.used_web_fallback {
            ", including web fallback"
        } else {
            ""
        }
    );
    Ok(())
}

fn print_result(rank: usize, result: &SearchResult) {
    let doc = &result.document;
    println!(
        "{}. [{:.2}] {} / {}",
        rank,
        result.similarity_score,
        result.source.as_str(),
        doc.title().unwrap_or("(untitled)")
    );
    println!("    source: {}", doc.source);
    if let Some(url) = doc.metadata.get("url") {
        println!("    url: {}", url);
    }
    println!("    excerpt: \"{}\"", excerpt(&doc.content));
    println!("    id: {}", doc.id);
    println!();
}

fn excerpt(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat.to_string(),
    }
}
