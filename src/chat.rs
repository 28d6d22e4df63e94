use anyhow::{bail, Result};
use futures::StreamExt;
use std::io::Write;

use rag_retrieval_core::generation::{ChatRequest, StreamEvent};
use rag_retrieval_core::models::ContextDocument;

use crate::config::Config;
use crate::services::Services;

/// `chat <query>`: one grounded answer, optionally streamed token by token.
pub async fn run_chat(config: &Config, query: &str, stream: bool, no_web: bool) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }

    let services = Services::from_config(config).await?;
    let mut request = ChatRequest::new(query);
    request.use_web_fallback = !no_web;

    if !stream {
        let answer = services.chat.answer(&request).await?;
        println!("{}", answer.response);
        println!();
        print_sources(&answer.context_documents, answer.used_web_fallback);
        return Ok(());
    }

    let mut events = services.chat.clone().stream(request);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Metadata(_) | StreamEvent::Start(_) => {}
            StreamEvent::Content(token) => {
                print!("{}", token);
                stdout.flush()?;
            }
            StreamEvent::Complete(done) => {
                println!();
                println!();
                print_sources(&done.context_documents, done.used_web_fallback);
            }
            StreamEvent::Error(failure) => {
                println!();
                bail!("{}", failure.error);
            }
        }
    }
    Ok(())
}

fn print_sources(context: &[ContextDocument], used_web_fallback: bool) {
    if context.is_empty() {
        println!("Sources: none");
        return;
    }
    println!(
        "Sources{}:",
        if used_web_fallback {
            " (with web fallback)"
        } else {
            ""
        }
    );
    for (i, doc) in context.iter().enumerate() {
        let title = doc
            .metadata
            .get("title")
            .map(|t| t.to_string())
            .unwrap_or_else(|| format!("Document {}", i + 1));
        println!("  {}. [{:.2}] {} ({})", i + 1, doc.similarity_score, title, doc.source.as_str());
    }
}
