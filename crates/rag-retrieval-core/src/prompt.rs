//! Grounded prompt construction.
//!
//! Builds the chat-completion message list for one turn:
//!
//! ```text
//! [system]    preamble + rendered context blocks (or a no-context notice)
//! [history]   the last `history_turns` prior turns, oldest first
//! [user]      query text, or text + inline images when images are attached
//! ```
//!
//! The message types serialize directly to the chat-completions wire shape.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, ContextDocument, Role};

/// Number of prior turns carried into a prompt.
pub const HISTORY_TURNS: usize = 10;

/// Media type declared on every inline image, whatever its real encoding.
pub const INLINE_IMAGE_MEDIA_TYPE: &str = "image/jpeg";

const PREAMBLE: &str = "You are a helpful healthcare AI assistant. You have access to relevant healthcare documents and information.

Please provide accurate, helpful responses based on the context provided. If the context doesn't contain enough information to answer the question, say so clearly.

If the user provides images, analyze them and provide relevant healthcare information based on what you see in the images.

Guidelines:
- Be accurate and evidence-based
- Use clear, accessible language
- Include relevant details from the context
- If you're uncertain about medical advice, recommend consulting healthcare professionals
- Always prioritize patient safety
- When analyzing images, describe what you see and provide relevant healthcare insights

Context Documents:
";

const NO_CONTEXT_NOTICE: &str =
    "\nNo specific context documents available. Please answer based on your general knowledge.\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<Role> for PromptRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => PromptRole::User,
            Role::Assistant => PromptRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One message sent to the completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: MessageContent,
}

impl PromptMessage {
    pub fn text(role: PromptRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// Render the system prompt for a context set.
///
/// Each document becomes a labelled block, in input order. A missing
/// title falls back to `Document {i}` and a missing source to `Unknown`.
pub fn system_prompt(context: &[ContextDocument]) -> String {
    let mut prompt = String::from(PREAMBLE);
    if context.is_empty() {
        prompt.push_str(NO_CONTEXT_NOTICE);
        return prompt;
    }

    for (i, doc) in context.iter().enumerate() {
        let n = i + 1;
        let title = doc
            .metadata
            .get("title")
            .map(|v| v.to_string())
            .unwrap_or_else(|| format!("Document {}", n));
        let source = doc
            .metadata
            .get("source")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        prompt.push_str(&format!("\n--- Document {}: {} ---\n", n, title));
        prompt.push_str(&format!("Source: {}\n", source));
        prompt.push_str(&format!("Content: {}\n", doc.content));
    }
    prompt
}

/// Strip any `data:...;base64,` prefix and re-wrap as a JPEG data URI.
pub fn inline_image_url(payload: &str) -> String {
    let data = payload.rsplit(',').next().unwrap_or(payload);
    format!("data:{};base64,{}", INLINE_IMAGE_MEDIA_TYPE, data)
}

/// Build the full message list for one completion call.
pub fn build_messages(
    query: &str,
    context: &[ContextDocument],
    history: &[ChatMessage],
    images: &[String],
    history_turns: usize,
) -> Vec<PromptMessage> {
    let skip = history.len().saturating_sub(history_turns);
    let mut messages = Vec::with_capacity(2 + history.len() - skip);

    messages.push(PromptMessage::text(PromptRole::System, system_prompt(context)));
    messages.extend(
        history[skip..]
            .iter()
            .map(|m| PromptMessage::text(m.role.into(), m.content.clone())),
    );

    let user = if images.is_empty() {
        PromptMessage::text(PromptRole::User, query)
    } else {
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::Text {
            text: query.to_string(),
        });
        parts.extend(images.iter().map(|img| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: inline_image_url(img),
            },
        }));
        PromptMessage {
            role: PromptRole::User,
            content: MessageContent::Parts(parts),
        }
    };
    messages.push(user);
    messages
}

struct ImagePatterns {
    bare_url: Regex,
    markdown: Regex,
}

static IMAGE_PATTERNS: OnceLock<ImagePatterns> = OnceLock::new();

fn image_patterns() -> &'static ImagePatterns {
    IMAGE_PATTERNS.get_or_init(|| ImagePatterns {
        bare_url: Regex::new(r"(?i)https?://[^\s]+\.(?:jpg|jpeg|png|gif|webp|svg)")
            .expect("bare image url regex must compile"),
        markdown: Regex::new(r"(?i)!\[.*?\]\((.*?)\)").expect("markdown image regex must compile"),
    })
}

/// Best-effort scan of generated text for image references.
///
/// Matches bare image URLs and markdown image targets, deduplicated in
/// first-seen order. Heuristic: neither exhaustive nor precise.
pub fn extract_image_refs(text: &str) -> Vec<String> {
    let patterns = image_patterns();
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    let bare = patterns.bare_url.find_iter(text).map(|m| m.as_str());
    let markdown = patterns
        .markdown
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()));

    for candidate in bare.chain(markdown) {
        if seen.insert(candidate) {
            refs.push(candidate.to_string());
        }
    }
    refs
}
