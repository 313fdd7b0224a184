//! Markdown to HTML conversion for message bodies.
//!
//! Every body, whether typed by the user or produced by the assistant, is
//! untrusted. It is converted with GitHub flavoured markdown and then passed
//! through a fixed allow-list before it is allowed anywhere near a document.

use ammonia::Builder;
use once_cell::sync::Lazy;
use pulldown_cmark::{ html, Event, Options, Parser };
use regex::Regex;
use std::collections::{ HashMap, HashSet };
use std::fmt;
use thiserror::Error;

pub const ALLOWED_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "a", "ul", "ol", "li",
    "strong", "em", "code", "pre", "blockquote", "br", "hr", "span",
];

/// `rel` is also permitted on links but is always written by the sanitizer.
pub const ALLOWED_ATTRIBUTES: &[&str] = &["href", "target", "class"];

pub const LINK_REL: &str = "noopener noreferrer";

const URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

pub const PREVIEW_CHARS: usize = 60;
pub const EMPTY_PREVIEW: &str = "New conversation";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("markdown formatting failed")]
    Format(#[from] fmt::Error),
}

static SANITIZER: Lazy<Builder<'static>> = Lazy::new(|| {
    let mut builder = Builder::default();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect::<HashSet<_>>())
        .tag_attributes(HashMap::new())
        .generic_attributes(ALLOWED_ATTRIBUTES.iter().copied().collect::<HashSet<_>>())
        .url_schemes(URL_SCHEMES.iter().copied().collect::<HashSet<_>>())
        .link_rel(Some(LINK_REL));
    builder
});

fn markdown_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

/// Converts markdown to a sanitized HTML fragment. Single newlines become
/// `<br>` as they would in a chat bubble.
pub fn render_markdown(text: &str) -> Result<String, RenderError> {
    let parser = Parser::new_ext(text, markdown_options()).map(|event| match event {
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });
    let mut raw_html = String::with_capacity(text.len() * 3 / 2);
    html::write_html_fmt(&mut raw_html, parser)?;
    Ok(SANITIZER.clean(&raw_html).to_string())
}

/// Like [`render_markdown`] but never fails: on error the escaped source
/// text is used instead.
pub fn render_or_raw(text: &str) -> String {
    match render_markdown(text) {
        Ok(rendered) => rendered,
        Err(e) => {
            log::error!("Markdown processing error: {}", e);
            ammonia::clean_text(text)
        }
    }
}

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("bold pattern"));
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").expect("italic pattern"));
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.*?)\]\(.*?\)").expect("link pattern"));
static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("code pattern"));

/// One-line plain text summary of a conversation's latest message.
pub fn preview(message: Option<&str>) -> String {
    let message = match message {
        Some(m) if !m.is_empty() => m,
        _ => {
            return EMPTY_PREVIEW.to_string();
        }
    };

    let stripped = BOLD.replace_all(message, "$1");
    let stripped = ITALIC.replace_all(&stripped, "$1");
    let stripped = LINK.replace_all(&stripped, "$1");
    let stripped = CODE_BLOCK.replace_all(&stripped, "[Code Block]");

    let mut out: String = stripped.chars().take(PREVIEW_CHARS).collect();
    if stripped.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}
