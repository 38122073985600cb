//! Markdown rendering with HTML sanitization.

use bytes::Bytes;
use pulldown_cmark::{Options, Parser, html};

/// Markdown transform failure.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The source is not valid UTF-8.
    #[error("markdown conversion failed: source is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),
}

/// Render markdown to HTML and sanitize the result.
///
/// Scripts, event handlers, and other active content are removed; ordinary
/// formatting, links, images, and tables survive.
///
/// # Errors
///
/// Returns [`TransformError::Encoding`] if `source` is not UTF-8.
pub fn render_markdown(source: &[u8]) -> Result<Bytes, TransformError> {
    let text = std::str::from_utf8(source)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES;
    let mut rendered = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut rendered, Parser::new_ext(text, options));

    Ok(Bytes::from(ammonia::clean(&rendered)))
}
