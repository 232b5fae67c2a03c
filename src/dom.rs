//! Structural HTML queries over portal pages
//!
//! The contract is "first matching value or none": callers treat a missing
//! node and an unparseable document the same way.

use scraper::{Html, Selector};

/// Return the named attribute of the first element matching `css`.
pub fn first_attr(html: &str, css: &str, attr: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .next()?
        .value()
        .attr(attr)
        .map(str::to_string)
}

/// Return the trimmed text content of the first element matching `css`.
/// Whitespace-only text counts as absent.
pub fn first_text(html: &str, css: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(css).ok()?;
    let text = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
