//! Plain-text alternative derived from the rendered HTML.

use std::sync::LazyLock;

use regex::Regex;

use super::RenderError;

/// A URL running to the end of a line.
#[allow(clippy::expect_used, reason = "The pattern is a literal")]
static TRAILING_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+$").expect("Valid URL pattern"));

/// Convert `html` to text wrapped at `width` columns, keeping every URL on one line.
pub fn html_to_text(html: &str, width: usize) -> Result<String, RenderError> {
    let text = html2text::config::plain()
        .string_from_read(html.as_bytes(), width)
        .map_err(|e| RenderError::Text(e.to_string()))?;

    Ok(rejoin_urls(&text, width))
}

/// Remove the line breaks the wrapper inserted inside URLs.
///
/// The wrapper only breaks a word that is longer than the line, so a URL was split exactly
/// when its line fills all `width` columns. A continuation without spaces that again fills
/// the line carries on to the next one.
pub fn rejoin_urls(text: &str, width: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut continuing = false;

    for line in text.split_inclusive('\n') {
        let content = line.strip_suffix('\n').unwrap_or(line);
        out.push_str(content);

        let full = width > 0 && content.chars().count() >= width;
        let split = full
            && if continuing {
                !content.contains(char::is_whitespace)
            } else {
                TRAILING_URL.is_match(content)
            };

        continuing = split && line.ends_with('\n');
        if line.ends_with('\n') && !continuing {
            out.push('\n');
        }
    }

    out
}
