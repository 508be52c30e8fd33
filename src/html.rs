//! HTML-to-text conversion shared by the enquiry parser and context enrichment.

use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>").unwrap()
});

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

/// Tags that end a visual line.
static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|tr|li|h[1-6]|table|section|article|dd|dt)\s*>").unwrap()
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

static INLINE_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());

/// Convert HTML to plain text.
///
/// Drops script/style blocks and comments, turns block-level closers into
/// newlines, removes remaining tags, decodes common entities, and collapses
/// runs of spaces. Blank lines are removed.
pub fn to_text(html: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(html, " ");
    let text = COMMENT.replace_all(&text, " ");
    let text = BLOCK_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, " ");
    let text = decode_entities(&text);

    text.lines()
        .map(|line| INLINE_SPACE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    // `&amp;` last so `&amp;lt;` stays a literal `&lt;`.
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
