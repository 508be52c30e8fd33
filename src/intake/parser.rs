//! Enquiry parser: forwarded lead email → name, phone, listing link.
//!
//! Two tiers: labelled lines (`Name:`, `Phone:`, `Link:` and synonyms) are
//! read first; anything still missing falls back to a regional phone pattern
//! and a listing-site URL pattern. Fails closed when phone or link is absent.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::html;

/// Placeholder used when the enquiry carries no name.
pub const DEFAULT_CUSTOMER_NAME: &str = "Customer";

/// A parsed lead. Consumed once by the pipeline; never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enquiry {
    pub name: String,
    pub phone: String,
    pub reference_link: String,
}

static NAME_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:name|lead\s*name|contact\s*name|customer\s*name)\s*[:=]").unwrap()
});

static PHONE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:phone|contact\s*number|number|tel|cell|mobile)\s*[:=]").unwrap()
});

static LINK_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:link|vehicle\s*link|url|car\s*link|listing|advert)\s*[:=]").unwrap()
});

/// `0…`, `+27…` or `27…` followed by 8–12 digits/separators and a final digit.
static PHONE_FALLBACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\+27|0|27)\s*[\d\s\-]{8,12}\d").unwrap());

/// Listing URLs on the supported classifieds sites, scheme optional.
static LINK_FALLBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:https?://)?(?:www\.)?(?:autotrader\.co\.za|cars\.co\.za)/[^\s<>"']+"#)
        .unwrap()
});

/// Minimum length of a fallback phone match once whitespace is removed.
const MIN_FALLBACK_PHONE_LEN: usize = 10;

#[derive(Default)]
struct Labelled {
    name: Option<String>,
    phone: Option<String>,
    link: Option<String>,
}

/// Parse an enquiry from a plain-text body and/or an HTML body.
///
/// Returns `None` when either the phone or the link cannot be found.
pub fn parse_enquiry(text: &str, html_body: Option<&str>) -> Option<Enquiry> {
    let html_text = html_body.map(html::to_text).unwrap_or_default();
    let combined = [text.trim(), html_text.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let labelled = extract_labelled(&combined);

    let phone = labelled
        .phone
        .or_else(|| phone_fallback(&combined))
        .map(|p| strip_whitespace(&p))
        .filter(|p| !p.is_empty())?;

    let link = labelled
        .link
        .or_else(|| link_fallback(&combined))
        .filter(|l| !l.is_empty())?;

    let name = labelled
        .name
        .unwrap_or_else(|| DEFAULT_CUSTOMER_NAME.to_string());

    Some(Enquiry {
        name,
        phone,
        reference_link: with_scheme(&link),
    })
}

fn extract_labelled(text: &str) -> Labelled {
    let mut out = Labelled::default();
    for line in text.lines() {
        let line = line.trim();
        if out.name.is_none() {
            if let Some(v) = label_value(&NAME_LABEL, line) {
                out.name = Some(v);
                continue;
            }
        }
        if out.phone.is_none() {
            if let Some(v) = label_value(&PHONE_LABEL, line) {
                out.phone = Some(v);
                continue;
            }
        }
        if out.link.is_none() {
            if let Some(v) = label_value(&LINK_LABEL, line) {
                out.link = Some(v);
            }
        }
    }
    out
}

/// Value after a matching label, if non-empty.
fn label_value(label: &Regex, line: &str) -> Option<String> {
    let m = label.find(line)?;
    let value = line[m.end()..].trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn phone_fallback(text: &str) -> Option<String> {
    PHONE_FALLBACK
        .find_iter(text)
        .map(|m| strip_whitespace(m.as_str()))
        .find(|p| p.len() >= MIN_FALLBACK_PHONE_LEN)
}

fn link_fallback(text: &str) -> Option<String> {
    LINK_FALLBACK.find(text).map(|m| {
        m.as_str()
            .trim_end_matches(['.', ',', ';', ':', ')', '!', '?'])
            .to_string()
    })
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn with_scheme(link: &str) -> String {
    let lower = link.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        link.to_string()
    } else {
        format!("https://{link}")
    }
}
