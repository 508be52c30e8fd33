//! Phone number normalization to E.164.
//!
//! Used by both the dispatcher (before placing a call) and the reconciler
//! (to resolve the contact a report belongs to), so both sides must agree.

use tracing::warn;

use crate::config::PhoneConfig;

/// Deterministic E.164 normalizer for one national numbering plan.
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    config: PhoneConfig,
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new(PhoneConfig::default())
    }
}

impl PhoneNormalizer {
    pub fn new(config: PhoneConfig) -> Self {
        Self { config }
    }

    /// Country prefix including `+`.
    pub fn country_prefix(&self) -> &str {
        &self.config.country_prefix
    }

    /// Normalize a raw number.
    ///
    /// - separators (whitespace, `-`, `(`, `)`, `.`) are removed
    /// - `+0…` drops the `+` and is treated as a national number
    /// - `0…` replaces the trunk `0` with the country prefix
    /// - bare country digits followed by a full national number gain a `+`
    /// - anything else without `+` gets the country prefix prepended
    /// - `+…` is left unchanged
    ///
    /// `normalize(normalize(x)) == normalize(x)` for every input.
    pub fn normalize(&self, raw: &str) -> String {
        let mut number: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '.'))
            .collect();

        if number.is_empty() {
            return number;
        }

        if number.starts_with("+0") {
            number.remove(0);
        }

        let cc_digits = self.country_digits();
        if let Some(national) = number.strip_prefix('0') {
            format!("{}{}", self.config.country_prefix, national)
        } else if number.starts_with('+') {
            number
        } else if number.starts_with(cc_digits)
            && number.len() == cc_digits.len() + self.config.national_max_digits
        {
            format!("+{number}")
        } else {
            format!("{}{}", self.config.country_prefix, number)
        }
    }

    /// Whether a normalized number's national part has a plausible length.
    /// Numbers in other country codes are not judged.
    pub fn has_plausible_length(&self, normalized: &str) -> bool {
        match normalized.strip_prefix(self.config.country_prefix.as_str()) {
            Some(national) => {
                let digits = national.chars().filter(char::is_ascii_digit).count();
                (self.config.national_min_digits..=self.config.national_max_digits)
                    .contains(&digits)
            }
            None => true,
        }
    }

    /// Normalize and log (never reject) suspicious lengths.
    pub fn normalize_checked(&self, raw: &str) -> String {
        let normalized = self.normalize(raw);
        if !self.has_plausible_length(&normalized) {
            warn!(raw = raw.trim(), normalized = %normalized, "Suspicious phone number length");
        }
        if !normalized.starts_with(self.config.country_prefix.as_str()) {
            warn!(normalized = %normalized, "Phone number outside the configured country");
        }
        normalized
    }

    fn country_digits(&self) -> &str {
        self.config.country_prefix.trim_start_matches('+')
    }
}
