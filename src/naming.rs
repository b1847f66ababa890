//! Content-derived labels for segments.

use chrono::Utc;
use regex::Regex;

use crate::config::{ConfigError, NamingConfig, Script};
use crate::recognition::TextExtractor;
use crate::segment::{Segment, Separator};

/// Maximum label length in characters.
const MAX_LABEL_CHARS: usize = 100;

struct CompiledPattern {
    name: String,
    regex: Regex,
}

/// Where a label came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSource {
    /// Captured by the named pattern.
    Pattern(String),
    /// `{code}_{index}` fallback.
    Fallback,
}

/// A sanitized, non-empty label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedLabel {
    pub label: String,
    pub source: LabelSource,
}

/// Derives filesystem-safe labels from a segment's first page.
///
/// Patterns are tried in configuration order and the first match wins, so an
/// earlier pattern shadows any later one matching the same text. Labels are
/// not unique across segments.
pub struct NameDeriver {
    patterns: Vec<CompiledPattern>,
    scripts: Vec<Script>,
    absent_code: String,
}

impl NameDeriver {
    pub fn new(config: &NamingConfig) -> Result<Self, ConfigError> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                Regex::new(&p.regex)
                    .map(|regex| CompiledPattern {
                        name: p.name.clone(),
                        regex,
                    })
                    .map_err(|source| ConfigError::InvalidPattern {
                        name: p.name.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            patterns,
            scripts: config.scripts.clone(),
            absent_code: config.no_separator_code.clone(),
        })
    }

    /// Label for segment `index` (0-based) of a document.
    pub fn derive_label(
        &self,
        text: &TextExtractor,
        segment: &Segment,
        index: usize,
        separator: &Separator,
    ) -> DerivedLabel {
        let page_text = text.extract_best_text(segment.first_page());
        self.label_for_text(&page_text, index, separator)
    }

    /// Label from already extracted text.
    pub fn label_for_text(&self, text: &str, index: usize, separator: &Separator) -> DerivedLabel {
        if let Some((name, raw)) = self.match_patterns(text) {
            let label = self.sanitize(raw);
            tracing::debug!("Segment {} matched {}: {}", index + 1, name, label);
            return DerivedLabel {
                label,
                source: LabelSource::Pattern(name.to_string()),
            };
        }
        DerivedLabel {
            label: self.sanitize(&self.fallback_label(index, separator)),
            source: LabelSource::Fallback,
        }
    }

    /// `{code}_{index + 1}`.
    pub fn fallback_label(&self, index: usize, separator: &Separator) -> String {
        format!("{}_{}", separator.code(&self.absent_code), index + 1)
    }

    /// First pattern with a non-empty first capture group.
    fn match_patterns<'t>(&self, text: &'t str) -> Option<(&str, &'t str)> {
        if text.is_empty() {
            return None;
        }
        self.patterns.iter().find_map(|p| {
            p.regex
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .map(|s| (p.name.as_str(), s))
        })
    }

    fn is_allowed(&self, c: char) -> bool {
        c.is_ascii_digit() || is_separator(c) || self.scripts.iter().any(|s| s.contains(c))
    }

    /// Keep script letters, digits, `-`, `_` and `.`; everything else becomes
    /// `_`. Separator runs collapse to their first character and are trimmed
    /// from both ends. Never returns an empty string.
    pub fn sanitize(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut last_was_separator = false;
        for c in raw.chars() {
            let c = if self.is_allowed(c) { c } else { '_' };
            if is_separator(c) {
                if last_was_separator {
                    continue;
                }
                last_was_separator = true;
            } else {
                last_was_separator = false;
            }
            out.push(c);
        }

        let trimmed: String = out
            .trim_matches(is_separator)
            .chars()
            .take(MAX_LABEL_CHARS)
            .collect();
        let trimmed = trimmed.trim_end_matches(is_separator);

        if trimmed.is_empty() {
            time_fallback_label()
        } else {
            trimmed.to_string()
        }
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '_' | '.')
}

fn time_fallback_label() -> String {
    format!("group_{}", Utc::now().format("%Y%m%d_%H%M%S_%6f"))
}
