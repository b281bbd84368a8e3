//! Sanitize and restore text by composing the detector and the vault.
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::detector::{PiiCategory, PiiDetector};
use super::vault::TokenVault;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenRecord {
    pub token: String,
    pub category: PiiCategory,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sanitized {
    pub text: String,
    /// One record per replaced span, left to right.
    pub tokens: Vec<TokenRecord>,
    /// Distinct categories found, sorted.
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Restored {
    pub text: String,
    /// Well-formed tokens the vault does not know, in order of appearance.
    pub unresolved: Vec<String>,
}

pub struct Tokenizer {
    detector: PiiDetector,
    vault: Arc<TokenVault>,
}

impl Tokenizer {
    pub fn new(vault: Arc<TokenVault>) -> Self {
        Self::with_detector(PiiDetector::new(), vault)
    }

    pub fn with_detector(detector: PiiDetector, vault: Arc<TokenVault>) -> Self {
        Self { detector, vault }
    }

    pub fn vault(&self) -> &TokenVault {
        &self.vault
    }

    /// Replaces every detected span with its vault token.
    pub fn sanitize(&self, text: &str) -> Sanitized {
        let mut out = String::with_capacity(text.len());
        let mut tokens = Vec::new();
        let mut categories = BTreeSet::new();
        let mut cursor = 0;

        for m in self.detector.detect(text) {
            let token = self.vault.tokenize(&m.text, m.category);
            out.push_str(&text[cursor..m.start]);
            out.push_str(&token);
            cursor = m.end;
            categories.insert(m.category.as_str().to_string());
            tokens.push(TokenRecord {
                token,
                category: m.category,
            });
        }
        out.push_str(&text[cursor..]);

        Sanitized {
            text: out,
            tokens,
            categories: categories.into_iter().collect(),
        }
    }

    /// Substitutes every known token with its original value. Unknown tokens
    /// stay in the text and are listed in [`Restored::unresolved`].
    pub fn restore(&self, text: &str) -> Restored {
        let mut out = String::with_capacity(text.len());
        let mut unresolved = Vec::new();
        let mut rest = text;

        while let Some(open) = rest.find('[') {
            let after = &rest[open + 1..];
            let Some(close) = after.find(']') else {
                break;
            };
            let candidate = &rest[open..open + close + 2];
            out.push_str(&rest[..open]);
            if is_token(&after[..close]) {
                match self.vault.resolve(candidate) {
                    Ok(original) => out.push_str(&original),
                    Err(_) => {
                        out.push_str(candidate);
                        unresolved.push(candidate.to_string());
                    }
                }
                rest = &rest[open + close + 2..];
            } else {
                // Not a token; keep the bracket and rescan after it.
                out.push('[');
                rest = after;
            }
        }
        out.push_str(rest);

        Restored {
            text: out,
            unresolved,
        }
    }
}

/// `CATEGORY_suffix`: upper-case/underscore prefix, alphanumeric suffix.
fn is_token(inner: &str) -> bool {
    let Some((prefix, suffix)) = inner.rsplit_once('_') else {
        return false;
    };
    !prefix.is_empty()
        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
        && !suffix.is_empty()
        && suffix.chars().all(|c| c.is_ascii_alphanumeric())
}
