//! In-memory, session-scoped mapping between PII values and opaque tokens.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rand::Rng;
use tracing::debug;

use super::detector::PiiCategory;
use crate::error::SandboxError;

#[derive(Default)]
struct VaultState {
    by_token: HashMap<String, String>,
    by_original: HashMap<String, String>,
}

/// Issues `[CATEGORY_xxxxxxxx]` tokens and resolves them back.
///
/// The mapping only changes through [`TokenVault::tokenize`]. Mint-or-reuse
/// happens under one lock, so concurrent callers tokenizing the same value
/// always get the same token and no two values ever share one.
#[derive(Default)]
pub struct TokenVault {
    state: Mutex<VaultState>,
}

impl TokenVault {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VaultState> {
        // A panic while holding the lock cannot leave the maps half-updated:
        // both inserts happen after the token is chosen.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the token for `original`, minting one on first sight.
    /// Matching is exact and case-sensitive.
    pub fn tokenize(&self, original: &str, category: PiiCategory) -> String {
        let mut state = self.lock();
        if let Some(token) = state.by_original.get(original) {
            return token.clone();
        }

        let mut rng = rand::thread_rng();
        let token = loop {
            let candidate = format!("[{}_{:08x}]", category.as_str(), rng.gen::<u32>());
            if !state.by_token.contains_key(&candidate) {
                break candidate;
            }
        };
        state.by_token.insert(token.clone(), original.to_string());
        state.by_original.insert(original.to_string(), token.clone());
        debug!("Minted {category} token ({} in vault)", state.by_token.len());
        token
    }

    /// The original value behind `token`. Never guesses or partially matches.
    pub fn resolve(&self, token: &str) -> Result<String, SandboxError> {
        self.lock()
            .by_token
            .get(token)
            .cloned()
            .ok_or_else(|| SandboxError::not_found(format!("Unknown token: {token}")))
    }

    pub fn len(&self) -> usize {
        self.lock().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
