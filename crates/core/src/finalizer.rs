//! Ordered finalizer token set.

use serde::{Deserialize, Serialize};

/// Insertion-ordered set of finalizer tokens.
///
/// Duplicates are collapsed on construction and on deserialization, so a
/// token is either present exactly once or absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct FinalizerSet {
    tokens: Vec<String>,
}

impl FinalizerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token. Returns `true` if it was not already present.
    pub fn insert(&mut self, token: impl Into<String>) -> bool {
        let token = token.into();
        if self.contains(&token) {
            return false;
        }
        self.tokens.push(token);
        true
    }

    /// Remove a token. Returns `true` if it was present.
    pub fn remove(&mut self, token: &str) -> bool {
        let before = self.tokens.len();
        self.tokens.retain(|t| t != token);
        self.tokens.len() != before
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for FinalizerSet {
    fn from(tokens: Vec<String>) -> Self {
        tokens.into_iter().collect()
    }
}

impl From<FinalizerSet> for Vec<String> {
    fn from(set: FinalizerSet) -> Self {
        set.tokens
    }
}

impl<S: Into<String>> FromIterator<S> for FinalizerSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for token in iter {
            set.insert(token);
        }
        set
    }
}
