//! Ordered rule collection.
//!
//! # Design Decisions
//! - Immutable after construction (shared via `Arc`, read without locks)
//! - Order is significant: first firing rule wins
//! - One rule per input line; any invalid line fails the whole set

use std::sync::Arc;

use crate::rewrite::rule::{Rule, RuleError};

/// An ordered, immutable sequence of compiled rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Arc<[Rule]>,
}

impl RuleSet {
    /// Compile directive lines in order.
    ///
    /// Fails on the first invalid directive; a partially compiled set is
    /// never returned.
    pub fn compile<I, S>(lines: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| Rule::parse(line.as_ref(), i + 1))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(count = rules.len(), "Compiled rewrite rules");

        Ok(Self {
            rules: rules.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: Arc::from(Vec::new()),
        }
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
