//! Exclusion rules deciding which files are never backed up
//!
//! Rules are regular expressions matched against the whole absolute path. A
//! rule `"/home/u/secret\\.txt"` excludes exactly that file; `".*\\.gpg"`
//! excludes every file ending in `.gpg`. Exclusion is checked at write time
//! only and never deletes revisions that already exist.

use crate::error::{BackupError, Result};
use regex::Regex;
use std::path::Path;

/// Compiled, ordered list of exclusion rules
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    /// Rule text as configured, paired with its anchored form
    rules: Vec<(String, Regex)>,
}

impl ExclusionFilter {
    /// Compile `rules`, anchoring each one at both ends
    ///
    /// # Errors
    ///
    /// - [`BackupError::InvalidPattern`] for the first rule that does not compile
    pub fn new<S: AsRef<str>>(rules: &[S]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let rule = rule.as_ref();
                Regex::new(&format!("^(?:{})$", rule))
                    .map(|compiled| (rule.to_string(), compiled))
                    .map_err(|source| BackupError::InvalidPattern {
                        pattern: rule.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// True iff some rule matches the whole of `path`
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.matching_rule(path).is_some()
    }

    /// First rule matching `path`, if any
    pub fn matching_rule(&self, path: &Path) -> Option<&str> {
        if self.rules.is_empty() {
            return None;
        }
        let text = path.to_string_lossy();
        self.rules
            .iter()
            .find(|(_, regex)| regex.is_match(&text))
            .map(|(rule, _)| rule.as_str())
    }

    /// Rule texts in evaluation order
    pub fn rules(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(rule, _)| rule.as_str())
    }

    /// Number of configured rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are configured
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
