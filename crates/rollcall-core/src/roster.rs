//! Enrolled identities and the per-run set of identities seen.

use crate::types::{Embedding, IdentityKey, MatchResult};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Character separating display name from roll identifier in reference
/// folder names (`Asha_22E101`).
pub const DEFAULT_SEPARATOR: char = '_';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RosterError {
    #[error("folder name '{0}' does not split into <name>{1}<roll>")]
    MalformedFolderName(String, char),
    #[error("roll '{roll}' already enrolled as '{existing}'")]
    DuplicateRoll { roll: String, existing: String },
}

/// Split a reference folder name into (name, roll) on `separator`.
///
/// Exactly two non-empty parts are required.
pub fn parse_folder_name(folder: &str, separator: char) -> Result<IdentityKey, RosterError> {
    let mut parts = folder.split(separator);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(roll), None) if !name.trim().is_empty() && !roll.trim().is_empty() => {
            Ok(IdentityKey::new(name.trim(), roll.trim()))
        }
        _ => Err(RosterError::MalformedFolderName(folder.to_string(), separator)),
    }
}

/// A person on the roster with every reference embedding that yielded a face.
#[derive(Debug, Clone)]
pub struct EnrolledIdentity {
    pub key: IdentityKey,
    pub embeddings: Vec<Embedding>,
}

/// The identities loaded for one run.
///
/// `identities` holds only people with at least one usable embedding; those
/// with none are kept apart in `unusable` so callers can report them.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    identities: Vec<EnrolledIdentity>,
    unusable: Vec<IdentityKey>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity. Roll identifiers must be unique across the roster,
    /// including identities that turned out unusable.
    pub fn enroll(&mut self, identity: EnrolledIdentity) -> Result<(), RosterError> {
        self.check_roll_free(&identity.key.roll)?;
        if identity.embeddings.is_empty() {
            self.unusable.push(identity.key);
        } else {
            self.identities.push(identity);
        }
        Ok(())
    }

    fn check_roll_free(&self, roll: &str) -> Result<(), RosterError> {
        let existing = self
            .identities
            .iter()
            .map(|i| &i.key)
            .chain(self.unusable.iter())
            .find(|k| k.roll == roll);
        match existing {
            Some(k) => Err(RosterError::DuplicateRoll {
                roll: roll.to_string(),
                existing: k.name.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn identities(&self) -> &[EnrolledIdentity] {
        &self.identities
    }

    pub fn unusable(&self) -> &[IdentityKey] {
        &self.unusable
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn embedding_count(&self) -> usize {
        self.identities.iter().map(|i| i.embeddings.len()).sum()
    }
}

/// Deduplicated identities observed at least once during a run.
///
/// Only the fact of being seen is kept; distances are dropped on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeenSet {
    seen: BTreeSet<IdentityKey>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a match result. Returns true when the identity is new to the set.
    pub fn record(&mut self, result: &MatchResult) -> bool {
        match result {
            MatchResult::Matched { identity, .. } => self.seen.insert(identity.clone()),
            MatchResult::Unmatched => false,
        }
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl FromIterator<IdentityKey> for SeenSet {
    fn from_iter<T: IntoIterator<Item = IdentityKey>>(iter: T) -> Self {
        Self {
            seen: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(name: &str, roll: &str, distance: f32) -> MatchResult {
        MatchResult::Matched {
            identity: IdentityKey::new(name, roll),
            distance,
        }
    }

    fn identity(name: &str, roll: &str, n_embeddings: usize) -> EnrolledIdentity {
        EnrolledIdentity {
            key: IdentityKey::new(name, roll),
            embeddings: (0..n_embeddings).map(|i| Embedding::new(vec![i as f32])).collect(),
        }
    }

    #[test]
    fn test_parse_folder_name() {
        assert_eq!(
            parse_folder_name("Asha_22E101", '_'),
            Ok(IdentityKey::new("Asha", "22E101"))
        );
    }

    #[test]
    fn test_parse_folder_name_rejects_wrong_part_count() {
        for bad in ["Asha", "Asha_Rao_22E101", "_22E101", "Asha_", ""] {
            assert!(
                matches!(parse_folder_name(bad, '_'), Err(RosterError::MalformedFolderName(..))),
                "expected rejection for '{bad}'"
            );
        }
    }

    #[test]
    fn test_parse_folder_name_custom_separator() {
        assert_eq!(
            parse_folder_name("Asha Rao-07", '-'),
            Ok(IdentityKey::new("Asha Rao", "07"))
        );
    }

    #[test]
    fn test_roster_separates_unusable() {
        let mut roster = Roster::new();
        roster.enroll(identity("A", "01", 2)).unwrap();
        roster.enroll(identity("B", "02", 0)).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.embedding_count(), 2);
        assert_eq!(roster.unusable(), &[IdentityKey::new("B", "02")]);
    }

    #[test]
    fn test_roster_rejects_duplicate_roll() {
        let mut roster = Roster::new();
        roster.enroll(identity("A", "01", 1)).unwrap();
        let err = roster.enroll(identity("Other", "01", 1)).unwrap_err();
        assert_eq!(
            err,
            RosterError::DuplicateRoll {
                roll: "01".into(),
                existing: "A".into()
            }
        );
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_seen_set_collapses_repeats() {
        let mut seen = SeenSet::new();
        assert!(seen.record(&matched("A", "01", 0.4)));
        for _ in 0..5 {
            assert!(!seen.record(&matched("A", "01", 0.1)));
        }
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_seen_set_ignores_unmatched() {
        let mut seen = SeenSet::new();
        assert!(!seen.record(&MatchResult::Unmatched));
        assert!(seen.is_empty());
    }

    #[test]
    fn test_seen_set_keeps_distinct_identities() {
        let mut seen = SeenSet::new();
        seen.record(&matched("A", "01", 0.2));
        seen.record(&matched("B", "02", 0.2));
        seen.record(&matched("A", "01", 0.3));
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&IdentityKey::new("B", "02")));
    }
}
