// src/version.rs

//! Hierarchical version identifiers
//!
//! Every stored record carries a `VersionId` describing its position in a
//! lineage tree. Segments are unsigned integers separated by dots and
//! trailing zero segments are insignificant, so `1.2.0` and `1.2` name the
//! same version.
//!
//! A version `b` is an ancestor of `a` when `a` can be reached from `b` by
//! incrementing `b`'s last segment and/or opening branches below it:
//!
//! ```text
//! 1 ── 1.1 ── 1.2 ── 1.3
//!              │
//!              └── 1.2.1 ── 1.2.2
//! ```
//!
//! Here `1.3` descends from `1.2`, `1.2.2` descends from `1.2`, and `1.3`
//! and `1.2.2` are cousins.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// How one version relates to another in the lineage tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    /// Identical identifiers
    Same,
    /// `self` is a lineal successor of the other version
    Descendant,
    /// The other version is a lineal successor of `self`
    Ancestor,
    /// Divergent branches of a common ancestor
    Cousin,
}

impl Relationship {
    pub fn is_same(self) -> bool {
        self == Relationship::Same
    }

    pub fn is_descendant(self) -> bool {
        self == Relationship::Descendant
    }

    pub fn is_cousin(self) -> bool {
        self == Relationship::Cousin
    }
}

/// A dot-separated hierarchical version identifier
#[derive(Debug, Clone)]
pub struct VersionId {
    segments: Vec<u64>,
}

impl VersionId {
    /// Version assigned to newly created records
    pub fn initial() -> Self {
        Self { segments: vec![1] }
    }

    /// Direct child on the same branch (last segment incremented)
    ///
    /// Fails when the last segment is already `u64::MAX`.
    pub fn next(&self) -> Result<Self> {
        let mut segments = self.segments.clone();
        match segments.last_mut() {
            Some(last) => {
                *last = last
                    .checked_add(1)
                    .ok_or_else(|| Error::InvalidVersion(format!("{} has no successor", self)))?;
            }
            None => segments.push(1),
        }
        Ok(Self { segments })
    }

    /// First version of a new branch opened below this one
    pub fn branch(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.push(1);
        Self { segments }
    }

    /// Segments with trailing zeros removed
    fn significant(&self) -> &[u64] {
        let end = self
            .segments
            .iter()
            .rposition(|s| *s != 0)
            .map_or(0, |i| i + 1);
        &self.segments[..end]
    }

    /// True if `self` is `other` or one of its ancestors
    fn precedes_or_equals(&self, other: &VersionId) -> bool {
        let anc = self.significant();
        let desc = other.significant();

        let Some((last, prefix)) = anc.split_last() else {
            // The empty version is the root of every lineage
            return true;
        };
        if anc.len() > desc.len() {
            return false;
        }
        desc[..prefix.len()] == *prefix && *last <= desc[prefix.len()]
    }

    /// Compute the lineage relationship of `self` relative to `other`
    pub fn relationship_to(&self, other: &VersionId) -> Relationship {
        if self == other {
            Relationship::Same
        } else if other.precedes_or_equals(self) {
            Relationship::Descendant
        } else if self.precedes_or_equals(other) {
            Relationship::Ancestor
        } else {
            Relationship::Cousin
        }
    }
}

impl PartialEq for VersionId {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for VersionId {}

impl Hash for VersionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl FromStr for VersionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        let segments = s
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidVersion(s.to_string()))?;

        Ok(Self { segments })
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Coerce a loosely formatted package version into a semantic version
///
/// Accepts strict semver, partial versions (`"1"`, `"1.2"`), a leading `v`,
/// bare numbers, and the legacy `{"major": 1, "minor": 2}` object shape.
pub fn coerce_semver(value: &Value) -> Option<semver::Version> {
    match value {
        Value::String(s) => coerce_semver_str(s),
        Value::Number(n) => n.as_u64().map(|major| semver::Version::new(major, 0, 0)),
        Value::Object(map) => {
            let part = |key: &str| map.get(key).and_then(Value::as_u64);
            let major = part("major")?;
            Some(semver::Version::new(
                major,
                part("minor").unwrap_or(0),
                part("patch").unwrap_or(0),
            ))
        }
        _ => None,
    }
}

fn coerce_semver_str(raw: &str) -> Option<semver::Version> {
    let s = raw.trim().trim_start_matches(['v', 'V']);
    if let Ok(version) = semver::Version::parse(s) {
        return Some(version);
    }

    // Split off pre-release/build metadata and pad the numeric core
    let split_at = s.find(['-', '+']).unwrap_or(s.len());
    let (core, rest) = s.split_at(split_at);

    let mut parts = core
        .split('.')
        .map(|p| p.trim().parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    parts.resize(3, 0);

    semver::Version::parse(&format!("{}.{}.{}{}", parts[0], parts[1], parts[2], rest)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(s: &str) -> VersionId {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(v("2.3.1").segments, vec![2, 3, 1]);
        assert_eq!(v("2.3.1").to_string(), "2.3.1");
        assert!("".parse::<VersionId>().is_err());
        assert!("1.x".parse::<VersionId>().is_err());
    }

    #[test]
    fn test_trailing_zeros_are_insignificant() {
        assert_eq!(v("1.2.0"), v("1.2"));
        assert!(v("1.2.0").relationship_to(&v("1.2")).is_same());
    }

    #[test]
    fn test_child_is_descendant() {
        let parent = v("1.2");
        let child = parent.next().unwrap();
        let rel = child.relationship_to(&parent);
        assert!(rel.is_descendant());
        assert!(!rel.is_same());
        assert_eq!(parent.relationship_to(&child), Relationship::Ancestor);
    }

    #[test]
    fn test_next_at_segment_limit_fails() {
        let top = v("1.18446744073709551615");
        assert!(matches!(top.next(), Err(Error::InvalidVersion(_))));
        // A branch below it is still available
        assert!(top.branch().relationship_to(&top).is_descendant());
    }

    #[test]
    fn test_branch_is_descendant() {
        let parent = v("1.2");
        assert!(parent.branch().relationship_to(&parent).is_descendant());
        assert!(parent.branch().next().unwrap().relationship_to(&parent).is_descendant());
    }

    #[test]
    fn test_minor_bump_is_descendant() {
        assert!(v("1.3.0").relationship_to(&v("1.2.0")).is_descendant());
        assert!(v("2").relationship_to(&v("1.9.4")).is_cousin());
        assert!(v("2").relationship_to(&v("1")).is_descendant());
    }

    #[test]
    fn test_siblings_are_cousins() {
        let base = v("1.2");
        let local = base.branch().next().unwrap();
        let upstream = base.next().unwrap();

        let rel = local.relationship_to(&upstream);
        assert!(rel.is_cousin());
        assert!(!rel.is_descendant());
        assert!(upstream.relationship_to(&local).is_cousin());
    }

    #[test]
    fn test_independent_branches_are_cousins() {
        let root = v("3.1");
        let left = root.branch();
        let right = root.next().unwrap().branch();
        assert!(left.relationship_to(&right).is_cousin());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_value(v("4.0.2")).unwrap();
        assert_eq!(json, json!("4.0.2"));
        let back: VersionId = serde_json::from_value(json).unwrap();
        assert_eq!(back, v("4.0.2"));
    }

    #[test]
    fn test_coerce_semver_loose_strings() {
        assert_eq!(coerce_semver(&json!("1.2.3")), Some(semver::Version::new(1, 2, 3)));
        assert_eq!(coerce_semver(&json!("v1.2")), Some(semver::Version::new(1, 2, 0)));
        assert_eq!(coerce_semver(&json!("7")), Some(semver::Version::new(7, 0, 0)));
        assert_eq!(coerce_semver(&json!(3)), Some(semver::Version::new(3, 0, 0)));

        let pre = coerce_semver(&json!("2.1-beta.1")).unwrap();
        assert_eq!(pre.major, 2);
        assert_eq!(pre.minor, 1);
        assert_eq!(pre.pre.as_str(), "beta.1");

        assert_eq!(coerce_semver(&json!("banana")), None);
        assert_eq!(coerce_semver(&json!(null)), None);
    }

    #[test]
    fn test_coerce_semver_legacy_shape() {
        let legacy = json!({"major": 2, "minor": 5});
        assert_eq!(coerce_semver(&legacy), Some(semver::Version::new(2, 5, 0)));
        assert_eq!(coerce_semver(&json!({"minor": 5})), None);
    }
}
