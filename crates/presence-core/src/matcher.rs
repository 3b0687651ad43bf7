//! Roster of known identities and nearest-neighbour matching.

use crate::types::{Embedding, Identity, KnownIdentity};

/// Maximum Euclidean distance at which a match is accepted.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Nearest roster entry for a probe embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance: f32,
}

/// Result of matching a probe embedding against the roster.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity: Identity,
    /// Distance to the nearest roster entry, accepted or not.
    /// `None` when the roster is empty.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            identity: Identity::Unknown,
            distance: None,
        }
    }
}

/// Strategy for finding the closest known identity to a probe.
///
/// Callers only go through [`Matcher::identify`], so a linear scan can be
/// swapped for an approximate index without touching them.
pub trait Matcher: Send + Sync {
    /// Closest entry, first-indexed on exact ties. `None` if nothing to compare.
    fn nearest(&self, probe: &Embedding) -> Option<Nearest>;

    fn name_at(&self, index: usize) -> Option<&str>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accept the nearest entry only if strictly below `threshold`.
    fn identify(&self, probe: &Embedding, threshold: f32) -> MatchResult {
        let Some(nearest) = self.nearest(probe) else {
            return MatchResult::unknown();
        };

        let identity = match self.name_at(nearest.index) {
            Some(name) if nearest.distance < threshold => Identity::Known(name.to_string()),
            _ => Identity::Unknown,
        };

        MatchResult {
            identity,
            distance: Some(nearest.distance),
        }
    }
}

/// Immutable set of known identities, matched by linear scan.
///
/// A roster is never mutated after construction; a reload builds a new one.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    identities: Vec<KnownIdentity>,
}

impl Roster {
    pub fn new(identities: Vec<KnownIdentity>) -> Self {
        Self { identities }
    }

    pub fn identities(&self) -> &[KnownIdentity] {
        &self.identities
    }

    /// Distinct employee names, in roster order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for identity in &self.identities {
            if !names.contains(&identity.name.as_str()) {
                names.push(&identity.name);
            }
        }
        names
    }
}

impl Matcher for Roster {
    fn nearest(&self, probe: &Embedding) -> Option<Nearest> {
        let mut best: Option<Nearest> = None;

        for (index, known) in self.identities.iter().enumerate() {
            let distance = probe.euclidean_distance(&known.embedding);
            if distance.is_nan() {
                continue;
            }
            // Strict comparison keeps the earliest entry on ties.
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Nearest { index, distance });
            }
        }

        best
    }

    fn name_at(&self, index: usize) -> Option<&str> {
        self.identities.get(index).map(|i| i.name.as_str())
    }

    fn len(&self) -> usize {
        self.identities.len()
    }
}
