//! Route and Filter: deterministic platform selection, no LLM involved.
//!
//! Route picks candidates from idea-type affinity and novelty; Filter keeps
//! the candidates Analyze marked publishable.

use std::collections::HashMap;

use crate::pipeline::types::{Analysis, IdeaType, Platform};

/// Routing thresholds and affinities.
#[derive(Debug, Clone)]
pub struct RouteTable {
    /// Best-fit-first platforms per idea type.
    pub affinity: HashMap<IdeaType, Vec<Platform>>,
    /// Used for idea types missing from `affinity`.
    pub fallback: Vec<Platform>,
    /// A platform is dropped when novelty is below its floor.
    pub novelty_floor: HashMap<Platform, u8>,
    /// Novelty above this widens the candidate list.
    pub wide_threshold: u8,
    pub narrow_limit: usize,
    pub wide_limit: usize,
}

impl Default for RouteTable {
    fn default() -> Self {
        use IdeaType as T;
        use Platform as P;

        let affinity = HashMap::from([
            (T::Opinion, vec![P::X, P::Substack, P::Medium]),
            (T::Analysis, vec![P::X, P::Medium, P::Reddit]),
            (T::Essay, vec![P::X, P::Medium, P::Substack]),
            (T::Tutorial, vec![P::X, P::Medium, P::Reddit]),
            (T::Story, vec![P::X, P::Medium, P::Substack]),
            (T::Thread, vec![P::X]),
            (T::News, vec![P::X, P::Reddit]),
        ]);
        let novelty_floor =
            HashMap::from([(P::X, 0), (P::Medium, 3), (P::Substack, 3), (P::Reddit, 3)]);

        Self {
            affinity,
            fallback: vec![P::X, P::Medium],
            novelty_floor,
            wide_threshold: 6,
            narrow_limit: 2,
            wide_limit: 3,
        }
    }
}

impl RouteTable {
    /// Ordered candidates for an idea. X always leads when its floor allows.
    pub fn route(&self, idea_type: IdeaType, novelty_score: u8) -> Vec<Platform> {
        let preferred = self.affinity.get(&idea_type).unwrap_or(&self.fallback);

        let mut ordered = Vec::with_capacity(preferred.len() + 1);
        ordered.push(Platform::X);
        ordered.extend(preferred.iter().copied().filter(|p| *p != Platform::X));
        ordered.retain(|p| novelty_score >= self.novelty_floor.get(p).copied().unwrap_or(0));

        let limit = if novelty_score > self.wide_threshold {
            self.wide_limit
        } else {
            self.narrow_limit
        };
        ordered.truncate(limit);
        ordered
    }
}

/// Keep candidates with a publishable assessment. A globally unpublishable
/// analysis yields nothing; a missing assessment counts as not publishable.
pub fn filter(candidates: &[Platform], analysis: &Analysis) -> Vec<Platform> {
    if !analysis.publishable {
        return Vec::new();
    }
    candidates
        .iter()
        .copied()
        .filter(|p| analysis.assessment(*p).is_some_and(|a| a.publishable))
        .collect()
}
