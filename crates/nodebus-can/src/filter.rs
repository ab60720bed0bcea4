//! ---
//! nb_section: "03-can-bus"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Arbitration id acceptance filters."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Acceptance filters deciding which arbitration ids a node processes.
//!
//! A [`FilterSet`] is append-only and evaluated in insertion order; the first
//! matching filter accepts the frame. An empty set accepts nothing.

use nodebus_msg::{ArbitrationId, NodeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid filter definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FilterError {
    /// Range whose lower bound lies above its upper bound.
    #[error("range filter {min:#x}..={max:#x} is inverted")]
    InvertedRange {
        /// Lower bound.
        min: u32,
        /// Upper bound.
        max: u32,
    },
}

/// One acceptance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    /// Matches either of two exact ids.
    Exact {
        /// First accepted id.
        first: u32,
        /// Second accepted id.
        second: u32,
    },
    /// Matches when the bits selected by `mask` equal those of `filter`.
    Mask {
        /// Expected bit pattern.
        filter: u32,
        /// Bits that take part in the comparison.
        mask: u32,
    },
    /// Matches ids in `min..=max`.
    Range {
        /// Inclusive lower bound.
        min: u32,
        /// Inclusive upper bound.
        max: u32,
    },
}

impl Filter {
    /// Whether `id` satisfies this rule.
    pub fn matches(&self, id: u32) -> bool {
        match *self {
            Filter::Exact { first, second } => id == first || id == second,
            Filter::Mask { filter, mask } => id & mask == filter & mask,
            Filter::Range { min, max } => (min..=max).contains(&id),
        }
    }

    /// Reject definitions that can never match.
    pub fn validate(&self) -> Result<(), FilterError> {
        match *self {
            Filter::Range { min, max } if min > max => Err(FilterError::InvertedRange { min, max }),
            _ => Ok(()),
        }
    }
}

/// Ordered, append-only filter list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    /// Empty set. Accepts nothing until a filter is added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a validated list.
    pub fn from_filters(filters: Vec<Filter>) -> Result<Self, FilterError> {
        for filter in &filters {
            filter.validate()?;
        }
        Ok(Self { filters })
    }

    /// Standard set for a node: destination equal to any of `nodes` or broadcast.
    pub fn for_nodes(nodes: &[NodeId]) -> Self {
        let mut set = Self::new();
        let mut seen = Vec::with_capacity(nodes.len() + 1);
        for node in nodes.iter().copied().chain(std::iter::once(NodeId::Broadcast)) {
            if seen.contains(&node) {
                continue;
            }
            seen.push(node);
            set.add_mask_filter(ArbitrationId::node_bits(node), ArbitrationId::NODE_ID_MASK);
        }
        set
    }

    /// Append a filter matching `first` or `second`.
    pub fn add_exact_filter(&mut self, first: u32, second: u32) {
        self.filters.push(Filter::Exact { first, second });
    }

    /// Append a filter matching ids whose masked bits equal those of `filter`.
    pub fn add_mask_filter(&mut self, filter: u32, mask: u32) {
        self.filters.push(Filter::Mask { filter, mask });
    }

    /// Append a filter matching `min..=max`. An inverted range never matches.
    pub fn add_range_filter(&mut self, min: u32, max: u32) {
        self.filters.push(Filter::Range { min, max });
    }

    /// First-match acceptance test.
    pub fn accepts(&self, id: u32) -> bool {
        self.filters.iter().any(|filter| filter.matches(id))
    }

    /// Filters in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// True when no filter is configured.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodebus_msg::MessageId;

    #[test]
    fn empty_set_rejects_everything() {
        let set = FilterSet::new();
        assert!(!set.accepts(0));
        assert!(!set.accepts(u32::MAX));
    }

    #[test]
    fn range_boundaries_are_inclusive() {
        let mut set = FilterSet::new();
        set.add_range_filter(0x100, 0x1FF);
        assert!(!set.accepts(0x0FF));
        assert!(set.accepts(0x100));
        assert!(set.accepts(0x1FF));
        assert!(!set.accepts(0x200));
    }

    #[test]
    fn exact_filter_matches_both_ids_only() {
        let mut set = FilterSet::new();
        set.add_exact_filter(0x10, 0x20);
        assert!(set.accepts(0x10));
        assert!(set.accepts(0x20));
        assert!(!set.accepts(0x11));
    }

    #[test]
    fn mask_ignores_unselected_bits() {
        let mut set = FilterSet::new();
        set.add_mask_filter(0x0A0, 0x0F0);
        assert!(set.accepts(0x0A0));
        assert!(set.accepts(0xFAF));
        assert!(!set.accepts(0x0B0));
    }

    #[test]
    fn any_matching_filter_accepts() {
        let mut set = FilterSet::new();
        set.add_exact_filter(1, 1);
        set.add_range_filter(10, 20);
        assert!(set.accepts(1));
        assert!(set.accepts(15));
        assert!(!set.accepts(5));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn node_filters_accept_own_and_broadcast_destinations() {
        let set = FilterSet::for_nodes(&[NodeId::GantryX, NodeId::GantryX]);
        assert_eq!(set.len(), 2, "duplicates collapse, broadcast is added");

        let own = ArbitrationId::new(MessageId::MoveRequest, NodeId::GantryX, NodeId::Host);
        let broadcast = ArbitrationId::new(MessageId::StopRequest, NodeId::Broadcast, NodeId::Host);
        let other = ArbitrationId::new(MessageId::MoveRequest, NodeId::GantryY, NodeId::Host);
        assert!(set.accepts(own.raw()));
        assert!(set.accepts(broadcast.raw()));
        assert!(!set.accepts(other.raw()));
    }

    #[test]
    fn inverted_ranges_fail_validation() {
        let err = FilterSet::from_filters(vec![Filter::Range { min: 5, max: 1 }]).unwrap_err();
        assert_eq!(err, FilterError::InvertedRange { min: 5, max: 1 });
    }

    #[test]
    fn filters_load_from_config_text() {
        let set: FilterSet = serde_json::from_str(
            r#"[{"kind":"exact","first":1,"second":2},{"kind":"mask","filter":128,"mask":1920}]"#,
        )
        .expect("parse filters");
        assert_eq!(set.len(), 2);
        assert!(set.accepts(2));
        assert!(set.accepts(0x80 | 0x7F));
    }
}
