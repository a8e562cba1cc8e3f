//! Hierarchy statistics.
//!
//! Requirements name an axis of a hierarchical index (`fromRoot`, `fromNode`,
//! `children`, `siblings`, `parents`), a stop condition and the statistics to
//! compute against the entities matching the query filter. Requirements of the
//! same target share one [`HierarchyStatisticsProducer`] so that per-node
//! subtree bitmaps are computed once per query.

mod producer;
mod registry;

pub use producer::{HierarchyStatisticsProducer, StatisticsBases};
pub use registry::{ExtraResults, ProducerKey, ProducerRegistry};

use std::fmt;
use std::sync::Arc;

use entity_formula::PrimaryKey;

/// Hierarchy the statistics are computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HierarchyTarget {
    /// The queried entity type is itself hierarchical.
    SelfHierarchy,
    /// Hierarchical entity type reached through the named reference.
    Reference(String),
}

/// Part of the hierarchy a requirement covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyAxis {
    /// Whole tree from the root nodes.
    FromRoot,
    /// Subtree below an explicit pivot node.
    FromNode {
        /// Pivot node.
        node: PrimaryKey,
    },
    /// Subtree below the anchor, or the whole tree without one.
    Children,
    /// Nodes sharing the anchor's parent, anchor excluded.
    Siblings,
    /// Chain from the root down to the anchor's parent.
    Parents,
}

/// Where traversal stops.
#[derive(Clone)]
pub enum StopCondition {
    /// Emit nodes up to this distance from the start (first emitted level is 1).
    Distance(usize),
    /// Emit nodes up to this absolute level (roots are level 1).
    Level(usize),
    /// Emit a matching node but do not descend below it.
    Node(Arc<dyn Fn(PrimaryKey) -> bool + Send + Sync>),
}

impl fmt::Debug for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCondition::Distance(d) => write!(f, "Distance({})", d),
            StopCondition::Level(l) => write!(f, "Level({})", l),
            StopCondition::Node(_) => write!(f, "Node(<predicate>)"),
        }
    }
}

/// Statistics attached to every emitted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatisticsType {
    /// Number of visible direct children.
    ChildrenCount,
    /// Number of queried entities in the node's subtree.
    QueriedEntityCount,
}

/// Filter the queried-entity counts are computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatisticsBase {
    /// The complete query filter.
    #[default]
    CompleteFilter,
    /// The query filter with user-filter parts removed.
    WithoutUserFilter,
}

/// Handling of nodes without queried entities in reference hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyNodeBehaviour {
    /// Keep empty nodes.
    #[default]
    LeaveEmpty,
    /// Drop empty nodes (ignored for self hierarchies).
    RemoveEmpty,
}

/// One named hierarchy output.
#[derive(Debug, Clone)]
pub struct HierarchyRequirement {
    /// Name of the output in the extra results.
    pub output_name: String,
    /// Covered axis.
    pub axis: HierarchyAxis,
    /// Optional stop condition; the full depth without one.
    pub stop: Option<StopCondition>,
    /// Statistics to compute.
    pub statistics: Vec<StatisticsType>,
    /// Statistics base.
    pub base: StatisticsBase,
    /// Empty node handling.
    pub empty_nodes: EmptyNodeBehaviour,
}

impl HierarchyRequirement {
    /// Creates a requirement without statistics or stop condition.
    pub fn new(output_name: impl Into<String>, axis: HierarchyAxis) -> Self {
        Self {
            output_name: output_name.into(),
            axis,
            stop: None,
            statistics: Vec::new(),
            base: StatisticsBase::default(),
            empty_nodes: EmptyNodeBehaviour::default(),
        }
    }

    /// Sets the stop condition.
    pub fn with_stop(mut self, stop: StopCondition) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Adds a statistics type.
    pub fn with_statistics(mut self, statistics: StatisticsType) -> Self {
        if !self.statistics.contains(&statistics) {
            self.statistics.push(statistics);
        }
        self
    }

    /// Sets the statistics base.
    pub fn with_base(mut self, base: StatisticsBase) -> Self {
        self.base = base;
        self
    }

    /// Drops nodes without queried entities.
    pub fn remove_empty(mut self) -> Self {
        self.empty_nodes = EmptyNodeBehaviour::RemoveEmpty;
        self
    }

    pub(crate) fn wants(&self, statistics: StatisticsType) -> bool {
        self.statistics.contains(&statistics)
    }
}

/// Hierarchy requirements of one target within a query.
#[derive(Debug, Clone)]
pub struct HierarchyRequest {
    /// Target hierarchy.
    pub target: HierarchyTarget,
    /// Node the query filter is constrained to (hierarchy-within), if any.
    pub anchor: Option<PrimaryKey>,
    /// Requested outputs.
    pub requirements: Vec<HierarchyRequirement>,
}

impl HierarchyRequest {
    /// Request on the queried entity type's own hierarchy.
    pub fn of_self() -> Self {
        Self {
            target: HierarchyTarget::SelfHierarchy,
            anchor: None,
            requirements: Vec::new(),
        }
    }

    /// Request on the hierarchy behind a reference.
    pub fn of_reference(reference: impl Into<String>) -> Self {
        Self {
            target: HierarchyTarget::Reference(reference.into()),
            anchor: None,
            requirements: Vec::new(),
        }
    }

    /// Sets the anchor node.
    pub fn within(mut self, anchor: PrimaryKey) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Adds a requirement.
    pub fn with_requirement(mut self, requirement: HierarchyRequirement) -> Self {
        self.requirements.push(requirement);
        self
    }
}

/// Node of a computed hierarchy tree.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevelInfo {
    /// Primary key of the hierarchical entity.
    pub entity_primary_key: PrimaryKey,
    /// True if the node is the anchor of the query.
    pub requested: bool,
    /// Queried entities in the subtree, if requested.
    pub queried_entity_count: Option<usize>,
    /// Visible direct children, if requested.
    pub children_count: Option<usize>,
    /// Emitted children.
    pub children: Vec<LevelInfo>,
}

impl LevelInfo {
    /// Primary keys of this node and all emitted descendants, depth first.
    pub fn flatten(&self) -> Vec<PrimaryKey> {
        let mut keys = vec![self.entity_primary_key];
        for child in &self.children {
            keys.extend(child.flatten());
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_builder() {
        let requirement = HierarchyRequirement::new("menu", HierarchyAxis::FromRoot)
            .with_stop(StopCondition::Level(2))
            .with_statistics(StatisticsType::QueriedEntityCount)
            .with_statistics(StatisticsType::QueriedEntityCount)
            .with_base(StatisticsBase::WithoutUserFilter)
            .remove_empty();

        assert_eq!(requirement.statistics, vec![StatisticsType::QueriedEntityCount]);
        assert!(requirement.wants(StatisticsType::QueriedEntityCount));
        assert!(!requirement.wants(StatisticsType::ChildrenCount));
        assert_eq!(requirement.empty_nodes, EmptyNodeBehaviour::RemoveEmpty);
        assert_eq!(format!("{:?}", requirement.stop.unwrap()), "Level(2)");
    }

    #[test]
    fn test_level_info_flatten() {
        let leaf = LevelInfo {
            entity_primary_key: 3,
            requested: false,
            queried_entity_count: None,
            children_count: None,
            children: Vec::new(),
        };
        let root = LevelInfo {
            entity_primary_key: 1,
            requested: true,
            queried_entity_count: None,
            children_count: None,
            children: vec![leaf],
        };
        assert_eq!(root.flatten(), vec![1, 3]);
    }
}
