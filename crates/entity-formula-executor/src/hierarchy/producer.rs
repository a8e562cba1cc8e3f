//! Traversal of one hierarchy for all requirements registered on it.

use std::collections::BTreeMap;
use std::sync::Arc;

use entity_formula::{Bitmap, PrimaryKey};
use hashbrown::HashMap;
use log::{debug, trace};
use parking_lot::Mutex;

use super::{
    EmptyNodeBehaviour, HierarchyAxis, HierarchyRequirement, HierarchyTarget, LevelInfo, StatisticsBase,
    StatisticsType, StopCondition,
};
use crate::error::{QueryError, QueryResult};
use crate::traits::{HierarchyIndex, IndexProvider};

/// Bitmaps the queried-entity counts are intersected with.
#[derive(Debug, Clone, Default)]
pub struct StatisticsBases {
    complete_filter: Bitmap,
    without_user_filter: Option<Bitmap>,
}

impl StatisticsBases {
    /// Creates the bases from the result of the complete filter.
    ///
    /// The user-filter-free base is unconstrained until set.
    pub fn new(complete_filter: Bitmap) -> Self {
        Self {
            complete_filter,
            without_user_filter: None,
        }
    }

    /// Sets the result of the filter without user-filter parts (None = unconstrained).
    pub fn with_without_user_filter(mut self, bitmap: Option<Bitmap>) -> Self {
        self.without_user_filter = bitmap;
        self
    }

    /// Bitmap of the base, None when unconstrained.
    pub fn base(&self, base: StatisticsBase) -> Option<&Bitmap> {
        match base {
            StatisticsBase::CompleteFilter => Some(&self.complete_filter),
            StatisticsBase::WithoutUserFilter => self.without_user_filter.as_ref(),
        }
    }
}

/// Producer of the hierarchy outputs of one target.
///
/// The subtree bitmap of every visited node is memoized per statistics base
/// and reused by all requirements of the target.
pub struct HierarchyStatisticsProducer {
    target: HierarchyTarget,
    hierarchy_type: String,
    index: Arc<dyn HierarchyIndex>,
    provider: Arc<dyn IndexProvider>,
    requirements: Mutex<Vec<(Option<PrimaryKey>, HierarchyRequirement)>>,
    subtrees: Mutex<HashMap<(StatisticsBase, PrimaryKey), Bitmap>>,
}

impl HierarchyStatisticsProducer {
    pub(crate) fn new(
        target: HierarchyTarget,
        hierarchy_type: String,
        index: Arc<dyn HierarchyIndex>,
        provider: Arc<dyn IndexProvider>,
    ) -> Self {
        Self {
            target,
            hierarchy_type,
            index,
            provider,
            requirements: Mutex::new(Vec::new()),
            subtrees: Mutex::new(HashMap::new()),
        }
    }

    /// Target hierarchy.
    pub fn target(&self) -> &HierarchyTarget {
        &self.target
    }

    /// Entity type owning the hierarchy.
    pub fn hierarchy_type(&self) -> &str {
        &self.hierarchy_type
    }

    /// Registers another requirement.
    pub fn add_requirement(&self, anchor: Option<PrimaryKey>, requirement: HierarchyRequirement) {
        self.requirements.lock().push((anchor, requirement));
    }

    /// Number of registered requirements.
    pub fn requirement_count(&self) -> usize {
        self.requirements.lock().len()
    }

    /// Returns true if a registered requirement counts against the base.
    pub fn needs_base(&self, base: StatisticsBase) -> bool {
        self.requirements.lock().iter().any(|(_, r)| r.base == base)
    }

    /// Number of memoized subtree bitmaps.
    pub fn memoized_subtrees(&self) -> usize {
        self.subtrees.lock().len()
    }

    /// Computes every registered output.
    pub fn produce(&self, bases: &StatisticsBases) -> QueryResult<BTreeMap<String, Vec<LevelInfo>>> {
        self.subtrees.lock().clear();
        let requirements = self.requirements.lock().clone();
        let mut outputs = BTreeMap::new();
        for (anchor, requirement) in requirements {
            if let Some(anchor) = anchor {
                self.ensure_node(anchor)?;
            }
            let walk = Walk {
                producer: self,
                requirement: &requirement,
                anchor,
                bases,
            };
            let levels = walk.levels()?;
            debug!(
                "hierarchy output `{}` of {:?}: {} top-level nodes",
                requirement.output_name,
                self.target,
                levels.len()
            );
            outputs.insert(requirement.output_name.clone(), levels);
        }
        Ok(outputs)
    }

    fn ensure_node(&self, node: PrimaryKey) -> QueryResult<()> {
        if self.index.contains(node) {
            Ok(())
        } else {
            Err(QueryError::HierarchyNodeNotFound {
                entity_type: self.hierarchy_type.clone(),
                node,
            })
        }
    }

    fn direct_matches(&self, node: PrimaryKey, base: Option<&Bitmap>) -> Bitmap {
        match &self.target {
            HierarchyTarget::SelfHierarchy => match base {
                Some(base) if !base.contains(node) => Bitmap::empty(),
                _ => Bitmap::from_iter([node]),
            },
            HierarchyTarget::Reference(reference) => {
                let referencing = self.provider.referencing_entities(reference, node);
                match base {
                    Some(base) => referencing.and(base),
                    None => referencing,
                }
            }
        }
    }

    fn subtree(&self, base: StatisticsBase, node: PrimaryKey, bases: &StatisticsBases) -> Bitmap {
        if let Some(bitmap) = self.subtrees.lock().get(&(base, node)) {
            trace!("subtree of node {} reused", node);
            return bitmap.clone();
        }
        let direct = self.direct_matches(node, bases.base(base));
        let children: Vec<Bitmap> = self
            .index
            .children_of(node)
            .into_iter()
            .map(|child| self.subtree(base, child, bases))
            .collect();
        let subtree = Bitmap::or_all(std::iter::once(&direct).chain(children.iter()));
        self.subtrees.lock().insert((base, node), subtree.clone());
        subtree
    }
}

impl std::fmt::Debug for HierarchyStatisticsProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyStatisticsProducer")
            .field("target", &self.target)
            .field("hierarchy_type", &self.hierarchy_type)
            .field("requirements", &self.requirement_count())
            .finish()
    }
}

/// Traversal of a single requirement.
struct Walk<'a> {
    producer: &'a HierarchyStatisticsProducer,
    requirement: &'a HierarchyRequirement,
    anchor: Option<PrimaryKey>,
    bases: &'a StatisticsBases,
}

impl Walk<'_> {
    fn index(&self) -> &dyn HierarchyIndex {
        self.producer.index.as_ref()
    }

    fn level_below(&self, node: PrimaryKey) -> usize {
        self.index().level_of(node).unwrap_or(0) + 1
    }

    fn levels(&self) -> QueryResult<Vec<LevelInfo>> {
        let index = self.index();
        Ok(match (self.requirement.axis, self.anchor) {
            (HierarchyAxis::FromRoot, _) | (HierarchyAxis::Children, None) | (HierarchyAxis::Siblings, None) => {
                self.emit_all(index.root_nodes(), 1, 1)
            }
            (HierarchyAxis::FromNode { node }, _) => {
                self.producer.ensure_node(node)?;
                self.emit_all(index.children_of(node), 1, self.level_below(node))
            }
            (HierarchyAxis::Children, Some(anchor)) => {
                self.emit_all(index.children_of(anchor), 1, self.level_below(anchor))
            }
            (HierarchyAxis::Siblings, Some(anchor)) => {
                let (siblings, level) = match index.parent_of(anchor) {
                    Some(parent) => (index.children_of(parent), self.level_below(parent)),
                    None => (index.root_nodes(), 1),
                };
                let siblings = siblings.into_iter().filter(|&node| node != anchor).collect();
                self.emit_all(siblings, 1, level)
            }
            (HierarchyAxis::Parents, Some(anchor)) => self.parents(anchor),
            (HierarchyAxis::Parents, None) => Vec::new(),
        })
    }

    fn emit_all(&self, nodes: Vec<PrimaryKey>, distance: usize, level: usize) -> Vec<LevelInfo> {
        nodes
            .into_iter()
            .filter_map(|node| self.emit(node, distance, level))
            .collect()
    }

    fn emit(&self, node: PrimaryKey, distance: usize, level: usize) -> Option<LevelInfo> {
        let within = match &self.requirement.stop {
            Some(StopCondition::Distance(max)) => distance <= *max,
            Some(StopCondition::Level(max)) => level <= *max,
            Some(StopCondition::Node(_)) | None => true,
        };
        if !within {
            return None;
        }
        let queried_entity_count = self.admit(node)?;
        let descend = match &self.requirement.stop {
            Some(StopCondition::Node(predicate)) => !predicate(node),
            _ => true,
        };
        let children = if descend {
            self.emit_all(self.index().children_of(node), distance + 1, level + 1)
        } else {
            Vec::new()
        };
        Some(self.level_info(node, queried_entity_count, children))
    }

    fn parents(&self, anchor: PrimaryKey) -> Vec<LevelInfo> {
        let index = self.index();
        let mut ancestors = Vec::new();
        let mut current = anchor;
        let mut distance = 0;
        while let Some(parent) = index.parent_of(current) {
            distance += 1;
            current = parent;
            match &self.requirement.stop {
                Some(StopCondition::Distance(max)) if distance > *max => break,
                Some(StopCondition::Level(max)) if index.level_of(parent).unwrap_or(0) > *max => continue,
                _ => {}
            }
            ancestors.push(parent);
            if let Some(StopCondition::Node(predicate)) = &self.requirement.stop {
                if predicate(parent) {
                    break;
                }
            }
        }

        // nearest ancestor first, so every node wraps the chain built so far
        let mut chain: Option<LevelInfo> = None;
        for node in ancestors {
            if let Some(count) = self.admit(node) {
                chain = Some(self.level_info(node, count, chain.take().into_iter().collect()));
            }
        }
        chain.into_iter().collect()
    }

    fn removes_empty(&self) -> bool {
        self.requirement.empty_nodes == EmptyNodeBehaviour::RemoveEmpty
            && self.producer.target != HierarchyTarget::SelfHierarchy
    }

    fn count(&self, node: PrimaryKey) -> usize {
        self.producer.subtree(self.requirement.base, node, self.bases).size()
    }

    /// Returns None if the node is dropped, otherwise its queried-entity count if computed.
    fn admit(&self, node: PrimaryKey) -> Option<Option<usize>> {
        let wanted = self.requirement.wants(StatisticsType::QueriedEntityCount);
        if !wanted && !self.removes_empty() {
            return Some(None);
        }
        let count = self.count(node);
        if self.removes_empty() && count == 0 {
            return None;
        }
        Some(wanted.then_some(count))
    }

    fn level_info(
        &self,
        node: PrimaryKey,
        queried_entity_count: Option<usize>,
        children: Vec<LevelInfo>,
    ) -> LevelInfo {
        let children_count = self.requirement.wants(StatisticsType::ChildrenCount).then(|| {
            let children = self.index().children_of(node);
            if self.removes_empty() {
                children.into_iter().filter(|&child| self.count(child) > 0).count()
            } else {
                children.len()
            }
        });
        LevelInfo {
            entity_primary_key: node,
            requested: self.anchor == Some(node),
            queried_entity_count,
            children_count,
            children,
        }
    }
}
