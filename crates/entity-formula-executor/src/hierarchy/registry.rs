//! Per-plan registry of extra-result producers.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;

use super::producer::{HierarchyStatisticsProducer, StatisticsBases};
use super::{HierarchyRequest, HierarchyTarget, LevelInfo, StatisticsBase};
use crate::error::{QueryError, QueryResult};
use crate::traits::IndexProvider;

/// Lookup key of a registered producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProducerKey {
    /// Hierarchy statistics of a target.
    Hierarchy(HierarchyTarget),
}

/// Producers registered while planning one query.
#[derive(Default)]
pub struct ProducerRegistry {
    producers: HashMap<ProducerKey, Arc<HierarchyStatisticsProducer>>,
    order: Vec<ProducerKey>,
}

impl ProducerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the requirements of a request and returns the target's producer.
    ///
    /// Fails before any traversal if the target type is not hierarchical.
    pub fn register_hierarchy(
        &mut self,
        provider: &Arc<dyn IndexProvider>,
        queried_entity_type: &str,
        request: &HierarchyRequest,
    ) -> QueryResult<Arc<HierarchyStatisticsProducer>> {
        let key = ProducerKey::Hierarchy(request.target.clone());
        let producer = match self.producers.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                let hierarchy_type = match &request.target {
                    HierarchyTarget::SelfHierarchy => queried_entity_type.to_string(),
                    HierarchyTarget::Reference(reference) => provider
                        .reference_target_type(queried_entity_type, reference)
                        .ok_or_else(|| QueryError::ReferenceNotFound {
                            entity_type: queried_entity_type.to_string(),
                            reference: reference.clone(),
                        })?,
                };
                let index = provider
                    .hierarchy_index(&hierarchy_type)
                    .ok_or_else(|| QueryError::TargetEntityIsNotHierarchical(hierarchy_type.clone()))?;
                debug!("registered hierarchy producer for {:?} ({})", request.target, hierarchy_type);
                let producer = Arc::new(HierarchyStatisticsProducer::new(
                    request.target.clone(),
                    hierarchy_type,
                    index,
                    provider.clone(),
                ));
                self.producers.insert(key.clone(), producer.clone());
                self.order.push(key);
                producer
            }
        };
        for requirement in &request.requirements {
            producer.add_requirement(request.anchor, requirement.clone());
        }
        Ok(producer)
    }

    /// Producer registered for a target.
    pub fn hierarchy_producer(&self, target: &HierarchyTarget) -> Option<&Arc<HierarchyStatisticsProducer>> {
        self.producers.get(&ProducerKey::Hierarchy(target.clone()))
    }

    /// Number of registered producers.
    pub fn len(&self) -> usize {
        self.producers.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Returns true if any producer counts against the base.
    pub fn needs_base(&self, base: StatisticsBase) -> bool {
        self.producers.values().any(|p| p.needs_base(base))
    }

    /// Runs every producer in registration order.
    pub fn produce_all(&self, bases: &StatisticsBases) -> QueryResult<ExtraResults> {
        let mut results = ExtraResults::default();
        for key in &self.order {
            let Some(producer) = self.producers.get(key) else {
                continue;
            };
            let outputs = producer.produce(bases)?;
            results.hierarchy.insert(producer.target().clone(), outputs);
        }
        Ok(results)
    }
}

impl std::fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.order.iter()).finish()
    }
}

/// Extra results of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtraResults {
    /// Hierarchy outputs per target and output name.
    pub hierarchy: BTreeMap<HierarchyTarget, BTreeMap<String, Vec<LevelInfo>>>,
}

impl ExtraResults {
    /// Output of the queried entity type's own hierarchy.
    pub fn self_hierarchy(&self, output_name: &str) -> Option<&[LevelInfo]> {
        self.hierarchy_output(&HierarchyTarget::SelfHierarchy, output_name)
    }

    /// Output of a referenced hierarchy.
    pub fn reference_hierarchy(&self, reference: &str, output_name: &str) -> Option<&[LevelInfo]> {
        self.hierarchy_output(&HierarchyTarget::Reference(reference.to_string()), output_name)
    }

    /// Output of any target.
    pub fn hierarchy_output(&self, target: &HierarchyTarget, output_name: &str) -> Option<&[LevelInfo]> {
        self.hierarchy
            .get(target)
            .and_then(|outputs| outputs.get(output_name))
            .map(Vec::as_slice)
    }

    /// Returns true if there are no outputs.
    pub fn is_empty(&self) -> bool {
        self.hierarchy.is_empty()
    }
}
