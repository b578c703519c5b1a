//! Dependency resolution for feature streams.
//!
//! `StreamGraph` is built once, at stream creation, from the declared
//! phase specs. Construction validates the graph structure:
//! - All dependencies must reference declared phases
//! - No duplicate phase identifiers
//! - No cycles (Kahn's algorithm)
//!
//! `ready_phases` is a pure function over a snapshot of phase records, so
//! it always reflects the latest committed state; nothing is cached
//! across calls.

use std::collections::{HashMap, HashSet};

use crate::errors::StoreError;
use crate::phase::{PhaseId, PhaseRecord, PhaseSpec, PhaseState};

/// Index into the phase list.
pub type PhaseIndex = usize;

/// A directed acyclic graph of phases. Immutable after creation.
#[derive(Debug, Clone)]
pub struct StreamGraph {
    /// Phase identifiers in declaration order
    ids: Vec<PhaseId>,
    /// Map from phase id to index
    index_map: HashMap<PhaseId, PhaseIndex>,
    /// index -> phases that depend on it
    dependents: Vec<Vec<PhaseIndex>>,
    /// index -> phases it depends on
    prerequisites: Vec<Vec<PhaseIndex>>,
}

impl StreamGraph {
    /// Build and validate a graph from declared phase specs.
    pub fn build(specs: &[PhaseSpec]) -> Result<Self, StoreError> {
        if specs.is_empty() {
            return Err(StoreError::InvalidGraph(
                "a stream must declare at least one phase".to_string(),
            ));
        }

        let mut index_map = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            if index_map.insert(spec.id.clone(), i).is_some() {
                return Err(StoreError::InvalidGraph(format!(
                    "duplicate phase id '{}'",
                    spec.id
                )));
            }
        }

        let mut dependents: Vec<Vec<PhaseIndex>> = vec![Vec::new(); specs.len()];
        let mut prerequisites: Vec<Vec<PhaseIndex>> = vec![Vec::new(); specs.len()];

        for (to_idx, spec) in specs.iter().enumerate() {
            for dep in &spec.depends_on {
                let from_idx = *index_map.get(dep).ok_or_else(|| {
                    StoreError::InvalidGraph(format!(
                        "phase '{}' depends on unknown phase '{}'",
                        spec.id, dep
                    ))
                })?;
                if from_idx == to_idx {
                    return Err(StoreError::InvalidGraph(format!(
                        "phase '{}' depends on itself",
                        spec.id
                    )));
                }
                dependents[from_idx].push(to_idx);
                prerequisites[to_idx].push(from_idx);
            }
        }

        let graph = Self {
            ids: specs.iter().map(|s| s.id.clone()).collect(),
            index_map,
            dependents,
            prerequisites,
        };

        graph.validate_no_cycles()?;

        Ok(graph)
    }

    /// Validate acyclicity using Kahn's algorithm.
    fn validate_no_cycles(&self) -> Result<(), StoreError> {
        let mut in_degree: Vec<usize> = self.prerequisites.iter().map(|deps| deps.len()).collect();

        let mut queue: Vec<PhaseIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;

        while let Some(node) = queue.pop() {
            processed += 1;

            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != self.ids.len() {
            let cycle_phases: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| self.ids[i].as_str())
                .collect();

            return Err(StoreError::InvalidGraph(format!(
                "cycle detected in phase dependencies, involved phases: {:?}",
                cycle_phases
            )));
        }

        Ok(())
    }

    /// Get the number of phases in the graph.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Get the index for a phase id.
    pub fn index_of(&self, id: &str) -> Option<PhaseIndex> {
        self.index_map.get(id).copied()
    }

    /// Get all phase ids in declaration order.
    pub fn ids(&self) -> &[PhaseId] {
        &self.ids
    }

    /// Get the indices of phases the given phase depends on.
    pub fn prerequisites_of(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.prerequisites.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Get the indices of phases that depend on the given phase.
    pub fn dependents_of(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.dependents.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Check if all prerequisites of a phase are in the merged set.
    pub fn prerequisites_merged(&self, index: PhaseIndex, merged: &HashSet<PhaseIndex>) -> bool {
        self.prerequisites_of(index)
            .iter()
            .all(|dep| merged.contains(dep))
    }
}

/// Compute the set of phases eligible to start.
///
/// A phase is ready iff its state is `Pending` and every prerequisite's
/// state is `Merged`. The records slice must be in the graph's
/// declaration order, which is how the store hands out snapshots.
pub fn ready_phases(graph: &StreamGraph, records: &[PhaseRecord]) -> Vec<PhaseId> {
    let merged: HashSet<PhaseIndex> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.state == PhaseState::Merged)
        .map(|(i, _)| i)
        .collect();

    records
        .iter()
        .enumerate()
        .filter(|(i, r)| {
            r.state == PhaseState::Pending && graph.prerequisites_merged(*i, &merged)
        })
        .map(|(_, r)| r.id.clone())
        .collect()
}
