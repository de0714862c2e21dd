//! Stage dependency graph

use crate::core::{stage::StageDefinition, state::{RunState, StageState}};
use crate::error::DefinitionError;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Validated, acyclic graph of stages and their `needs` edges
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Stage ids in definition order
    ids: Vec<String>,

    /// stage -> stages it needs
    needs: HashMap<String, Vec<String>>,

    /// stage -> stages that need it
    dependents: HashMap<String, Vec<String>>,

    /// Topological order, ties broken by definition order
    topo: Vec<String>,
}

impl StageGraph {
    /// Build the graph, rejecting unknown dependencies and cycles
    pub fn new(stages: &[StageDefinition]) -> Result<Self, DefinitionError> {
        let ids: Vec<String> = stages.iter().map(|s| s.id.clone()).collect();
        let known: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let mut needs: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> =
            ids.iter().map(|id| (id.clone(), Vec::new())).collect();

        for stage in stages {
            let mut deps = Vec::new();
            for dep in &stage.needs {
                if !known.contains(dep.as_str()) {
                    return Err(DefinitionError::UnknownDependency {
                        stage: stage.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                // Repeated entries in `needs` collapse to one edge
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                    if let Some(list) = dependents.get_mut(dep) {
                        list.push(stage.id.clone());
                    }
                }
            }
            needs.insert(stage.id.clone(), deps);
        }

        let topo = Self::topological_sort(&ids, &needs, &dependents)?;

        Ok(Self {
            ids,
            needs,
            dependents,
            topo,
        })
    }

    /// Kahn's algorithm; on failure, report one cycle
    fn topological_sort(
        ids: &[String],
        needs: &HashMap<String, Vec<String>>,
        dependents: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, DefinitionError> {
        let mut in_degree: HashMap<&str, usize> = ids
            .iter()
            .map(|id| (id.as_str(), needs.get(id).map_or(0, Vec::len)))
            .collect();

        let mut queue: VecDeque<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree[id] == 0)
            .collect();

        let mut order = Vec::with_capacity(ids.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() == ids.len() {
            return Ok(order);
        }

        // Every unsorted stage still needs at least one unsorted stage, so
        // walking those edges from any of them must revisit a stage.
        let sorted: HashSet<&str> = order.iter().map(String::as_str).collect();
        let remaining = |id: &str| !sorted.contains(id);
        let start = ids
            .iter()
            .find(|id| remaining(id))
            .map(String::as_str)
            .unwrap_or_default();

        let mut path: Vec<String> = Vec::new();
        let mut position: HashMap<String, usize> = HashMap::new();
        let mut current = start.to_string();
        loop {
            if let Some(&pos) = position.get(&current) {
                return Err(DefinitionError::Cycle(path.split_off(pos)));
            }
            position.insert(current.clone(), path.len());
            path.push(current.clone());

            match needs
                .get(&current)
                .and_then(|deps| deps.iter().find(|d| remaining(d)))
            {
                Some(next) => current = next.clone(),
                None => return Err(DefinitionError::Cycle(path)),
            }
        }
    }

    /// Stage ids in topological order
    pub fn topological_order(&self) -> &[String] {
        &self.topo
    }

    /// Stage ids in definition order
    pub fn stage_ids(&self) -> &[String] {
        &self.ids
    }

    /// Direct dependencies of a stage
    pub fn needs_of(&self, stage_id: &str) -> &[String] {
        self.needs.get(stage_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Direct dependents of a stage
    pub fn dependents_of(&self, stage_id: &str) -> &[String] {
        self.dependents.get(stage_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Pending stages whose every dependency has Succeeded
    pub fn ready(&self, state: &RunState) -> BTreeSet<String> {
        self.ids
            .iter()
            .filter(|id| matches!(state.get(id), Some(StageState::Pending)))
            .filter(|id| self.needs_of(id).iter().all(|dep| state.is_succeeded(dep)))
            .cloned()
            .collect()
    }

    /// Every transitive dependent of the given stages, breadth-first
    ///
    /// The roots themselves are not included.
    pub fn downstream(&self, roots: &[&str]) -> Vec<String> {
        let mut seen: HashSet<&str> = roots.iter().copied().collect();
        let mut queue: VecDeque<&str> = roots.iter().copied().collect();
        let mut result = Vec::new();

        while let Some(id) = queue.pop_front() {
            for dependent in self.dependents_of(id) {
                if seen.insert(dependent.as_str()) {
                    result.push(dependent.clone());
                    queue.push_back(dependent);
                }
            }
        }

        result
    }

    /// Whether `ancestor` is reachable from `stage_id` through `needs` edges
    pub fn is_ancestor(&self, ancestor: &str, stage_id: &str) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.needs_of(stage_id).iter().map(String::as_str).collect();

        while let Some(id) = queue.pop_front() {
            if id == ancestor {
                return true;
            }
            if seen.insert(id) {
                queue.extend(self.needs_of(id).iter().map(String::as_str));
            }
        }
        false
    }
}
