/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! In-memory DAG working copies.
//!
//! [`TaskQueue`] is the scheduler's mutable view of the task DAG: an
//! adjacency structure over task ids, separate from the persistent entities,
//! from which completed or cancelled nodes are removed as the run
//! progresses. `topological_order` serves stage numbering at run start.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::Bfs;
use petgraph::Direction;

use crate::error::ValidationError;

/// Mutable working copy of the task DAG, keyed by task id. Edges point from
/// parent to child.
#[derive(Debug, Default)]
pub struct TaskQueue {
    graph: StableDiGraph<i32, ()>,
    index: HashMap<i32, NodeIndex>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a queue over `nodes`, wiring each `(parent, child)` edge whose
    /// endpoints are both present.
    pub fn from_edges(nodes: &[i32], edges: &[(i32, i32)]) -> Self {
        let mut queue = Self::new();
        for &id in nodes {
            queue.add_node(id);
        }
        for &(parent, child) in edges {
            queue.add_edge(parent, child);
        }
        queue
    }

    pub fn add_node(&mut self, id: i32) {
        if !self.index.contains_key(&id) {
            let idx = self.graph.add_node(id);
            self.index.insert(id, idx);
        }
    }

    pub fn add_edge(&mut self, parent: i32, child: i32) {
        if let (Some(&p), Some(&c)) = (self.index.get(&parent), self.index.get(&child)) {
            self.graph.add_edge(p, c, ());
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: i32) -> bool {
        self.index.contains_key(&id)
    }

    /// Task ids with no remaining parents in the queue, ascending.
    pub fn roots(&self) -> Vec<i32> {
        let mut roots: Vec<i32> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx])
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Removes one task from the queue.
    pub fn remove(&mut self, id: i32) {
        if let Some(idx) = self.index.remove(&id) {
            self.graph.remove_node(idx);
        }
    }

    /// All tasks reachable from `id`, excluding `id` itself, ascending.
    pub fn descendants(&self, id: i32) -> Vec<i32> {
        let Some(&start) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start {
                out.push(self.graph[idx]);
            }
        }
        out.sort_unstable();
        out
    }

    /// Removes `id` and everything reachable from it. Returns the removed
    /// descendants (not including `id`).
    pub fn remove_with_descendants(&mut self, id: i32) -> Vec<i32> {
        let descendants = self.descendants(id);
        for &d in &descendants {
            self.remove(d);
        }
        self.remove(id);
        descendants
    }
}

/// Topologically sorts `(id, parent_ids)` pairs; used to number stages.
/// Within a rank, insertion order is preserved by petgraph's node order.
pub fn topological_order(
    nodes: &[(i32, Vec<i32>)],
    describe: impl Fn(i32) -> String,
) -> Result<Vec<i32>, ValidationError> {
    let mut graph: StableDiGraph<i32, ()> = StableDiGraph::new();
    let mut index = HashMap::new();
    for (id, _) in nodes {
        index.insert(*id, graph.add_node(*id));
    }
    for (id, parents) in nodes {
        for parent in parents {
            if let (Some(&p), Some(&c)) = (index.get(parent), index.get(id)) {
                graph.add_edge(p, c, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|idx| graph[idx]).collect()),
        Err(cycle) => Err(ValidationError::CyclicDependency {
            stage: describe(graph[cycle.node_id()]),
        }),
    }
}
