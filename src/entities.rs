//! The entity store: an arena of entities with a precomputed ancestor closure.
//!
//! Entities live in a vector and parent edges are arena indices. Parents
//! that are referenced but never defined get a node of their own and behave
//! as attribute-less leaves. The transitive closure is computed once, during
//! the same depth-first walk that rejects cycles.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::PolicyError;
use crate::types::{Entity, EntityUid};

#[derive(Debug, Clone)]
struct Node {
    uid: EntityUid,
    /// `None` for a parent that is referenced but not defined.
    entity: Option<Entity>,
    parents: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Immutable entity hierarchy, built once per slice.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    nodes: Vec<Node>,
    index: HashMap<EntityUid, usize>,
    /// Strict ancestors of each node, by arena index.
    closure: Vec<HashSet<usize>>,
    /// Arena indices of defined entities, in input order.
    defined: Vec<usize>,
}

impl EntityStore {
    pub fn empty() -> Self {
        EntityStore::default()
    }

    /// Build a store, rejecting duplicate UIDs and cyclic parent chains.
    pub fn new(entities: impl IntoIterator<Item = Entity>) -> Result<Self, PolicyError> {
        let mut store = EntityStore::default();

        for entity in entities {
            let uid = entity.uid().clone();
            let idx = store.node_for(&uid);
            if store.nodes[idx].entity.is_some() {
                return Err(PolicyError::DuplicateEntity(uid.to_string()));
            }
            let parents = entity
                .parents()
                .iter()
                .map(|parent| store.node_for(parent))
                .collect();
            let node = &mut store.nodes[idx];
            node.parents = parents;
            node.entity = Some(entity);
            store.defined.push(idx);
        }

        store.closure = store.compute_closure()?;

        debug!(
            event = "Entities",
            phase = "Built",
            entities = store.defined.len(),
            nodes = store.nodes.len()
        );
        Ok(store)
    }

    /// Parse the wire form, a JSON array of entities.
    pub fn from_json(text: &str) -> Result<Self, PolicyError> {
        let entities: Vec<Entity> = serde_json::from_str(text)?;
        EntityStore::new(entities)
    }

    fn node_for(&mut self, uid: &EntityUid) -> usize {
        if let Some(&idx) = self.index.get(uid) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            uid: uid.clone(),
            entity: None,
            parents: Vec::new(),
        });
        self.index.insert(uid.clone(), idx);
        idx
    }

    /// Iterative white/grey/black DFS. A grey parent means a back edge.
    fn compute_closure(&self) -> Result<Vec<HashSet<usize>>, PolicyError> {
        let mut colour = vec![Colour::White; self.nodes.len()];
        let mut closure: Vec<HashSet<usize>> = vec![HashSet::new(); self.nodes.len()];

        for root in 0..self.nodes.len() {
            if colour[root] != Colour::White {
                continue;
            }
            colour[root] = Colour::Grey;
            // (node, next parent to visit)
            let mut stack = vec![(root, 0usize)];

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                if let Some(&parent) = self.nodes[node].parents.get(next) {
                    frame.1 += 1;
                    match colour[parent] {
                        Colour::White => {
                            colour[parent] = Colour::Grey;
                            stack.push((parent, 0));
                        }
                        Colour::Grey => return Err(self.cycle_error(&stack, parent)),
                        Colour::Black => {}
                    }
                    continue;
                }

                let mut ancestors = HashSet::new();
                for &parent in &self.nodes[node].parents {
                    ancestors.insert(parent);
                    ancestors.extend(closure[parent].iter().copied());
                }
                closure[node] = ancestors;
                colour[node] = Colour::Black;
                stack.pop();
            }
        }

        Ok(closure)
    }

    fn cycle_error(&self, stack: &[(usize, usize)], back_to: usize) -> PolicyError {
        let start = stack
            .iter()
            .position(|(node, _)| *node == back_to)
            .unwrap_or(0);
        let path: Vec<String> = stack[start..]
            .iter()
            .map(|(node, _)| self.nodes[*node].uid.to_string())
            .chain(std::iter::once(self.nodes[back_to].uid.to_string()))
            .collect();
        PolicyError::CyclicHierarchy(path.join(" -> "))
    }

    pub fn get(&self, uid: &EntityUid) -> Result<&Entity, PolicyError> {
        self.index
            .get(uid)
            .and_then(|&idx| self.nodes[idx].entity.as_ref())
            .ok_or_else(|| PolicyError::UnknownEntity(uid.to_string()))
    }

    /// True if the UID is defined in the store (not merely referenced as a parent).
    pub fn contains(&self, uid: &EntityUid) -> bool {
        self.get(uid).is_ok()
    }

    /// All transitive ancestors. Unknown UIDs have none.
    pub fn ancestors_of(&self, uid: &EntityUid) -> BTreeSet<&EntityUid> {
        self.index
            .get(uid)
            .map(|&idx| {
                self.closure[idx]
                    .iter()
                    .map(|&a| &self.nodes[a].uid)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cedar's `in`: equal, or `ancestor` is in the closure of `child`.
    pub fn is_descendant_of(&self, child: &EntityUid, ancestor: &EntityUid) -> bool {
        if child == ancestor {
            return true;
        }
        match (self.index.get(child), self.index.get(ancestor)) {
            (Some(&c), Some(&a)) => self.closure[c].contains(&a),
            _ => false,
        }
    }

    /// Defined entities, in input order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.defined
            .iter()
            .filter_map(|&idx| self.nodes[idx].entity.as_ref())
    }

    pub fn len(&self) -> usize {
        self.defined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defined.is_empty()
    }
}

impl Serialize for EntityStore {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_seq(self.iter())
    }
}
