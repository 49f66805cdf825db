use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};

use crate::analysis::lockcheck::bitset::GlobalLockSet;
use crate::analysis::lockcheck::types::Host;

/// One observed call: where it happens and which locks (global frame) the
/// caller holds on some path reaching it.
pub struct CallSite<H: Host> {
    pub location: H::Location,
    pub held_at_call: GlobalLockSet,
}

impl<H: Host> Clone for CallSite<H> {
    fn clone(&self) -> Self {
        CallSite {
            location: self.location.clone(),
            held_at_call: self.held_at_call,
        }
    }
}

impl<H: Host> Debug for CallSite<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} holding {}", self.location, self.held_at_call)
    }
}

/// The call graph observed so far, kept for walking callee-to-caller when a
/// blocking summary grows. Nodes are function identities, edges are call
/// sites; functions appear as soon as they are named, processed or not.
pub struct CallGraph<H: Host> {
    graph: DiGraph<H::FuncId, CallSite<H>>,
    nodes: HashMap<H::FuncId, NodeIndex>,
}

impl<H: Host> CallGraph<H> {
    pub fn new() -> Self {
        CallGraph {
            graph: DiGraph::new(),
            nodes: HashMap::new(),
        }
    }

    fn node_id_or_insert(&mut self, func: &H::FuncId) -> NodeIndex {
        if let Some(idx) = self.nodes.get(func) {
            return *idx;
        }
        let idx = self.graph.add_node(func.clone());
        self.nodes.insert(func.clone(), idx);
        idx
    }

    /// Record a call from `caller` to `callee`. An identical record (same
    /// site, same held set) is ignored; the same site can legitimately recur
    /// with different held sets when distinct paths reach it.
    pub fn add_call(
        &mut self,
        caller: H::FuncId,
        callee: H::FuncId,
        location: H::Location,
        held_at_call: GlobalLockSet,
    ) {
        let caller_idx = self.node_id_or_insert(&caller);
        let callee_idx = self.node_id_or_insert(&callee);

        if self
            .graph
            .edges_connecting(caller_idx, callee_idx)
            .any(|edge| {
                edge.weight().location == location && edge.weight().held_at_call == held_at_call
            })
        {
            return;
        }
        self.graph.add_edge(
            caller_idx,
            callee_idx,
            CallSite {
                location,
                held_at_call,
            },
        );
    }

    /// Every recorded call into `callee`, as `(caller, location, held)`.
    pub fn callers_of(&self, callee: &H::FuncId) -> Vec<(H::FuncId, H::Location, GlobalLockSet)> {
        let Some(idx) = self.nodes.get(callee) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Incoming)
            .map(|edge| {
                (
                    self.graph[edge.source()].clone(),
                    edge.weight().location.clone(),
                    edge.weight().held_at_call,
                )
            })
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lockcheck::bitset::GlobalLockIdx;

    struct TestHost;

    impl Host for TestHost {
        type FuncId = &'static str;
        type LockId = u32;
        type Location = u32;
    }

    #[test]
    fn records_and_lists_callers() {
        let mut graph: CallGraph<TestHost> = CallGraph::new();
        graph.add_call("f", "g", 10, GlobalLockIdx::new(0).mask());
        graph.add_call("h", "g", 20, GlobalLockSet::empty());

        let mut callers = graph.callers_of(&"g");
        callers.sort_by_key(|(caller, _, _)| *caller);
        assert_eq!(
            callers,
            vec![
                ("f", 10, GlobalLockIdx::new(0).mask()),
                ("h", 20, GlobalLockSet::empty()),
            ]
        );
        assert!(graph.callers_of(&"f").is_empty());
        assert!(graph.callers_of(&"missing").is_empty());
    }

    #[test]
    fn identical_records_are_collapsed() {
        let mut graph: CallGraph<TestHost> = CallGraph::new();
        let held = GlobalLockIdx::new(1).mask();
        graph.add_call("f", "g", 10, held);
        graph.add_call("f", "g", 10, held);
        assert_eq!(graph.call_count(), 1);

        // A different held set at the same site is a distinct record.
        graph.add_call("f", "g", 10, GlobalLockSet::empty());
        assert_eq!(graph.call_count(), 2);
    }
}
