use std::collections::{HashSet, VecDeque};

use crate::analysis::lockcheck::bitset::{FallibleSet, LocalLockSet};
use crate::analysis::lockcheck::types::{Action, BasicBlock, BlockIdx, EdgeState, FuncModel, Host};

/// Visited-set identity of an [`EdgeState`]: the visitor payload is scratch
/// space and deliberately left out.
type StateKey = (BlockIdx, LocalLockSet, FallibleSet);

/// Breadth-first enumeration of every reachable `(block, held, fallible)`
/// state of one function.
///
/// The visitor fires for each action of each walked block, once per possible
/// state, in source order within the block; reaching the exit block fires a
/// single synthetic [`Action::End`] instead. A `FallibleLock` forks the
/// possible-state list: states already holding the lock are carried through
/// unforked, since the acquisition can only fail there.
///
/// Termination: the state space is finite (blocks x 2^32 x 2^32) and the
/// visited set admits each state once.
pub struct PathExplorer<'a, H: Host> {
    func: &'a FuncModel<H>,
}

impl<'a, H: Host> PathExplorer<'a, H> {
    pub fn new(func: &'a FuncModel<H>) -> Self {
        PathExplorer { func }
    }

    /// Walk the function, starting from `start` if given, else from the
    /// entry block with no locks held and `init` as the visitor payload.
    pub fn run<U, F>(&self, init: U, start: Option<EdgeState<U>>, mut visit: F)
    where
        U: Clone,
        F: FnMut(&mut EdgeState<U>, &BasicBlock<H>, &Action<H>),
    {
        let mut to_explore: VecDeque<EdgeState<U>> = VecDeque::new();
        let mut visited: HashSet<StateKey> = HashSet::new();

        to_explore.push_back(start.unwrap_or_else(|| EdgeState::seed(self.func.start(), init)));

        while let Some(state) = to_explore.pop_front() {
            if !visited.insert((state.block, state.held, state.fallible)) {
                continue;
            }

            let block = self.func.block(state.block);

            if state.block == self.func.end() {
                let end = Action::end(self.func.end_loc().clone());
                let mut state = state;
                visit(&mut state, block, &end);
                continue;
            }

            let mut possible_states = vec![state];
            for action in &block.actions {
                for s in possible_states.iter_mut() {
                    visit(s, block, action);
                }

                match action {
                    Action::Lock { lock, .. } => {
                        for s in possible_states.iter_mut() {
                            s.held.insert(*lock);
                        }
                    }
                    Action::Unlock { lock, .. } => {
                        for s in possible_states.iter_mut() {
                            s.held.remove(*lock);
                        }
                    }
                    Action::FallibleLock { lock, call, .. } => {
                        // Fork off the states where the acquisition succeeds.
                        // A state already holding the lock cannot take it
                        // again, so the call fails there and no fork happens.
                        let len = possible_states.len();
                        for i in 0..len {
                            if possible_states[i].held.contains(*lock) {
                                continue;
                            }
                            let mut taken = possible_states[i].clone();
                            taken.held.insert(*lock);
                            taken.fallible.insert(*call);
                            possible_states.push(taken);
                        }
                    }
                    // Calls do not change the lock state; a stored End is
                    // rejected at model construction.
                    Action::Call { .. } | Action::End { .. } => {}
                }
            }

            // Propagate every surviving state to its successors.
            for s in possible_states {
                let next = block.next;
                match next.depends_on {
                    Some(call) => {
                        let target = if s.fallible.contains(call) {
                            next.on_true
                        } else {
                            // Model validation guarantees the false edge.
                            match next.on_false {
                                Some(on_false) => on_false,
                                None => continue,
                            }
                        };
                        to_explore.push_back(EdgeState {
                            block: target,
                            ..s
                        });
                    }
                    None => {
                        to_explore.push_back(EdgeState {
                            block: next.on_true,
                            held: s.held,
                            fallible: s.fallible,
                            user: s.user.clone(),
                        });
                        if let Some(on_false) = next.on_false {
                            to_explore.push_back(EdgeState {
                                block: on_false,
                                ..s
                            });
                        }
                    }
                }
            }
        }
    }
}
