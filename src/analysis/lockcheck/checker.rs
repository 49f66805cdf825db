use snafu::{Snafu, ensure};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::analysis::lockcheck::bitset::{GlobalLockIdx, GlobalLockSet, LocalLockSet};
use crate::analysis::lockcheck::callgraph::CallGraph;
use crate::analysis::lockcheck::errors::{Diagnostic, ErrorMap};
use crate::analysis::lockcheck::explorer::PathExplorer;
use crate::analysis::lockcheck::types::{Action, FuncModel, Host};
use crate::{semcheck_debug, semcheck_trace};

/// Translation-unit-level configuration failure. Findings are never errors;
/// they go into the caller's [`ErrorMap`].
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum CheckError {
    #[snafu(display(
        "translation unit would reference {count} distinct locks, the limit is 32"
    ))]
    LockTableOverflow { count: usize },
}

/// Translation-unit-scoped driver.
///
/// Functions arrive in any order. Each submission is explored on its own,
/// then the blocking summaries are propagated caller-ward through the call
/// graph recorded so far, so a callee registered late still flags the call
/// sites of every function already seen.
pub struct FileChecker<H: Host> {
    /// Global lock table: every lock identity seen anywhere in the unit gets
    /// one index, assigned at first sight and never reused.
    lock_idx: HashMap<H::LockId, GlobalLockIdx>,
    locks: Vec<H::LockId>,

    /// Retained models, for host lookups after submission.
    functions: HashMap<H::FuncId, FuncModel<H>>,

    /// Locks each function may take blockingly on some path, including
    /// transitively through callees. Bits only ever turn on.
    blocking_locks: HashMap<H::FuncId, GlobalLockSet>,

    /// Reverse edges: who calls whom, holding what.
    callers: CallGraph<H>,
}

impl<H: Host> FileChecker<H> {
    /// Hard cap on distinct locks per translation unit.
    pub const GLOBAL_LOCK_LIMIT: usize = 32;

    pub fn new() -> Self {
        FileChecker {
            lock_idx: HashMap::new(),
            locks: Vec::new(),
            functions: HashMap::new(),
            blocking_locks: HashMap::new(),
            callers: CallGraph::new(),
        }
    }

    /// Register `model` under `id`, explore it, and propagate summary
    /// changes to its callers. Findings accumulate in `errors`.
    ///
    /// Fails without touching any checker state if the function's locks
    /// would grow the global table past the cap.
    pub fn process_function(
        &mut self,
        id: H::FuncId,
        model: FuncModel<H>,
        errors: &mut ErrorMap<H::Location>,
    ) -> Result<(), CheckError> {
        semcheck_trace!("processing function {:?}", id);

        let to_global = self.register_locks(&model)?;

        // Walk every feasible path once, collecting findings, the function's
        // own blocking summary, and the call sites it contains.
        let mut blocking = GlobalLockSet::empty();
        let mut observed_calls: Vec<(H::FuncId, H::Location, GlobalLockSet)> = Vec::new();
        let summaries = &self.blocking_locks;

        PathExplorer::new(&model).run((), None, |state, _block, action| match action {
            Action::Lock { loc, lock } => {
                blocking |= to_global[lock.get() as usize].mask();
                if state.held.contains(*lock) {
                    errors.add(
                        loc.clone(),
                        Diagnostic::double_take(format!(
                            "lock {:?} is already held on this path",
                            model.lookup_lock(*lock)
                        )),
                    );
                }
            }
            Action::Unlock { loc, lock } => {
                if !state.held.contains(*lock) {
                    errors.add(
                        loc.clone(),
                        Diagnostic::give_without_take(format!(
                            "lock {:?} is not held on this path",
                            model.lookup_lock(*lock)
                        )),
                    );
                }
            }
            // A bounded acquisition gives up instead of blocking forever,
            // so it contributes nothing to the blocking summary.
            Action::FallibleLock { .. } => {}
            Action::Call { loc, callee } => {
                let held = translate(state.held, &to_global);
                if let Some(callee_summary) = summaries.get(callee) {
                    if !(held & *callee_summary).is_empty() {
                        errors.add(
                            loc.clone(),
                            Diagnostic::call_with_blocking_lock(blocking_call_detail::<H>(callee)),
                        );
                    }
                    blocking |= *callee_summary;
                }
                observed_calls.push((callee.clone(), loc.clone(), held));
            }
            Action::End { loc } => {
                if !state.held.is_empty() {
                    let still_held: Vec<&H::LockId> =
                        state.held.iter().map(|l| model.lookup_lock(l)).collect();
                    errors.add(
                        loc.clone(),
                        Diagnostic::take_without_give(format!(
                            "locks {still_held:?} still held at function exit"
                        )),
                    );
                }
            }
        });

        for (callee, loc, held) in observed_calls {
            self.callers.add_call(id.clone(), callee, loc, held);
        }
        self.functions.insert(id.clone(), model);

        let summary = self.blocking_locks.entry(id.clone()).or_default();
        *summary |= blocking;
        semcheck_debug!("blocking summary of {:?}: {}", id, summary);

        self.propagate(id, errors);
        Ok(())
    }

    /// Locks this function may take blockingly, in global indices, if it has
    /// been named so far (a function only known as a callee reports the
    /// summary propagated into it).
    pub fn summary_of(&self, id: &H::FuncId) -> Option<GlobalLockSet> {
        self.blocking_locks.get(id).copied()
    }

    pub fn function(&self, id: &H::FuncId) -> Option<&FuncModel<H>> {
        self.functions.get(id)
    }

    /// The global index assigned to a lock identity, if it has been seen.
    pub fn lock_index(&self, lock: &H::LockId) -> Option<GlobalLockIdx> {
        self.lock_idx.get(lock).copied()
    }

    /// Every lock identity seen so far, ordered by global index.
    pub fn global_locks(&self) -> &[H::LockId] {
        &self.locks
    }

    /// Assign global indices to any of the model's locks not seen before and
    /// return the function's local-to-global translation table.
    fn register_locks(&mut self, model: &FuncModel<H>) -> Result<Vec<GlobalLockIdx>, CheckError> {
        let mut fresh: HashSet<&H::LockId> = HashSet::new();
        for lock in model.locks() {
            if !self.lock_idx.contains_key(lock) {
                fresh.insert(lock);
            }
        }
        let count = self.locks.len() + fresh.len();
        ensure!(
            count <= Self::GLOBAL_LOCK_LIMIT,
            LockTableOverflowSnafu { count }
        );

        let mut to_global = Vec::with_capacity(model.locks().len());
        for lock in model.locks() {
            let idx = match self.lock_idx.get(lock) {
                Some(idx) => *idx,
                None => {
                    let idx = GlobalLockIdx::new(self.locks.len() as u32);
                    self.lock_idx.insert(lock.clone(), idx);
                    self.locks.push(lock.clone());
                    idx
                }
            };
            to_global.push(idx);
        }
        Ok(to_global)
    }

    /// Walk caller-ward from `origin`, widening summaries and flagging call
    /// sites that hold a lock their callee may block on.
    ///
    /// An explicit worklist instead of recursion: a summary widens at most
    /// 32 times, so this terminates even on call-graph cycles.
    fn propagate(&mut self, origin: H::FuncId, errors: &mut ErrorMap<H::Location>) {
        let mut worklist: VecDeque<H::FuncId> = VecDeque::new();
        worklist.push_back(origin);

        while let Some(callee) = worklist.pop_front() {
            let callee_summary = match self.blocking_locks.get(&callee) {
                Some(summary) if !summary.is_empty() => *summary,
                // Nothing to flag and nothing to widen callers with.
                _ => continue,
            };

            for (caller, loc, held) in self.callers.callers_of(&callee) {
                if !(held & callee_summary).is_empty() {
                    errors.add(
                        loc,
                        Diagnostic::call_with_blocking_lock(blocking_call_detail::<H>(&callee)),
                    );
                }

                let summary = self.blocking_locks.entry(caller.clone()).or_default();
                let widened = *summary | callee_summary;
                if widened != *summary {
                    *summary = widened;
                    semcheck_trace!("blocking summary of {:?} widened to {}", caller, widened);
                    worklist.push_back(caller);
                }
            }
        }
    }
}

impl<H: Host> Default for FileChecker<H> {
    fn default() -> Self {
        Self::new()
    }
}

fn translate(held: LocalLockSet, to_global: &[GlobalLockIdx]) -> GlobalLockSet {
    let mut global = GlobalLockSet::empty();
    for idx in held.iter() {
        global |= to_global[idx.get() as usize].mask();
    }
    global
}

fn blocking_call_detail<H: Host>(callee: &H::FuncId) -> String {
    format!("{callee:?} may block on a lock held at this call")
}
