use snafu::{Snafu, ensure};
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;

use crate::analysis::lockcheck::bitset::{FallibleCallIdx, FallibleSet, LocalLockIdx, LocalLockSet};

/// The three identities the host compiler supplies.
/// They stay opaque to the analysis: equality and hashing drive the lock
/// table, the call graph, and the error map, and `Debug` feeds diagnostic
/// detail strings and the log.
pub trait Host {
    type FuncId: Clone + Eq + Hash + Debug;
    type LockId: Clone + Eq + Hash + Debug;
    type Location: Clone + Eq + Hash + Debug;
}

/// Index of a basic block within one function's `blocks` vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockIdx(u32);

impl BlockIdx {
    pub const fn new(raw: u32) -> Self {
        BlockIdx(raw)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockIdx {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// One step a path can take through a function.
/// `End` is synthesized by the explorer when a path reaches the exit block;
/// storing it inside a block is a construction error.
pub enum Action<H: Host> {
    Lock {
        loc: H::Location,
        lock: LocalLockIdx,
    },
    FallibleLock {
        loc: H::Location,
        lock: LocalLockIdx,
        call: FallibleCallIdx,
    },
    Unlock {
        loc: H::Location,
        lock: LocalLockIdx,
    },
    Call {
        loc: H::Location,
        callee: H::FuncId,
    },
    End {
        loc: H::Location,
    },
}

impl<H: Host> Action<H> {
    pub fn lock(loc: H::Location, lock: LocalLockIdx) -> Self {
        Action::Lock { loc, lock }
    }

    pub fn fallible_lock(loc: H::Location, lock: LocalLockIdx, call: FallibleCallIdx) -> Self {
        Action::FallibleLock { loc, lock, call }
    }

    pub fn unlock(loc: H::Location, lock: LocalLockIdx) -> Self {
        Action::Unlock { loc, lock }
    }

    pub fn call(loc: H::Location, callee: H::FuncId) -> Self {
        Action::Call { loc, callee }
    }

    pub fn end(loc: H::Location) -> Self {
        Action::End { loc }
    }

    pub fn loc(&self) -> &H::Location {
        match self {
            Action::Lock { loc, .. }
            | Action::FallibleLock { loc, .. }
            | Action::Unlock { loc, .. }
            | Action::Call { loc, .. }
            | Action::End { loc } => loc,
        }
    }
}

impl<H: Host> Debug for Action<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Action::Lock { loc, lock } => write!(f, "Lock({lock:?} @ {loc:?})"),
            Action::FallibleLock { loc, lock, call } => {
                write!(f, "FallibleLock({lock:?}, call {call:?} @ {loc:?})")
            }
            Action::Unlock { loc, lock } => write!(f, "Unlock({lock:?} @ {loc:?})"),
            Action::Call { loc, callee } => write!(f, "Call({callee:?} @ {loc:?})"),
            Action::End { loc } => write!(f, "End(@ {loc:?})"),
        }
    }
}

/// Successor record of a basic block.
///
/// With `depends_on` set, the branch condition is known to be the outcome of
/// that fallible acquisition: a path takes `on_true` iff the acquisition
/// succeeded on it. Without `depends_on`, both edges are feasible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondEdge {
    pub on_true: BlockIdx,
    pub on_false: Option<BlockIdx>,
    pub depends_on: Option<FallibleCallIdx>,
}

impl CondEdge {
    pub fn jump(on_true: BlockIdx) -> Self {
        CondEdge {
            on_true,
            on_false: None,
            depends_on: None,
        }
    }

    pub fn branch(on_true: BlockIdx, on_false: BlockIdx) -> Self {
        CondEdge {
            on_true,
            on_false: Some(on_false),
            depends_on: None,
        }
    }

    pub fn branch_on(on_true: BlockIdx, on_false: BlockIdx, call: FallibleCallIdx) -> Self {
        CondEdge {
            on_true,
            on_false: Some(on_false),
            depends_on: Some(call),
        }
    }
}

/// An ordered list of actions plus the successor record.
pub struct BasicBlock<H: Host> {
    pub actions: Vec<Action<H>>,
    pub next: CondEdge,
}

impl<H: Host> BasicBlock<H> {
    pub fn new(actions: Vec<Action<H>>, next: CondEdge) -> Self {
        BasicBlock { actions, next }
    }
}

impl<H: Host> Debug for BasicBlock<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicBlock")
            .field("actions", &self.actions)
            .field("next", &self.next)
            .finish()
    }
}

/// A malformed CFG submitted by the host.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ModelError {
    #[snafu(display("function references {count} locks, the per-function limit is 32"))]
    TooManyLocks { count: usize },

    #[snafu(display("{block} is out of range, the function has {total} blocks"))]
    DanglingBlock { block: BlockIdx, total: usize },

    #[snafu(display("{block} branches on a fallible outcome but has no false edge"))]
    MissingFalseEdge { block: BlockIdx },

    #[snafu(display(
        "action in {block} references lock index {index}, the function declares {total} locks"
    ))]
    LockIndexOutOfRange {
        block: BlockIdx,
        index: u32,
        total: usize,
    },

    #[snafu(display("fallible call index {index} in {block} exceeds the per-function limit of 32"))]
    FallibleIndexOutOfRange { block: BlockIdx, index: u32 },

    #[snafu(display("{block} stores an end action, which only the explorer may synthesize"))]
    StoredEndAction { block: BlockIdx },
}

/// Immutable per-function CFG: the lock frame, the blocks, and the entry and
/// exit block indices. `end_loc` is where exit-path findings are reported.
///
/// Construction validates every index so the explorer and checker can walk
/// the model without range checks.
pub struct FuncModel<H: Host> {
    locks: Vec<H::LockId>,
    blocks: Vec<BasicBlock<H>>,
    start: BlockIdx,
    end: BlockIdx,
    end_loc: H::Location,
}

impl<H: Host> Debug for FuncModel<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncModel")
            .field("locks", &self.locks)
            .field("blocks", &self.blocks)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("end_loc", &self.end_loc)
            .finish()
    }
}

impl<H: Host> FuncModel<H> {
    pub fn new(
        locks: Vec<H::LockId>,
        blocks: Vec<BasicBlock<H>>,
        start: BlockIdx,
        end: BlockIdx,
        end_loc: H::Location,
    ) -> Result<Self, ModelError> {
        ensure!(
            locks.len() <= LocalLockIdx::LIMIT as usize,
            TooManyLocksSnafu { count: locks.len() }
        );

        let total = blocks.len();
        let check_block = |block: BlockIdx| -> Result<(), ModelError> {
            ensure!(block.index() < total, DanglingBlockSnafu { block, total });
            Ok(())
        };
        check_block(start)?;
        check_block(end)?;

        for (raw, bb) in blocks.iter().enumerate() {
            let block = BlockIdx::new(raw as u32);

            check_block(bb.next.on_true)?;
            if let Some(on_false) = bb.next.on_false {
                check_block(on_false)?;
            }
            ensure!(
                bb.next.depends_on.is_none() || bb.next.on_false.is_some(),
                MissingFalseEdgeSnafu { block }
            );

            for action in &bb.actions {
                let lock = match action {
                    Action::Lock { lock, .. }
                    | Action::FallibleLock { lock, .. }
                    | Action::Unlock { lock, .. } => Some(*lock),
                    Action::Call { .. } => None,
                    Action::End { .. } => return StoredEndActionSnafu { block }.fail(),
                };
                if let Some(lock) = lock {
                    ensure!(
                        (lock.get() as usize) < locks.len(),
                        LockIndexOutOfRangeSnafu {
                            block,
                            index: lock.get(),
                            total: locks.len(),
                        }
                    );
                }
                if let Action::FallibleLock { call, .. } = action {
                    ensure!(
                        call.in_range(),
                        FallibleIndexOutOfRangeSnafu {
                            block,
                            index: call.get(),
                        }
                    );
                }
            }
        }

        Ok(FuncModel {
            locks,
            blocks,
            start,
            end,
            end_loc,
        })
    }

    pub fn locks(&self) -> &[H::LockId] {
        &self.locks
    }

    pub fn blocks(&self) -> &[BasicBlock<H>] {
        &self.blocks
    }

    pub fn block(&self, idx: BlockIdx) -> &BasicBlock<H> {
        &self.blocks[idx.index()]
    }

    pub fn start(&self) -> BlockIdx {
        self.start
    }

    pub fn end(&self) -> BlockIdx {
        self.end
    }

    pub fn end_loc(&self) -> &H::Location {
        &self.end_loc
    }

    /// The host identity behind a local lock index.
    pub fn lookup_lock(&self, idx: LocalLockIdx) -> &H::LockId {
        &self.locks[idx.get() as usize]
    }
}

/// One unit of exploration work: a block about to be walked under a given
/// lock state and fallible-outcome state. `user` is a visitor-owned payload
/// carried along the path; it does not take part in visited-set identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeState<U> {
    pub block: BlockIdx,
    pub held: LocalLockSet,
    pub fallible: FallibleSet,
    pub user: U,
}

impl<U> EdgeState<U> {
    pub fn seed(block: BlockIdx, user: U) -> Self {
        EdgeState {
            block,
            held: LocalLockSet::empty(),
            fallible: FallibleSet::empty(),
            user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestHost;

    impl Host for TestHost {
        type FuncId = &'static str;
        type LockId = u32;
        type Location = u32;
    }

    fn lock(loc: u32, idx: u32) -> Action<TestHost> {
        Action::lock(loc, LocalLockIdx::new(idx))
    }

    #[test]
    fn accepts_a_minimal_function() {
        let model = FuncModel::<TestHost>::new(
            vec![100],
            vec![
                BasicBlock::new(vec![lock(1, 0)], CondEdge::jump(BlockIdx::new(1))),
                BasicBlock::new(vec![], CondEdge::jump(BlockIdx::new(1))),
            ],
            BlockIdx::new(0),
            BlockIdx::new(1),
            99,
        );
        assert!(model.is_ok());
    }

    #[test]
    fn rejects_dangling_successor() {
        let err = FuncModel::<TestHost>::new(
            vec![],
            vec![BasicBlock::new(vec![], CondEdge::jump(BlockIdx::new(7)))],
            BlockIdx::new(0),
            BlockIdx::new(0),
            99,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModelError::DanglingBlock {
                block: BlockIdx::new(7),
                total: 1
            }
        );
    }

    #[test]
    fn rejects_depends_on_without_false_edge() {
        let edge = CondEdge {
            on_true: BlockIdx::new(1),
            on_false: None,
            depends_on: Some(FallibleCallIdx::new(0)),
        };
        let err = FuncModel::<TestHost>::new(
            vec![],
            vec![
                BasicBlock::new(vec![], edge),
                BasicBlock::new(vec![], CondEdge::jump(BlockIdx::new(1))),
            ],
            BlockIdx::new(0),
            BlockIdx::new(1),
            99,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModelError::MissingFalseEdge {
                block: BlockIdx::new(0)
            }
        );
    }

    #[test]
    fn rejects_lock_index_out_of_range() {
        let err = FuncModel::<TestHost>::new(
            vec![100],
            vec![
                BasicBlock::new(vec![lock(1, 1)], CondEdge::jump(BlockIdx::new(1))),
                BasicBlock::new(vec![], CondEdge::jump(BlockIdx::new(1))),
            ],
            BlockIdx::new(0),
            BlockIdx::new(1),
            99,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::LockIndexOutOfRange { .. }));
    }

    #[test]
    fn rejects_more_than_32_locks() {
        let err = FuncModel::<TestHost>::new(
            (0..33).collect(),
            vec![BasicBlock::new(vec![], CondEdge::jump(BlockIdx::new(0)))],
            BlockIdx::new(0),
            BlockIdx::new(0),
            99,
        )
        .unwrap_err();
        assert_eq!(err, ModelError::TooManyLocks { count: 33 });
    }

    #[test]
    fn rejects_stored_end_action() {
        let err = FuncModel::<TestHost>::new(
            vec![],
            vec![BasicBlock::new(
                vec![Action::end(5)],
                CondEdge::jump(BlockIdx::new(0)),
            )],
            BlockIdx::new(0),
            BlockIdx::new(0),
            99,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::StoredEndAction { .. }));
    }

    #[test]
    fn rejects_fallible_index_past_limit() {
        let err = FuncModel::<TestHost>::new(
            vec![100],
            vec![
                BasicBlock::new(
                    vec![Action::fallible_lock(
                        1,
                        LocalLockIdx::new(0),
                        FallibleCallIdx::new(32),
                    )],
                    CondEdge::jump(BlockIdx::new(1)),
                ),
                BasicBlock::new(vec![], CondEdge::jump(BlockIdx::new(1))),
            ],
            BlockIdx::new(0),
            BlockIdx::new(1),
            99,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::FallibleIndexOutOfRange { .. }));
    }
}
