//! semcheck checks give/take semaphore discipline in embedded code.
//!
//! The host compiler front-end lowers each function into a small CFG of
//! lock/unlock/call actions ([`analysis::lockcheck::FuncModel`]) and feeds it
//! to a [`analysis::lockcheck::FileChecker`], which walks every feasible path,
//! keeps per-function blocking summaries, and reports misuse (double takes,
//! unbalanced give/take, self-deadlocking calls) keyed by source location.

pub mod analysis;
pub mod utils;
