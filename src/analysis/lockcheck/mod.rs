pub mod bitset;
pub mod callgraph;
pub mod checker;
pub mod errors;
pub mod explorer;
pub mod types;

use colorful::{Color, Colorful};
use serde_json::Value;

pub use bitset::{
    FallibleCall, FallibleCallIdx, FallibleSet, GlobalLock, GlobalLockIdx, GlobalLockSet, Idx32,
    LocalLock, LocalLockIdx, LocalLockSet,
};
pub use callgraph::{CallGraph, CallSite};
pub use checker::{CheckError, FileChecker};
pub use errors::{Diagnostic, DiagnosticKind, ErrorMap};
pub use explorer::PathExplorer;
pub use types::{Action, BasicBlock, BlockIdx, CondEdge, EdgeState, FuncModel, Host, ModelError};

use crate::semcheck_info;

/// Top-level driver for one translation unit: owns the [`FileChecker`] and
/// the error map, for hosts that just want to feed functions and read the
/// findings back. Hosts that own the error map themselves use
/// [`FileChecker::process_function`] directly.
pub struct LockCheckAnalysis<H: Host> {
    checker: FileChecker<H>,
    errors: ErrorMap<H::Location>,
}

impl<H: Host> LockCheckAnalysis<H> {
    pub fn new() -> Self {
        LockCheckAnalysis {
            checker: FileChecker::new(),
            errors: ErrorMap::new(),
        }
    }

    /// Submit one function. Functions may arrive in any order; findings
    /// against earlier functions can surface once their callees are known.
    pub fn check_function(&mut self, id: H::FuncId, model: FuncModel<H>) -> Result<(), CheckError> {
        self.checker.process_function(id, model, &mut self.errors)
    }

    pub fn checker(&self) -> &FileChecker<H> {
        &self.checker
    }

    pub fn errors(&self) -> &ErrorMap<H::Location> {
        &self.errors
    }

    pub fn into_errors(self) -> ErrorMap<H::Location> {
        self.errors
    }

    pub fn summary_of(&self, id: &H::FuncId) -> Option<GlobalLockSet> {
        self.checker.summary_of(id)
    }

    /// Findings as JSON, one record per finding.
    pub fn report_json(&self) -> Value {
        self.errors.to_json()
    }

    /// Log every finding at info level.
    pub fn print_result(&self) {
        let total = self.errors.total();
        let banner = format!("{} lock discipline findings", total);
        if total == 0 {
            semcheck_info!("{}", banner.color(Color::Green));
            return;
        }
        semcheck_info!("{}", banner.color(Color::Red));
        for (loc, diagnostics) in self.errors.iter() {
            for diagnostic in diagnostics {
                semcheck_info!("{:?} | {}", loc, diagnostic);
            }
        }
    }
}

impl<H: Host> Default for LockCheckAnalysis<H> {
    fn default() -> Self {
        Self::new()
    }
}
