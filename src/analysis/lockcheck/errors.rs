use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::Hash;

/// The four kinds of lock misuse the checker reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A lock is taken on a path where it is already held.
    DoubleTake,
    /// A lock is given back on a path where it is not held.
    GiveWithoutTake,
    /// A path reaches the function exit still holding a lock.
    TakeWithoutGive,
    /// A call on a path holding a lock the callee may block on.
    CallWithBlockingLock,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::DoubleTake => "double_take",
            DiagnosticKind::GiveWithoutTake => "give_without_take",
            DiagnosticKind::TakeWithoutGive => "take_without_give",
            DiagnosticKind::CallWithBlockingLock => "call_with_blocking_lock",
        }
    }
}

impl Display for DiagnosticKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiagnosticKind::DoubleTake => "double take",
            DiagnosticKind::GiveWithoutTake => "give without take",
            DiagnosticKind::TakeWithoutGive => "take without give",
            DiagnosticKind::CallWithBlockingLock => "call with blocking lock",
        };
        write!(f, "{label}")
    }
}

/// A single finding. `detail` carries free-form context for the host and may
/// be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl Diagnostic {
    pub fn double_take(detail: impl Into<String>) -> Self {
        Diagnostic {
            kind: DiagnosticKind::DoubleTake,
            detail: detail.into(),
        }
    }

    pub fn give_without_take(detail: impl Into<String>) -> Self {
        Diagnostic {
            kind: DiagnosticKind::GiveWithoutTake,
            detail: detail.into(),
        }
    }

    pub fn take_without_give(detail: impl Into<String>) -> Self {
        Diagnostic {
            kind: DiagnosticKind::TakeWithoutGive,
            detail: detail.into(),
        }
    }

    pub fn call_with_blocking_lock(detail: impl Into<String>) -> Self {
        Diagnostic {
            kind: DiagnosticKind::CallWithBlockingLock,
            detail: detail.into(),
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.detail)
        }
    }
}

/// Findings grouped by source location, in emission order per location.
///
/// Duplicates are suppressed on `(location, kind)`: one action can be visited
/// under many path states, and a call site can be flagged both during its own
/// exploration and again during summary propagation. The first emission wins.
#[derive(Debug)]
pub struct ErrorMap<L> {
    map: HashMap<L, Vec<Diagnostic>>,
}

impl<L: Clone + Eq + Hash + Debug> ErrorMap<L> {
    pub fn new() -> Self {
        ErrorMap {
            map: HashMap::new(),
        }
    }

    /// Record a finding. Returns false if an identical-kind finding already
    /// exists at this location.
    pub fn add(&mut self, loc: L, diagnostic: Diagnostic) -> bool {
        let entry = self.map.entry(loc).or_default();
        if entry.iter().any(|d| d.kind == diagnostic.kind) {
            return false;
        }
        entry.push(diagnostic);
        true
    }

    pub fn diagnostics_at(&self, loc: &L) -> &[Diagnostic] {
        self.map.get(loc).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&L, &[Diagnostic])> {
        self.map.iter().map(|(loc, diags)| (loc, diags.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Total number of findings across all locations.
    pub fn total(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    /// Machine-readable rendering, one record per finding. Locations are
    /// rendered through `Debug` since they are opaque to this crate.
    pub fn to_json(&self) -> Value {
        let mut records: Vec<Value> = self
            .map
            .iter()
            .flat_map(|(loc, diags)| {
                diags.iter().map(move |d| {
                    json!({
                        "location": format!("{loc:?}"),
                        "kind": d.kind.as_str(),
                        "detail": d.detail,
                    })
                })
            })
            .collect();
        records.sort_by(|a, b| a["location"].as_str().cmp(&b["location"].as_str()));
        Value::Array(records)
    }
}

impl<L: Clone + Eq + Hash + Debug> Default for ErrorMap<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_emission_order_per_location() {
        let mut errors: ErrorMap<u32> = ErrorMap::new();
        errors.add(1, Diagnostic::give_without_take(""));
        errors.add(1, Diagnostic::double_take(""));

        let kinds: Vec<DiagnosticKind> =
            errors.diagnostics_at(&1).iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DiagnosticKind::GiveWithoutTake, DiagnosticKind::DoubleTake]
        );
    }

    #[test]
    fn suppresses_same_kind_at_same_location() {
        let mut errors: ErrorMap<u32> = ErrorMap::new();
        assert!(errors.add(1, Diagnostic::double_take("first")));
        assert!(!errors.add(1, Diagnostic::double_take("second")));
        assert!(errors.add(2, Diagnostic::double_take("other location")));

        assert_eq!(errors.total(), 2);
        assert_eq!(errors.diagnostics_at(&1)[0].detail, "first");
    }

    #[test]
    fn json_rendering_is_per_finding() {
        let mut errors: ErrorMap<u32> = ErrorMap::new();
        errors.add(2, Diagnostic::take_without_give("lock 5"));
        errors.add(1, Diagnostic::double_take(""));

        let json = errors.to_json();
        let records = json.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["location"], "1");
        assert_eq!(records[0]["kind"], "double_take");
        assert_eq!(records[1]["kind"], "take_without_give");
        assert_eq!(records[1]["detail"], "lock 5");
    }
}
