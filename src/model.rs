//! Limit counter model: metrics, time windows, and the usage hierarchy.
//!
//! Everything in this module is pure data with invariant-preserving mutation;
//! there is no I/O and no locking here. The [`crate::cache`] module wraps
//! these operations behind per-key exclusive access so that
//! [`LimitCounterSet::would_exceed`] and [`LimitCounterSet::apply`] can be
//! used as a check-then-commit pair.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// A time window over which a limit accumulates before it resets.
///
/// Reset scheduling is owned by the authoritative backend; the local model
/// never computes wall-clock boundaries. `Eternity` accumulates forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
    Eternity,
}

impl Period {
    /// Stable lowercase name, matching what the remote protocol reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::Eternity => "eternity",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage counter for one metric in one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Units consumed so far in the window.
    pub current: u64,
    /// Maximum units the window admits.
    pub max: u64,
}

impl Counter {
    pub fn new(current: u64, max: u64) -> Self {
        Self { current, max }
    }

    /// Units left before the window is exhausted.
    pub fn remaining(&self) -> u64 {
        self.max.saturating_sub(self.current)
    }
}

/// Errors produced while validating a metric hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    /// The adjacency contains a cycle (self-reference included).
    #[error("metric '{metric}' participates in a hierarchy cycle")]
    Cycle { metric: String },
}

/// Child-to-ancestor contribution graph.
///
/// A hit on a metric also counts against every ancestor reachable through
/// this graph. The graph is a DAG; construction rejects cycles so traversal
/// never needs recursion guards at hit time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    // metric -> direct ancestors
    ancestors: HashMap<String, Vec<String>>,
}

impl Hierarchy {
    /// A hierarchy with no relationships; every metric is top-level.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from a metric -> direct-ancestors adjacency, rejecting cycles.
    pub fn new(ancestors: HashMap<String, Vec<String>>) -> Result<Self, HierarchyError> {
        let hierarchy = Self { ancestors };
        hierarchy.validate_acyclic()?;
        Ok(hierarchy)
    }

    /// Build from the parent -> children orientation the remote protocol
    /// reports (e.g. `hits` listing `example sample test` as children).
    pub fn from_parents(
        parents: HashMap<String, Vec<String>>,
    ) -> Result<Self, HierarchyError> {
        let mut ancestors: HashMap<String, Vec<String>> = HashMap::new();
        for (parent, children) in parents {
            for child in children {
                ancestors.entry(child).or_default().push(parent.clone());
            }
        }
        Self::new(ancestors)
    }

    /// True when the metric has no relationships at all.
    pub fn is_orphan(&self, metric: &str) -> bool {
        !self.ancestors.contains_key(metric)
    }

    /// Every ancestor transitively reachable from `metric`, deduplicated.
    ///
    /// Iterative worklist; the constructor guarantees acyclicity but the
    /// visited set keeps traversal linear on diamond-shaped graphs.
    pub fn ancestors_of(&self, metric: &str) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut work: Vec<&str> = vec![metric];
        while let Some(current) = work.pop() {
            if let Some(direct) = self.ancestors.get(current) {
                for parent in direct {
                    if seen.insert(parent.clone()) {
                        work.push(parent);
                    }
                }
            }
        }
        seen
    }

    // Iterative three-color DFS over every node in the adjacency.
    fn validate_acyclic(&self) -> Result<(), HierarchyError> {
        let mut done: HashSet<&str> = HashSet::new();
        for start in self.ancestors.keys() {
            if done.contains(start.as_str()) {
                continue;
            }
            let mut on_path: HashSet<&str> = HashSet::new();
            // (node, next child index to visit)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            on_path.insert(start.as_str());
            while let Some((node, idx)) = stack.pop() {
                let parents = self.ancestors.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if let Some(parent) = parents.get(idx) {
                    stack.push((node, idx + 1));
                    if done.contains(parent.as_str()) {
                        continue;
                    }
                    if !on_path.insert(parent.as_str()) {
                        return Err(HierarchyError::Cycle { metric: parent.clone() });
                    }
                    stack.push((parent.as_str(), 0));
                } else {
                    on_path.remove(node);
                    done.insert(node);
                }
            }
        }
        Ok(())
    }
}

/// The first limit violation found for a proposed set of increments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitViolation {
    pub metric: String,
    pub period: Period,
    pub current: u64,
    pub attempted: u64,
    pub max: u64,
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "limit exceeded for metric '{}' per {} ({} + {} > {})",
            self.metric, self.period, self.current, self.attempted, self.max
        )
    }
}

/// Per-key snapshot of limits: counters for every limited metric, plus the
/// hierarchy in force for the service.
///
/// Metrics that carry no limit have no entry in `counters`; hits against them
/// are unconditionally admitted but still roll up to limited ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitCounterSet {
    counters: BTreeMap<String, BTreeMap<Period, Counter>>,
    hierarchy: Hierarchy,
}

impl LimitCounterSet {
    pub fn new(hierarchy: Hierarchy) -> Self {
        Self { counters: BTreeMap::new(), hierarchy }
    }

    pub fn with_counters(
        hierarchy: Hierarchy,
        counters: BTreeMap<String, BTreeMap<Period, Counter>>,
    ) -> Self {
        Self { counters, hierarchy }
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Install or replace the limit for one metric/window pair.
    pub fn set_limit(&mut self, metric: impl Into<String>, period: Period, counter: Counter) {
        self.counters.entry(metric.into()).or_default().insert(period, counter);
    }

    pub fn counter(&self, metric: &str, period: Period) -> Option<Counter> {
        self.counters.get(metric).and_then(|windows| windows.get(&period)).copied()
    }

    /// Whether the metric carries at least one limited window.
    pub fn is_limited(&self, metric: &str) -> bool {
        self.counters.contains_key(metric)
    }

    /// Expand one hit on `metric` by `delta` into every limited metric that
    /// must be incremented: the metric itself when it carries a limit, and
    /// each reachable ancestor that does. Set semantics: an ancestor
    /// reachable through two paths is incremented once.
    pub fn propagate(&self, metric: &str, delta: u64) -> BTreeMap<String, u64> {
        let mut increments = BTreeMap::new();
        if self.is_limited(metric) {
            increments.insert(metric.to_string(), delta);
        }
        for ancestor in self.hierarchy.ancestors_of(metric) {
            if self.is_limited(&ancestor) {
                increments.insert(ancestor, delta);
            }
        }
        increments
    }

    /// Report the first window that `increments` would push past its max, in
    /// metric-name-then-period order so rejections are reproducible. Never
    /// mutates.
    pub fn would_exceed(&self, increments: &BTreeMap<String, u64>) -> Option<LimitViolation> {
        for (metric, delta) in increments {
            let Some(windows) = self.counters.get(metric) else { continue };
            for (period, counter) in windows {
                if counter.current.saturating_add(*delta) > counter.max {
                    return Some(LimitViolation {
                        metric: metric.clone(),
                        period: *period,
                        current: counter.current,
                        attempted: *delta,
                        max: counter.max,
                    });
                }
            }
        }
        None
    }

    /// Commit `increments` to every affected window. Callers must have run
    /// [`Self::would_exceed`] with the same increments under the same lock;
    /// this never re-checks and never auto-corrects.
    pub fn apply(&mut self, increments: &BTreeMap<String, u64>) {
        for (metric, delta) in increments {
            let Some(windows) = self.counters.get_mut(metric) else { continue };
            for counter in windows.values_mut() {
                counter.current = counter.current.saturating_add(*delta);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child_to_parent(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (child, parent) in pairs {
            map.entry((*child).to_string()).or_default().push((*parent).to_string());
        }
        map
    }

    fn sample_set() -> LimitCounterSet {
        let hierarchy =
            Hierarchy::new(child_to_parent(&[("example", "hits"), ("sample", "hits")])).unwrap();
        let mut set = LimitCounterSet::new(hierarchy);
        set.set_limit("hits", Period::Minute, Counter::new(1, 4));
        set.set_limit("test_metric", Period::Week, Counter::new(0, 6));
        set
    }

    #[test]
    fn propagation_reaches_all_ancestors() {
        let hierarchy = Hierarchy::new(child_to_parent(&[
            ("leaf", "mid"),
            ("mid", "root"),
        ]))
        .unwrap();
        let mut set = LimitCounterSet::new(hierarchy);
        set.set_limit("mid", Period::Hour, Counter::new(0, 10));
        set.set_limit("root", Period::Day, Counter::new(0, 100));

        let increments = set.propagate("leaf", 3);
        // leaf carries no limit, so only the limited ancestors appear
        assert_eq!(increments.len(), 2);
        assert_eq!(increments["mid"], 3);
        assert_eq!(increments["root"], 3);
    }

    #[test]
    fn diamond_ancestor_counted_once() {
        let hierarchy = Hierarchy::new(child_to_parent(&[
            ("leaf", "left"),
            ("leaf", "right"),
            ("left", "top"),
            ("right", "top"),
        ]))
        .unwrap();
        let mut set = LimitCounterSet::new(hierarchy);
        set.set_limit("top", Period::Minute, Counter::new(0, 5));

        let increments = set.propagate("leaf", 2);
        assert_eq!(increments.len(), 1);
        assert_eq!(increments["top"], 2);
    }

    #[test]
    fn orphan_metric_is_a_no_op() {
        let set = sample_set();
        assert!(set.propagate("orphan", 7).is_empty());
    }

    #[test]
    fn self_referential_hierarchy_rejected() {
        let err = Hierarchy::new(child_to_parent(&[("hits", "hits")])).unwrap_err();
        assert!(matches!(err, HierarchyError::Cycle { .. }));
    }

    #[test]
    fn two_node_cycle_rejected() {
        let err = Hierarchy::new(child_to_parent(&[("a", "b"), ("b", "a")])).unwrap_err();
        assert!(matches!(err, HierarchyError::Cycle { .. }));
    }

    #[test]
    fn long_cycle_rejected() {
        let err =
            Hierarchy::new(child_to_parent(&[("a", "b"), ("b", "c"), ("c", "a")])).unwrap_err();
        assert!(matches!(err, HierarchyError::Cycle { .. }));
    }

    #[test]
    fn from_parents_inverts_orientation() {
        let mut parents = HashMap::new();
        parents.insert(
            "hits".to_string(),
            vec!["example".to_string(), "sample".to_string(), "test".to_string()],
        );
        let hierarchy = Hierarchy::from_parents(parents).unwrap();
        let ancestors = hierarchy.ancestors_of("example");
        assert!(ancestors.contains("hits"));
        assert_eq!(ancestors.len(), 1);
        assert!(hierarchy.ancestors_of("hits").is_empty());
    }

    #[test]
    fn would_exceed_reports_first_violation_deterministically() {
        let mut set = sample_set();
        set.set_limit("alpha", Period::Hour, Counter::new(9, 10));
        set.set_limit("alpha", Period::Minute, Counter::new(9, 10));

        let mut increments = BTreeMap::new();
        increments.insert("alpha".to_string(), 5u64);
        increments.insert("hits".to_string(), 5u64);

        // "alpha" sorts before "hits" and Minute before Hour
        let violation = set.would_exceed(&increments).expect("must violate");
        assert_eq!(violation.metric, "alpha");
        assert_eq!(violation.period, Period::Minute);
        assert_eq!(violation.current, 9);
        assert_eq!(violation.max, 10);
    }

    #[test]
    fn would_exceed_does_not_mutate() {
        let set = sample_set();
        let mut increments = BTreeMap::new();
        increments.insert("hits".to_string(), 100u64);
        assert!(set.would_exceed(&increments).is_some());
        assert_eq!(set.counter("hits", Period::Minute).unwrap().current, 1);
    }

    #[test]
    fn apply_commits_every_window() {
        let mut set = sample_set();
        set.set_limit("hits", Period::Day, Counter::new(2, 50));
        let mut increments = BTreeMap::new();
        increments.insert("hits".to_string(), 3u64);
        set.apply(&increments);
        assert_eq!(set.counter("hits", Period::Minute).unwrap().current, 4);
        assert_eq!(set.counter("hits", Period::Day).unwrap().current, 5);
    }

    #[test]
    fn exact_fit_is_not_a_violation() {
        let set = sample_set();
        let mut increments = BTreeMap::new();
        increments.insert("hits".to_string(), 3u64); // 1 + 3 == 4
        assert!(set.would_exceed(&increments).is_none());
    }

    #[test]
    fn counter_remaining_saturates() {
        assert_eq!(Counter::new(6, 4).remaining(), 0);
        assert_eq!(Counter::new(1, 4).remaining(), 3);
    }

    #[test]
    fn violation_display_names_metric_and_window() {
        let violation = LimitViolation {
            metric: "hits".into(),
            period: Period::Minute,
            current: 1,
            attempted: 4,
            max: 4,
        };
        let msg = violation.to_string();
        assert!(msg.contains("hits"));
        assert!(msg.contains("minute"));
        assert!(msg.contains("1 + 4 > 4"));
    }
}
