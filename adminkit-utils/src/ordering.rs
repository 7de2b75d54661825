//! Deterministic ordering for registered handlers.
//!
//! Handlers are ordered by (1) higher priority first, (2) a topological pass
//! over `after` constraints between handler ids, (3) registration order.
//! The same registration set always produces the same order.

/// Run before everything else.
pub const PRIORITY_FIRST: i32 = 100;
/// Run early.
pub const PRIORITY_HIGH: i32 = 75;
/// Default priority.
pub const PRIORITY_NORMAL: i32 = 50;
/// Run late.
pub const PRIORITY_LOW: i32 = 25;
/// Run after everything else.
pub const PRIORITY_LAST: i32 = 0;

/// Ordering-relevant facts about one registered handler.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Optional stable id, referenced by other registrations' `after` lists.
    pub id: Option<String>,
    /// Higher runs earlier. Defaults to [`PRIORITY_NORMAL`] at call sites.
    pub priority: i32,
    /// Ids of handlers that must run before this one.
    pub after: Vec<String>,
    /// Monotonic registration counter, unique within one registry.
    pub seq: u64,
}

/// Compute the execution order for a set of registrations.
///
/// Returns indices into `regs` in execution order.
///
/// The algorithm is Kahn's topological sort over the `after` edges. The
/// ready set is ranked by `(priority desc, constrained-after-unconstrained,
/// seq asc)` — among equal priorities, handlers that declared an `after`
/// list run after their unconstrained peers. `after` entries naming an id
/// that is not registered are ignored. A constraint cycle is broken
/// deterministically: remaining nodes are appended in rank order and a
/// warning is logged.
pub fn execution_order(regs: &[Registration]) -> Vec<usize> {
    let n = regs.len();
    if n <= 1 {
        return (0..n).collect();
    }

    // Map id -> index for resolving `after` edges.
    let mut by_id = std::collections::HashMap::new();
    for (i, reg) in regs.iter().enumerate() {
        if let Some(id) = &reg.id {
            by_id.insert(id.as_str(), i);
        }
    }

    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, reg) in regs.iter().enumerate() {
        for dep in &reg.after {
            if let Some(&target) = by_id.get(dep.as_str()) {
                if target != i {
                    in_degree[i] += 1;
                    dependents[target].push(i);
                }
            }
        }
    }

    let rank = |i: usize| {
        (
            -regs[i].priority as i64,
            !regs[i].after.is_empty(),
            regs[i].seq,
        )
    };

    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();

    let mut order = Vec::with_capacity(n);
    while !ready.is_empty() {
        let pos = (0..ready.len())
            .min_by_key(|&p| rank(ready[p]))
            .expect("non-empty ready set");
        let i = ready.swap_remove(pos);
        order.push(i);
        for &dep in &dependents[i] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                ready.push(dep);
            }
        }
    }

    if order.len() != n {
        // Cycle among `after` constraints. Append the rest deterministically.
        let mut rest: Vec<usize> = (0..n).filter(|i| !order.contains(i)).collect();
        rest.sort_by_key(|&i| rank(i));
        tracing::warn!(
            stuck = rest.len(),
            "cycle in `after` constraints; appending remaining handlers in priority order"
        );
        order.extend(rest);
    }

    order
}
