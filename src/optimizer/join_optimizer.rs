use crate::error::{VellumError, VellumResult};
use crate::execution::predicate::Op;
use crate::optimizer::TableStats;
use crate::storage::page::TableId;
use log::debug;
use std::collections::HashMap;

/// One equi- or range-join between two base tables.
#[derive(derive_new::new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinNode {
    pub left_table: TableId,
    pub left_field: usize,
    pub op: Op,
    pub right_table: TableId,
    pub right_field: usize,
}

#[derive(Debug, Clone)]
struct CostCard {
    cost: f64,
    card: usize,
    plan: Vec<JoinNode>,
    tables: Vec<TableId>,
}

/// Selinger-style join ordering: dynamic programming over subsets of the
/// join list, keeping the cheapest left-deep plan for each subset.
pub struct JoinOptimizer;

impl JoinOptimizer {
    /// Nested-loop cost model: scan the outer once, the inner once per outer
    /// tuple, plus the CPU cost of comparing every pair.
    pub fn estimate_join_cost(card1: usize, card2: usize, cost1: f64, cost2: f64) -> f64 {
        cost1 + card1 as f64 * cost2 + (card1 as f64) * (card2 as f64)
    }

    /// Join output size. Equality joins keep the larger side unless one side
    /// is known to join on a primary key; range joins are guessed at 30% of
    /// the cross product.
    pub fn estimate_join_cardinality(
        op: Op,
        card1: usize,
        card2: usize,
        left_pkey: bool,
        right_pkey: bool,
    ) -> usize {
        let card = if op == Op::Equals {
            if left_pkey && right_pkey {
                card1.max(card2)
            } else if left_pkey {
                card2
            } else if right_pkey {
                card1
            } else {
                card1.max(card2)
            }
        } else {
            (0.3 * card1 as f64 * card2 as f64) as usize
        };
        card.max(1)
    }

    /// Order `joins` so that the estimated total cost of the left-deep
    /// nested-loop plan is minimal.
    ///
    /// `filter_selectivities` gives the fraction of each base table surviving
    /// its local filters (1.0 when absent).
    pub fn order_joins(
        stats: &HashMap<TableId, TableStats>,
        filter_selectivities: &HashMap<TableId, f64>,
        joins: &[JoinNode],
    ) -> VellumResult<Vec<JoinNode>> {
        if joins.is_empty() {
            return Ok(Vec::new());
        }
        if joins.len() > 20 {
            return Err(VellumError::Execution(
                "too many joins to enumerate".to_string(),
            ));
        }

        let base_cost = |table: TableId| -> VellumResult<f64> {
            stats
                .get(&table)
                .map(|s| s.estimate_scan_cost())
                .ok_or_else(|| {
                    VellumError::NotFound(format!("no statistics for table {}", table))
                })
        };
        let base_card = |table: TableId| -> VellumResult<usize> {
            let selectivity = filter_selectivities.get(&table).copied().unwrap_or(1.0);
            stats
                .get(&table)
                .map(|s| s.estimate_table_cardinality(selectivity))
                .ok_or_else(|| {
                    VellumError::NotFound(format!("no statistics for table {}", table))
                })
        };

        // best_plans[mask] is the cheapest plan joining exactly the joins in
        // `mask`.
        let mut best_plans: HashMap<u64, CostCard> = HashMap::new();

        for size in 1..=joins.len() {
            for mask in subsets_of_size(joins.len(), size) {
                let mut best: Option<CostCard> = None;
                for (index, join) in joins.iter().enumerate() {
                    if mask & (1 << index) == 0 {
                        continue;
                    }
                    let rest = mask & !(1 << index);

                    let candidate = if rest == 0 {
                        let cost1 = base_cost(join.left_table)?;
                        let card1 = base_card(join.left_table)?;
                        let cost2 = base_cost(join.right_table)?;
                        let card2 = base_card(join.right_table)?;
                        CostCard {
                            cost: Self::estimate_join_cost(card1, card2, cost1, cost2),
                            card: Self::estimate_join_cardinality(
                                join.op, card1, card2, false, false,
                            ),
                            plan: vec![*join],
                            tables: vec![join.left_table, join.right_table],
                        }
                    } else {
                        let Some(prev) = best_plans.get(&rest) else {
                            continue;
                        };
                        let left_in = prev.tables.contains(&join.left_table);
                        let right_in = prev.tables.contains(&join.right_table);
                        // The new join must attach one fresh table to the
                        // subplan; cyclic edges are skipped.
                        let new_table = match (left_in, right_in) {
                            (true, false) => join.right_table,
                            (false, true) => join.left_table,
                            _ => continue,
                        };
                        let cost2 = base_cost(new_table)?;
                        let card2 = base_card(new_table)?;
                        let mut plan = prev.plan.clone();
                        plan.push(*join);
                        let mut tables = prev.tables.clone();
                        tables.push(new_table);
                        CostCard {
                            cost: Self::estimate_join_cost(prev.card, card2, prev.cost, cost2),
                            card: Self::estimate_join_cardinality(
                                join.op, prev.card, card2, false, false,
                            ),
                            plan,
                            tables,
                        }
                    };

                    if best
                        .as_ref()
                        .map(|b| candidate.cost < b.cost)
                        .unwrap_or(true)
                    {
                        best = Some(candidate);
                    }
                }
                if let Some(best) = best {
                    best_plans.insert(mask, best);
                }
            }
        }

        let full_mask = (1u64 << joins.len()) - 1;
        match best_plans.remove(&full_mask) {
            Some(best) => {
                debug!(
                    "ordered {} joins with estimated cost {:.0}",
                    best.plan.len(),
                    best.cost
                );
                Ok(best.plan)
            }
            // A join graph the left-deep enumeration cannot cover (e.g. a
            // pure cycle) falls back to the given order.
            None => Ok(joins.to_vec()),
        }
    }
}

/// All bitmasks over `n` items with exactly `size` bits set.
fn subsets_of_size(n: usize, size: usize) -> Vec<u64> {
    let mut result = Vec::new();
    for mask in 0u64..(1u64 << n) {
        if mask.count_ones() as usize == size {
            result.push(mask);
        }
    }
    result
}
