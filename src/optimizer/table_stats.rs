use crate::buffer::BufferPool;
use crate::catalog::Catalog;
use crate::error::VellumResult;
use crate::execution::predicate::Op;
use crate::optimizer::IntHistogram;
use crate::storage::page::TableId;
use crate::storage::tuple::Field;
use crate::transaction::TransactionId;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Histogram bucket count used for every per-field histogram.
pub const NUM_HIST_BINS: usize = 100;

/// Default cost charged for reading one page off disk.
pub const IO_COST_PER_PAGE: usize = 1000;

// Strings carry no histogram; fall back to flat guesses.
const STRING_EQUALS_SELECTIVITY: f64 = 0.1;
const STRING_RANGE_SELECTIVITY: f64 = 0.3;

/// Statistics over one table: tuple count, page count and an equi-width
/// histogram per integer field, built with two full scans (one for min/max,
/// one to fill the buckets).
pub struct TableStats {
    io_cost_per_page: usize,
    num_tuples: usize,
    num_pages: u32,
    int_histograms: HashMap<usize, IntHistogram>,
}

impl TableStats {
    pub fn build(
        catalog: &Arc<Catalog>,
        pool: &Arc<BufferPool>,
        table_id: TableId,
        io_cost_per_page: usize,
    ) -> VellumResult<Self> {
        debug!("building statistics for table {}", table_id);
        let file = catalog.get_file(table_id)?;
        let tid = TransactionId::new();

        let build_result = (|| -> VellumResult<(usize, HashMap<usize, IntHistogram>)> {
            let mut iter = file.clone().iterator(pool.clone(), tid);

            // First pass: tuple count and min/max per integer field.
            let mut min_values: HashMap<usize, i32> = HashMap::new();
            let mut max_values: HashMap<usize, i32> = HashMap::new();
            let mut num_tuples = 0usize;
            while let Some(tuple) = iter.next()? {
                for (index, field) in tuple.fields.iter().enumerate() {
                    if let Field::Int(v) = field {
                        min_values
                            .entry(index)
                            .and_modify(|m| *m = (*m).min(*v))
                            .or_insert(*v);
                        max_values
                            .entry(index)
                            .and_modify(|m| *m = (*m).max(*v))
                            .or_insert(*v);
                    }
                }
                num_tuples += 1;
            }

            let mut int_histograms: HashMap<usize, IntHistogram> = min_values
                .iter()
                .map(|(index, min)| {
                    (*index, IntHistogram::new(NUM_HIST_BINS, *min, max_values[index]))
                })
                .collect();

            // Second pass: fill the histograms.
            iter.rewind()?;
            while let Some(tuple) = iter.next()? {
                for (index, field) in tuple.fields.iter().enumerate() {
                    if let Field::Int(v) = field {
                        if let Some(histogram) = int_histograms.get_mut(&index) {
                            histogram.add_value(*v);
                        }
                    }
                }
            }
            Ok((num_tuples, int_histograms))
        })();

        // The statistics transaction only ever held shared locks; drop them
        // whether or not the scan succeeded.
        pool.transaction_complete(tid, build_result.is_ok())?;
        let (num_tuples, int_histograms) = build_result?;

        Ok(Self {
            io_cost_per_page,
            num_tuples,
            num_pages: file.num_pages(),
            int_histograms,
        })
    }

    /// Sequential scan cost: every page is read in full, whatever fraction of
    /// it holds live tuples.
    pub fn estimate_scan_cost(&self) -> f64 {
        self.num_pages as f64 * self.io_cost_per_page as f64
    }

    /// Expected result size of a scan filtered down by `selectivity`.
    pub fn estimate_table_cardinality(&self, selectivity: f64) -> usize {
        (self.num_tuples as f64 * selectivity).round() as usize
    }

    pub fn total_tuples(&self) -> usize {
        self.num_tuples
    }

    /// Estimated selectivity of `field op constant`.
    pub fn estimate_selectivity(&self, field: usize, op: Op, constant: &Field) -> f64 {
        match constant {
            Field::Int(v) => self
                .int_histograms
                .get(&field)
                .map(|histogram| histogram.estimate_selectivity(op, *v))
                .unwrap_or(0.0),
            Field::Varchar(_) => match op {
                Op::Equals => STRING_EQUALS_SELECTIVITY,
                Op::NotEquals => 1.0 - STRING_EQUALS_SELECTIVITY,
                _ => STRING_RANGE_SELECTIVITY,
            },
        }
    }

    pub fn avg_selectivity(&self, field: usize, _op: Op) -> f64 {
        self.int_histograms
            .get(&field)
            .map(|histogram| histogram.avg_selectivity())
            .unwrap_or(1.0)
    }
}
