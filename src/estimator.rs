//! The incremental ranking engine.
//!
//! Composes the per-cell regressor cache, the pairwise ratio engine, the
//! comparability graph and its transitive closure, and the ranking
//! aggregator into a single long-lived value. Grounded in
//! `examples/original_source/external/transitive_node_estimator.py`, which
//! this module follows admission-rule-for-admission-rule and
//! matrix-update-for-matrix-update.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::matrix::{floyd_warshall, is_connected, Matrix};
use crate::model::{Cell, Line, Range, Sample};
use crate::regression::{OlsRegression, RegressionModel};

/// The engine's coarse lifecycle, per the design's state machine.
///
/// Computed on demand from current data rather than stored, since every
/// state here is a pure function of the node set, the cells, and the
/// comparability graph — storing it separately would only risk drifting
/// out of sync with the data it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorState {
    /// No sample has ever been received.
    Empty,
    /// Samples are buffered, but no cell has valid fitted data yet.
    Buffering,
    /// At least one cell has valid data, but the comparability graph is
    /// not yet connected.
    Learning,
    /// The comparability graph is connected; `ranking()` can succeed.
    Ready,
}

/// A `(task, node)` index pair identifying one matrix cell.
type CellKey = (usize, usize);

pub struct Estimator {
    regression: Box<dyn RegressionModel>,

    nodes: Vec<String>,
    node_index: HashMap<String, usize>,
    tasks: Vec<String>,
    task_index: HashMap<String, usize>,

    cells: HashMap<CellKey, Cell>,
    ratio: HashMap<usize, Matrix<f64>>,
    weight: HashMap<usize, Matrix<i64>>,
    comparability: Matrix<bool>,

    pending_single: HashMap<String, HashMap<String, Sample>>,
    pending_pairs: HashMap<String, HashMap<String, (Sample, Sample)>>,

    dirty: HashSet<CellKey>,
}

impl Default for Estimator {
    fn default() -> Self {
        Estimator::new(Box::new(OlsRegression))
    }
}

impl Estimator {
    pub fn new(regression: Box<dyn RegressionModel>) -> Self {
        Estimator {
            regression,
            nodes: Vec::new(),
            node_index: HashMap::new(),
            tasks: Vec::new(),
            task_index: HashMap::new(),
            cells: HashMap::new(),
            ratio: HashMap::new(),
            weight: HashMap::new(),
            comparability: Matrix::zeros(0),
            pending_single: HashMap::new(),
            pending_pairs: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    pub fn comparability(&self) -> &Matrix<bool> {
        &self.comparability
    }

    pub fn ratio_matrix(&self, task: &str) -> Option<&Matrix<f64>> {
        let id = self.task_index.get(task)?;
        self.ratio.get(id)
    }

    pub fn weight_matrix(&self, task: &str) -> Option<&Matrix<i64>> {
        let id = self.task_index.get(task)?;
        self.weight.get(id)
    }

    pub fn state(&self) -> EstimatorState {
        let any_valid_cell = self.cells.values().any(Cell::is_valid);
        if !any_valid_cell {
            let nothing_pending = self.pending_single.values().all(HashMap::is_empty)
                && self.pending_pairs.values().all(HashMap::is_empty);
            if self.nodes.is_empty() && nothing_pending {
                EstimatorState::Empty
            } else {
                EstimatorState::Buffering
            }
        } else if is_connected(&floyd_warshall(&self.comparability).0) {
            EstimatorState::Ready
        } else {
            EstimatorState::Learning
        }
    }

    /// Admits a sample once a fittable configuration exists, per the
    /// bootstrap buffer's admission rules.
    pub fn learn(&mut self, sample: Sample) {
        let task = sample.task.clone();
        let node = sample.node.clone();

        let already_admitted = self
            .task_index
            .get(&task)
            .zip(self.node_index.get(&node))
            .map(|(&t, &n)| self.cells.get(&(t, n)).map(Cell::sample_count).unwrap_or(0) > 0)
            .unwrap_or(false);

        if already_admitted {
            self.add_sample(sample);
        } else if let Some(older) = self
            .pending_single
            .get_mut(&task)
            .and_then(|by_node| by_node.remove(&node))
        {
            if self.task_index.contains_key(&task) {
                self.add_sample(older);
                self.add_sample(sample);
            } else {
                let pairs = self.pending_pairs.entry(task.clone()).or_default();
                pairs.insert(node.clone(), (older, sample));
                if pairs.len() > 1 {
                    let any_node_already_known =
                        pairs.keys().any(|n| self.node_index.contains_key(n));
                    if any_node_already_known || self.node_index.is_empty() {
                        if let Some(flushed) = self.pending_pairs.remove(&task) {
                            for (_, (s1, s2)) in flushed {
                                self.add_sample(s1);
                                self.add_sample(s2);
                            }
                        }
                    }
                }
            }
        } else {
            self.pending_single
                .entry(task)
                .or_default()
                .insert(node, sample);
            return;
        }

        self.update_lines();
    }

    fn ensure_node(&mut self, name: &str) -> usize {
        if let Some(&id) = self.node_index.get(name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(name.to_string());
        self.node_index.insert(name.to_string(), id);
        for mat in self.ratio.values_mut() {
            mat.grow_by_one();
        }
        for mat in self.weight.values_mut() {
            mat.grow_by_one();
        }
        self.comparability.grow_by_one();
        id
    }

    fn ensure_task(&mut self, name: &str) -> usize {
        if let Some(&id) = self.task_index.get(name) {
            return id;
        }
        let id = self.tasks.len();
        self.tasks.push(name.to_string());
        self.task_index.insert(name.to_string(), id);
        let n = self.node_count();
        self.ratio.insert(id, Matrix::zeros(n));
        self.weight.insert(id, Matrix::zeros(n));
        id
    }

    fn add_sample(&mut self, sample: Sample) {
        let node_id = self.ensure_node(&sample.node);
        let task_id = self.ensure_task(&sample.task);
        let cell = self.cells.entry((task_id, node_id)).or_default();
        cell.push(sample.rchar, sample.target);
        self.dirty.insert((task_id, node_id));
    }

    fn update_lines(&mut self) {
        let dirty: Vec<CellKey> = self.dirty.drain().collect();
        for (task_id, node_id) in dirty {
            let count = self.cells.get(&(task_id, node_id)).map(Cell::sample_count).unwrap_or(0);
            if count < 2 {
                continue;
            }
            self.refit_cell(task_id, node_id);
            self.update_ratios(task_id, node_id);
        }
    }

    fn refit_cell(&mut self, task_id: usize, node_id: usize) {
        let samples: Vec<(f64, f64)> = self.cells[&(task_id, node_id)].samples().to_vec();
        let (coef, intercept) = self.regression.fit(&samples);

        if !coef.is_finite() || !intercept.is_finite() {
            debug!(
                task = %self.tasks[task_id],
                node = %self.nodes[node_id],
                "non-finite regression output, leaving cell without a line"
            );
            let cell = self.cells.get_mut(&(task_id, node_id)).unwrap();
            cell.line = None;
            cell.range = None;
            return;
        }

        let x_min = samples.iter().map(|(x, _)| *x).fold(f64::INFINITY, f64::min);
        let x_max = samples.iter().map(|(x, _)| *x).fold(f64::NEG_INFINITY, f64::max);

        let cell = self.cells.get_mut(&(task_id, node_id)).unwrap();
        cell.line = Some(Line::new(coef, intercept));
        cell.range = Some(Range::new(x_min, x_max));
    }

    /// Updates the row/column of `ratio_T`/`weight_T` touched by a
    /// changed cell `(task_id, node_id)`, and keeps `comparability` in
    /// sync. A pair whose overlap disappears, or whose averages are
    /// degenerate, is zeroed rather than left stale, and `comparability`
    /// is recomputed from every task's weight so it clears only when no
    /// other task still supports the pair.
    fn update_ratios(&mut self, task_id: usize, node_id: usize) {
        let i = node_id;
        let node_cell = self.cells[&(task_id, node_id)].clone();
        if !node_cell.is_valid() {
            // A refit that produced no valid line leaves this cell with
            // nothing to compare against; every stale entry it left
            // behind in ratio_T/weight_T/comparability must go with it.
            for j in 0..self.node_count() {
                if i != j {
                    self.zero_pair(task_id, i, j);
                }
            }
            return;
        }
        let node_line = node_cell.line.unwrap();
        let node_range = node_cell.range.unwrap();
        let n_i = node_cell.sample_count();

        for j in 0..self.node_count() {
            if i == j {
                continue;
            }
            let other_cell = match self.cells.get(&(task_id, j)) {
                Some(c) if c.is_valid() => c.clone(),
                _ => continue,
            };
            let other_line = other_cell.line.unwrap();
            let other_range = other_cell.range.unwrap();
            let n_j = other_cell.sample_count();

            let intersect = node_range.intersection(&other_range);
            if intersect.width() <= 0.0 {
                self.zero_pair(task_id, i, j);
                continue;
            }

            let mu_i = node_line.avg_on(&intersect);
            let mu_j = other_line.avg_on(&intersect);
            let usable = mu_i.is_finite()
                && mu_j.is_finite()
                && mu_i != 0.0
                && mu_j != 0.0
                && (mu_i > 0.0) == (mu_j > 0.0);
            if !usable {
                warn!(
                    task = %self.tasks[task_id],
                    node_a = %self.nodes[i],
                    node_b = %self.nodes[j],
                    "skipping ratio: non-finite, zero, or opposite-signed averages"
                );
                self.zero_pair(task_id, i, j);
                continue;
            }

            let r = (mu_i / mu_j).ln();
            let w = ((n_i - 1) * (n_j - 1)) as i64;

            let ratio_mat = self.ratio.get_mut(&task_id).unwrap();
            ratio_mat.set(i, j, r);
            ratio_mat.set(j, i, -r);
            let weight_mat = self.weight.get_mut(&task_id).unwrap();
            weight_mat.set(i, j, w);
            weight_mat.set(j, i, w);

            self.recompute_comparability(i, j);
        }
    }

    fn zero_pair(&mut self, task_id: usize, i: usize, j: usize) {
        if let Some(ratio_mat) = self.ratio.get_mut(&task_id) {
            ratio_mat.set(i, j, 0.0);
            ratio_mat.set(j, i, 0.0);
        }
        if let Some(weight_mat) = self.weight.get_mut(&task_id) {
            weight_mat.set(i, j, 0);
            weight_mat.set(j, i, 0);
        }
        self.recompute_comparability(i, j);
    }

    fn recompute_comparability(&mut self, i: usize, j: usize) {
        let connected = self.weight.values().any(|m| *m.get(i, j) > 0);
        self.comparability.set(i, j, connected);
        self.comparability.set(j, i, connected);
    }

    /// Weighted average log-ratio across tasks, per `spec.md` §4.5.
    /// Entries with zero total weight are reported as `0.0` and left
    /// `unknown` — the caller must consult `comparability` to tell a
    /// real zero ratio from an unknown one.
    pub fn accumulated_ratios(&self) -> Matrix<f64> {
        let n = self.node_count();
        let mut numerator = Matrix::<f64>::zeros(n);
        let mut weights_summed = Matrix::<i64>::zeros(n);

        for (task_id, ratio_mat) in &self.ratio {
            let weight_mat = &self.weight[task_id];
            for i in 0..n {
                for j in 0..n {
                    let w = *weight_mat.get(i, j);
                    if w == 0 {
                        continue;
                    }
                    let prev = *numerator.get(i, j);
                    numerator.set(i, j, prev + *ratio_mat.get(i, j) * w as f64);
                    let prev_w = *weights_summed.get(i, j);
                    weights_summed.set(i, j, prev_w + w);
                }
            }
        }

        let mut result = Matrix::<f64>::zeros(n);
        for i in 0..n {
            for j in 0..n {
                let w = *weights_summed.get(i, j);
                let value = if w > 0 {
                    *numerator.get(i, j) / w as f64
                } else {
                    0.0
                };
                result.set(i, j, value);
            }
        }
        result
    }

    /// Fills in previously-unknown pairs by path-summing log-ratios
    /// along Floyd-Warshall shortest paths. Returns `None` if the
    /// comparability graph is disconnected.
    pub fn transitive_ratios(&self) -> Option<Matrix<f64>> {
        let (distance, predecessor) = floyd_warshall(&self.comparability);
        if !is_connected(&distance) {
            return None;
        }

        let n = self.node_count();
        let mut a = self.accumulated_ratios();
        let mut known = self.comparability.clone();
        for i in 0..n {
            known.set(i, i, true);
        }

        for i in 0..n {
            for j in 0..n {
                if i == j || *known.get(i, j) {
                    continue;
                }
                let mut dest = j;
                let mut stack = Vec::new();
                while !*known.get(i, dest) {
                    stack.push(dest);
                    dest = *predecessor.get(i, dest);
                }
                let mut ln_ratio = *a.get(i, dest);
                while let Some(popped) = stack.pop() {
                    let middle = dest;
                    dest = popped;
                    ln_ratio += *a.get(middle, dest);
                    a.set(i, dest, ln_ratio);
                    a.set(dest, i, -ln_ratio);
                    known.set(i, dest, true);
                    known.set(dest, i, true);
                }
            }
        }

        Some(a)
    }

    /// The node score is `exp(mean log-ratio of own cost to others)`;
    /// lower is cheaper. Returns `None` when the comparability graph is
    /// disconnected ("not ready").
    pub fn ranking(&self) -> Option<HashMap<String, f64>> {
        let ratios = self.transitive_ratios()?;
        let n = self.node_count();
        if n == 0 {
            return Some(HashMap::new());
        }
        let mut result = HashMap::with_capacity(n);
        for (i, name) in self.nodes.iter().enumerate() {
            let row_sum: f64 = (0..n).map(|j| *ratios.get(i, j)).sum();
            let score = (row_sum / n as f64).exp();
            result.insert(name.clone(), score);
        }
        Some(result)
    }
}

/// A regressor that fits normally below `go_nan_at` samples, then always
/// reports a non-finite line - used to exercise the "a previously valid
/// cell turns invalid" path without needing pathological input data.
#[cfg(test)]
#[derive(Debug)]
struct FlakyRegression {
    go_nan_at: usize,
}

#[cfg(test)]
impl RegressionModel for FlakyRegression {
    fn fit(&self, samples: &[(f64, f64)]) -> crate::regression::Fit {
        if samples.len() >= self.go_nan_at {
            return (f64::NAN, f64::NAN);
        }
        OlsRegression.fit(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(node: &str, task: &str, rchar: f64, target: f64) -> Sample {
        Sample {
            node: node.to_string(),
            task: task.to_string(),
            rchar,
            target,
        }
    }

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() <= tol, "{a} !~= {b} (tol {tol})");
    }

    // S1: two nodes, one task, linear data.
    #[test]
    fn s1_two_nodes_one_task_linear_data() {
        let mut est = Estimator::default();
        for x in 1..=4 {
            est.learn(sample("A", "T", x as f64, x as f64));
        }
        for x in 1..=4 {
            est.learn(sample("B", "T", x as f64, 2.0 * x as f64));
        }

        assert_eq!(est.node_count(), 2);
        let ranking = est.ranking().expect("graph should be connected");
        let s_a = ranking["A"];
        let s_b = ranking["B"];
        assert_close(s_a / s_b, 0.5, 1e-6);
    }

    // S2: insufficient nodes is a driver-level check (estimate vs node_count),
    // exercised in the integration test; node_count itself is correct here.
    #[test]
    fn s2_node_count_reflects_admitted_nodes_only() {
        let mut est = Estimator::default();
        for x in 1..=4 {
            est.learn(sample("A", "T", x as f64, x as f64));
            est.learn(sample("B", "T", x as f64, 2.0 * x as f64));
        }
        assert_eq!(est.node_count(), 2);
    }

    // S3: bootstrap - a single record buffers, a second admits the pair.
    #[test]
    fn s3_bootstrap_buffers_until_second_sample() {
        let mut est = Estimator::default();
        est.learn(sample("A", "T", 1.0, 1.0));
        assert_eq!(est.node_count(), 0);
        assert_eq!(est.state(), EstimatorState::Buffering);

        est.learn(sample("A", "T", 2.0, 2.0));
        assert_eq!(est.node_count(), 1);
    }

    // S4: transitive completion through an intermediate node.
    #[test]
    fn s4_transitive_completion_through_intermediate() {
        let mut est = Estimator::default();
        for x in 1..=4 {
            est.learn(sample("A", "T1", x as f64, x as f64));
            est.learn(sample("B", "T1", x as f64, 2.0 * x as f64));
        }
        for x in 1..=4 {
            est.learn(sample("B", "T2", x as f64, x as f64));
            est.learn(sample("C", "T2", x as f64, 4.0 * x as f64));
        }

        assert_eq!(est.node_count(), 3);
        assert_eq!(est.state(), EstimatorState::Ready);

        let ratios = est.transitive_ratios().expect("graph connected via B");
        let a_idx = est.nodes().iter().position(|n| n == "A").unwrap();
        let b_idx = est.nodes().iter().position(|n| n == "B").unwrap();
        let c_idx = est.nodes().iter().position(|n| n == "C").unwrap();

        let direct_ab = *ratios.get(a_idx, b_idx);
        let direct_bc = *ratios.get(b_idx, c_idx);
        let transitive_ac = *ratios.get(a_idx, c_idx);
        assert_close(transitive_ac, direct_ab + direct_bc, 1e-9);

        let ranking = est.ranking().unwrap();
        assert_eq!(ranking.len(), 3);
    }

    // S5: non-overlapping ranges on the same task leave the pair
    // uncomparable directly, and without a transitive path, not ready.
    #[test]
    fn s5_non_overlapping_ranges_stay_unready() {
        let mut est = Estimator::default();
        est.learn(sample("A", "T", 1.0, 1.0));
        est.learn(sample("A", "T", 2.0, 2.0));
        est.learn(sample("B", "T", 10.0, 10.0));
        est.learn(sample("B", "T", 20.0, 20.0));

        assert_eq!(est.node_count(), 2);
        assert!(!*est.comparability().get(0, 1));
        assert!(est.ranking().is_none());
    }

    // Universal property 1 & 2: anti-symmetry and zero diagonal.
    #[test]
    fn anti_symmetry_and_diagonal_hold() {
        let mut est = Estimator::default();
        for x in 1..=5 {
            est.learn(sample("A", "T", x as f64, x as f64));
            est.learn(sample("B", "T", x as f64, 3.0 * x as f64));
            est.learn(sample("C", "T", x as f64, 0.5 * x as f64));
        }
        let ratio = est.ratio_matrix("T").unwrap();
        let weight = est.weight_matrix("T").unwrap();
        let n = est.node_count();
        for i in 0..n {
            assert_eq!(*ratio.get(i, i), 0.0);
            assert_eq!(*weight.get(i, i), 0);
            for j in 0..n {
                assert_close(*ratio.get(i, j) + *ratio.get(j, i), 0.0, 1e-12);
                assert_eq!(*weight.get(i, j), *weight.get(j, i));
            }
        }
    }

    // Universal property 3: monotone append - old entries survive growth.
    #[test]
    fn monotone_append_preserves_old_entries() {
        let mut est = Estimator::default();
        for x in 1..=4 {
            est.learn(sample("A", "T", x as f64, x as f64));
            est.learn(sample("B", "T", x as f64, 2.0 * x as f64));
        }
        let before = *est.ratio_matrix("T").unwrap().get(0, 1);

        for x in 1..=4 {
            est.learn(sample("C", "T", x as f64, 5.0 * x as f64));
        }
        let after = *est.ratio_matrix("T").unwrap().get(0, 1);
        assert_eq!(before, after);
    }

    // Universal property 4: comparability consistency.
    #[test]
    fn comparability_matches_weight_existence() {
        let mut est = Estimator::default();
        for x in 1..=4 {
            est.learn(sample("A", "T1", x as f64, x as f64));
            est.learn(sample("B", "T1", x as f64, 2.0 * x as f64));
        }
        let n = est.node_count();
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let any_weight = est.tasks().iter().any(|t| {
                    *est.weight_matrix(t).unwrap().get(i, j) > 0
                });
                assert_eq!(*est.comparability().get(i, j), any_weight);
            }
        }
    }

    // Universal property 8: order independence for a single cell.
    #[test]
    fn order_independence_of_same_cell_updates() {
        let mut a = Estimator::default();
        let mut b = Estimator::default();
        let xs = [1.0, 2.0, 3.0, 4.0];

        for &x in &xs {
            a.learn(sample("A", "T", x, x));
        }
        for &x in xs.iter().rev() {
            a.learn(sample("B", "T", x, 2.0 * x));
        }

        for &x in xs.iter().rev() {
            b.learn(sample("A", "T", x, x));
        }
        for &x in &xs {
            b.learn(sample("B", "T", x, 2.0 * x));
        }

        let ranking_a = a.ranking().unwrap();
        let ranking_b = b.ranking().unwrap();
        assert_close(ranking_a["A"], ranking_b["A"], 1e-9);
        assert_close(ranking_a["B"], ranking_b["B"], 1e-9);
    }

    #[test]
    fn empty_estimator_is_not_ready() {
        let est = Estimator::default();
        assert_eq!(est.state(), EstimatorState::Empty);
        assert!(est.ranking().unwrap().is_empty());
    }

    // A cell that was valid and compared against another node, then
    // turns invalid on a later sample (e.g. non-finite regression
    // output), must have its stale ratio/weight/comparability entries
    // cleared rather than left pointing at a discarded line.
    #[test]
    fn invalid_cell_clears_stale_comparisons() {
        let mut est = Estimator::new(Box::new(FlakyRegression { go_nan_at: 3 }));
        est.learn(sample("A", "T", 1.0, 1.0));
        est.learn(sample("A", "T", 2.0, 2.0));
        est.learn(sample("B", "T", 1.0, 2.0));
        est.learn(sample("B", "T", 2.0, 4.0));

        assert_eq!(est.node_count(), 2);
        let a_idx = est.nodes().iter().position(|n| n == "A").unwrap();
        let b_idx = est.nodes().iter().position(|n| n == "B").unwrap();
        assert!(*est.comparability().get(a_idx, b_idx));
        assert_ne!(*est.weight_matrix("T").unwrap().get(a_idx, b_idx), 0);

        // This third sample pushes cell (T, A) to 3 samples, the point
        // at which FlakyRegression starts reporting a non-finite line.
        est.learn(sample("A", "T", 3.0, 3.0));

        assert!(!*est.comparability().get(a_idx, b_idx));
        assert_eq!(*est.ratio_matrix("T").unwrap().get(a_idx, b_idx), 0.0);
        assert_eq!(*est.weight_matrix("T").unwrap().get(a_idx, b_idx), 0);
    }
}
