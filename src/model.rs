//! Core data model: samples, lines, ranges, and per-cell state.
//!
//! Mirrors the `Line`/`Range` dataclasses of the estimator this crate is
//! descended from: a line is evaluated pointwise and averaged over an
//! interval by averaging its two endpoint values; a range intersects by
//! elementwise max/min of its endpoints.

use serde::Deserialize;

/// One learn record: `(node, task, rchar, target)`. Deserialized directly
/// from a line-delimited JSON record whose key set is exactly
/// `{node, task, rchar, target}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Sample {
    pub node: String,
    pub task: String,
    pub rchar: f64,
    pub target: f64,
}

/// Linear function `y = coef * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub coef: f64,
    pub intercept: f64,
}

impl Line {
    pub fn new(coef: f64, intercept: f64) -> Self {
        Line { coef, intercept }
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.coef * x + self.intercept
    }

    /// Average of the line's value at the two endpoints of `interval`.
    pub fn avg_on(&self, interval: &Range) -> f64 {
        (self.evaluate(interval.start) + self.evaluate(interval.end)) / 2.0
    }
}

/// Closed interval `[start, end]` on the feature axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub start: f64,
    pub end: f64,
}

impl Range {
    pub fn new(start: f64, end: f64) -> Self {
        Range { start, end }
    }

    pub fn width(&self) -> f64 {
        self.end - self.start
    }

    pub fn intersection(&self, other: &Range) -> Range {
        Range {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        }
    }
}

/// Per-(task, node) state: accumulated samples plus the fitted line and
/// observed range, once fittable.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    samples: Vec<(f64, f64)>,
    pub line: Option<Line>,
    pub range: Option<Range>,
}

impl Cell {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn push(&mut self, rchar: f64, target: f64) {
        self.samples.push((rchar, target));
    }

    pub fn samples(&self) -> &[(f64, f64)] {
        &self.samples
    }

    /// The valid-data predicate: `sample_count >= 2 && line present &&
    /// range present && range.width > 0`.
    pub fn is_valid(&self) -> bool {
        self.samples.len() >= 2
            && self.line.is_some()
            && self.range.map(|r| r.width() > 0.0).unwrap_or(false)
    }
}
