//! Thread-safe façade over [`Estimator`], for the multi-threaded
//! discipline the design allows but the single-threaded driver does not
//! need: one coarse reader-writer lock, writers (`learn`) exclusive,
//! readers (`ranking`, `node_count`) shared.

use std::sync::RwLock;

use crate::estimator::{Estimator, EstimatorState};
use crate::model::Sample;
use std::collections::HashMap;

pub struct SharedEstimator {
    inner: RwLock<Estimator>,
}

impl SharedEstimator {
    pub fn new(estimator: Estimator) -> Self {
        SharedEstimator {
            inner: RwLock::new(estimator),
        }
    }

    pub fn learn(&self, sample: Sample) {
        self.inner.write().expect("estimator lock poisoned").learn(sample);
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().expect("estimator lock poisoned").node_count()
    }

    pub fn ranking(&self) -> Option<HashMap<String, f64>> {
        self.inner.read().expect("estimator lock poisoned").ranking()
    }

    pub fn state(&self) -> EstimatorState {
        self.inner.read().expect("estimator lock poisoned").state()
    }
}
