use crate::cluster::ClusterSet;
use crate::observer::Observer;
use crate::types::Point;
use crate::{DeltaThresholdOutOfBoundsSnafu, Error, rng};
use snafu::prelude::*;
use tracing::info;

pub mod lloyds;

// References:
// - Lloyd, S. P. (1982). Least squares quantization in PCM.
// - Empty clusters: http://user.ceng.metu.edu.tr/~tcan/ceng465_f1314/Schedule/KMeansEmpty.html

/// Stop once fewer than this fraction of the points changed cluster in an iteration.
pub const DEFAULT_DELTA_THRESHOLD: f64 = 0.01;
/// Index of the last iteration allowed to run.
pub const DEFAULT_ITERATION_CAP: usize = 96;

/// How a Partitioner run ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Termination {
    Converged,
    IterationLimitReached,
}

/// Partitioner settings.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Kmeans {
    delta_threshold: f64,
    iteration_cap: usize,
}

impl Default for Kmeans {
    fn default() -> Self {
        Self::new()
    }
}

impl Kmeans {
    pub fn new() -> Self {
        Self {
            delta_threshold: DEFAULT_DELTA_THRESHOLD,
            iteration_cap: DEFAULT_ITERATION_CAP,
        }
    }

    /// `delta_threshold` must lie strictly between 0 and 1.
    pub fn with_options(delta_threshold: f64, iteration_cap: usize) -> Result<Self, Error> {
        ensure!(
            delta_threshold > 0.0 && delta_threshold < 1.0,
            DeltaThresholdOutOfBoundsSnafu {
                value: delta_threshold
            }
        );

        Ok(Self {
            delta_threshold,
            iteration_cap,
        })
    }

    pub fn delta_threshold(&self) -> f64 {
        self.delta_threshold
    }

    pub fn iteration_cap(&self) -> usize {
        self.iteration_cap
    }

    /// Runs Lloyd's algorithm over `dataset` with `k` clusters.
    ///
    /// The initial centers and any empty-cluster recovery draw from one generator seeded
    /// with `seed`, so the same inputs always give the same partition. `observer` is called
    /// once per iteration; its first error aborts the run.
    pub fn partition(
        &self,
        dataset: &[Point],
        k: usize,
        seed: u64,
        observer: &mut impl Observer,
    ) -> Result<Partition, Error> {
        let mut rng = rng::from_seed(seed);
        let mut clusters = ClusterSet::initialize_with(dataset, k, &mut rng)?;

        let result = lloyds::lloyds_loop(&mut rng, dataset, &mut clusters, self, observer)?;

        info!(
            k,
            points = dataset.len(),
            iterations = result.iterations,
            termination = ?result.termination,
            "partition finished"
        );

        Ok(Partition {
            clusters,
            iterations: result.iterations,
            termination: result.termination,
        })
    }
}

/// A converged (or capped) partition, handed over by value to the next phase.
#[derive(Debug, Clone)]
pub struct Partition {
    pub clusters: ClusterSet,
    pub iterations: usize,
    pub termination: Termination,
}
