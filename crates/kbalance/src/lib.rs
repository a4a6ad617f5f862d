//! Size-balanced k-means for 2-D points.
//!
//! Points are first clustered with Lloyd's algorithm ([`Kmeans`]), then a border-migration
//! pass ([`Rebalancer`]) moves the points that sit closest to another cluster out of
//! oversized clusters until the cluster sizes are within a tolerance of each other.
//!
//! ```
//! use kbalance::{balanced_partition, Config, Point};
//!
//! let mut points = Vec::new();
//! for i in 0..5 {
//!     let jitter = i as f64 * 0.01;
//!     points.push(Point::new(jitter, jitter));
//!     points.push(Point::new(10.0 + jitter, 10.0 + jitter));
//! }
//!
//! let output = balanced_partition(&points, &Config::new(2).with_random_seed(1), &mut ()).unwrap();
//! assert_eq!(output.summary.sizes, vec![5, 5]);
//! assert_eq!(output.summary.total, 10);
//! ```
//!
//! Both phases are deterministic for a given seed, and both report their progress to an
//! optional [`Observer`].

pub mod cluster;
pub mod dataset;
pub mod kmeans;
pub mod observer;
pub mod rebalance;
#[cfg(feature = "_debug")]
pub mod rng;
#[cfg(not(feature = "_debug"))]
mod rng;
mod types;

pub use cluster::{Cluster, ClusterSet, Summary};
pub use kmeans::{DEFAULT_DELTA_THRESHOLD, DEFAULT_ITERATION_CAP, Kmeans, Partition, Termination};
pub use observer::{BoxError, Observer, Phase, TracingObserver};
pub use rebalance::{
    DEFAULT_BALANCE_ROUND_CAP, DEFAULT_BALANCE_TOLERANCE, MigrationPolicy, Rebalanced, Rebalancer,
    RoundReport,
};
pub use types::Point;

use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("dataset is empty"))]
    EmptyDataset,

    #[snafu(display("cluster count must be positive"))]
    ZeroClusters,

    #[snafu(display("the size of the dataset ({n_points}) must at least equal k ({k})"))]
    TooManyClusters { k: usize, n_points: usize },

    #[snafu(display("delta threshold {value} is out of bounds (must be >0.0 and <1.0)"))]
    DeltaThresholdOutOfBounds { value: f64 },

    #[snafu(display(
        "rebalancer was set up for {expected_points} points in {expected_k} clusters, \
        got {points} points in {k} clusters"
    ))]
    ShapeMismatch {
        expected_points: usize,
        expected_k: usize,
        points: usize,
        k: usize,
    },

    #[snafu(display("observer failed during {phase} step {step}"))]
    Observer {
        phase: Phase,
        step: usize,
        source: BoxError,
    },
}

impl Error {
    /// True for errors caused by the inputs or settings, raised before any iteration ran.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Error::Observer { .. })
    }
}

/// Every option of a [`balanced_partition`] run.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Config {
    pub k: usize,
    pub delta_threshold: f64,
    pub iteration_cap: usize,
    pub balance_tolerance: usize,
    pub balance_round_cap: usize,
    pub random_seed: u64,
    pub migration_policy: MigrationPolicy,
}

impl Config {
    /// `k` clusters, everything else at its default and a seed of 0.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            delta_threshold: DEFAULT_DELTA_THRESHOLD,
            iteration_cap: DEFAULT_ITERATION_CAP,
            balance_tolerance: DEFAULT_BALANCE_TOLERANCE,
            balance_round_cap: DEFAULT_BALANCE_ROUND_CAP,
            random_seed: 0,
            migration_policy: MigrationPolicy::default(),
        }
    }

    pub fn with_delta_threshold(mut self, delta_threshold: f64) -> Self {
        self.delta_threshold = delta_threshold;
        self
    }

    pub fn with_iteration_cap(mut self, iteration_cap: usize) -> Self {
        self.iteration_cap = iteration_cap;
        self
    }

    pub fn with_balance_tolerance(mut self, balance_tolerance: usize) -> Self {
        self.balance_tolerance = balance_tolerance;
        self
    }

    pub fn with_balance_round_cap(mut self, balance_round_cap: usize) -> Self {
        self.balance_round_cap = balance_round_cap;
        self
    }

    pub fn with_random_seed(mut self, random_seed: u64) -> Self {
        self.random_seed = random_seed;
        self
    }

    pub fn with_migration_policy(mut self, migration_policy: MigrationPolicy) -> Self {
        self.migration_policy = migration_policy;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Output {
    /// Final clusters, after rebalancing.
    pub clusters: ClusterSet,
    /// Cluster sizes right after k-means.
    pub partition_summary: Summary,
    /// Cluster sizes after rebalancing.
    pub summary: Summary,
    pub partition_iterations: usize,
    pub termination: Termination,
    pub rebalance_rounds: usize,
    pub within_tolerance: bool,
}

/// Clusters `dataset` with k-means, then rebalances the result.
///
/// All settings are checked before the first iteration. `observer` sees every k-means
/// iteration and every rebalancing round; an observer error stops the run.
pub fn balanced_partition(
    dataset: &[Point],
    config: &Config,
    observer: &mut impl Observer,
) -> Result<Output, Error> {
    let kmeans = Kmeans::with_options(config.delta_threshold, config.iteration_cap)?;
    let rebalancer = Rebalancer::new(dataset.len(), config.k)?
        .with_tolerance(config.balance_tolerance)
        .with_round_cap(config.balance_round_cap)
        .with_policy(config.migration_policy);

    let partition = kmeans.partition(dataset, config.k, config.random_seed, observer)?;
    let partition_summary = partition.clusters.summary();

    let rebalanced = rebalancer.rebalance(partition.clusters, observer)?;
    let summary = rebalanced.clusters.summary();

    Ok(Output {
        clusters: rebalanced.clusters,
        partition_summary,
        summary,
        partition_iterations: partition.iterations,
        termination: partition.termination,
        rebalance_rounds: rebalanced.rounds,
        within_tolerance: rebalanced.within_tolerance,
    })
}
