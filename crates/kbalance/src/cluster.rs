use crate::types::Point;
use crate::{EmptyDatasetSnafu, Error, TooManyClustersSnafu, ZeroClustersSnafu, rng};
use rand::Rng;
use snafu::prelude::*;
use std::ops::Index;

/// A centroid and the points currently assigned to it.
///
/// The center is only ever moved by [`Cluster::recenter`], so it is either the mean of
/// the observations or, for an empty cluster, the last center it had.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    center: Point,
    observations: Vec<Point>,
}

impl Cluster {
    pub fn new(center: Point) -> Self {
        Self {
            center,
            observations: Vec::new(),
        }
    }

    /// A cluster that already owns `observations`, centered on their mean.
    ///
    /// `center` is kept only if `observations` is empty.
    pub fn from_observations(center: Point, observations: Vec<Point>) -> Self {
        let mut cluster = Self {
            center,
            observations,
        };
        cluster.recenter();
        cluster
    }

    #[inline]
    pub fn center(&self) -> Point {
        self.center
    }

    #[inline]
    pub fn observations(&self) -> &[Point] {
        &self.observations
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn append(&mut self, p: Point) {
        self.observations.push(p);
    }

    /// Moves the center to the mean of the observations. No-op when empty.
    pub fn recenter(&mut self) {
        if let Some(mean) = Point::mean(&self.observations) {
            self.center = mean;
        }
    }

    /// Drops every observation and keeps the center.
    pub fn reset(&mut self) {
        self.observations.clear();
    }

    pub(crate) fn replace_observations(&mut self, observations: Vec<Point>) {
        self.observations = observations;
    }
}

/// Fixed-size, index-addressed collection of clusters.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSet {
    clusters: Vec<Cluster>,
}

impl ClusterSet {
    /// Picks `k` distinct points of `points` as initial centers, drawing from a generator
    /// seeded with `seed`. All clusters start empty.
    pub fn initialize(points: &[Point], k: usize, seed: u64) -> Result<Self, Error> {
        let mut rng = rng::from_seed(seed);
        Self::initialize_with(points, k, &mut rng)
    }

    /// Same as [`ClusterSet::initialize`], drawing from a caller-owned generator.
    pub fn initialize_with(points: &[Point], k: usize, rng: &mut impl Rng) -> Result<Self, Error> {
        ensure!(!points.is_empty(), EmptyDatasetSnafu);
        ensure!(k > 0, ZeroClustersSnafu);
        ensure!(
            k <= points.len(),
            TooManyClustersSnafu {
                k,
                n_points: points.len()
            }
        );

        let clusters = rand::seq::index::sample(rng, points.len(), k)
            .into_iter()
            .map(|i| Cluster::new(points[i]))
            .collect();

        Ok(Self { clusters })
    }

    /// Wraps clusters that were built elsewhere, for instance a partition computed by
    /// another tool that only needs rebalancing.
    pub fn from_clusters(clusters: Vec<Cluster>) -> Result<Self, Error> {
        ensure!(!clusters.is_empty(), ZeroClustersSnafu);
        Ok(Self { clusters })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cluster> {
        self.clusters.iter()
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn into_clusters(self) -> Vec<Cluster> {
        self.clusters
    }

    pub(crate) fn cluster_mut(&mut self, index: usize) -> &mut Cluster {
        &mut self.clusters[index]
    }

    /// Index of the cluster whose center is closest to `p`. Ties go to the lowest index.
    pub fn nearest(&self, p: Point) -> usize {
        let mut min = f64::INFINITY;
        let mut min_idx = 0;
        for (i, cluster) in self.clusters.iter().enumerate() {
            let d = p.squared_distance(cluster.center);
            if d < min {
                min = d;
                min_idx = i;
            }
        }
        min_idx
    }

    /// Closest cluster to `p` other than `excluding`, with its distance.
    ///
    /// Returns `None` when `excluding` is the only cluster.
    pub fn neighbour(&self, p: Point, excluding: usize) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, cluster) in self.clusters.iter().enumerate() {
            if i == excluding {
                continue;
            }
            let d = p.squared_distance(cluster.center);
            if best.is_none_or(|(_, min)| d < min) {
                best = Some((i, d));
            }
        }
        best.map(|(i, d)| (i, d.sqrt()))
    }

    pub fn reset_all(&mut self) {
        for cluster in &mut self.clusters {
            cluster.reset();
        }
    }

    pub fn recenter_all(&mut self) {
        for cluster in &mut self.clusters {
            cluster.recenter();
        }
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.clusters.iter().map(Cluster::len).collect()
    }

    pub fn total_points(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }

    pub fn summary(&self) -> Summary {
        Summary::from_sizes(self.sizes())
    }
}

impl Index<usize> for ClusterSet {
    type Output = Cluster;

    fn index(&self, index: usize) -> &Cluster {
        &self.clusters[index]
    }
}

impl<'a> IntoIterator for &'a ClusterSet {
    type Item = &'a Cluster;
    type IntoIter = std::slice::Iter<'a, Cluster>;

    fn into_iter(self) -> Self::IntoIter {
        self.clusters.iter()
    }
}

/// Population statistics of a [`ClusterSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub sizes: Vec<usize>,
    pub min: usize,
    pub max: usize,
    pub total: usize,
}

impl Summary {
    pub fn from_sizes(sizes: Vec<usize>) -> Self {
        let min = sizes.iter().copied().min().unwrap_or(0);
        let max = sizes.iter().copied().max().unwrap_or(0);
        let total = sizes.iter().sum();
        Self {
            sizes,
            min,
            max,
            total,
        }
    }

    /// Difference between the largest and the smallest cluster.
    pub fn spread(&self) -> usize {
        self.max - self.min
    }
}
