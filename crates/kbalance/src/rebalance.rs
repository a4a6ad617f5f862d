//! Border migration: evens out cluster populations after k-means.
//!
//! Each round walks the clusters in index order. For a cluster `A` holding more than the
//! ideal size `T = ceil(n / k)`, every point gets a migration score
//!
//! ```text
//! diff(p) = |p - center[r]| - |p - center[A]|,   r = nearest cluster to p other than A
//! ```
//!
//! and the `|A| - T` points with the lowest score (the ones sitting closest to a border)
//! move out. The centers are recomputed once at the end of the round. Rounds repeat until
//! the gap between the largest and the smallest cluster is within tolerance, or the round
//! cap is hit. This is a greedy heuristic: a round is not guaranteed to shrink the gap.

use crate::cluster::ClusterSet;
use crate::observer::{Observer, Phase};
use crate::types::Point;
use crate::{
    EmptyDatasetSnafu, Error, ObserverSnafu, ShapeMismatchSnafu, TooManyClustersSnafu,
    ZeroClustersSnafu,
};
use snafu::prelude::*;
use tracing::{debug, info, trace};

/// Largest accepted gap between the biggest and the smallest cluster.
pub const DEFAULT_BALANCE_TOLERANCE: usize = 10;
pub const DEFAULT_BALANCE_ROUND_CAP: usize = 10;

/// Where the points leaving an oversized cluster go.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum MigrationPolicy {
    /// Each point moves to its own nearest other cluster.
    #[default]
    NearestAlternative,
    /// Every point of cluster `i` moves to cluster `(i + 1) % k`.
    AdjacentIndex,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Candidate {
    score: f64,
    point: Point,
    alternative: usize,
}

/// Planned split of one oversized cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub source: usize,
    pub stays: Vec<Point>,
    /// Points leaving, each with its destination cluster.
    pub moves: Vec<(Point, usize)>,
}

/// What a single round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Points that changed cluster.
    pub moved: usize,
    /// Oversized clusters that gave points away.
    pub migrated: Vec<usize>,
    /// Oversized clusters left untouched because the move was blocked or degenerate.
    pub skipped: Vec<usize>,
}

/// Rebalancer output, handed back by value.
#[derive(Debug, Clone)]
pub struct Rebalanced {
    pub clusters: ClusterSet,
    /// Number of rounds that ran. Rounds are numbered from 1 when reported to observers.
    pub rounds: usize,
    pub within_tolerance: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Rebalancer {
    n_points: usize,
    k: usize,
    ideal_size: usize,
    tolerance: usize,
    round_cap: usize,
    policy: MigrationPolicy,
}

impl Rebalancer {
    /// A rebalancer for `n_points` points split into `k` clusters.
    pub fn new(n_points: usize, k: usize) -> Result<Self, Error> {
        ensure!(n_points > 0, EmptyDatasetSnafu);
        ensure!(k > 0, ZeroClustersSnafu);
        ensure!(k <= n_points, TooManyClustersSnafu { k, n_points });

        Ok(Self {
            n_points,
            k,
            ideal_size: n_points.div_ceil(k),
            tolerance: DEFAULT_BALANCE_TOLERANCE,
            round_cap: DEFAULT_BALANCE_ROUND_CAP,
            policy: MigrationPolicy::default(),
        })
    }

    pub fn with_tolerance(mut self, tolerance: usize) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_round_cap(mut self, round_cap: usize) -> Self {
        self.round_cap = round_cap;
        self
    }

    pub fn with_policy(mut self, policy: MigrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Target population per cluster, `ceil(n / k)`.
    pub fn ideal_size(&self) -> usize {
        self.ideal_size
    }

    pub fn tolerance(&self) -> usize {
        self.tolerance
    }

    pub fn round_cap(&self) -> usize {
        self.round_cap
    }

    pub fn policy(&self) -> MigrationPolicy {
        self.policy
    }

    /// Cluster whose size bounds how many points `source` may push out.
    fn guard_target(&self, clusters: &ClusterSet, source: usize) -> Option<usize> {
        match self.policy {
            MigrationPolicy::NearestAlternative => clusters
                .neighbour(clusters[source].center(), source)
                .map(|(i, _)| i),
            MigrationPolicy::AdjacentIndex if clusters.len() > 1 => {
                Some((source + 1) % clusters.len())
            }
            MigrationPolicy::AdjacentIndex => None,
        }
    }

    /// Works out which points of `source` should leave, without touching `clusters`.
    ///
    /// Returns `None` when `source` is not oversized, when its target cluster is already at
    /// least as large, or when the split would leave either side empty.
    pub fn plan_migration(&self, clusters: &ClusterSet, source: usize) -> Option<Migration> {
        let cluster = &clusters[source];
        let size = cluster.len();
        if size <= self.ideal_size {
            return None;
        }

        let target = self.guard_target(clusters, source)?;
        if size <= clusters[target].len() {
            trace!(source, target, "target is not smaller, no migration");
            return None;
        }

        let center = cluster.center();
        let mut candidates = Vec::with_capacity(size);
        for &p in cluster.observations() {
            let (nearest, d_alternative) = clusters.neighbour(p, source)?;
            let alternative = match self.policy {
                MigrationPolicy::NearestAlternative => nearest,
                MigrationPolicy::AdjacentIndex => target,
            };
            candidates.push(Candidate {
                score: d_alternative - p.distance(center),
                point: p,
                alternative,
            });
        }

        // Stable: equal scores keep observation order
        candidates.sort_by(|a, b| a.score.total_cmp(&b.score));

        let m = size - self.ideal_size;
        let stays: Vec<Point> = candidates[m..].iter().map(|c| c.point).collect();
        let moves: Vec<(Point, usize)> = candidates[..m]
            .iter()
            .map(|c| (c.point, c.alternative))
            .collect();

        if stays.is_empty() || moves.is_empty() {
            return None;
        }

        Some(Migration {
            source,
            stays,
            moves,
        })
    }

    fn apply(clusters: &mut ClusterSet, migration: Migration) -> usize {
        let moved = migration.moves.len();
        clusters
            .cluster_mut(migration.source)
            .replace_observations(migration.stays);
        for (p, destination) in migration.moves {
            clusters.cluster_mut(destination).append(p);
        }
        moved
    }

    /// Runs one migration round over every oversized cluster, then recenters.
    pub fn round(&self, clusters: &mut ClusterSet) -> RoundReport {
        let mut report = RoundReport::default();

        for source in 0..clusters.len() {
            if clusters[source].len() <= self.ideal_size {
                continue;
            }

            match self.plan_migration(clusters, source) {
                Some(migration) => {
                    let moved = Self::apply(clusters, migration);
                    trace!(source, moved, "migrated border points");
                    report.moved += moved;
                    report.migrated.push(source);
                }
                None => {
                    debug!(
                        source,
                        size = clusters[source].len(),
                        "skipping oversized cluster this round"
                    );
                    report.skipped.push(source);
                }
            }
        }

        clusters.recenter_all();
        report
    }

    /// Repeats [`Rebalancer::round`] until the size spread is within tolerance or the round
    /// cap is reached. `observer` is called after every round; its first error aborts.
    pub fn rebalance(
        &self,
        mut clusters: ClusterSet,
        observer: &mut impl Observer,
    ) -> Result<Rebalanced, Error> {
        ensure!(
            clusters.len() == self.k && clusters.total_points() == self.n_points,
            ShapeMismatchSnafu {
                expected_points: self.n_points,
                expected_k: self.k,
                points: clusters.total_points(),
                k: clusters.len(),
            }
        );

        let mut rounds = 0;
        while clusters.summary().spread() > self.tolerance && rounds < self.round_cap {
            rounds += 1;
            let report = self.round(&mut clusters);

            let summary = clusters.summary();
            debug!(
                round = rounds,
                moved = report.moved,
                skipped = report.skipped.len(),
                min = summary.min,
                max = summary.max,
                "rebalance round"
            );

            observer
                .on_rebalance(&clusters, rounds)
                .context(ObserverSnafu {
                    phase: Phase::Rebalance,
                    step: rounds,
                })?;
        }

        let spread = clusters.summary().spread();
        let within_tolerance = spread <= self.tolerance;
        info!(
            rounds,
            spread,
            tolerance = self.tolerance,
            within_tolerance,
            "rebalance finished"
        );

        Ok(Rebalanced {
            clusters,
            rounds,
            within_tolerance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::observer::Recorder;
    use pretty_assertions::assert_eq;

    fn cluster(points: &[(f64, f64)]) -> Cluster {
        Cluster::from_observations(
            Point::default(),
            points.iter().copied().map(Point::from).collect(),
        )
    }

    fn line(xs: impl IntoIterator<Item = i32>) -> Vec<(f64, f64)> {
        xs.into_iter().map(|x| (x as f64, 0.0)).collect()
    }

    /// Index 0: three points around (10, 0), index 1: three around (-30, 0),
    /// index 2: nine points on x = -4..=4. n = 15, k = 3, ideal size 5.
    fn one_heavy_cluster() -> ClusterSet {
        ClusterSet::from_clusters(vec![
            cluster(&[(10.0, -1.0), (10.0, 0.0), (10.0, 1.0)]),
            cluster(&[(-30.0, -1.0), (-30.0, 0.0), (-30.0, 1.0)]),
            cluster(&line(-4..=4)),
        ])
        .unwrap()
    }

    fn xs(points: &[Point]) -> Vec<f64> {
        let mut xs: Vec<f64> = points.iter().map(|p| p.x()).collect();
        xs.sort_by(f64::total_cmp);
        xs
    }

    #[test]
    fn ideal_size_rounds_up() {
        assert_eq!(Rebalancer::new(100, 20).unwrap().ideal_size(), 5);
        assert_eq!(Rebalancer::new(101, 20).unwrap().ideal_size(), 6);
        assert_eq!(Rebalancer::new(21, 20).unwrap().ideal_size(), 2);
        assert_eq!(Rebalancer::new(7, 7).unwrap().ideal_size(), 1);
    }

    #[test]
    fn defaults() {
        let rebalancer = Rebalancer::new(10, 2).unwrap();
        assert_eq!(rebalancer.tolerance(), 10);
        assert_eq!(rebalancer.round_cap(), 10);
        assert_eq!(rebalancer.policy(), MigrationPolicy::NearestAlternative);
    }

    #[test]
    fn rejects_bad_shape() {
        assert!(matches!(
            Rebalancer::new(3, 4),
            Err(Error::TooManyClusters { k: 4, n_points: 3 })
        ));
        assert!(matches!(Rebalancer::new(3, 0), Err(Error::ZeroClusters)));
        assert!(matches!(Rebalancer::new(0, 1), Err(Error::EmptyDataset)));

        let err = Rebalancer::new(16, 3)
            .unwrap()
            .rebalance(one_heavy_cluster(), &mut ())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                expected_points: 16,
                points: 15,
                ..
            }
        ));
        assert!(err.is_configuration());
    }

    #[test]
    fn weakest_points_leave_first() {
        let clusters = one_heavy_cluster();
        let rebalancer = Rebalancer::new(15, 3).unwrap();

        let migration = rebalancer.plan_migration(&clusters, 2).unwrap();
        // diff = (10 - x) - |x|, smallest for the largest x
        let moved: Vec<(f64, usize)> = migration
            .moves
            .iter()
            .map(|(p, r)| (p.x(), *r))
            .collect();
        assert_eq!(moved, vec![(4.0, 0), (3.0, 0), (2.0, 0), (1.0, 0)]);
        assert_eq!(xs(&migration.stays), vec![-4.0, -3.0, -2.0, -1.0, 0.0]);
    }

    #[test]
    fn tied_scores_keep_observation_order() {
        // (1, 1) and (1, -1) mirror each other across the line of centers, so their scores
        // are equal. They sit at ranks 4 and 5 and only four points leave.
        let clusters = ClusterSet::from_clusters(vec![
            cluster(&[(10.0, -1.0), (10.0, 0.0), (10.0, 1.0)]),
            cluster(&[(-30.0, -1.0), (-30.0, 0.0), (-30.0, 1.0)]),
            cluster(&[
                (-4.0, 0.0),
                (-3.0, 0.0),
                (-2.0, 0.0),
                (-1.0, 0.0),
                (1.0, 1.0),
                (2.0, 0.0),
                (1.0, -1.0),
                (3.0, 0.0),
                (4.0, 0.0),
            ]),
        ])
        .unwrap();
        let rebalancer = Rebalancer::new(15, 3).unwrap();

        let migration = rebalancer.plan_migration(&clusters, 2).unwrap();

        let moved: Vec<((f64, f64), usize)> = migration
            .moves
            .iter()
            .map(|(p, r)| ((p.x(), p.y()), *r))
            .collect();
        assert_eq!(
            moved,
            vec![
                ((4.0, 0.0), 0),
                ((3.0, 0.0), 0),
                ((2.0, 0.0), 0),
                ((1.0, 1.0), 0),
            ]
        );
        assert_eq!(migration.stays.len(), 5);
        assert_eq!(migration.stays[0], Point::new(1.0, -1.0));
    }

    #[test]
    fn small_clusters_are_not_planned() {
        let clusters = one_heavy_cluster();
        let rebalancer = Rebalancer::new(15, 3).unwrap();
        assert_eq!(rebalancer.plan_migration(&clusters, 0), None);
        assert_eq!(rebalancer.plan_migration(&clusters, 1), None);
    }

    #[test]
    fn one_round_moves_points_to_target() {
        let mut clusters = one_heavy_cluster();
        let rebalancer = Rebalancer::new(15, 3).unwrap();

        let report = rebalancer.round(&mut clusters);

        assert_eq!(report.moved, 4);
        assert_eq!(report.migrated, vec![2]);
        assert!(report.skipped.is_empty());
        assert_eq!(clusters.sizes(), vec![7, 3, 5]);
        assert_eq!(clusters.total_points(), 15);

        // Centers follow the new memberships
        assert_eq!(clusters[2].center(), Point::new(-2.0, 0.0));
        assert!((clusters[0].center().x() - (30.0 + 10.0) / 7.0).abs() < 1e-9);
    }

    #[test]
    fn single_surplus_point_moves_to_neighbour() {
        // 22 points on a line, 19 singleton clusters and one holding the last three
        let mut clusters: Vec<Cluster> = (0..19).map(|i| cluster(&line([i * 10]))).collect();
        clusters.push(cluster(&line([190, 200, 210])));
        let mut clusters = ClusterSet::from_clusters(clusters).unwrap();

        let rebalancer = Rebalancer::new(22, 20).unwrap();
        assert_eq!(rebalancer.ideal_size(), 2);

        let report = rebalancer.round(&mut clusters);
        assert_eq!(report.moved, 1);
        assert_eq!(clusters[19].len(), 2);
        assert_eq!(clusters[18].len(), 2);
        assert_eq!(xs(clusters[18].observations()), vec![180.0, 190.0]);
        assert_eq!(clusters.total_points(), 22);
    }

    #[test]
    fn larger_target_blocks_migration() {
        let mut clusters = ClusterSet::from_clusters(vec![
            // Six points centered on the origin
            cluster(&[
                (-1.0, 0.0),
                (1.0, 0.0),
                (-1.0, 1.0),
                (1.0, 1.0),
                (-1.0, -1.0),
                (1.0, -1.0),
            ]),
            // Eight points centered on (6, 0)
            cluster(&[
                (5.0, 1.0),
                (5.0, -1.0),
                (7.0, 1.0),
                (7.0, -1.0),
                (5.0, 0.0),
                (7.0, 0.0),
                (6.0, 1.0),
                (6.0, -1.0),
            ]),
            cluster(&[(100.0, 0.0)]),
        ])
        .unwrap();
        let rebalancer = Rebalancer::new(15, 3).unwrap();

        let report = rebalancer.round(&mut clusters);

        // Cluster 0 may not push into the bigger cluster 1, but cluster 1 may push into 0
        assert_eq!(report.skipped, vec![0]);
        assert_eq!(report.migrated, vec![1]);
        assert_eq!(report.moved, 3);
        assert_eq!(clusters.sizes(), vec![9, 5, 1]);
    }

    #[test]
    fn adjacent_policy_wraps_around() {
        // Far group first, so the index neighbour of the heavy cluster is not the nearest one
        let mut clusters = ClusterSet::from_clusters(vec![
            cluster(&[(-30.0, -1.0), (-30.0, 0.0), (-30.0, 1.0)]),
            cluster(&[(10.0, -1.0), (10.0, 0.0), (10.0, 1.0)]),
            cluster(&line(-4..=4)),
        ])
        .unwrap();
        let rebalancer = Rebalancer::new(15, 3)
            .unwrap()
            .with_policy(MigrationPolicy::AdjacentIndex);

        let migration = rebalancer.plan_migration(&clusters, 2).unwrap();
        assert!(migration.moves.iter().all(|&(_, r)| r == 0));

        rebalancer.round(&mut clusters);
        assert_eq!(clusters.sizes(), vec![7, 3, 5]);
    }

    #[test]
    fn nearest_policy_on_same_layout() {
        let mut clusters = ClusterSet::from_clusters(vec![
            cluster(&[(-30.0, -1.0), (-30.0, 0.0), (-30.0, 1.0)]),
            cluster(&[(10.0, -1.0), (10.0, 0.0), (10.0, 1.0)]),
            cluster(&line(-4..=4)),
        ])
        .unwrap();
        Rebalancer::new(15, 3).unwrap().round(&mut clusters);
        assert_eq!(clusters.sizes(), vec![3, 7, 5]);
    }

    #[test]
    fn balanced_input_is_left_alone() {
        let clusters = one_heavy_cluster();
        let mut recorder = Recorder::default();
        // Spread is 6, within the default tolerance of 10
        let result = Rebalancer::new(15, 3)
            .unwrap()
            .rebalance(clusters.clone(), &mut recorder)
            .unwrap();

        assert_eq!(result.rounds, 0);
        assert!(result.within_tolerance);
        assert_eq!(result.clusters, clusters);
        assert!(recorder.rebalance_steps.is_empty());
    }

    #[test]
    fn stops_once_within_tolerance() {
        let mut recorder = Recorder::default();
        let result = Rebalancer::new(15, 3)
            .unwrap()
            .with_tolerance(4)
            .rebalance(one_heavy_cluster(), &mut recorder)
            .unwrap();

        assert_eq!(result.rounds, 1);
        assert!(result.within_tolerance);
        assert_eq!(result.clusters.sizes(), vec![7, 3, 5]);
        assert_eq!(recorder.rebalance_steps, vec![(1, vec![7, 3, 5])]);
    }

    #[test]
    fn round_cap_bounds_the_loop() {
        let mut recorder = Recorder::default();
        let result = Rebalancer::new(15, 3)
            .unwrap()
            .with_tolerance(0)
            .with_round_cap(3)
            .rebalance(one_heavy_cluster(), &mut recorder)
            .unwrap();

        assert!(result.rounds <= 3);
        assert_eq!(recorder.rebalance_steps.len(), result.rounds);
        for (i, (round, sizes)) in recorder.rebalance_steps.iter().enumerate() {
            assert_eq!(*round, i + 1);
            assert_eq!(sizes.iter().sum::<usize>(), 15);
        }
        assert_eq!(result.clusters.total_points(), 15);
    }

    #[test]
    fn observer_failure_aborts() {
        let mut recorder = Recorder {
            fail_rebalance_at: Some(1),
            ..Default::default()
        };
        let err = Rebalancer::new(15, 3)
            .unwrap()
            .with_tolerance(0)
            .rebalance(one_heavy_cluster(), &mut recorder)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Observer {
                phase: Phase::Rebalance,
                step: 1,
                ..
            }
        ));
        assert_eq!(recorder.rebalance_steps.len(), 1);
    }
}
