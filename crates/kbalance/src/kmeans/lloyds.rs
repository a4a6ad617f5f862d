use super::{Kmeans, Termination};
use crate::cluster::ClusterSet;
use crate::observer::{Observer, Phase};
use crate::types::Point;
use crate::{Error, ObserverSnafu};
use rand::Rng;
use rand::seq::IndexedRandom;
use snafu::prelude::*;
use tracing::{debug, trace};

/// Expectation step: every point goes to its nearest center, in dataset order.
///
/// `assignments` holds the previous iteration's cluster per point (`None` before the first
/// iteration). Returns how many points changed cluster.
pub fn assign_points(
    dataset: &[Point],
    clusters: &mut ClusterSet,
    assignments: &mut [Option<usize>],
) -> usize {
    debug_assert_eq!(dataset.len(), assignments.len());

    clusters.reset_all();

    let mut changes = 0;
    for (&p, assignment) in dataset.iter().zip(assignments.iter_mut()) {
        let ci = clusters.nearest(p);
        clusters.cluster_mut(ci).append(p);
        if *assignment != Some(ci) {
            *assignment = Some(ci);
            changes += 1;
        }
    }
    changes
}

/// Gives every empty cluster one point, taken from a cluster that keeps at least one.
///
/// The donor point is drawn uniformly among all points whose cluster can spare one, which
/// always exists while k <= |dataset|. Returns how many clusters were refilled.
pub fn recover_empty_clusters(
    rng: &mut impl Rng,
    dataset: &[Point],
    clusters: &mut ClusterSet,
    assignments: &mut [Option<usize>],
) -> usize {
    let mut sizes = clusters.sizes();
    let mut recovered = 0;

    for ci in 0..sizes.len() {
        if sizes[ci] != 0 {
            continue;
        }

        let candidates: Vec<usize> = assignments
            .iter()
            .enumerate()
            .filter(|(_, owner)| owner.is_some_and(|owner| sizes[owner] > 1))
            .map(|(p, _)| p)
            .collect();

        let Some(&p) = candidates.choose(rng) else {
            debug!(cluster = ci, "no cluster can spare a point, leaving it empty");
            continue;
        };

        if let Some(owner) = assignments[p] {
            sizes[owner] -= 1;
        }
        sizes[ci] += 1;
        assignments[p] = Some(ci);
        recovered += 1;

        debug!(cluster = ci, point = p, "refilled empty cluster");
    }

    if recovered > 0 {
        // Rebuild memberships so the moved points leave their old clusters
        clusters.reset_all();
        for (&p, owner) in dataset.iter().zip(assignments.iter()) {
            if let Some(owner) = *owner {
                clusters.cluster_mut(owner).append(p);
            }
        }
    }

    recovered
}

/// One iteration: assignment, empty-cluster recovery, then recentering.
///
/// Returns the number of changed points, or `|dataset|` when a cluster had to be refilled.
pub fn lloyds_step(
    rng: &mut impl Rng,
    dataset: &[Point],
    clusters: &mut ClusterSet,
    assignments: &mut [Option<usize>],
) -> usize {
    let mut changes = assign_points(dataset, clusters, assignments);

    let recovered = recover_empty_clusters(rng, dataset, clusters, assignments);
    if recovered > 0 {
        // A forced move can undo convergence
        trace!(recovered, "forcing another iteration");
        changes = dataset.len();
    }

    if changes > 0 {
        clusters.recenter_all();
    }
    changes
}

pub struct LloydsLoopResult {
    pub iterations: usize,
    pub termination: Termination,
}

pub fn lloyds_loop(
    rng: &mut impl Rng,
    dataset: &[Point],
    clusters: &mut ClusterSet,
    config: &Kmeans,
    observer: &mut impl Observer,
) -> Result<LloydsLoopResult, Error> {
    let mut assignments = vec![None; dataset.len()];
    let min_changes = config.delta_threshold() * dataset.len() as f64;

    for i in 0..=config.iteration_cap() {
        let changes = lloyds_step(rng, dataset, clusters, &mut assignments);
        debug!(iteration = i, changes, "lloyds iteration");

        observer
            .on_partition(clusters, i)
            .context(ObserverSnafu {
                phase: Phase::Partition,
                step: i,
            })?;

        if (changes as f64) < min_changes {
            return Ok(LloydsLoopResult {
                iterations: i + 1,
                termination: Termination::Converged,
            });
        }
    }

    Ok(LloydsLoopResult {
        iterations: config.iteration_cap().saturating_add(1),
        termination: Termination::IterationLimitReached,
    })
}
