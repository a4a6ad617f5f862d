use crate::cluster::ClusterSet;
use std::fmt;
use tracing::info;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which engine was running when an observer was called.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Partition,
    Rebalance,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Partition => f.write_str("partition"),
            Phase::Rebalance => f.write_str("rebalance"),
        }
    }
}

/// Hook called after every Partitioner iteration and every Rebalancer round.
///
/// Returning an error aborts the run that called it. Both methods default to doing nothing,
/// and `()` is the observer that ignores everything.
pub trait Observer {
    fn on_partition(&mut self, _clusters: &ClusterSet, _iteration: usize) -> Result<(), BoxError> {
        Ok(())
    }

    fn on_rebalance(&mut self, _clusters: &ClusterSet, _round: usize) -> Result<(), BoxError> {
        Ok(())
    }
}

impl Observer for () {}

impl<O: Observer + ?Sized> Observer for &mut O {
    fn on_partition(&mut self, clusters: &ClusterSet, iteration: usize) -> Result<(), BoxError> {
        (**self).on_partition(clusters, iteration)
    }

    fn on_rebalance(&mut self, clusters: &ClusterSet, round: usize) -> Result<(), BoxError> {
        (**self).on_rebalance(clusters, round)
    }
}

/// Logs the cluster sizes at every step.
#[derive(Debug, Default, Copy, Clone)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_partition(&mut self, clusters: &ClusterSet, iteration: usize) -> Result<(), BoxError> {
        info!(iteration, sizes = ?clusters.sizes(), "partition step");
        Ok(())
    }

    fn on_rebalance(&mut self, clusters: &ClusterSet, round: usize) -> Result<(), BoxError> {
        let summary = clusters.summary();
        info!(
            round,
            min = summary.min,
            max = summary.max,
            sizes = ?summary.sizes,
            "rebalance step"
        );
        Ok(())
    }
}

/// Test helper: records every call and can be told to fail at a given step.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub partition_steps: Vec<(usize, Vec<usize>)>,
    pub rebalance_steps: Vec<(usize, Vec<usize>)>,
    pub fail_partition_at: Option<usize>,
    pub fail_rebalance_at: Option<usize>,
}

#[cfg(test)]
impl Observer for Recorder {
    fn on_partition(&mut self, clusters: &ClusterSet, iteration: usize) -> Result<(), BoxError> {
        self.partition_steps.push((iteration, clusters.sizes()));
        if self.fail_partition_at == Some(iteration) {
            return Err("plotter out of ink".into());
        }
        Ok(())
    }

    fn on_rebalance(&mut self, clusters: &ClusterSet, round: usize) -> Result<(), BoxError> {
        self.rebalance_steps.push((round, clusters.sizes()));
        if self.fail_rebalance_at == Some(round) {
            return Err("plotter out of ink".into());
        }
        Ok(())
    }
}
