use clap::Parser;
use image::{Rgb, RgbImage};
use kbalance::dataset::expand_weighted;
use kbalance::{
    BoxError, ClusterSet, Config, DEFAULT_BALANCE_ROUND_CAP, DEFAULT_BALANCE_TOLERANCE,
    DEFAULT_DELTA_THRESHOLD, DEFAULT_ITERATION_CAP, MigrationPolicy, Observer, Point, rng,
};
use rand::Rng;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const FRAME_SIZE: u32 = 600;
const MARGIN: f64 = 20.0;

const PALETTE: [[u8; 3]; 10] = [
    [230, 25, 75],
    [60, 180, 75],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
    [170, 110, 40],
    [128, 128, 0],
    [0, 0, 128],
];

#[derive(Parser)]
struct Args {
    /// Folder to write one PNG per iteration/round into
    out: PathBuf,

    #[arg(short, long, default_value_t = 20)]
    k: usize,

    /// Number of weighted records to generate
    #[arg(long, default_value_t = 400)]
    records: usize,

    #[arg(long, default_value_t = 20)]
    seed: u64,

    #[arg(long, default_value_t = DEFAULT_DELTA_THRESHOLD)]
    delta_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_ITERATION_CAP)]
    iteration_cap: usize,

    #[arg(long, default_value_t = DEFAULT_BALANCE_TOLERANCE)]
    tolerance: usize,

    #[arg(long, default_value_t = DEFAULT_BALANCE_ROUND_CAP)]
    round_cap: usize,

    /// Send migrated points to the next cluster by index instead of the nearest one
    #[arg(long)]
    adjacent: bool,
}

/// Uneven blobs of weighted records, like trip counts per location.
fn generate_records(n: usize, seed: u64) -> Vec<(Point, u32)> {
    let mut rng = rng::from_seed(seed);
    let blobs = [(20.0, 20.0, 8.0), (70.0, 30.0, 15.0), (45.0, 75.0, 5.0)];

    (0..n)
        .map(|i| {
            let (cx, cy, spread) = blobs[i % blobs.len()];
            let x = cx + (rng.random::<f64>() - 0.5) * 2.0 * spread;
            let y = cy + (rng.random::<f64>() - 0.5) * 2.0 * spread;
            // Dense blobs get heavier records
            let weight = rng.random_range(1..=(20.0 / spread).ceil() as u32 + 1);
            (Point::new(x, y), weight)
        })
        .collect()
}

struct FramePlotter {
    dir: PathBuf,
    min: Point,
    scale: f64,
}

impl FramePlotter {
    fn new(dir: PathBuf, points: &[Point]) -> Self {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min_x = min_x.min(p.x());
            min_y = min_y.min(p.y());
            max_x = max_x.max(p.x());
            max_y = max_y.max(p.y());
        }
        let extent = f64::max(max_x - min_x, max_y - min_y).max(f64::EPSILON);
        let scale = (FRAME_SIZE as f64 - 2.0 * MARGIN) / extent;

        Self {
            dir,
            min: Point::new(min_x, min_y),
            scale,
        }
    }

    fn to_pixel(&self, p: Point) -> (u32, u32) {
        let x = MARGIN + (p.x() - self.min.x()) * self.scale;
        // Image rows grow downwards
        let y = FRAME_SIZE as f64 - MARGIN - (p.y() - self.min.y()) * self.scale;
        let clamp = |v: f64| v.clamp(0.0, (FRAME_SIZE - 1) as f64) as u32;
        (clamp(x), clamp(y))
    }

    fn save(&self, clusters: &ClusterSet, name: String) -> Result<(), BoxError> {
        let mut out = RgbImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Rgb([255, 255, 255]));

        for (i, cluster) in clusters.iter().enumerate() {
            let color = Rgb(PALETTE[i % PALETTE.len()]);
            for &p in cluster.observations() {
                let (x, y) = self.to_pixel(p);
                out.put_pixel(x, y, color);
            }
        }

        // Centers as small black crosses
        for cluster in clusters {
            let (cx, cy) = self.to_pixel(cluster.center());
            for d in -3i64..=3 {
                let x = (cx as i64 + d).clamp(0, FRAME_SIZE as i64 - 1) as u32;
                let y = (cy as i64 + d).clamp(0, FRAME_SIZE as i64 - 1) as u32;
                out.put_pixel(x, cy, Rgb([0, 0, 0]));
                out.put_pixel(cx, y, Rgb([0, 0, 0]));
            }
        }

        out.save(self.dir.join(name))?;
        Ok(())
    }
}

impl Observer for FramePlotter {
    fn on_partition(&mut self, clusters: &ClusterSet, iteration: usize) -> Result<(), BoxError> {
        self.save(clusters, format!("partition_{iteration:03}.png"))
    }

    fn on_rebalance(&mut self, clusters: &ClusterSet, round: usize) -> Result<(), BoxError> {
        self.save(clusters, format!("rebalance_{round:03}.png"))
    }
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.out)?;

    let points = expand_weighted(generate_records(args.records, args.seed));
    println!("{} data points from {} records", points.len(), args.records);

    let policy = if args.adjacent {
        MigrationPolicy::AdjacentIndex
    } else {
        MigrationPolicy::NearestAlternative
    };
    let config = Config::new(args.k)
        .with_random_seed(args.seed)
        .with_delta_threshold(args.delta_threshold)
        .with_iteration_cap(args.iteration_cap)
        .with_balance_tolerance(args.tolerance)
        .with_balance_round_cap(args.round_cap)
        .with_migration_policy(policy);

    let mut plotter = FramePlotter::new(args.out.clone(), &points);

    let t = Instant::now();
    let output = kbalance::balanced_partition(&points, &config, &mut plotter)?;
    let elapsed = t.elapsed();

    for (i, cluster) in output.clusters.iter().enumerate() {
        println!(
            "cluster {i}: centered at x: {:.2} y: {:.2}, {} points",
            cluster.center().x(),
            cluster.center().y(),
            cluster.len(),
        );
    }
    println!(
        "k-means: {} iterations ({:?}), sizes {}..{}",
        output.partition_iterations,
        output.termination,
        output.partition_summary.min,
        output.partition_summary.max,
    );
    println!(
        "rebalance: {} rounds, sizes {}..{} (spread {}, within tolerance: {})",
        output.rebalance_rounds,
        output.summary.min,
        output.summary.max,
        output.summary.spread(),
        output.within_tolerance,
    );
    println!("total {} points, {:?}", output.summary.total, elapsed);

    Ok(())
}
