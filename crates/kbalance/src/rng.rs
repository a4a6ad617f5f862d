use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Generator for a single run. Seeding and empty-cluster recovery both draw from it,
/// so a run is fully determined by its seed.
pub fn from_seed(seed: u64) -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(seed)
}
