use crate::types::Point;

/// Expands weighted records into a flat point sequence: each record contributes `weight`
/// copies of its point, in record order. A zero weight contributes nothing.
///
/// ```
/// use kbalance::{dataset::expand_weighted, Point};
///
/// let points = expand_weighted([(Point::new(1.0, 2.0), 2), (Point::new(3.0, 4.0), 1)]);
/// assert_eq!(points, vec![Point::new(1.0, 2.0), Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
/// ```
pub fn expand_weighted(records: impl IntoIterator<Item = (Point, u32)>) -> Vec<Point> {
    records
        .into_iter()
        .flat_map(|(p, weight)| std::iter::repeat_n(p, weight as usize))
        .collect()
}
