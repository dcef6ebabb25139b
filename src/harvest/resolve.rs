//! Nearest-value lookup on wavelength and m/z axes.

/// Index of the value closest to `target`.
///
/// Ties resolve to the left-most candidate: a later value only wins when
/// its distance is strictly smaller. NaN entries never win. Returns `None`
/// for an empty axis.
pub fn nearest(values: &[f64], target: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, value) in values.iter().enumerate() {
        let diff = (value - target).abs();
        if diff.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, best_diff)| diff < best_diff) {
            best = Some((i, diff));
        }
    }
    best.map(|(i, _)| i)
        .or_else(|| (!values.is_empty()).then_some(0))
}
