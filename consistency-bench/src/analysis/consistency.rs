//! Agreement scores over groups of answers

use crate::problems::AnswerValue;

/// Size of the largest agreeing cluster divided by the number of cells
///
/// `None` cells (missing, ambiguous or unextracted answers) never match
/// anything, so they only count toward the denominator. A value joins the
/// first cluster whose founding member it matches within `tolerance`.
pub fn cluster_score(cells: &[Option<&AnswerValue>], tolerance: f64) -> f64 {
    if cells.is_empty() {
        return 0.0;
    }

    let mut clusters: Vec<(&AnswerValue, usize)> = Vec::new();
    for value in cells.iter().flatten().copied() {
        match clusters
            .iter_mut()
            .find(|(founder, _)| founder.matches(value, tolerance))
        {
            Some((_, size)) => *size += 1,
            None => clusters.push((value, 1)),
        }
    }

    // every present-but-unmatched cell is a cluster of one
    let largest = clusters
        .iter()
        .map(|(_, size)| *size)
        .max()
        .unwrap_or(0)
        .max(1);
    largest as f64 / cells.len() as f64
}

/// Mean of a slice, 0.0 when empty
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: f64) -> AnswerValue {
        AnswerValue::Number(v)
    }

    #[test]
    fn test_three_way_scores() {
        let (a, b, c) = (n(801.0), n(801.0), n(810.0));
        assert_eq!(cluster_score(&[Some(&a), Some(&a), Some(&a)], 0.01), 1.0);
        assert!((cluster_score(&[Some(&a), Some(&b), Some(&c)], 0.01) - 2.0 / 3.0).abs() < 1e-12);
        let d = n(1.0);
        assert!((cluster_score(&[Some(&a), Some(&c), Some(&d)], 0.01) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_cells_never_match() {
        let a = n(5.0);
        assert!((cluster_score(&[Some(&a), None, None], 0.01) - 1.0 / 3.0).abs() < 1e-12);
        assert!((cluster_score(&[None, None, None], 0.01) - 1.0 / 3.0).abs() < 1e-12);
        assert!((cluster_score(&[Some(&a), Some(&a), None], 0.01) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_tolerance_and_sequences() {
        let (a, b) = (n(100.0), n(100.005));
        assert_eq!(cluster_score(&[Some(&a), Some(&b)], 0.01), 1.0);

        let up = AnswerValue::Sequence(vec!["A".into(), "B".into()]);
        let down = AnswerValue::Sequence(vec!["B".into(), "A".into()]);
        assert_eq!(cluster_score(&[Some(&up), Some(&down)], 0.01), 0.5);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 0.5]), 0.75);
    }
}
