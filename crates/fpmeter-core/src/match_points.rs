use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Point2;

/// One source point paired with its nearest target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NearestMatch {
    /// Index into the target slice.
    pub target: usize,
    /// Euclidean distance to that target, same units as the inputs.
    pub distance: f64,
}

/// For each source point, find the nearest target point.
///
/// Both sets must live in the same coordinate system. Matching is
/// one-directional: several sources may end up on the same target, and no
/// distance gate is applied here. Callers resolve conflicts and reject
/// far matches themselves.
///
/// An empty source set yields an empty result; an empty target set yields
/// `None` for every source.
pub fn match_nearest(
    sources: &[Point2<f64>],
    targets: &[Point2<f64>],
) -> Vec<Option<NearestMatch>> {
    if sources.is_empty() {
        return Vec::new();
    }
    if targets.is_empty() {
        return vec![None; sources.len()];
    }

    let coords = targets.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
    let tree: KdTree<f64, 2> = (&coords).into();

    sources
        .iter()
        .map(|p| {
            let nn = tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y]);
            Some(NearestMatch {
                target: nn.item as usize,
                distance: nn.distance.sqrt(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn points(raw: &[(f64, f64)]) -> Vec<Point2<f64>> {
        raw.iter().map(|&(x, y)| Point2::new(x, y)).collect()
    }

    #[test]
    fn finds_nearest_target() {
        let targets = points(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let sources = points(&[(0.5, 0.2)]);

        let matches = match_nearest(&sources, &targets);
        assert_eq!(matches.len(), 1);
        let m = matches[0].expect("target set is non-empty");
        assert_eq!(m.target, 0);
        assert_relative_eq!(m.distance, (0.5f64 * 0.5 + 0.2 * 0.2).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn several_sources_may_share_a_target() {
        let targets = points(&[(0.0, 0.0), (100.0, 100.0)]);
        let sources = points(&[(1.0, 0.0), (0.0, 1.0)]);

        let matches = match_nearest(&sources, &targets);
        assert_eq!(matches[0].unwrap().target, 0);
        assert_eq!(matches[1].unwrap().target, 0);
    }

    #[test]
    fn empty_inputs_are_not_errors() {
        let targets = points(&[(0.0, 0.0)]);
        assert!(match_nearest(&[], &targets).is_empty());

        let sources = points(&[(1.0, 2.0), (3.0, 4.0)]);
        let matches = match_nearest(&sources, &[]);
        assert_eq!(matches, vec![None, None]);
    }
}
