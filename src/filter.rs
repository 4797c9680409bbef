use crate::types::PixelPosition;

/// Accept a move only when the marker has shifted by more than `min_delta`
/// on both axes relative to the last position a move was issued for.
///
/// The comparison is strict: a shift of exactly `min_delta` is rejected.
pub fn should_move(current: PixelPosition, last_acted: PixelPosition, min_delta: f64) -> bool {
    (current.row - last_acted.row).abs() > min_delta
        && (current.col - last_acted.col).abs() > min_delta
}

#[derive(Debug, Clone)]
pub struct EvaluationCadence {
    stride: u64,
    observed: u64,
}

impl EvaluationCadence {
    pub fn new(stride: u64) -> Self {
        EvaluationCadence {
            stride: stride.max(1),
            observed: 0,
        }
    }

    pub fn observe(&mut self) -> bool {
        self.observed = self.observed.wrapping_add(1);
        self.observed % self.stride == 0
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(row: f64, col: f64) -> PixelPosition {
        PixelPosition::new(row, col)
    }

    #[test]
    fn requires_both_axes() {
        assert!(should_move(pos(60., 60.), PixelPosition::ORIGIN, 5.));
        assert!(!should_move(pos(60., 2.), PixelPosition::ORIGIN, 5.));
        assert!(!should_move(pos(2., 60.), PixelPosition::ORIGIN, 5.));
        assert!(should_move(pos(-10., -10.), PixelPosition::ORIGIN, 5.));
    }

    #[test]
    fn threshold_is_strict() {
        assert!(!should_move(pos(5., 5.), PixelPosition::ORIGIN, 5.));
        assert!(!should_move(pos(5., 50.), PixelPosition::ORIGIN, 5.));
        assert!(!should_move(pos(50., 5.), PixelPosition::ORIGIN, 5.));
        assert!(should_move(pos(5.5, 5.5), PixelPosition::ORIGIN, 5.));
    }

    #[test]
    fn matches_definition_over_grid() {
        let last = pos(20., 30.);
        for row in 0..50 {
            for col in 0..50 {
                let current = pos(row as f64, col as f64);
                let expected = (current.row - last.row).abs() > 5.
                    && (current.col - last.col).abs() > 5.;
                assert_eq!(should_move(current, last, 5.), expected, "{:?}", current);
            }
        }
    }

    #[test]
    fn cadence_fires_every_stride() {
        let mut cadence = EvaluationCadence::new(3);
        let fired: Vec<bool> = (0..9).map(|_| cadence.observe()).collect();

        assert_eq!(
            fired,
            vec![false, false, true, false, false, true, false, false, true]
        );
        assert_eq!(cadence.observed(), 9);
    }

    #[test]
    fn stride_one_fires_always() {
        let mut cadence = EvaluationCadence::new(1);
        assert!((0..5).all(|_| cadence.observe()));

        let mut cadence = EvaluationCadence::new(0);
        assert_eq!(cadence.stride(), 1);
        assert!(cadence.observe());
    }
}
