//! ペアワイズ品質判定から導くEloレーティング更新。

/// レーティングの初期値。
pub(crate) const INITIAL_RATING: f64 = 1000.0;

/// 基本Kファクタ。実効ステップは判定の確信度で重み付けされる。
pub(crate) const BASE_K: f64 = 32.0;

/// ロジスティック曲線のスケール。
const SCALE: f64 = 400.0;

/// 一試合分のレーティング変化。
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RatingDelta {
    pub(crate) change_a: f64,
    pub(crate) change_b: f64,
}

/// Aの期待勝率を計算する。
#[must_use]
pub(crate) fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10_f64.powf((rating_b - rating_a) / SCALE))
}

/// 試合結果を受けてレーティング変化を計算する。
///
/// `a_won` が真ならAの実スコアは1、偽なら0。確信度は [0,1] にクランプされ、
/// 実効ステップ `K = BASE_K * confidence` に反映される。
#[must_use]
pub(crate) fn rating_delta(
    rating_a: f64,
    rating_b: f64,
    a_won: bool,
    confidence: f64,
) -> RatingDelta {
    let confidence = confidence.clamp(0.0, 1.0);
    let k = BASE_K * confidence;

    let expected_a = expected_score(rating_a, rating_b);
    let expected_b = 1.0 - expected_a;

    let score_a = if a_won { 1.0 } else { 0.0 };
    let score_b = 1.0 - score_a;

    RatingDelta {
        change_a: k * (score_a - expected_a),
        change_b: k * (score_b - expected_b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_score_is_half_for_equal_ratings() {
        let e = expected_score(1000.0, 1000.0);
        assert!((e - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn expected_score_favors_higher_rating() {
        assert!(expected_score(1400.0, 1000.0) > 0.9);
        assert!(expected_score(1000.0, 1400.0) < 0.1);
    }

    #[test]
    fn equal_ratings_full_confidence_moves_sixteen_points() {
        let delta = rating_delta(1000.0, 1000.0, true, 1.0);
        assert!((delta.change_a - 16.0).abs() < 1e-9);
        assert!((delta.change_b + 16.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_scales_the_step() {
        let full = rating_delta(1000.0, 1000.0, true, 1.0);
        let half = rating_delta(1000.0, 1000.0, true, 0.5);
        assert!((half.change_a - full.change_a / 2.0).abs() < 1e-9);
    }

    #[test]
    fn deltas_are_zero_sum() {
        let delta = rating_delta(1234.0, 987.0, false, 0.8);
        assert!((delta.change_a + delta.change_b).abs() < 1e-9);
    }

    #[test]
    fn upset_moves_more_than_expected_win() {
        // 格下が勝った場合の変化量は、格上が勝った場合より大きい
        let upset = rating_delta(1000.0, 1400.0, true, 1.0);
        let expected_win = rating_delta(1400.0, 1000.0, true, 1.0);
        assert!(upset.change_a > expected_win.change_a);
    }

    #[test]
    fn confidence_is_clamped() {
        let delta = rating_delta(1000.0, 1000.0, true, 1.7);
        assert!((delta.change_a - 16.0).abs() < 1e-9);

        let delta = rating_delta(1000.0, 1000.0, true, -0.3);
        assert!(delta.change_a.abs() < f64::EPSILON);
    }
}
