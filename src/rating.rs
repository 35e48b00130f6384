use crate::config::{ELO_DIVISOR, POWER_MEAN_EXPONENT};
use crate::database::WinningTeam;

/// Aggregate strength of a team.
///
/// This is the power mean `(Σ rᵢᵖ / n)^(1/p)` with `p = 5`, which sits
/// between the arithmetic mean and the maximum: a single very strong
/// player pulls the aggregate up disproportionately, so stacked teams
/// score as stronger than their average suggests.
pub fn power_mean(ratings: &[i32]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let p = POWER_MEAN_EXPONENT;
    let sum: f64 = ratings.iter().map(|r| f64::from(*r).powi(p)).sum();
    (sum / ratings.len() as f64).powf(1.0 / f64::from(p))
}

/// Rank-matched distance between two teams of equal size.
///
/// Both slices must be sorted ascending. The score is the L_q norm of
/// the per-rank rating gaps: pairing each team's weakest against the
/// other's weakest, second-weakest against second-weakest, and so on.
/// Two teams with equal means but a 2000-vs-3000 carry matchup are
/// still an unpleasant game; this term catches that.
pub fn unfairness(sorted_a: &[i32], sorted_b: &[i32], q: i32) -> f64 {
    debug_assert_eq!(sorted_a.len(), sorted_b.len());
    let sum: f64 = sorted_a
        .iter()
        .zip(sorted_b.iter())
        .map(|(a, b)| f64::from((a - b).abs()).powi(q))
        .sum();
    sum.powf(1.0 / f64::from(q))
}

/// Composite score of one partition into two teams; lower is better.
///
/// Both slices must be sorted ascending.
pub fn partition_score(sorted_a: &[i32], sorted_b: &[i32], q: i32) -> f64 {
    (power_mean(sorted_a) - power_mean(sorted_b)).abs() + unfairness(sorted_a, sorted_b, q)
}

/// Probability that a team with aggregate `rating` beats a team with
/// aggregate `opponent`, under the league's Elo curve.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / ELO_DIVISOR))
}

/// Per-player rating adjustments for a finished match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EloShift {
    /// Applied to every radiant player.
    pub radiant: f64,

    /// Applied to every dire player.
    pub dire: f64,
}

impl EloShift {
    /// Compute the per-team rating shift for a decided match.
    ///
    /// `radiant_mean` and `dire_mean` are the teams' power-mean
    /// aggregates at the time the match ended. Every player on a team
    /// receives the same (real-valued) shift; rounding happens when the
    /// shift is applied to an individual rating.
    pub fn decide(radiant_mean: f64, dire_mean: f64, winner: WinningTeam, k: i32) -> EloShift {
        let e_radiant = expected_score(radiant_mean, dire_mean);
        let e_dire = 1.0 - e_radiant;
        let s_radiant = match winner {
            WinningTeam::Radiant => 1.0,
            WinningTeam::Dire => 0.0,
            // Unknown outcomes are finalized without a rating update;
            // callers should not reach this.
            WinningTeam::None => e_radiant,
        };
        let s_dire = 1.0 - s_radiant;
        EloShift {
            radiant: f64::from(k) * (s_radiant - e_radiant),
            dire: f64::from(k) * (s_dire - e_dire),
        }
    }

    /// The new rating of a single player after applying one team's shift.
    pub fn apply(rating: i32, shift: f64) -> i32 {
        (f64::from(rating) + shift).round() as i32
    }
}
