//! Final ranking and prize allocation.
//!
//! Runs once per quiz at completion over the aggregated standings.  Ranks
//! use shared-position semantics: rows with an equal (score, correct)
//! tuple share the rank of the first row of their class, and the next
//! distinct tuple takes its 1-based position.

/// One user's aggregated totals going into the ranking pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub user_id: i64,
    pub score: i64,
    pub correct_answers: i32,
    pub is_eliminated: bool,
}

/// A standing with rank, winner flag and prize share assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedStanding {
    pub user_id: i64,
    pub score: i64,
    pub correct_answers: i32,
    pub is_eliminated: bool,
    pub rank: i32,
    pub is_winner: bool,
    pub prize_fund: i64,
}

/// Sorts, ranks and allocates the prize fund.
///
/// Winners are non-eliminated users whose correct-answer count equals the
/// quiz's question count; each receives `total_prize_fund / winners`
/// rounded down, the remainder is burned.
#[must_use]
pub fn rank_standings(
    mut standings: Vec<Standing>,
    total_questions: i32,
    total_prize_fund: i64,
) -> Vec<RankedStanding> {
    standings.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.correct_answers.cmp(&a.correct_answers))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let winner_count = standings
        .iter()
        .filter(|s| !s.is_eliminated && s.correct_answers == total_questions)
        .count() as i64;
    let prize_per_winner = if winner_count > 0 {
        total_prize_fund / winner_count
    } else {
        0
    };

    let mut ranked = Vec::with_capacity(standings.len());
    let mut prev_key: Option<(i64, i32)> = None;
    let mut prev_rank = 0i32;

    for (idx, s) in standings.into_iter().enumerate() {
        let key = (s.score, s.correct_answers);
        let rank = match prev_key {
            Some(prev) if prev == key => prev_rank,
            _ => i32::try_from(idx).unwrap_or(i32::MAX - 1) + 1,
        };
        prev_key = Some(key);
        prev_rank = rank;

        let is_winner = !s.is_eliminated && s.correct_answers == total_questions;
        ranked.push(RankedStanding {
            user_id: s.user_id,
            score: s.score,
            correct_answers: s.correct_answers,
            is_eliminated: s.is_eliminated,
            rank,
            is_winner,
            prize_fund: if is_winner { prize_per_winner } else { 0 },
        });
    }

    ranked
}
