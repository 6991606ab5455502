// quiz-core: domain models and the pure scoring / ranking logic.
//
// Nothing in this crate does I/O.  The server service feeds it repository
// rows and cache lookups; this crate owns the rules.

pub mod models;
pub mod ranking;
pub mod scoring;

pub use models::{Question, Quiz, QuizResult, QuizStatus, UserAnswer};
pub use ranking::{rank_standings, RankedStanding, Standing};
pub use scoring::{evaluate_answer, AnswerOutcome};
