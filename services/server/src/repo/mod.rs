//! Repository layer: raw SQL over the shared pool.

pub mod answers;
pub mod questions;
pub mod quizzes;
pub mod results;

/// Maps an invalid stored value to a decode error.
pub(crate) fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}
