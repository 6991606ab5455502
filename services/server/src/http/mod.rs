pub mod quizzes;
pub mod response;
pub mod tickets;
