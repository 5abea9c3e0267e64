pub mod assignments;
pub mod core;
pub mod courses;
pub mod enrollment;
pub mod grading;
pub mod quizzes;
pub mod reports;
pub mod submissions;
pub mod users;
