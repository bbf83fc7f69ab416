pub mod fired;
pub mod scheduler;
pub mod token;
