pub mod credential;
pub mod job;
pub mod message;
pub mod session;
