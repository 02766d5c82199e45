pub mod artifacts;
pub mod generations;
pub mod jobs;
pub mod models;
