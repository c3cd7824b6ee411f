pub mod agent;
pub mod file;
pub mod item;
pub mod job;
pub mod verdict;
