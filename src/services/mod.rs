pub mod augment;
pub mod decision;
pub mod detector;
pub mod joblog;
pub mod prefilter;
pub mod processor;
pub mod queue;
pub mod settings;
pub mod storage;
pub mod store;
pub mod tiling;
pub mod vision;
