pub mod common;
pub mod concurrency;
pub mod recovery;
pub mod storage;
