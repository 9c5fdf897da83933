pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod manifest;
pub mod notify;
pub mod pool;
pub mod restore;
pub mod storage;
pub mod sync;
pub mod types;
pub mod util;
