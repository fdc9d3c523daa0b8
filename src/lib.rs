pub mod backup;
pub mod catalog;
pub mod classify;
pub mod compare;
pub mod config;
pub mod fetch;
pub mod generations;
pub mod identity;
pub mod progress;
pub mod sync;
pub mod worker;
