pub mod cache;
pub mod canonical;
pub mod config;
pub mod export;
pub mod reconcile;
pub mod redirect;
pub mod report;
pub mod runtime;
pub mod sync;
pub mod tags;
pub mod wallabag;
