pub mod batch;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod invalidate;
pub mod model;
pub mod order;
pub mod push;
pub mod relations;
pub mod scope;
pub mod sync;
