pub mod alert;
pub mod analyzer;
pub mod api;
pub mod classifier;
pub mod config;
pub mod consumer;
pub mod db;
pub mod detector;
pub mod error;
pub mod filter;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod pool;
pub mod publisher;
pub mod queue;
pub mod rpc;
pub mod shutdown;
pub mod subscription;
pub mod watchlist;
