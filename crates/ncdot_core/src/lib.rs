pub mod config;
pub mod db;
pub mod describe;
pub mod feed;
pub mod filter;
pub mod ingest;
pub mod schema;
pub mod settings;
pub mod sort;
pub mod store;
pub mod timestamp;
