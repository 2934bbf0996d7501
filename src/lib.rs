pub mod cli;
pub mod config;
pub mod diff;
pub mod extractor;
pub mod ingest;
pub mod model;
pub mod query;
pub mod review;
pub mod rpc;
pub mod store;
pub mod util;
