pub mod aggregate;
pub mod app;
pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod input;
pub mod output;
pub mod query;
pub mod splus;
pub mod store;
pub mod table;
pub mod validate;
