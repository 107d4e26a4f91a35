pub mod config;
pub mod normalize;
pub mod schema;
pub mod store;
pub mod types;
