pub mod mutation_store;
pub mod query_cache;
pub mod remote_data;
