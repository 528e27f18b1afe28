pub mod byte_cache;
pub mod fetch;
