pub mod chain;
pub mod decoder;
pub mod pool_reader;
pub mod types;
