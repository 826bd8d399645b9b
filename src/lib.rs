pub mod bindings;
pub mod config;
pub mod db;
pub mod indexer;
pub mod oracle;
pub mod processor;
