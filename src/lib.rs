pub mod assemble;
pub mod chapters;
pub mod config;
pub mod constants;
pub mod db;
pub mod email;
pub mod llm;
pub mod model;
pub mod payment;
pub mod pipeline;
pub mod scrape;
pub mod server;
