pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod services;
pub mod working_copy;
