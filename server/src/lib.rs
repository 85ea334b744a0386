pub mod cli;
pub mod config;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_support;
