pub mod assessment;
pub mod auth;
pub mod bank;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod gating;
pub mod models;
pub mod progress;
pub mod routes;
pub mod state;
pub mod store;
