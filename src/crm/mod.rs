pub mod auth;
pub mod client;
pub mod db;
pub mod error;
pub mod sync;
pub mod types;
