pub mod auth;
pub mod error;
pub mod gate;
pub mod routes;
pub mod server;
pub mod state;
pub mod upload;
