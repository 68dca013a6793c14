pub extern crate actix_web;

pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod session;
