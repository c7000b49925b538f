mod accept;
pub mod app;
pub mod cli;
mod demo;
pub mod error;
mod open;
mod qr;
