pub mod client;
pub mod domain;

pub use client::InverterClient;
