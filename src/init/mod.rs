pub mod args;
pub mod consumer;
pub mod wait;
