pub mod agent;
pub mod chat_backend;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod event;
pub mod memory;
pub mod moderator;
pub mod reasoning;
pub mod similarity;
pub mod simulation;
pub mod tool_protocol;
