pub mod cli;
pub mod config;
pub mod events;
pub mod handlers;
pub mod lifecycle;
pub mod process;
pub mod proxy;
pub mod registrar;
pub mod relay;
pub mod state;
pub mod websocket;
