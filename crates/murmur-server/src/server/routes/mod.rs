//! HTTP routes

pub mod websocket;
