//! Sugoi Bridge - Offline Japanese to English translation through a local Sugoi server
//!
//! Locates a Sugoi Translator installation, supervises its Python translation
//! server and speaks the server's JSON protocol. Without an installation the
//! bridge talks to a server the user started themselves.

pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod install;
pub mod mode;
pub mod script;
pub mod supervisor;
