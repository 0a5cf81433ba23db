//! Andromeda core library: Messenger webhook gateway, Gemini completion client, and the
//! event router that joins them.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod llm;
pub mod routing;
