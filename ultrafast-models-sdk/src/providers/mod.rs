//! # Provider Adapters
//!
//! Concrete [`crate::provider::Provider`] implementations. Each adapter owns
//! one [`crate::http_client::ResilientClient`] and translates between the
//! gateway's normalized wire shapes (`crate::models`) and its upstream's
//! native request/response format.

pub mod anthropic;
pub mod ollama;
pub mod openai_compatible;
