//! # Ultrafast Gateway
//!
//! The HTTP shell around `ultrafast-models-sdk`: an axum server exposing
//! chat/responses/embeddings/batch/file endpoints backed by a
//! [`ultrafast_models_sdk::guarded::GuardedProvider`]. Configuration
//! (`config`) selects which provider adapters to register and how the
//! guardrails pipeline is assembled; `server::create_server` wires it all
//! into a `Router`.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [providers.openai]
//! type = "openai_compatible"
//! base_url = "https://api.openai.com/v1"
//! api_key = "your-openai-key"
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use server::create_server;
