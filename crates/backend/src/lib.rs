//! Backend - API gateway for the realtime dataset agent
//!
//! Provides the [`BackendGateway`] interface the coordinator depends on,
//! the shared [`AuthState`] token holder and a reqwest-based HTTP client.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agent_core::config::BackendConfig;
//! use backend::{AuthState, BackendGateway, HttpBackend};
//!
//! # async fn example() -> agent_core::Result<()> {
//! let mut config = BackendConfig::default();
//! config.host = "api.example.com".to_string();
//! let auth = Arc::new(AuthState::new("device-jwt"));
//! let backend = HttpBackend::new(&config, auth)?;
//! let record = backend.get_device_realtime_datasets("device-1").await?;
//! println!("{} realtime datasets", record.realtime_datasets.len());
//! # Ok(())
//! # }
//! ```

mod auth;
mod gateway;
mod http;

pub use auth::{AuthSnapshot, AuthState, AuthStateHandle};
pub use gateway::{BackendGateway, BackendGatewayHandle};
pub use http::HttpBackend;
