//! Server configuration
//!
//! Bind address and the static API token guarding the extern-deploy
//! endpoint; everything engine-side lives in `drydock_engine::EngineConfig`.

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Static token required in `x-api-key` for extern deploys; when unset,
    /// the endpoint is disabled
    pub api_token: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("DRYDOCK_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            api_token: std::env::var("DRYDOCK_API_TOKEN").ok(),
        }
    }
}
