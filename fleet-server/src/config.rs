use serde::Deserialize;

use crate::response::ServerResult;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bind_host: String,
    pub bind_port: u16,
}

impl AppConfig {
    pub fn from_env() -> ServerResult<Self> {
        // Keep it simple: read from env; in prod you might use figment/envy.
        let bind_host = std::env::var("FLEET_BIND_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let bind_port = std::env::var("FLEET_BIND_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .map_err(|_| crate::response::ServerError::bad_request("invalid FLEET_BIND_PORT"))?;

        Ok(Self {
            bind_host,
            bind_port,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            bind_port: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_all_interfaces() {
        let config = AppConfig::default();
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.bind_port, 3000);
    }
}
