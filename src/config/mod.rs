use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub proxy: ProxyConfig,
    /// Path to the YAML tenant registry loaded at startup.
    pub tenants_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    /// Bound on connection establishment plus the liveness ping, in seconds.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Base URL of the shared Grafana instance dashboards are proxied to.
    pub grafana_url: String,
    /// Bound on reaching the upstream. Applies to the connect phase only;
    /// response bodies may stream for as long as the dashboard needs.
    pub connect_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("CORS_ORIGINS") {
            self.server.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("CONNECT_TIMEOUT_SECS") {
            self.database.connect_timeout_secs = v.parse().unwrap_or(self.database.connect_timeout_secs);
        }

        if let Ok(v) = env::var("GRAFANA_URL") {
            self.proxy.grafana_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("PROXY_CONNECT_TIMEOUT_SECS") {
            self.proxy.connect_timeout_secs = v.parse().unwrap_or(self.proxy.connect_timeout_secs);
        }

        if let Ok(v) = env::var("TENANTS_FILE") {
            self.tenants_file = v;
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 3000,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ],
            },
            database: DatabaseConfig {
                max_connections: 10,
                connect_timeout_secs: 10,
            },
            proxy: ProxyConfig {
                grafana_url: "http://localhost:3001".to_string(),
                connect_timeout_secs: 10,
            },
            tenants_file: "tenants.yaml".to_string(),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                port: 3000,
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
            database: DatabaseConfig {
                max_connections: 20,
                connect_timeout_secs: 10,
            },
            proxy: ProxyConfig {
                grafana_url: "http://grafana:3000".to_string(),
                connect_timeout_secs: 10,
            },
            tenants_file: "tenants.yaml".to_string(),
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                port: 3000,
                cors_origins: vec!["https://app.example.com".to_string()],
            },
            database: DatabaseConfig {
                max_connections: 50,
                connect_timeout_secs: 5,
            },
            proxy: ProxyConfig {
                grafana_url: "http://grafana:3000".to_string(),
                connect_timeout_secs: 10,
            },
            tenants_file: "tenants.yaml".to_string(),
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

// Helper macros for common checks
#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}
