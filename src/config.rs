// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Signing keys are read once at startup and kept in memory.

use std::env;
use std::str::FromStr;

/// Which `IdentityStore` implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Firestore,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "firestore" => Ok(StoreBackend::Firestore),
            _ => Err(ConfigError::Invalid("STORE_BACKEND")),
        }
    }
}

/// Key material for signing consent tokens.
#[derive(Clone)]
pub enum ConsentKey {
    /// Shared HMAC secret (HS256).
    Secret(Vec<u8>),
    /// RSA key pair in PEM form (RS256), verifiable with the public half.
    RsaPem { private_pem: Vec<u8>, public_pem: Vec<u8> },
}

impl std::fmt::Debug for ConsentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsentKey::Secret(_) => f.write_str("ConsentKey::Secret(..)"),
            ConsentKey::RsaPem { .. } => f.write_str("ConsentKey::RsaPem(..)"),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID (Firestore backend)
    pub gcp_project_id: String,
    /// Storage backend
    pub store_backend: StoreBackend,
    /// Server port
    pub port: u16,
    /// Node bits embedded in generated ids; random when unset
    pub id_node: Option<u8>,

    // --- Secrets ---
    /// JWT signing key for session tokens (raw bytes)
    pub session_signing_key: Vec<u8>,
    /// Consent token signing key
    pub consent_key: ConsentKey,
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            store_backend: StoreBackend::Memory,
            port: 8080,
            id_node: None,
            session_signing_key: b"test_session_key_32_bytes_min!!!".to_vec(),
            consent_key: ConsentKey::Secret(b"test_consent_key_32_bytes_min!!!".to_vec()),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honoured for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let store_backend = match env::var("STORE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => StoreBackend::Memory,
        };

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            store_backend,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT"))?,
            id_node: match env::var("ID_NODE") {
                Ok(value) => Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ConfigError::Invalid("ID_NODE"))?,
                ),
                Err(_) => None,
            },
            session_signing_key: env::var("SESSION_SIGNING_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SESSION_SIGNING_KEY"))?
                .into_bytes(),
            consent_key: consent_key_from_env()?,
        })
    }
}

/// RS256 wins when both PEM variables are present; otherwise fall back to
/// the HS256 secret.
fn consent_key_from_env() -> Result<ConsentKey, ConfigError> {
    match (
        env::var("CONSENT_PRIVATE_KEY_PEM"),
        env::var("CONSENT_PUBLIC_KEY_PEM"),
    ) {
        (Ok(private_pem), Ok(public_pem)) => Ok(ConsentKey::RsaPem {
            private_pem: private_pem.into_bytes(),
            public_pem: public_pem.into_bytes(),
        }),
        (Ok(_), Err(_)) => Err(ConfigError::Missing("CONSENT_PUBLIC_KEY_PEM")),
        (Err(_), Ok(_)) => Err(ConfigError::Missing("CONSENT_PRIVATE_KEY_PEM")),
        (Err(_), Err(_)) => env::var("CONSENT_SIGNING_KEY")
            .map(|v| ConsentKey::Secret(v.trim().as_bytes().to_vec()))
            .map_err(|_| ConfigError::Missing("CONSENT_SIGNING_KEY")),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("SESSION_SIGNING_KEY", "test_session_key_32_bytes_min!!!");
        env::set_var("CONSENT_SIGNING_KEY", "test_consent");
        env::remove_var("CONSENT_PRIVATE_KEY_PEM");
        env::remove_var("CONSENT_PUBLIC_KEY_PEM");
        env::remove_var("STORE_BACKEND");
        env::remove_var("PORT");
        env::set_var("ID_NODE", "7");

        let config = Config::from_env().expect("Config should load");
        env::remove_var("ID_NODE");

        assert_eq!(config.session_signing_key, b"test_session_key_32_bytes_min!!!");
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.port, 8080);
        assert_eq!(config.id_node, Some(7));
        assert!(matches!(config.consent_key, ConsentKey::Secret(ref k) if k == b"test_consent"));
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(" Firestore ".parse::<StoreBackend>().unwrap(), StoreBackend::Firestore);
        assert!("postgres".parse::<StoreBackend>().is_err());
    }
}
