// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Consent token signing and verification.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::config::ConsentKey;
use crate::error::{AppError, Result};
use crate::models::ConsentClaims;

/// Signs consent claims as JWTs and verifies them again.
#[derive(Clone)]
pub struct ConsentSigner {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl ConsentSigner {
    /// Build a signer from configured key material.
    ///
    /// Fails if a PEM key cannot be parsed.
    pub fn new(key: &ConsentKey) -> anyhow::Result<Self> {
        let signer = match key {
            ConsentKey::Secret(secret) => Self {
                algorithm: Algorithm::HS256,
                encoding: EncodingKey::from_secret(secret),
                decoding: DecodingKey::from_secret(secret),
            },
            ConsentKey::RsaPem {
                private_pem,
                public_pem,
            } => Self {
                algorithm: Algorithm::RS256,
                encoding: EncodingKey::from_rsa_pem(private_pem)?,
                decoding: DecodingKey::from_rsa_pem(public_pem)?,
            },
        };
        Ok(signer)
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn sign(&self, claims: &ConsentClaims) -> Result<String> {
        encode(&Header::new(self.algorithm), claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("consent token signing: {}", e)))
    }

    /// Check signature and expiry. No clock leeway is allowed.
    pub fn verify(&self, token: &str) -> Result<ConsentClaims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        decode::<ConsentClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Consent token rejected");
                AppError::InvalidToken
            })
    }
}
