//! Synthetic users and their signed bearer tokens.
//!
//! The server under test trusts any HS256 token signed with the environment's
//! key, so each run mints fresh users instead of logging in.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthErrorKind, Error, ErrorKind};

const ID_PREFIX: &str = "user-conspector";

/// Claims carried by a synthetic user's token.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub super_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

/// An authenticated caller: the user id the server will see and its token.
#[derive(Debug)]
pub struct Principal {
    pub id: String,
    token: SecretString,
}

impl Principal {
    pub fn new(id: String, token: SecretString) -> Self {
        Self { id, token }
    }

    /// Mints a new user with a unique id and a token valid for `ttl`.
    pub fn provision(signing_key: &str, ttl: Duration) -> Result<Self, Error> {
        if signing_key.is_empty() {
            return Err(Error::new(
                ErrorKind::Auth(AuthErrorKind::MissingSigningKey),
                "a JWT signing key is required to provision users",
            ));
        }

        let now = Utc::now();
        // The timestamp keeps ids sortable by creation, the suffix keeps them unique
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!(
            "{ID_PREFIX}-{}-{}",
            now.format("%Y%m%d%H%M%S%6f"),
            &suffix[..8]
        );

        let claims = Claims {
            id: id.clone(),
            super_admin: true,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(signing_key.as_bytes()),
        )?;

        Ok(Self {
            id,
            token: SecretString::new(token),
        })
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Value of the `Authorization` header for this principal.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    /// The header template with this principal's `Authorization` filled in.
    pub fn authorized_headers(&self, template: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut headers = template.clone();
        headers.insert("Authorization".to_string(), self.authorization());
        headers
    }
}
