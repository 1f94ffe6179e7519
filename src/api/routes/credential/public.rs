//! Public types for the credential API
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CredentialRequest {
    pub api_key: String,
}
