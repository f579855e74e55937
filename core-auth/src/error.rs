use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("No stored credential for user {0}")]
    CredentialNotFound(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Token endpoint unavailable after {attempts} attempts: {reason}")]
    TokenEndpointUnavailable { attempts: u32, reason: String },

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("HTTP error: {0}")]
    Http(#[from] bridge_traits::BridgeError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
