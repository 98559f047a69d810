// Domain error types - Secure error handling with no information disclosure

use thiserror::Error;

/// Main error type for the identity engine
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Malformed input from the caller
    #[error("Validation error: {0}")]
    Validation(String),

    /// Absent user, ticket, or session
    #[error("{0} not found")]
    NotFound(String),

    /// Unknown user, wrong password, or inactive account. Never differentiated.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Token or session could not be resolved
    #[error("Unauthorized")]
    Unauthorized,

    /// Token signature, algorithm, issuer, or expiry failure
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// Session lacks one or more required rights
    #[error("Forbidden: missing rights {missing:?}")]
    Forbidden { missing: Vec<String> },

    /// Store-level uniqueness constraint rejected a write
    #[error("Constraint violation on {0}")]
    ConstraintViolation(ConstraintField),

    /// Transport or connection failure against Postgres or Redis
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Live store structure does not match any supported descriptor
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Password hashing failure (bad cost, corrupt stored hash)
    #[error("Password hash error: {0}")]
    PasswordHash(String),
}

/// Field whose uniqueness constraint was violated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintField {
    Username,
    Email,
    Other,
}

impl std::fmt::Display for ConstraintField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintField::Username => write!(f, "username"),
            ConstraintField::Email => write!(f, "email"),
            ConstraintField::Other => write!(f, "unknown constraint"),
        }
    }
}

impl IdentityError {
    /// Get user-friendly error message (no sensitive information)
    ///
    /// All token and session failures collapse into the same message so a caller
    /// cannot tell a forged token from an expired session.
    pub fn user_message(&self) -> String {
        match self {
            IdentityError::Validation(reason) => format!("Invalid request: {}", reason),
            IdentityError::NotFound(what) => format!("{} not found", what),
            IdentityError::AuthenticationFailed => "Authentication failed".to_string(),
            IdentityError::Unauthorized => "Unauthorized".to_string(),
            IdentityError::TokenInvalid(_) => "Unauthorized".to_string(),
            IdentityError::Forbidden { .. } => "Forbidden".to_string(),
            IdentityError::ConstraintViolation(field) => format!("Duplicate {}", field),
            IdentityError::BackendUnavailable(_) => "Service unavailable".to_string(),
            IdentityError::SchemaMismatch(_) => "Internal error".to_string(),
            IdentityError::Configuration(_) => "Internal error".to_string(),
            IdentityError::PasswordHash(_) => "Internal error".to_string(),
        }
    }

    /// True for failures a caller may resolve by retrying the whole request
    pub fn is_transient(&self) -> bool {
        matches!(self, IdentityError::BackendUnavailable(_))
    }
}

/// Map a Postgres error onto the domain taxonomy
///
/// Unique violations (SQLSTATE 23505) become `ConstraintViolation` naming the
/// column that collided; everything else is a backend failure.
impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => IdentityError::NotFound("record".to_string()),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                let field = match db_err.constraint() {
                    Some("username_key") => ConstraintField::Username,
                    Some("email_idx") => ConstraintField::Email,
                    _ => ConstraintField::Other,
                };
                IdentityError::ConstraintViolation(field)
            }
            _ => IdentityError::BackendUnavailable(format!("Database error: {}", err)),
        }
    }
}

impl From<redis::RedisError> for IdentityError {
    fn from(err: redis::RedisError) -> Self {
        IdentityError::BackendUnavailable(format!("Redis error: {}", err))
    }
}
