use applygate_core::ApiError;

/// Token and credential errors.
#[derive(Debug)]
pub enum AuthError {
    /// The Authorization header is missing from the request.
    MissingCredentials,

    /// The authorization scheme is not "Bearer".
    InvalidScheme,

    /// The token is malformed or carries a bad signature.
    InvalidToken(String),

    /// The token has expired (a token exactly at expiry counts as expired).
    TokenExpired,

    /// The subject named by the token no longer resolves.
    UnknownSubject,

    /// Password hash handling failed.
    PasswordHash(String),

    /// Credentials did not match.
    BadCredentials,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingCredentials => write!(f, "missing credentials"),
            AuthError::InvalidScheme => write!(f, "invalid authorization scheme"),
            AuthError::InvalidToken(msg) => write!(f, "invalid token: {msg}"),
            AuthError::TokenExpired => write!(f, "token expired"),
            AuthError::UnknownSubject => write!(f, "unknown subject"),
            AuthError::PasswordHash(msg) => write!(f, "password hash error: {msg}"),
            AuthError::BadCredentials => write!(f, "bad credentials"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::PasswordHash(msg) => ApiError::internal(msg),
            // Credential detail stays out of responses.
            _ => ApiError::auth("invalid or missing credentials"),
        }
    }
}
