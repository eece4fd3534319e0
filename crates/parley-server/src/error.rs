use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid value for {env_var}: {message}")]
    InvalidValue { env_var: String, message: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Keys read from the `AI_` environment source rather than `PARLEY_`
const AI_KEYS: [&str; 4] = ["gateway_api_key", "model_provider", "model_name", "model_host"];

/// Name the environment variable that sets a configuration key
pub fn to_env_var(field: &str) -> String {
    if AI_KEYS.contains(&field) {
        return format!("AI_{}", field.to_uppercase());
    }
    format!("PARLEY_{}", field.replace('.', "__").to_uppercase())
}

/// Failures of `POST /api/chat`, rendered as `{ "error": ... }`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("AI service not configured. Please set AI_GATEWAY_API_KEY in your environment variables.")]
    ServiceUnavailable,

    #[error("AI service configuration error. Please contact support.")]
    AuthError,

    #[error("Too many requests. Please try again later.")]
    RateLimited,

    #[error("AI model unavailable. Please try again later.")]
    ModelUnavailable,

    #[error("{0}")]
    InternalError(String),
}

impl RelayError {
    pub fn internal() -> Self {
        RelayError::InternalError("An error occurred while processing your request".to_string())
    }

    /// Classify a provider failure by what its message mentions
    pub fn from_provider(error: &anyhow::Error) -> Self {
        let text = format!("{:#}", error).to_lowercase();
        if text.contains("api key") {
            RelayError::AuthError
        } else if text.contains("rate limit") {
            RelayError::RateLimited
        } else if text.contains("model") {
            RelayError::ModelUnavailable
        } else if text.contains("filter") {
            RelayError::InternalError(
                "Internal error processing messages. Please try again.".to_string(),
            )
        } else {
            RelayError::internal()
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::AuthError
            | RelayError::RateLimited
            | RelayError::ModelUnavailable
            | RelayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Unauthenticated => "unauthenticated",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::ServiceUnavailable => "service_unavailable",
            RelayError::AuthError => "auth_error",
            RelayError::RateLimited => "rate_limited",
            RelayError::ModelUnavailable => "model_unavailable",
            RelayError::InternalError(_) => "internal_error",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Failures of the `/api/user` endpoints, rendered as `{ error, message, code }`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UserApiError {
    #[error("Unauthorized")]
    AuthRequired { message: &'static str },

    #[error("Bad Request")]
    InvalidRequest { message: String },

    #[error("Internal Server Error")]
    Internal { message: &'static str },
}

impl UserApiError {
    pub fn code(&self) -> &'static str {
        match self {
            UserApiError::AuthRequired { .. } => "AUTH_REQUIRED",
            UserApiError::InvalidRequest { .. } => "INVALID_REQUEST",
            UserApiError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            UserApiError::AuthRequired { .. } => StatusCode::UNAUTHORIZED,
            UserApiError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            UserApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            UserApiError::AuthRequired { message } | UserApiError::Internal { message } => message,
            UserApiError::InvalidRequest { message } => message,
        }
    }
}

impl IntoResponse for UserApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
            "message": self.message(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}
