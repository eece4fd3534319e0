use crate::error::UserApiError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use parley::auth::{bearer_token, AuthError, User};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Body of every successful `/api/user` response
#[derive(Debug, Serialize)]
struct UserApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    data: Value,
    timestamp: String,
}

impl UserApiResponse {
    fn new(message: Option<&'static str>, data: Value) -> Json<Self> {
        Json(Self {
            success: true,
            message,
            data,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

/// The messages each endpoint uses for its two failure modes
struct Wording {
    signed_out: &'static str,
    failed: &'static str,
}

const FETCH: Wording = Wording {
    signed_out: "You must be signed in to access this endpoint",
    failed: "An unexpected error occurred while fetching user data",
};
const UPDATE: Wording = Wording {
    signed_out: "You must be signed in to perform this action",
    failed: "An unexpected error occurred while updating user data",
};
const DELETE: Wording = Wording {
    signed_out: "You must be signed in to perform this action",
    failed: "An unexpected error occurred while deleting user data",
};

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    wording: &Wording,
) -> Result<User, UserApiError> {
    let token = bearer_token(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    )
    .ok_or(UserApiError::AuthRequired {
        message: wording.signed_out,
    })?;

    state
        .authenticator
        .authenticate(token)
        .await
        .map_err(|e| match e {
            AuthError::Unavailable(reason) => {
                tracing::error!("Error in /api/user: {}", reason);
                UserApiError::Internal {
                    message: wording.failed,
                }
            }
            AuthError::MissingToken | AuthError::InvalidToken => UserApiError::AuthRequired {
                message: wording.signed_out,
            },
        })
}

/// `userId` plus `walletAddress` when the user has one
fn user_summary(user: &User) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("userId".to_string(), json!(user.id));
    if let Some(wallet) = &user.wallet_address {
        data.insert("walletAddress".to_string(), json!(wallet));
    }
    data
}

async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserApiResponse>, UserApiError> {
    let user = authenticate(&state, &headers, &FETCH).await?;
    let data = serde_json::to_value(&user).map_err(|e| {
        tracing::error!("Error in /api/user: {}", e);
        UserApiError::Internal {
            message: FETCH.failed,
        }
    })?;
    Ok(UserApiResponse::new(None, data))
}

async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UserApiResponse>, UserApiError> {
    let user = authenticate(&state, &headers, &UPDATE).await?;

    let request: Value = serde_json::from_slice(&body).map_err(|_| UserApiError::InvalidRequest {
        message: "Request body must be a JSON object".to_string(),
    })?;
    let Some(request) = request.as_object() else {
        return Err(UserApiError::InvalidRequest {
            message: "Request body must be a JSON object".to_string(),
        });
    };
    let preferences = match request.get("preferences") {
        None | Some(Value::Null) => json!({}),
        Some(preferences) => preferences.clone(),
    };

    // Preferences are echoed back, there is no store behind this endpoint
    let mut data = user_summary(&user);
    data.insert("preferences".to_string(), preferences);
    tracing::info!("Updated preferences for {}", user.id);
    Ok(UserApiResponse::new(
        Some("User preferences updated successfully"),
        Value::Object(data),
    ))
}

async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserApiResponse>, UserApiError> {
    let user = authenticate(&state, &headers, &DELETE).await?;
    tracing::info!("Deleted user data for {}", user.id);
    Ok(UserApiResponse::new(
        Some("User data deleted successfully"),
        Value::Object(user_summary(&user)),
    ))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/user", get(get_user).post(update_user).delete(delete_user))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{app_state, TEST_TOKEN};
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use parley::auth::Authenticator;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn call(
        state: AppState,
        method: &str,
        token: Option<&str>,
        body: &str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri("/api/user");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let response = routes(state)
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    struct Outage;

    #[async_trait]
    impl Authenticator for Outage {
        async fn authenticate(&self, _token: &str) -> Result<User, AuthError> {
            Err(AuthError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_get_user() {
        let (status, body) = call(app_state(None), "GET", Some(TEST_TOKEN), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"], json!({"id": "user-1", "walletAddress": "0xabc"}));
        assert!(body.get("message").is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(body["timestamp"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_requires_token() {
        for method in ["GET", "POST", "DELETE"] {
            let (status, body) = call(app_state(None), method, None, "{}").await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"], json!("Unauthorized"));
            assert_eq!(body["code"], json!("AUTH_REQUIRED"));
        }

        let (_, body) = call(app_state(None), "GET", Some("bogus"), "").await;
        assert_eq!(
            body["message"],
            json!("You must be signed in to access this endpoint")
        );
    }

    #[tokio::test]
    async fn test_update_preferences() {
        let (status, body) = call(
            app_state(None),
            "POST",
            Some(TEST_TOKEN),
            r#"{"preferences":{"theme":"dark"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], json!("User preferences updated successfully"));
        assert_eq!(
            body["data"],
            json!({"userId": "user-1", "walletAddress": "0xabc", "preferences": {"theme": "dark"}})
        );

        let (_, body) = call(app_state(None), "POST", Some(TEST_TOKEN), "{}").await;
        assert_eq!(body["data"]["preferences"], json!({}));
    }

    #[tokio::test]
    async fn test_update_rejects_bad_body() {
        for payload in ["not json", "[1,2]"] {
            let (status, body) = call(app_state(None), "POST", Some(TEST_TOKEN), payload).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], json!("INVALID_REQUEST"));
        }
    }

    #[tokio::test]
    async fn test_delete_user() {
        let (status, body) = call(app_state(None), "DELETE", Some(TEST_TOKEN), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], json!("User data deleted successfully"));
        assert_eq!(body["data"], json!({"userId": "user-1", "walletAddress": "0xabc"}));
    }

    #[tokio::test]
    async fn test_identity_outage_is_internal_error() {
        let mut state = app_state(None);
        state.authenticator = Arc::new(Outage);

        let (status, body) = call(state, "DELETE", Some(TEST_TOKEN), "").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], json!("Internal Server Error"));
        assert_eq!(body["code"], json!("INTERNAL_ERROR"));
        assert_eq!(
            body["message"],
            json!("An unexpected error occurred while deleting user data")
        );
    }
}
