// src/handlers/auth.rs
use crate::error::ChatError;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::*;
use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::{get, post, Router},
};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde_json::json;
use std::sync::Arc;

pub fn auth_routes() -> Router {
    Router::new()
        .route("/auth/me", get(me))
        .route_layer(axum::middleware::from_fn(auth_middleware))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
}

/// HS256 signing material for bearer tokens.
#[derive(Clone)]
pub struct JwtKeys {
    secret: String,
    lifetime: Duration,
}

impl JwtKeys {
    pub fn new(secret: impl Into<String>, lifetime_hours: i64) -> Self {
        Self {
            secret: secret.into(),
            lifetime: Duration::hours(lifetime_hours),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            exp: (now + self.lifetime).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

fn issue_token(state: &AppState, user: &User) -> Result<String, ChatError> {
    state.jwt.issue(user).map_err(|e| {
        tracing::error!("Error generating JWT token: {}", e);
        ChatError::InternalFault(e.to_string())
    })
}

/// bcrypt runs on the blocking pool, off the async workers.
async fn hash_password(password: String, cost: u32) -> Result<String, ChatError> {
    tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .map_err(|e| ChatError::InternalFault(e.to_string()))?
        .map_err(|e| {
            tracing::error!("Error hashing password: {}", e);
            ChatError::InternalFault(e.to_string())
        })
}

async fn verify_password(password: String, password_hash: String) -> Result<bool, ChatError> {
    tokio::task::spawn_blocking(move || verify(password, &password_hash))
        .await
        .map_err(|e| ChatError::InternalFault(e.to_string()))?
        .map_err(|e| {
            tracing::error!("Error verifying password: {}", e);
            ChatError::InternalFault(e.to_string())
        })
}

async fn signup(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ChatError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ChatError::BadRequest("Email and password are required"));
    }
    if !payload.email.contains('@') {
        return Err(ChatError::BadRequest("Email address is not valid"));
    }
    if payload.password.len() < 6 {
        return Err(ChatError::BadRequest("Password must be at least 6 characters long"));
    }

    let password_hash = hash_password(payload.password, state.bcrypt_cost).await?;

    let user = state
        .users
        .create_user(NewUser {
            email: payload.email,
            name: payload.name.filter(|n| !n.trim().is_empty()),
            password_hash,
        })
        .await?;
    tracing::info!("New user registered: {}", user.email);

    let token = issue_token(&state, &user)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "User registered successfully".to_string(),
            user: UserResponse::from(user),
            token,
        }),
    ))
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ChatError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ChatError::BadRequest("Email and password are required"));
    }

    let user = state
        .users
        .find_user_by_email(&payload.email)
        .await?
        .ok_or(ChatError::InvalidCredentials)?;

    if !verify_password(payload.password, user.password_hash.clone()).await? {
        return Err(ChatError::InvalidCredentials);
    }

    let token = issue_token(&state, &user)?;
    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".to_string(),
        user: UserResponse::from(user),
        token,
    }))
}

async fn me(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ChatError> {
    let user = state
        .users
        .find_user_by_id(auth.id)
        .await?
        .ok_or(ChatError::NotFound("User"))?;

    Ok(Json(json!({
        "success": true,
        "user": UserResponse::from(user),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{json_request, send, test_state};
    use axum::http::Method;

    fn sample_user() -> User {
        User {
            id: uuid::Uuid::new_v4(),
            email: "demo@ai.com".to_string(),
            name: None,
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let keys = JwtKeys::new("secret", 1);
        let user = sample_user();
        let claims = keys.verify(&keys.issue(&user).unwrap()).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, "demo@ai.com");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let token = JwtKeys::new("one", 1).issue(&sample_user()).unwrap();
        assert!(JwtKeys::new("two", 1).verify(&token).is_err());
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let (state, _) = test_state();
        let app = crate::app(state);

        let (status, body) = send(
            &app,
            json_request(
                Method::POST,
                "/auth/signup",
                None,
                json!({"name": "Demo", "email": "Demo@AI.com", "password": "secret1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["email"], "demo@ai.com");
        assert!(body["user"].get("password_hash").is_none());

        let (status, body) = send(
            &app,
            json_request(
                Method::POST,
                "/auth/login",
                None,
                json!({"email": "demo@ai.com", "password": "secret1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(&app, json_request(Method::GET, "/auth/me", Some(&token), json!(null))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["name"], "Demo");
    }

    #[tokio::test]
    async fn test_signup_validation_and_conflict() {
        let (state, _) = test_state();
        let app = crate::app(state);
        let signup = |password: &str| {
            json_request(
                Method::POST,
                "/auth/signup",
                None,
                json!({"email": "a@b.com", "password": password}),
            )
        };

        let (status, _) = send(&app, signup("123")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, signup("123456")).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = send(&app, signup("123456")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_unauthorized() {
        let (state, _) = test_state();
        let app = crate::app(state);
        let (status, body) = send(
            &app,
            json_request(
                Method::POST,
                "/auth/login",
                None,
                json!({"email": "nobody@ai.com", "password": "whatever"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid email or password");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_password_hashing_leaves_executor_free() {
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        let hashed = hash_password("password1".to_string(), 6).await.unwrap();
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 0);
        ticker.abort();

        assert!(verify_password("password1".to_string(), hashed.clone()).await.unwrap());
        assert!(!verify_password("wrong".to_string(), hashed).await.unwrap());
    }
}
