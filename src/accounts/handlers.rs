use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{
    accounts::{
        dto::{
            ChangePasswordRequest, CreateAccountRequest, CredentialsRequest, PublicAccount,
            SearchQuery, UpdateAccountRequest,
        },
        error::AccountError,
        repo_types::AccountUpdate,
    },
    state::AppState,
};

pub type Rejection = (StatusCode, String);

const MAX_USERNAME_LEN: usize = 50;

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_account).get(list_all))
        .route("/active", get(list_active))
        .route("/inactive", get(list_inactive))
        .route("/search", get(search))
        .route("/count/active", get(count_active))
        .route("/validate", post(validate_credentials))
        .route("/username/:username", get(get_by_username))
        .route("/email/:email", get(get_by_email))
        .route("/:id", get(get_by_id).put(update_account).delete(delete_account))
        .route("/:id/password", put(change_password))
        .route("/:id/deactivate", put(deactivate_account))
        .route("/:id/activate", put(activate_account))
        .route("/:id/exists", get(account_exists))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_identity(username: &str, email: &str) -> Result<(), Rejection> {
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        warn!("invalid username length");
        return Err((StatusCode::BAD_REQUEST, "Invalid username".into()));
    }
    if !is_valid_email(email) {
        warn!(email = %email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }
    Ok(())
}

fn reject(err: AccountError) -> Rejection {
    let status = err.status();
    if status.is_server_error() {
        error!(error = %err, "account operation failed");
    }
    (status, err.to_string())
}

fn found(account: Option<PublicAccount>) -> Result<Json<PublicAccount>, Rejection> {
    account
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, AccountError::NotFound.to_string()))
}

#[instrument(skip(state, payload))]
pub async fn create_account(
    State(state): State<AppState>,
    Json(mut payload): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<PublicAccount>), Rejection> {
    payload.username = payload.username.trim().to_string();
    payload.email = payload.email.trim().to_string();
    check_identity(&payload.username, &payload.email)?;
    if payload.password.is_empty() {
        warn!("empty password");
        return Err((StatusCode::BAD_REQUEST, "Password required".into()));
    }

    let account = state
        .accounts
        .create_account(&payload.username, &payload.email, &payload.password, payload.profile)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn list_all(
    State(state): State<AppState>,
) -> Result<Json<Vec<PublicAccount>>, Rejection> {
    state.accounts.list_all().await.map(Json).map_err(reject)
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicAccount>, Rejection> {
    found(state.accounts.get_account(id).await.map_err(reject)?)
}

pub async fn get_by_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<PublicAccount>, Rejection> {
    found(state.accounts.get_account_by_username(&username).await.map_err(reject)?)
}

pub async fn get_by_email(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<PublicAccount>, Rejection> {
    found(state.accounts.get_account_by_email(&email).await.map_err(reject)?)
}

#[instrument(skip(state, payload))]
pub async fn update_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<Json<PublicAccount>, Rejection> {
    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_string();
    check_identity(&username, &email)?;

    let update = AccountUpdate {
        username,
        email,
        profile: payload.profile,
        active: payload.active,
    };
    state
        .accounts
        .update_account(id, update)
        .await
        .map(Json)
        .map_err(reject)
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<String, Rejection> {
    if payload.new_password.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Password required".into()));
    }
    state
        .accounts
        .change_password(
            id,
            &payload.current_password,
            &payload.new_password,
            &payload.confirm_password,
        )
        .await
        .map_err(reject)?;
    Ok("Password changed successfully".into())
}

#[instrument(skip(state, payload))]
pub async fn validate_credentials(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Json<bool> {
    Json(
        state
            .accounts
            .validate_credentials(&payload.username, &payload.password)
            .await,
    )
}

#[instrument(skip(state))]
pub async fn delete_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Rejection> {
    state.accounts.delete_account(id).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn deactivate_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicAccount>, Rejection> {
    state.accounts.deactivate_account(id).await.map(Json).map_err(reject)
}

#[instrument(skip(state))]
pub async fn activate_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicAccount>, Rejection> {
    state.accounts.activate_account(id).await.map(Json).map_err(reject)
}

pub async fn list_active(
    State(state): State<AppState>,
) -> Result<Json<Vec<PublicAccount>>, Rejection> {
    state.accounts.list_active().await.map(Json).map_err(reject)
}

pub async fn list_inactive(
    State(state): State<AppState>,
) -> Result<Json<Vec<PublicAccount>>, Rejection> {
    state.accounts.list_inactive().await.map(Json).map_err(reject)
}

pub async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<PublicAccount>>, Rejection> {
    state.accounts.search_accounts(&q.query).await.map(Json).map_err(reject)
}

pub async fn count_active(State(state): State<AppState>) -> Result<Json<i64>, Rejection> {
    state.accounts.count_active().await.map(Json).map_err(reject)
}

pub async fn account_exists(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<bool>, Rejection> {
    state.accounts.account_exists(id).await.map(Json).map_err(reject)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::app::build_app;

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    fn app() -> Router {
        build_app(AppState::fake())
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a x@y.com"));
    }

    #[tokio::test]
    async fn create_and_fetch_over_http() {
        let app = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/users",
            Some(json!({
                "username": "alice",
                "email": "a@x.com",
                "password": "p@ss1",
                "first_name": "Alice"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["active"], json!(true));
        assert_eq!(body["first_name"], json!("Alice"));
        assert!(body.get("password_hash").is_none());
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, Method::GET, &format!("/api/users/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], json!("alice"));

        let (status, _) = send(&app, Method::GET, "/api/users/username/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, Method::GET, "/api/users/count/active", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(1));
    }

    #[tokio::test]
    async fn duplicate_and_invalid_input_statuses() {
        let app = app();
        let alice = json!({"username": "alice", "email": "a@x.com", "password": "p@ss1"});
        send(&app, Method::POST, "/api/users", Some(alice.clone())).await;

        let (status, _) = send(&app, Method::POST, "/api/users", Some(alice)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/users",
            Some(json!({"username": "bob", "email": "not-an-email", "password": "pw"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            Method::GET,
            &format!("/api/users/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn validate_and_lifecycle_over_http() {
        let app = app();
        let (_, body) = send(
            &app,
            Method::POST,
            "/api/users",
            Some(json!({"username": "alice", "email": "a@x.com", "password": "p@ss1"})),
        )
        .await;
        let id = body["id"].as_str().unwrap().to_string();
        let creds = json!({"username": "alice", "password": "p@ss1"});

        let (_, ok) = send(&app, Method::POST, "/api/users/validate", Some(creds.clone())).await;
        assert_eq!(ok, json!(true));

        let (status, body) =
            send(&app, Method::PUT, &format!("/api/users/{id}/deactivate"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], json!(false));
        let (_, ok) = send(&app, Method::POST, "/api/users/validate", Some(creds.clone())).await;
        assert_eq!(ok, json!(false));

        // a profile edit that omits `active` leaves the account deactivated
        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/api/users/{id}"),
            Some(json!({"username": "alice", "email": "a@x.com", "first_name": "Alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["first_name"], json!("Alice"));
        assert_eq!(body["active"], json!(false));
        let (_, ok) = send(&app, Method::POST, "/api/users/validate", Some(creds.clone())).await;
        assert_eq!(ok, json!(false));

        let (status, _) = send(
            &app,
            Method::PUT,
            &format!("/api/users/{id}/password"),
            Some(json!({
                "current_password": "wrong",
                "new_password": "n3w",
                "confirm_password": "n3w"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::DELETE, &format!("/api/users/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::DELETE, &format!("/api/users/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, exists) = send(&app, Method::GET, &format!("/api/users/{id}/exists"), None).await;
        assert_eq!(exists, json!(false));
    }

    #[tokio::test]
    async fn search_over_http() {
        let app = app();
        for (u, e) in [("alice", "a@x.com"), ("Alicia", "al@y.com"), ("bob", "b@x.com")] {
            send(
                &app,
                Method::POST,
                "/api/users",
                Some(json!({"username": u, "email": e, "password": "pw"})),
            )
            .await;
        }
        let (status, body) = send(&app, Method::GET, "/api/users/search?query=ALI", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }
}
