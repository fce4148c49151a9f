use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const CSRF_HEADER: &str = "x-csrftoken";
pub const CSRF_FAILURE: &str = "CSRF verification failed. Request aborted.";
pub const FILE_CONTENTS: &[u8] = b"quarterly report\nline two\n";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Deserialize)]
pub struct CreateNote {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Deserialize)]
pub struct UpdateNote {
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: u64,
    pub name: String,
}

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default)]
    pub ordering: Option<String>,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    25
}

/// Server state shared by every handler.
pub struct AppState {
    csrf_token: RwLock<String>,
    notes: RwLock<BTreeMap<u64, Note>>,
    next_note: AtomicU64,
    item_count: u64,
    csrf_fetches: AtomicU64,
}

impl AppState {
    pub fn new(item_count: u64) -> Arc<Self> {
        Arc::new(Self {
            csrf_token: RwLock::new(fresh_token()),
            notes: RwLock::new(BTreeMap::new()),
            next_note: AtomicU64::new(1),
            item_count,
            csrf_fetches: AtomicU64::new(0),
        })
    }

    /// Expire the current anti-forgery token, as a server-side rotation would.
    pub async fn rotate_csrf(&self) {
        *self.csrf_token.write().await = fresh_token();
    }

    pub async fn csrf_token(&self) -> String {
        self.csrf_token.read().await.clone()
    }

    /// How many times the token endpoint was hit.
    pub fn csrf_fetches(&self) -> u64 {
        self.csrf_fetches.load(Ordering::SeqCst)
    }
}

pub type Shared = Arc<AppState>;

fn fresh_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Router with 35 list items: one full page of 25 and a page of 10.
pub fn app() -> Router {
    app_with_state(AppState::new(35))
}

pub fn app_with_state(state: Shared) -> Router {
    Router::new()
        .route("/csrf/", get(csrf))
        .route("/example/user/", get(user))
        .route("/items/", get(list_items))
        .route("/notes/", post(create_note))
        .route(
            "/notes/{id}/",
            get(get_note).put(replace_note).patch(modify_note).delete(delete_note),
        )
        .route("/motd/", get(motd))
        .route("/echo/", post(echo))
        .route("/files/report.txt", get(report))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_state(listener: TcpListener, state: Shared) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

async fn csrf(State(state): State<Shared>) -> Html<String> {
    state.csrf_fetches.fetch_add(1, Ordering::SeqCst);
    let token = state.csrf_token().await;
    debug!("issued anti-forgery token");
    Html(format!(
        r#"<input type="hidden" name="csrfmiddlewaretoken" value="{token}">"#
    ))
}

async fn check_csrf(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let sent = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
    let current = state.csrf_token.read().await;
    if sent == Some(current.as_str()) {
        Ok(())
    } else {
        info!(present = sent.is_some(), "rejected state-changing request");
        Err((StatusCode::FORBIDDEN, CSRF_FAILURE).into_response())
    }
}

async fn user(headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Token ") && v.len() > "Token ".len());
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Authentication credentials were not provided."})),
        )
            .into_response();
    }
    Json(json!({
        "id": "1",
        "email": "a@b.com",
        "first_name": "Ada",
        "last_name": "Lovelace",
    }))
    .into_response()
}

async fn list_items(State(state): State<Shared>, Query(params): Query<ListParams>) -> Response {
    let page_size = params.page_size.max(1);
    let descending = params.ordering.as_deref().is_some_and(|o| o.starts_with('-'));
    let start = (params.page.max(1) - 1) * page_size;
    if params.page == 0 || (start >= state.item_count && params.page > 1) {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Invalid page."}))).into_response();
    }
    let end = (start + page_size).min(state.item_count);
    let ids: Vec<u64> = if descending {
        (start..end).map(|i| state.item_count - i).collect()
    } else {
        (start..end).map(|i| i + 1).collect()
    };
    let results: Vec<Item> = ids
        .into_iter()
        .map(|id| Item {
            id,
            name: format!("item {id}"),
        })
        .collect();
    let next = (end < state.item_count).then(|| {
        let ordering = params.ordering.as_deref().unwrap_or("id");
        format!(
            "/items/?page={}&page_size={page_size}&ordering={ordering}",
            params.page + 1
        )
    });
    Json(json!({
        "count": state.item_count,
        "next": next,
        "results": results,
    }))
    .into_response()
}

async fn create_note(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(input): Json<CreateNote>,
) -> Response {
    if let Err(rejection) = check_csrf(&state, &headers).await {
        return rejection;
    }
    let note = Note {
        id: state.next_note.fetch_add(1, Ordering::SeqCst),
        title: input.title,
        body: input.body,
    };
    state.notes.write().await.insert(note.id, note.clone());
    (StatusCode::CREATED, Json(note)).into_response()
}

async fn get_note(State(state): State<Shared>, Path(id): Path<u64>) -> Result<Json<Note>, StatusCode> {
    let notes = state.notes.read().await;
    notes.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn replace_note(
    State(state): State<Shared>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(input): Json<CreateNote>,
) -> Response {
    if let Err(rejection) = check_csrf(&state, &headers).await {
        return rejection;
    }
    let mut notes = state.notes.write().await;
    match notes.get_mut(&id) {
        Some(note) => {
            note.title = input.title;
            note.body = input.body;
            Json(note.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn modify_note(
    State(state): State<Shared>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(input): Json<UpdateNote>,
) -> Response {
    if let Err(rejection) = check_csrf(&state, &headers).await {
        return rejection;
    }
    let mut notes = state.notes.write().await;
    let Some(note) = notes.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(title) = input.title {
        note.title = title;
    }
    if let Some(body) = input.body {
        note.body = body;
    }
    Json(note.clone()).into_response()
}

async fn delete_note(State(state): State<Shared>, Path(id): Path<u64>, headers: HeaderMap) -> Response {
    if let Err(rejection) = check_csrf(&state, &headers).await {
        return rejection;
    }
    match state.notes.write().await.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn motd() -> &'static str {
    "hello from the mock server"
}

/// Echo form fields back as `key=value` lines.
async fn echo(State(state): State<Shared>, headers: HeaderMap, body: String) -> Response {
    if let Err(rejection) = check_csrf(&state, &headers).await {
        return rejection;
    }
    let lines: Vec<String> = body
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.replace('+', " "))
        .collect();
    lines.join("\n").into_response()
}

async fn report() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        FILE_CONTENTS,
    )
        .into_response()
}
