//! In-process mock of the remote reading-journal API
//!
//! Backed by axum on an ephemeral listener. State is inspectable from
//! tests: created rows, idempotency keys seen, the request log, and
//! fault-injection knobs (503 bursts, request latency, auth demands).

// Each test binary includes this module and uses a different subset.
#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MockState {
    pub next_id: i64,
    pub memos: HashMap<i64, Value>,
    pub books: HashMap<i64, Value>,
    pub memo_keys: HashMap<String, i64>,
    pub book_keys: HashMap<String, i64>,
    /// Remaining POST /memos calls to answer with 503.
    pub memo_create_failures: u32,
    /// Artificial latency on POST /memos, for in-flight races.
    pub memo_create_delay_ms: u64,
    /// Artificial latency on POST /user/books.
    pub book_create_delay_ms: u64,
    pub aladin_healthy: bool,
    /// When set, requests without a bearer token get 401.
    pub require_auth: bool,
    /// (method+path, body) per mutating request, in arrival order.
    pub requests: Vec<(String, Value)>,
}

type Shared = Arc<Mutex<MockState>>;

#[derive(Clone)]
pub struct MockApi {
    pub state: Shared,
    pub addr: SocketAddr,
}

impl MockApi {
    pub async fn spawn() -> MockApi {
        let state: Shared = Arc::new(Mutex::new(MockState {
            next_id: 42,
            aladin_healthy: true,
            ..MockState::default()
        }));

        let app = Router::new()
            .route("/api/v1/health", get(health))
            .route("/api/v1/health/aladin", get(health_aladin))
            .route("/api/v1/memos", post(create_memo))
            .route("/api/v1/memos/today-flow", get(today_flow))
            .route("/api/v1/memos/dates", get(memo_dates))
            .route("/api/v1/memos/books/:id", get(memos_by_book))
            .route("/api/v1/memos/:id", put(update_memo).delete(delete_memo))
            .route("/api/v1/user/books", get(list_books).post(create_book))
            .route("/api/v1/user/books/:id", put(update_book).delete(delete_book))
            .route("/api/v1/user/books/:id/start-reading", post(start_reading))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockApi { state, addr }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    pub async fn memo_count(&self) -> usize {
        self.state.lock().await.memos.len()
    }

    pub async fn book_count(&self) -> usize {
        self.state.lock().await.books.len()
    }

    pub async fn memo(&self, id: i64) -> Option<Value> {
        self.state.lock().await.memos.get(&id).cloned()
    }

    pub async fn book(&self, id: i64) -> Option<Value> {
        self.state.lock().await.books.get(&id).cloned()
    }

    pub async fn requests(&self) -> Vec<(String, Value)> {
        self.state.lock().await.requests.clone()
    }

    pub async fn set_memo_create_failures(&self, failures: u32) {
        self.state.lock().await.memo_create_failures = failures;
    }

    pub async fn set_memo_create_delay(&self, delay: Duration) {
        self.state.lock().await.memo_create_delay_ms = delay.as_millis() as u64;
    }

    pub async fn set_book_create_delay(&self, delay: Duration) {
        self.state.lock().await.book_create_delay_ms = delay.as_millis() as u64;
    }

    pub async fn set_require_auth(&self, required: bool) {
        self.state.lock().await.require_auth = required;
    }

    /// Seed a server-side book row, bypassing the API.
    pub async fn seed_book(&self, mut body: Value) -> i64 {
        let mut s = self.state.lock().await;
        let id = s.next_id;
        s.next_id += 1;
        body["userBookId"] = json!(id);
        s.books.insert(id, body);
        id
    }
}

fn unauthorized(state: &MockState, headers: &HeaderMap) -> bool {
    state.require_auth
        && !headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("Bearer "))
            .unwrap_or(false)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn health_aladin(State(state): State<Shared>) -> StatusCode {
    if state.lock().await.aladin_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn create_memo(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let delay = {
        let mut s = state.lock().await;
        s.requests.push(("POST /memos".to_string(), body.clone()));
        if unauthorized(&s, &headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "expired"})));
        }
        if s.memo_create_failures > 0 {
            s.memo_create_failures -= 1;
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "unavailable"})),
            );
        }
        s.memo_create_delay_ms
    };
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut s = state.lock().await;
    if let Some(&existing) = s.memo_keys.get(&key) {
        if let Some(memo) = s.memos.get(&existing) {
            return (StatusCode::OK, Json(memo.clone()));
        }
    }

    let id = s.next_id;
    s.next_id += 1;
    let mut memo = body;
    memo["id"] = json!(id);
    s.memos.insert(id, memo.clone());
    if !key.is_empty() {
        s.memo_keys.insert(key, id);
    }
    (StatusCode::OK, Json(memo))
}

async fn update_memo(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut s = state.lock().await;
    s.requests
        .push((format!("PUT /memos/{}", id), body.clone()));
    if !s.memos.contains_key(&id) {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})));
    }

    let mut memo = body;
    memo["id"] = json!(id);
    s.memos.insert(id, memo.clone());
    (StatusCode::OK, Json(memo))
}

async fn delete_memo(State(state): State<Shared>, Path(id): Path<i64>) -> StatusCode {
    let mut s = state.lock().await;
    s.requests
        .push((format!("DELETE /memos/{}", id), Value::Null));
    if s.memos.remove(&id).is_some() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn memos_by_book(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let s = state.lock().await;
    let memos: Vec<Value> = s
        .memos
        .values()
        .filter(|m| m["userBookId"] == json!(id))
        .filter(|m| match params.get("date") {
            Some(date) => m["memoStartTime"]
                .as_str()
                .map(|t| t.starts_with(date.as_str()))
                .unwrap_or(false),
            None => true,
        })
        .cloned()
        .collect();
    Json(json!(memos))
}

async fn today_flow(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock().await;
    let mut by_book: HashMap<i64, Vec<Value>> = HashMap::new();
    let mut by_tag: HashMap<String, Vec<Value>> = HashMap::new();

    for memo in s.memos.values() {
        if let Some(book) = memo["userBookId"].as_i64() {
            by_book.entry(book).or_default().push(memo.clone());
        }
        if let Some(tags) = memo["tags"].as_array() {
            for tag in tags.iter().filter_map(|t| t.as_str()) {
                by_tag.entry(tag.to_string()).or_default().push(memo.clone());
            }
        }
    }

    Json(json!({
        "memosByBook": by_book
            .into_iter()
            .map(|(id, memos)| json!({"userBookId": id, "memos": memos}))
            .collect::<Vec<_>>(),
        "memosByTag": by_tag
            .into_iter()
            .map(|(tag, memos)| json!({"tag": tag, "memos": memos}))
            .collect::<Vec<_>>(),
        "totalMemoCount": s.memos.len(),
    }))
}

async fn memo_dates(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock().await;
    let mut dates: Vec<String> = s
        .memos
        .values()
        .filter_map(|m| m["memoStartTime"].as_str())
        .map(|t| t.chars().take(10).collect())
        .collect();
    dates.sort();
    dates.dedup();
    Json(json!(dates))
}

async fn list_books(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock().await;
    let books: Vec<Value> = s.books.values().cloned().collect();
    Json(json!(books))
}

async fn create_book(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let delay = {
        let mut s = state.lock().await;
        s.requests
            .push(("POST /user/books".to_string(), body.clone()));
        if unauthorized(&s, &headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "expired"})));
        }
        s.book_create_delay_ms
    };
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let mut s = state.lock().await;
    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if let Some(&existing) = s.book_keys.get(&key) {
        if let Some(book) = s.books.get(&existing) {
            return (StatusCode::OK, Json(book.clone()));
        }
    }

    // Duplicate shelf rows are a conflict, keyed by ISBN.
    let isbn = body["isbn"].clone();
    if s.books.values().any(|b| b["isbn"] == isbn) {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": "already on shelf"})),
        );
    }

    let id = s.next_id;
    s.next_id += 1;
    let mut book = body;
    book["userBookId"] = json!(id);
    s.books.insert(id, book.clone());
    if !key.is_empty() {
        s.book_keys.insert(key, id);
    }
    (StatusCode::OK, Json(book))
}

async fn update_book(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut s = state.lock().await;
    s.requests
        .push((format!("PUT /user/books/{}", id), body.clone()));
    let Some(book) = s.books.get_mut(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})));
    };

    if let (Some(book_map), Some(patch)) = (book.as_object_mut(), body.as_object()) {
        for (k, v) in patch {
            book_map.insert(k.clone(), v.clone());
        }
    }
    (StatusCode::OK, Json(book.clone()))
}

async fn delete_book(State(state): State<Shared>, Path(id): Path<i64>) -> StatusCode {
    let mut s = state.lock().await;
    s.requests
        .push((format!("DELETE /user/books/{}", id), Value::Null));
    if s.books.remove(&id).is_some() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn start_reading(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> StatusCode {
    let mut s = state.lock().await;
    s.requests
        .push((format!("POST /user/books/{}/start-reading", id), body.clone()));
    let Some(book) = s.books.get_mut(&id) else {
        return StatusCode::NOT_FOUND;
    };

    book["category"] = json!("READING");
    book["lastReadPage"] = body["readingProgress"].clone();
    if !body["purchaseType"].is_null() {
        book["purchaseType"] = body["purchaseType"].clone();
    }
    StatusCode::OK
}
