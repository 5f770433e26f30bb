#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path as UrlPath, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use http::request::Parts;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use soundboard::api::ApiClient;
use soundboard::error::AudioError;
use soundboard::playback::{AudioBackend, AudioHandle};
use soundboard::session::store::SessionStore;
use soundboard::session::{AuthHandle, Session};

struct Account {
    user: Value,
    password: String,
}

struct StoredObject {
    content_type: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct Store {
    /// Keyed by email.
    accounts: HashMap<String, Account>,
    /// token -> user id
    tokens: HashMap<String, String>,
    sounds: Vec<Value>,
    objects: HashMap<String, StoredObject>,
}

#[derive(Clone)]
struct MockState {
    base_url: String,
    store: Arc<Mutex<Store>>,
    requests: Arc<AtomicUsize>,
    fail_storage: Arc<AtomicBool>,
}

impl MockState {
    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap()
    }
}

/// In-process stand-in for the soundboard REST API and its object store.
/// Each instance is isolated, so tests can run in parallel.
pub struct MockApi {
    pub base_url: String,
    state: MockState,
}

impl MockApi {
    /// Binds 127.0.0.1:0, spawns the server, and returns once it is listening.
    pub async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://127.0.0.1:{}", addr.port());

        let state = MockState {
            base_url: base_url.clone(),
            store: Arc::new(Mutex::new(Store::default())),
            requests: Arc::new(AtomicUsize::new(0)),
            fail_storage: Arc::new(AtomicBool::new(false)),
        };

        let app = Router::new()
            .route("/users/register", post(register))
            .route("/users/login", post(login))
            .route("/users/me", get(me))
            .route("/users/logout", post(logout))
            .route("/sounds", get(list_sounds).post(create_sound))
            .route("/sounds/upload-url", get(upload_url))
            .route("/sounds/{id}/url", get(sound_url))
            .route("/sounds/{id}", axum::routing::delete(delete_sound))
            .route("/storage/{key}", put(put_object).get(get_object))
            .layer(middleware::from_fn_with_state(state.clone(), count_requests))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, state }
    }

    /// Requests served so far, of any kind.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn fail_storage(&self, fail: bool) {
        self.state.fail_storage.store(fail, Ordering::SeqCst);
    }

    /// Invalidate every issued token, as if they all expired server-side.
    pub fn revoke_all_tokens(&self) {
        self.state.store().tokens.clear();
    }

    pub fn token_count(&self) -> usize {
        self.state.store().tokens.len()
    }

    pub fn sound_count(&self) -> usize {
        self.state.store().sounds.len()
    }

    pub fn object_count(&self) -> usize {
        self.state.store().objects.len()
    }

    /// Create an account directly. Returns `(user id, token)`.
    pub fn seed_user(&self, username: &str, email: &str, password: &str) -> (String, String) {
        let mut store = self.state.store();
        let user = new_user(username, email);
        let id = user["_id"].as_str().unwrap().to_string();
        store.accounts.insert(
            email.to_string(),
            Account {
                user,
                password: password.to_string(),
            },
        );
        let token = uuid::Uuid::new_v4().simple().to_string();
        store.tokens.insert(token.clone(), id.clone());
        (id, token)
    }

    /// Store a sound and its object for `user_id`, bypassing the upload flow.
    pub fn seed_sound(&self, user_id: &str, title: &str, content_type: &str, bytes: &[u8]) -> String {
        let mut store = self.state.store();
        let key = uuid::Uuid::new_v4().simple().to_string();
        store.objects.insert(
            key.clone(),
            StoredObject {
                content_type: content_type.to_string(),
                bytes: bytes.to_vec(),
            },
        );
        let sound = new_sound(user_id, title, "", &key, content_type, bytes.len() as u64);
        let id = sound["_id"].as_str().unwrap().to_string();
        store.sounds.push(sound);
        id
    }

    /// Drop a sound's stored object so loading it fails.
    pub fn remove_object_of(&self, sound_id: &str) {
        let mut store = self.state.store();
        let key = store
            .sounds
            .iter()
            .find(|s| s["_id"] == sound_id)
            .map(|s| s["metadata"]["s3Key"].as_str().unwrap().to_string());
        if let Some(key) = key {
            store.objects.remove(&key);
        }
    }

    pub fn object_content_type(&self, key: &str) -> Option<String> {
        self.state
            .store()
            .objects
            .get(key)
            .map(|o| o.content_type.clone())
    }
}

/// An API client and session holder pointed at `api`, persisting to `session_file`.
pub fn connect(api: &MockApi, session_file: &Path) -> Session {
    connect_to(&api.base_url, session_file)
}

pub fn connect_to(base_url: &str, session_file: &Path) -> Session {
    let auth = AuthHandle::new(SessionStore::new(session_file));
    let client = ApiClient::with_client(reqwest::Client::new(), base_url.to_string(), auth);
    Session::new(client)
}

/// Server that answers every request with `200` headers and the first byte of
/// a JSON body, then never sends the rest.
pub struct StallingServer {
    pub base_url: String,
    requests: tokio::sync::mpsc::UnboundedReceiver<()>,
}

impl StallingServer {
    pub async fn spawn() -> Self {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, requests) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let _ = stream
                        .write_all(
                            b"HTTP/1.1 200 OK\r\n\
                              content-type: application/json\r\n\
                              content-length: 256\r\n\r\n{",
                        )
                        .await;
                    let _ = stream.flush().await;
                    let _ = tx.send(());
                    // Holding `stream` keeps the connection open.
                    std::future::pending::<()>().await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    /// Wait until a request has been answered with its partial body.
    pub async fn stalled(&mut self) {
        self.requests.recv().await.unwrap();
    }
}

/// 16-bit mono WAV of the given length.
pub fn wav_bytes(seconds: f32, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let total = (seconds * sample_rate as f32) as u32;
        for i in 0..total {
            let v: i16 = if (i / 16) % 2 == 0 { 1500 } else { -1500 };
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Backend that "plays" by logging the clip bytes as text. Clips whose bytes
/// start with `corrupt` fail to prepare.
#[derive(Default)]
pub struct RecordingBackend {
    pub prepared: AtomicUsize,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl RecordingBackend {
    pub fn played(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

pub struct RecordingHandle {
    label: String,
    playing: AtomicBool,
    log: Arc<Mutex<Vec<String>>>,
}

impl AudioBackend for RecordingBackend {
    fn prepare(&self, bytes: Vec<u8>, _content_type: &str) -> Result<Arc<dyn AudioHandle>, AudioError> {
        if bytes.starts_with(b"corrupt") {
            return Err(AudioError::Decode("corrupt clip".to_string()));
        }
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingHandle {
            label: String::from_utf8_lossy(&bytes).into_owned(),
            playing: AtomicBool::new(false),
            log: Arc::clone(&self.log),
        }))
    }
}

impl AudioHandle for RecordingHandle {
    fn play(&self) -> Result<(), AudioError> {
        self.playing.store(true, Ordering::SeqCst);
        self.log.lock().unwrap().push(self.label.clone());
        Ok(())
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

// ---- mock server internals ----

fn new_user(username: &str, email: &str) -> Value {
    json!({
        "_id": uuid::Uuid::new_v4().to_string(),
        "username": username,
        "email": email,
        "favorites": [],
        "createdAt": "2024-01-01T00:00:00.000Z",
    })
}

fn new_sound(
    user_id: &str,
    title: &str,
    description: &str,
    key: &str,
    file_type: &str,
    file_size: u64,
) -> Value {
    json!({
        "_id": uuid::Uuid::new_v4().to_string(),
        "title": title,
        "description": description,
        "metadata": {
            "s3Key": key,
            "bucketName": "mock-bucket",
            "fileType": file_type,
            "fileSize": file_size,
        },
        "user": user_id,
        "createdAt": "2024-02-01T00:00:00.000Z",
    })
}

struct Failure(StatusCode, Value);

impl Failure {
    fn message(status: StatusCode, message: &str) -> Self {
        Failure(status, json!({ "message": message }))
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

struct AuthUser {
    user_id: String,
    token: String,
}

impl FromRequestParts<MockState> for AuthUser {
    type Rejection = Failure;

    fn from_request_parts(
        parts: &mut Parts,
        state: &MockState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string());
        let user_id = token
            .as_ref()
            .and_then(|t| state.store().tokens.get(t).cloned());

        async move {
            match (token, user_id) {
                (Some(token), Some(user_id)) => Ok(AuthUser { user_id, token }),
                _ => Err(Failure::message(StatusCode::UNAUTHORIZED, "Not authorized")),
            }
        }
    }
}

async fn count_requests(State(state): State<MockState>, request: Request, next: Next) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    next.run(request).await
}

#[derive(Deserialize)]
struct Credentials {
    username: Option<String>,
    email: String,
    password: String,
}

async fn register(
    State(state): State<MockState>,
    Json(input): Json<Credentials>,
) -> Result<(StatusCode, Json<Value>), Failure> {
    let mut store = state.store();
    if store.accounts.contains_key(&input.email) {
        return Err(Failure::message(StatusCode::CONFLICT, "Email already registered"));
    }
    let user = new_user(input.username.as_deref().unwrap_or_default(), &input.email);
    let user_id = user["_id"].as_str().unwrap_or_default().to_string();
    let token = uuid::Uuid::new_v4().simple().to_string();
    store.tokens.insert(token.clone(), user_id);
    store.accounts.insert(
        input.email,
        Account {
            user: user.clone(),
            password: input.password,
        },
    );
    Ok((StatusCode::CREATED, Json(json!({ "user": user, "token": token }))))
}

async fn login(
    State(state): State<MockState>,
    Json(input): Json<Credentials>,
) -> Result<Json<Value>, Failure> {
    let mut store = state.store();
    let user = match store.accounts.get(&input.email) {
        Some(account) if account.password == input.password => account.user.clone(),
        _ => {
            return Err(Failure::message(
                StatusCode::UNAUTHORIZED,
                "Invalid email or password",
            ))
        }
    };
    let token = uuid::Uuid::new_v4().simple().to_string();
    let user_id = user["_id"].as_str().unwrap_or_default().to_string();
    store.tokens.insert(token.clone(), user_id);
    Ok(Json(json!({ "user": user, "token": token })))
}

fn find_user(store: &Store, user_id: &str) -> Option<Value> {
    store
        .accounts
        .values()
        .find(|a| a.user["_id"] == user_id)
        .map(|a| a.user.clone())
}

async fn me(State(state): State<MockState>, auth: AuthUser) -> Result<Json<Value>, Failure> {
    let store = state.store();
    let user = find_user(&store, &auth.user_id)
        .ok_or_else(|| Failure::message(StatusCode::UNAUTHORIZED, "Not authorized"))?;
    Ok(Json(json!({ "user": user })))
}

async fn logout(State(state): State<MockState>, auth: AuthUser) -> Json<Value> {
    state.store().tokens.remove(&auth.token);
    Json(json!({ "message": "Logged out" }))
}

async fn list_sounds(State(state): State<MockState>, auth: AuthUser) -> Json<Value> {
    let store = state.store();
    let sounds: Vec<Value> = store
        .sounds
        .iter()
        .filter(|s| s["user"] == auth.user_id.as_str())
        .cloned()
        .collect();
    Json(Value::Array(sounds))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadQuery {
    file_type: String,
    file_name: String,
}

async fn upload_url(
    State(state): State<MockState>,
    _auth: AuthUser,
    Query(query): Query<UploadQuery>,
) -> Result<Json<Value>, Failure> {
    if !query.file_type.starts_with("audio/") || query.file_name.is_empty() {
        return Err(Failure(
            StatusCode::BAD_REQUEST,
            json!({ "error": { "code": "invalid_request", "message": "Invalid file" } }),
        ));
    }
    let key = uuid::Uuid::new_v4().simple().to_string();
    Ok(Json(json!({
        "url": format!("{}/storage/{key}", state.base_url),
        "key": key,
        "bucketName": "mock-bucket",
    })))
}

async fn put_object(
    State(state): State<MockState>,
    UrlPath(key): UrlPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if state.fail_storage.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if headers.contains_key("Authorization") {
        // Pre-signed URLs reject extra credentials.
        return StatusCode::BAD_REQUEST;
    }
    let content_type = headers
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.store().objects.insert(
        key,
        StoredObject {
            content_type,
            bytes: body.to_vec(),
        },
    );
    StatusCode::OK
}

async fn get_object(
    State(state): State<MockState>,
    UrlPath(key): UrlPath<String>,
) -> Result<Vec<u8>, StatusCode> {
    state
        .store()
        .objects
        .get(&key)
        .map(|o| o.bytes.clone())
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMetadata {
    s3_key: String,
    file_type: String,
    file_size: u64,
}

#[derive(Deserialize)]
struct NewSound {
    title: String,
    #[serde(default)]
    description: String,
    metadata: NewMetadata,
}

async fn create_sound(
    State(state): State<MockState>,
    auth: AuthUser,
    Json(input): Json<NewSound>,
) -> Result<(StatusCode, Json<Value>), Failure> {
    let title = input.title.trim();
    if title.is_empty() || title.chars().count() > 20 {
        return Err(Failure(
            StatusCode::BAD_REQUEST,
            json!({ "error": { "code": "invalid_request", "message": "Invalid title" } }),
        ));
    }
    let mut store = state.store();
    if !store.objects.contains_key(&input.metadata.s3_key) {
        return Err(Failure::message(StatusCode::BAD_REQUEST, "Object not uploaded"));
    }
    let sound = new_sound(
        &auth.user_id,
        title,
        &input.description,
        &input.metadata.s3_key,
        &input.metadata.file_type,
        input.metadata.file_size,
    );
    store.sounds.push(sound.clone());
    Ok((StatusCode::CREATED, Json(sound)))
}

fn owned_sound<'a>(store: &'a Store, id: &str, user_id: &str) -> Option<&'a Value> {
    store
        .sounds
        .iter()
        .find(|s| s["_id"] == id && s["user"] == user_id)
}

async fn sound_url(
    State(state): State<MockState>,
    auth: AuthUser,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<Value>, Failure> {
    let store = state.store();
    let sound = owned_sound(&store, &id, &auth.user_id)
        .ok_or_else(|| Failure::message(StatusCode::NOT_FOUND, "Sound not found"))?;
    let key = sound["metadata"]["s3Key"].as_str().unwrap_or_default();
    Ok(Json(json!({ "url": format!("{}/storage/{key}", state.base_url) })))
}

async fn delete_sound(
    State(state): State<MockState>,
    auth: AuthUser,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<Value>, Failure> {
    let mut store = state.store();
    if owned_sound(&store, &id, &auth.user_id).is_none() {
        return Err(Failure::message(StatusCode::NOT_FOUND, "Sound not found"));
    }
    store.sounds.retain(|s| s["_id"] != id.as_str());
    Ok(Json(json!({ "message": "Sound deleted" })))
}
