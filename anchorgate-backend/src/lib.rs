//! HTTP surface for the anchor gate.
//!
//! Plays the platform role around `anchorgate-core`: runs bootstrap once at
//! startup, owns the admin capability on behalf of the deployer, journals
//! the raw root and verifying-key bytes so a restarted process resumes with
//! the last committed values, and exposes the rotation and verification
//! entry points over HTTP.
//!
//! The admin capability is presented over the wire as a bearer secret
//! minted at bootstrap (or taken from the environment). Rotation handlers
//! only touch the in-process [`AdminCap`] after the secret check passes.

use std::{
    collections::HashMap,
    env, fs,
    net::SocketAddr,
    path::Path,
    sync::{Arc, Mutex},
};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rand::Rng;
use sled::Db;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use anchorgate_core::{
    bootstrap, rotate_root, rotate_verifying_key, verify_membership, AdminCap, KeyStore,
    RootStore,
};

const DB_PATH_ENV: &str = "ANCHORGATE_DB_PATH";
const DEFAULT_DB_PATH: &str = "data/anchorgate.db";
const ADMIN_SECRET_ENV: &str = "ANCHORGATE_ADMIN_SECRET";
const PORT_ENV: &str = "PORT";
const DEFAULT_PORT: u16 = 3000;

const CODE_UNAUTHORIZED: &str = "UNAUTHORIZED";
const CODE_BAD_ENCODING: &str = "BAD_ENCODING";
const CODE_STORE_ERROR: &str = "STORE_ERROR";

const JOURNAL_ROOT_KEY: &str = "root";
const JOURNAL_VK_KEY: &str = "vk";

/// Durable journal of the raw root and verifying-key bytes.
///
/// The prepared key is never journaled; it is re-derived from the raw
/// bytes at startup.
#[derive(Clone)]
pub struct StateJournal {
    backend: Arc<JournalBackend>,
}

enum JournalBackend {
    InMemory(Mutex<HashMap<&'static str, Vec<u8>>>),
    Persistent(Db),
}

impl StateJournal {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(JournalBackend::InMemory(Mutex::new(HashMap::new()))),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Self {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).unwrap_or_else(|err| {
                    panic!(
                        "failed to create directory for state journal at {}: {}",
                        path_ref.display(),
                        err
                    )
                });
            }
        }
        let db = sled::open(path_ref).unwrap_or_else(|err| {
            panic!(
                "failed to open state journal at {}: {}",
                path_ref.display(),
                err
            )
        });
        Self {
            backend: Arc::new(JournalBackend::Persistent(db)),
        }
    }

    pub fn from_env() -> Self {
        let path = env::var(DB_PATH_ENV).unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        Self::persistent(path)
    }

    fn put(&self, key: &'static str, value: &[u8]) -> Result<(), String> {
        match &*self.backend {
            JournalBackend::InMemory(map) => {
                map.lock()
                    .expect("state journal poisoned")
                    .insert(key, value.to_vec());
                Ok(())
            }
            JournalBackend::Persistent(db) => db
                .insert(key, value)
                .map(|_| ())
                .map_err(|err| format!("journal insert error: {err}")),
        }
    }

    fn get(&self, key: &'static str) -> Result<Option<Vec<u8>>, String> {
        match &*self.backend {
            JournalBackend::InMemory(map) => Ok(map
                .lock()
                .expect("state journal poisoned")
                .get(key)
                .cloned()),
            JournalBackend::Persistent(db) => db
                .get(key)
                .map(|value| value.map(|ivec| ivec.to_vec()))
                .map_err(|err| format!("journal get error: {err}")),
        }
    }
}

struct AdminGrant {
    cap: AdminCap,
    secret: String,
}

#[derive(Clone)]
pub struct AppState {
    admin: Arc<AdminGrant>,
    root_store: Arc<RootStore>,
    key_store: Arc<KeyStore>,
    journal: StateJournal,
}

impl AppState {
    /// Bootstrap from the environment: persistent journal, admin secret
    /// from `ANCHORGATE_ADMIN_SECRET` or freshly minted.
    pub fn from_env() -> Self {
        let secret = match env::var(ADMIN_SECRET_ENV) {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => {
                let secret = mint_admin_secret();
                // The operator console is the deployer; this is the one-time
                // delivery of the capability secret.
                tracing::info!("minted admin secret: {secret}");
                secret
            }
        };
        Self::with_components(StateJournal::from_env(), secret)
    }

    /// Run the one-time bootstrap and rehydrate the stores from the
    /// journal.
    ///
    /// A journaled root is re-applied verbatim. Journaled verifying-key
    /// bytes are re-processed through the rotation entry point; if they no
    /// longer prepare, the key stays degenerate (every verification fails,
    /// none crash) and a warning is logged.
    pub fn with_components(journal: StateJournal, admin_secret: String) -> Self {
        let (cap, root_store, key_store) = bootstrap();

        match journal.get(JOURNAL_ROOT_KEY) {
            Ok(Some(root)) => rotate_root(&cap, &root_store, root),
            Ok(None) => {}
            Err(err) => tracing::warn!("failed to read journaled root: {err}"),
        }
        match journal.get(JOURNAL_VK_KEY) {
            Ok(Some(vk_bytes)) => {
                if let Err(err) = rotate_verifying_key(&cap, &key_store, &vk_bytes) {
                    tracing::warn!("journaled verifying key no longer prepares: {err}");
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!("failed to read journaled verifying key: {err}"),
        }

        Self {
            admin: Arc::new(AdminGrant {
                cap,
                secret: admin_secret,
            }),
            root_store: Arc::new(root_store),
            key_store: Arc::new(key_store),
            journal,
        }
    }

    fn require_admin(&self, headers: &HeaderMap) -> Result<&AdminCap, ApiError> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::unauthorized("missing admin bearer secret"))?;
        if presented != self.admin.secret {
            return Err(ApiError::unauthorized("admin secret mismatch"));
        }
        Ok(&self.admin.cap)
    }
}

fn mint_admin_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, CODE_UNAUTHORIZED, message)
    }

    fn store(err: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, CODE_STORE_ERROR, err)
    }
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(serde::Serialize)]
struct StatusResponse {
    root: String,
    root_set: bool,
    verifying_key_set: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    verifying_key_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_input_len: Option<usize>,
}

#[derive(serde::Deserialize)]
struct RotateRootRequest {
    root: String,
}

#[derive(serde::Deserialize)]
struct RotateKeyRequest {
    verifying_key: String,
}

#[derive(serde::Serialize)]
struct RotateResponse {
    ok: bool,
}

#[derive(serde::Deserialize)]
struct VerifyRequest {
    proof: String,
}

#[derive(serde::Serialize)]
struct VerifyResponse {
    valid: bool,
    error: Option<String>,
    error_code: Option<&'static str>,
}

impl VerifyResponse {
    fn success() -> Self {
        Self {
            valid: true,
            error: None,
            error_code: None,
        }
    }

    fn failure(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
            error_code: Some(code),
        }
    }
}

fn decode_hex_field(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    let trimmed = value.trim();
    let without_prefix = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(without_prefix).map_err(|err| {
        ApiError::bad_request(CODE_BAD_ENCODING, format!("invalid hex in '{field}': {err}"))
    })
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let root = state.root_store.current();
    let vk_bytes = state.key_store.raw_bytes();
    Json(StatusResponse {
        root: hex::encode(&root),
        root_set: !root.is_empty(),
        verifying_key_set: !state.key_store.is_degenerate(),
        verifying_key_hash: (!vk_bytes.is_empty())
            .then(|| blake3::hash(&vk_bytes).to_hex().to_string()),
        public_input_len: state.key_store.public_input_len(),
    })
}

async fn rotate_root_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RotateRootRequest>,
) -> Result<Json<RotateResponse>, ApiError> {
    let cap = state.require_admin(&headers)?;
    let new_root = decode_hex_field("root", &req.root)?;

    rotate_root(cap, &state.root_store, new_root.clone());
    state
        .journal
        .put(JOURNAL_ROOT_KEY, &new_root)
        .map_err(ApiError::store)?;
    tracing::info!(len = new_root.len(), "root rotated");
    Ok(Json(RotateResponse { ok: true }))
}

async fn rotate_key_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RotateKeyRequest>,
) -> Result<Json<RotateResponse>, ApiError> {
    let cap = state.require_admin(&headers)?;
    let vk_bytes = decode_hex_field("verifying_key", &req.verifying_key)?;

    rotate_verifying_key(cap, &state.key_store, &vk_bytes)
        .map_err(|err| ApiError::bad_request(err.error_code(), err.to_string()))?;
    state
        .journal
        .put(JOURNAL_VK_KEY, &vk_bytes)
        .map_err(ApiError::store)?;
    tracing::info!(len = vk_bytes.len(), "verifying key rotated");
    Ok(Json(RotateResponse { ok: true }))
}

async fn verify_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let proof = decode_hex_field("proof", &req.proof)?;
    match verify_membership(&state.root_store, &state.key_store, &proof) {
        Ok(()) => Ok(Json(VerifyResponse::success())),
        // One uniform signal for everything the gate rejects.
        Err(err) => Ok(Json(VerifyResponse::failure(
            err.error_code(),
            "proof verification failed",
        ))),
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/gate/status", get(get_status))
        .route("/gate/root", post(rotate_root_handler))
        .route("/gate/verifying-key", post(rotate_key_handler))
        .route("/gate/verify", post(verify_handler))
        .with_state(state)
}

pub async fn serve() {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = app_router(AppState::from_env()).layer(cors);

    let port: u16 = env::var(PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("anchor gate listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("shutdown signal received");
}
