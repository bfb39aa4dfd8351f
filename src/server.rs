//!
//! estoque HTTP/WS server
//! ----------------------
//! This module defines the Axum-based HTTP API and WebSocket interface.
//!
//! Responsibilities:
//! - Registration and login endpoints backed by the `security` module.
//! - Token-gated inventory creation: auth, multipart collection, validation,
//!   attachment intake, persistence and broadcast, in that order.
//! - Public inventory listing and attachment serving.
//! - WebSocket endpoint wired to the broadcast hub, with a greeting frame per
//!   connection and a client-to-all message relay.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::events::{self, EventHub, ServerEvent};
use crate::storage::{NewMercadoria, SharedStore, StoreError};
use crate::token::TokenSigner;
use crate::uploads::{self, UploadArea};
use crate::{auth, security};

/// Runtime configuration, resolved from the environment in `main`.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub secret: String,
    pub db_file: String,
    pub upload_dir: String,
}

/// Shared server state injected into all handlers.
///
/// Holds the store handle, the upload area, the broadcast hub and the token
/// signer. Everything is cheap to clone; the store and hub share their
/// internals across clones.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub uploads: UploadArea,
    pub hub: EventHub,
    pub tokens: TokenSigner,
}

impl AppState {
    pub fn new(store: SharedStore, uploads: UploadArea, tokens: TokenSigner) -> Self {
        Self { store, uploads, hub: EventHub::new(), tokens }
    }
}

fn log_startup_paths(config: &ServiceConfig) {
    let cwd = std::env::current_dir().ok();
    info!(
        target: "startup",
        "estoque starting. cwd={:?}, http_port={}, db_file='{}', upload_dir='{}'",
        cwd, config.http_port, config.db_file, config.upload_dir
    );
    let db_exists = std::path::Path::new(&config.db_file).exists();
    let uploads_exist = std::path::Path::new(&config.upload_dir).exists();
    info!(
        target: "startup",
        "Path existence: db_file_exists={}, upload_dir_exists={}",
        db_exists, uploads_exist
    );
}

/// Start the HTTP/WS server bound to the configured port.
///
/// Opens the store, mounts all routes and serves until the process ends. The
/// upload directory is not created here; attachment intake creates it on
/// first use.
pub async fn run_with_config(config: ServiceConfig) -> anyhow::Result<()> {
    log_startup_paths(&config);

    let store = SharedStore::open(&config.db_file)
        .with_context(|| format!("While opening store at: {}", config.db_file))?;
    info!(target: "startup", "Store ready at '{}'", store.db_path().display());
    let uploads = UploadArea::new(&config.upload_dir);
    let state = AppState::new(store, uploads, TokenSigner::new(&config.secret));

    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Mount all HTTP and WebSocket routes over the given state.
///
/// The default body limit is lifted because attachment sizes are not
/// validated anywhere; CORS is wide open for browser clients on other
/// origins.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "estoque ok" }))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/mercadorias", post(create_mercadoria).get(list_mercadorias))
        .route("/uploads/{name}", get(serve_upload))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Login/registration body. Fields are optional so that absent keys and
/// explicit JSON nulls both land on the same missing-credentials reply
/// instead of a deserialization rejection.
#[derive(Debug, Deserialize)]
struct CredentialsPayload {
    username: Option<String>,
    password: Option<String>,
}

impl CredentialsPayload {
    fn fields(self) -> (String, String) {
        (self.username.unwrap_or_default(), self.password.unwrap_or_default())
    }
}

fn error_reply(err: &AppError) -> (StatusCode, Json<serde_json::Value>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "message": err.message() })))
}

fn missing_credentials() -> AppError {
    AppError::validation("missing_credentials", "Nome de usuário e senha são obrigatórios.")
}

async fn register(State(state): State<AppState>, Json(payload): Json<CredentialsPayload>) -> impl IntoResponse {
    let (username, password) = payload.fields();
    if username.is_empty() || password.is_empty() {
        return error_reply(&missing_credentials());
    }
    match security::register(&state.store, &username, &password) {
        Ok(account) => {
            info!(target: "estoque::http", "registered user '{}' (id={})", account.username, account.id);
            (StatusCode::OK, Json(json!({ "message": "Usuário registrado com sucesso!" })))
        }
        Err(e) => error_reply(&e),
    }
}

async fn login(State(state): State<AppState>, Json(payload): Json<CredentialsPayload>) -> impl IntoResponse {
    let (username, password) = payload.fields();
    if username.is_empty() || password.is_empty() {
        return error_reply(&missing_credentials());
    }
    let Some(account) = security::verify_login(&state.store, &username, &password) else {
        return error_reply(&AppError::auth("bad_credentials", "Credenciais inválidas."));
    };
    match state.tokens.issue(&account.username, account.id) {
        Ok(token) => {
            info!(target: "estoque::http", "login ok for '{}'", account.username);
            (StatusCode::OK, Json(json!({ "token": token })))
        }
        Err(e) => {
            error!("login token issue failed: {e}");
            error_reply(&AppError::internal("token_issue", "Erro interno no servidor."))
        }
    }
}

/// Raw multipart fields of a creation request, collected before validation.
/// Numbers stay as strings here; parsing is part of validation.
#[derive(Default)]
struct MercadoriaForm {
    name: Option<String>,
    price: Option<String>,
    height: Option<String>,
    width: Option<String>,
    status: Option<String>,
    /// Original client file name and buffered bytes. Buffering keeps the
    /// attachment out of the upload directory until validation has passed.
    image: Option<(String, Vec<u8>)>,
}

fn bad_multipart() -> AppError {
    AppError::validation("bad_multipart", "Todos os campos são obrigatórios.")
}

fn missing_fields() -> AppError {
    AppError::validation("missing_fields", "Todos os campos são obrigatórios.")
}

fn invalid_numbers() -> AppError {
    AppError::validation("invalid_numbers", "Preço, altura e largura devem ser valores numéricos válidos.")
}

async fn collect_form(multipart: &mut Multipart) -> Result<MercadoriaForm, AppError> {
    let mut form = MercadoriaForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|_| bad_multipart())? {
        let Some(name) = field.name().map(|s| s.to_string()) else { continue };
        match name.as_str() {
            "name" => form.name = Some(field.text().await.map_err(|_| bad_multipart())?),
            "price" => form.price = Some(field.text().await.map_err(|_| bad_multipart())?),
            "height" => form.height = Some(field.text().await.map_err(|_| bad_multipart())?),
            "width" => form.width = Some(field.text().await.map_err(|_| bad_multipart())?),
            "status" => form.status = Some(field.text().await.map_err(|_| bad_multipart())?),
            "image" => {
                let original = field.file_name().unwrap_or("arquivo").to_string();
                let bytes = field.bytes().await.map_err(|_| bad_multipart())?;
                form.image = Some((original, bytes.to_vec()));
            }
            // Unknown fields are drained by the next next_field call.
            _ => {}
        }
    }
    Ok(form)
}

/// Turn the collected form into a validated creation input plus the buffered
/// attachment, if one was sent.
fn parse_form(form: MercadoriaForm) -> Result<(NewMercadoria, Option<(String, Vec<u8>)>), AppError> {
    let (Some(name), Some(price), Some(height), Some(width), Some(status)) =
        (form.name, form.price, form.height, form.width, form.status)
    else {
        return Err(missing_fields());
    };
    if name.is_empty() || price.is_empty() || height.is_empty() || width.is_empty() || status.is_empty() {
        return Err(missing_fields());
    }
    let price: f64 = price.trim().parse().map_err(|_| invalid_numbers())?;
    let height: f64 = height.trim().parse().map_err(|_| invalid_numbers())?;
    let width: f64 = width.trim().parse().map_err(|_| invalid_numbers())?;
    Ok((NewMercadoria { name, price, height, width, status, image: None }, form.image))
}

/// Map store failures from the creation path onto the wire contract.
fn mercadoria_error(e: StoreError) -> AppError {
    match e {
        StoreError::MissingField(_) => missing_fields(),
        StoreError::InvalidNumber(_) => invalid_numbers(),
        StoreError::Persist(err) => {
            error!("mercadoria persist failed: {err:#}");
            AppError::storage("db_write", "Erro ao cadastrar mercadoria.")
        }
        StoreError::DuplicateUser => AppError::internal("unexpected", "Erro ao cadastrar mercadoria."),
    }
}

async fn create_mercadoria(State(state): State<AppState>, req: Request) -> impl IntoResponse {
    // Auth gate runs first; rejected requests touch neither the body nor the
    // store. The multipart extractor only comes into play afterwards.
    let claims = match auth::require_claims(&state.tokens, req.headers()) {
        Ok(c) => c,
        Err(e) => return error_reply(&e),
    };
    let mut multipart = match Multipart::from_request(req, &()).await {
        Ok(m) => m,
        Err(_) => return error_reply(&bad_multipart()),
    };

    let form = match collect_form(&mut multipart).await {
        Ok(f) => f,
        Err(e) => return error_reply(&e),
    };
    let (mut new, image) = match parse_form(form) {
        Ok(v) => v,
        Err(e) => return error_reply(&e),
    };
    // Validate before the attachment is written, so a rejected request never
    // leaves an orphan file behind.
    if let Err(e) = new.validate() {
        return error_reply(&mercadoria_error(e));
    }

    if let Some((original, bytes)) = image {
        match state.uploads.save(&original, &bytes).await {
            Ok(stored) => new.image = Some(stored),
            Err(e) => {
                error!("attachment save failed: {e:#}");
                return error_reply(&AppError::storage("attachment_write", "Erro ao cadastrar mercadoria."));
            }
        }
    }

    let inserted = {
        let mut guard = state.store.0.lock();
        guard.insert_mercadoria(new)
    };
    match inserted {
        Ok(row) => {
            // Best-effort broadcast; the entry is already persisted.
            state.hub.emit(ServerEvent::NewMercadoria(row.clone()));
            info!(target: "estoque::http", "mercadoria id={} created by '{}'", row.id, claims.sub);
            (
                StatusCode::CREATED,
                Json(json!({ "message": "Mercadoria cadastrada com sucesso!", "id": row.id })),
            )
        }
        Err(e) => error_reply(&mercadoria_error(e)),
    }
}

async fn list_mercadorias(State(state): State<AppState>) -> impl IntoResponse {
    let rows = {
        let guard = state.store.0.lock();
        guard.all_mercadorias()
    };
    match serde_json::to_value(&rows) {
        Ok(v) => (StatusCode::OK, Json(v)),
        Err(e) => {
            error!("list mercadorias failed: {e}");
            error_reply(&AppError::storage("db_read", "Erro ao buscar mercadorias."))
        }
    }
}

async fn serve_upload(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let Some(path) = state.uploads.resolve(&name) else {
        return (StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new());
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(uploads::content_type_for(&name)));
            (StatusCode::OK, headers, bytes)
        }
        Err(e) => {
            debug!(target: "estoque::http", "upload read failed for '{}': {}", name, e);
            (StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new())
        }
    }
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection task: greet, subscribe to the hub, then pump broadcasts out
/// and client frames in until either side closes.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    use futures_util::StreamExt;

    if socket.send(Message::Text(events::welcome_frame().into())).await.is_err() {
        return;
    }
    let mut rx = state.hub.subscribe();
    info!(target: "estoque::ws", "observer connected ({} active)", state.hub.observer_count());

    loop {
        tokio::select! {
            delivered = rx.recv() => {
                match delivered {
                    Ok(event) => {
                        if socket.send(Message::Text(event.to_frame().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(target: "estoque::ws", "observer lagged, skipped {} event(s)", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handle_client_frame(&state, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(target: "estoque::ws", "socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
    info!(target: "estoque::ws", "observer disconnected ({} active)", state.hub.observer_count().saturating_sub(1));
}

/// Client frames use the same `{"event", "data"}` envelope the server sends.
/// Only `sendMessage` does anything; it is relayed to every connection as
/// `newMessage`, the sender included. Everything else is ignored.
fn handle_client_frame(state: &AppState, text: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        debug!(target: "estoque::ws", "ignoring non-JSON frame");
        return;
    };
    match value.get("event").and_then(|e| e.as_str()) {
        Some("sendMessage") => {
            let data = value.get("data").cloned().unwrap_or(serde_json::Value::Null);
            state.hub.emit(ServerEvent::NewMessage(data));
        }
        other => debug!(target: "estoque::ws", "ignoring frame event={:?}", other),
    }
}
