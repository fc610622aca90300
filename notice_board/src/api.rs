use crate::{
    attachments::{self, AttachmentStore, LocalAttachmentStore},
    auth::{self, Claims},
    board::{Board, Feed},
    captcha::Challenge,
    clock::{Clock, SystemClock},
    config::Config,
    error::{BoardError, Result},
    housekeeping,
    identity::{LoginRequest, Session, SignupRequest},
    mailer::{HttpMailer, LogMailer, Mailer},
    oauth::{IdentityProvider, UserInfoProvider},
    storage::{BackgroundSnapshots, JsonSnapshots, Persistence},
    views::NoticeView,
};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    body::StreamBody,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use board_api::{BoardEvent, FilterState, Notice, NoticeDraft, UserProfile};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::io::ReaderStream;

/// Headroom above the attachment ceiling for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// External collaborators the board talks to.
pub struct Ports {
    pub mailer: Arc<dyn Mailer>,
    pub identity_provider: Option<Arc<dyn IdentityProvider>>,
    pub clock: Arc<dyn Clock>,
    /// Defaults to JSON snapshots in the data directory.
    pub persistence: Option<Box<dyn Persistence>>,
    /// Defaults to the local store under `<data_dir>/attachments`.
    pub attachments: Option<Arc<dyn AttachmentStore>>,
}

impl Ports {
    /// Adapters selected by configuration.
    pub fn from_config(config: &Config) -> Self {
        let mailer: Arc<dyn Mailer> = match &config.mail {
            Some(mail) => Arc::new(HttpMailer::new(mail.clone())),
            None => {
                tracing::warn!("no [mail] section, one-time codes will only be logged");
                Arc::new(LogMailer)
            }
        };
        let identity_provider = config.oauth.as_ref().map(|o| {
            Arc::new(UserInfoProvider::new(o.userinfo_url.clone())) as Arc<dyn IdentityProvider>
        });
        Self {
            mailer,
            identity_provider,
            clock: Arc::new(SystemClock),
            persistence: None,
            attachments: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub board: Arc<Mutex<Board>>,
    pub snapshots: BackgroundSnapshots,
    pub attachments: Arc<dyn AttachmentStore>,
    pub mailer: Arc<dyn Mailer>,
    pub identity_provider: Option<Arc<dyn IdentityProvider>>,
    pub event_tx: broadcast::Sender<String>,
    pub config: Config,
    pub jwt_secret: Arc<Vec<u8>>,
    pub login_limiter: auth::LoginRateLimiter,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let ports = Ports::from_config(&config);
        Self::with_ports(config, ports).await
    }

    pub async fn with_ports(config: Config, ports: Ports) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let attachments: Arc<dyn AttachmentStore> = match ports.attachments {
            Some(store) => store,
            None => Arc::new(
                LocalAttachmentStore::new(config.data_dir.join("attachments"), &config.public_url)
                    .await?,
            ),
        };
        let persistence: Box<dyn Persistence> = match ports.persistence {
            Some(p) => p,
            None => Box::new(JsonSnapshots::new(&config.data_dir)?),
        };
        let snapshots = BackgroundSnapshots::spawn(persistence);
        let board = Board::open(
            Box::new(snapshots.clone()),
            ports.clock,
            config.admin.clone(),
        )?;
        let jwt_secret = auth::load_or_create_secret(&config.data_dir)?;
        let (tx, _rx) = broadcast::channel(100);
        Ok(Self {
            board: Arc::new(Mutex::new(board)),
            snapshots,
            attachments,
            mailer: ports.mailer,
            identity_provider: ports.identity_provider,
            event_tx: tx,
            config,
            jwt_secret: Arc::new(jwt_secret),
            login_limiter: auth::LoginRateLimiter::new(5, std::time::Duration::from_secs(60)),
        })
    }

    /// Push an event to connected sockets. No subscribers is fine.
    pub fn publish(&self, event: BoardEvent) {
        match serde_json::to_string(&event) {
            Ok(text) => {
                let _ = self.event_tx.send(text);
            }
            Err(e) => tracing::error!(error = %e, "failed to encode event"),
        }
    }

    fn issue_token(&self, session: &Session) -> Result<String> {
        Ok(auth::issue_jwt(&self.jwt_secret, session, Duration::hours(24))?)
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes() as usize + MULTIPART_OVERHEAD;
    let protected = Router::new()
        .route("/api/me", get(me))
        .route("/api/token/refresh", post(refresh_token))
        .route("/api/notices", get(list_notices).post(create_notice))
        .route("/api/notices/reorder", post(reorder_notices))
        .route("/api/notices/:id", put(update_notice).delete(delete_notice))
        .route("/api/notices/:id/like", post(toggle_like))
        .route("/api/notices/:id/bookmark", post(toggle_bookmark))
        .route("/api/notices/:id/pin", post(toggle_pin))
        .route(
            "/api/notices/:id/attachment",
            post(upload_attachment).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/feed", get(feed))
        .route("/api/feed/read-all", post(mark_all_read))
        .route("/api/feed/:id/read", post(mark_read))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .route("/api/captcha", get(captcha))
        .route("/api/login", post(login))
        .route("/api/signup/otp", post(signup_otp))
        .route("/api/signup/verify", post(signup_verify))
        .route("/api/reset/otp", post(reset_otp))
        .route("/api/reset/verify", post(reset_verify))
        .route("/api/oauth/login", post(oauth_login))
        .route("/attachments/:key", get(serve_attachment))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn bearer_token<B>(req: &Request<B>) -> Option<String> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    // browsers cannot set headers on websocket upgrades
    req.uri().query().and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
    })
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> std::result::Result<Response, BoardError> {
    let token = bearer_token(&req).ok_or(BoardError::Unauthenticated)?;
    let claims =
        auth::verify_jwt(&state.jwt_secret, &token).map_err(|_| BoardError::Unauthenticated)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[derive(Serialize)]
struct LoginResp {
    token: String,
    user: UserProfile,
}

/// Run argon2 work on the blocking pool, away from the board lock.
async fn off_lock<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BoardError::Internal(e.into()))?
}

fn login_response(state: &AppState, session: &Session) -> Result<Json<LoginResp>> {
    let user = state.board.lock().profile(session)?;
    let token = state.issue_token(session)?;
    Ok(Json(LoginResp { token, user }))
}

async fn captcha(State(state): State<AppState>) -> Json<Challenge> {
    Json(state.board.lock().issue_captcha())
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResp>> {
    if !state.login_limiter.check(&req.identifier).await {
        return Err(BoardError::RateLimited);
    }
    let check = state.board.lock().login(&req)?;
    let secret = req.secret;
    let session = off_lock(move || check.finish(&secret)).await?;
    tracing::info!(user = %session.username, "login");
    login_response(&state, &session)
}

#[derive(Serialize)]
struct OtpSent {
    email: String,
}

async fn deliver(state: &AppState, email: &str, name: &str, otp: &str) -> Result<()> {
    state.mailer.send_otp(email, name, otp).await.map_err(|e| {
        tracing::warn!(to = email, error = %e, "otp dispatch failed");
        BoardError::Remote("could not send the verification email".into())
    })
}

async fn signup_otp(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse> {
    let candidate = state.board.lock().prepare_signup(&req)?;
    let pending = off_lock(move || candidate.seal()).await?;
    let delivery = pending.delivery();
    deliver(&state, &delivery.email, &delivery.name, &delivery.otp).await?;
    state.board.lock().store_signup(pending);
    Ok((
        StatusCode::ACCEPTED,
        Json(OtpSent {
            email: delivery.email,
        }),
    ))
}

#[derive(Deserialize)]
struct VerifyReq {
    email: String,
    otp: String,
}

async fn signup_verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyReq>,
) -> Result<impl IntoResponse> {
    let profile = state.board.lock().verify_signup(&req.email, &req.otp)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

#[derive(Deserialize)]
struct ResetReq {
    email: String,
}

async fn reset_otp(
    State(state): State<AppState>,
    Json(req): Json<ResetReq>,
) -> Result<impl IntoResponse> {
    let pending = state.board.lock().prepare_reset(&req.email)?;
    let delivery = pending.delivery();
    deliver(&state, &delivery.email, &delivery.name, &delivery.otp).await?;
    state.board.lock().store_reset(pending);
    Ok((
        StatusCode::ACCEPTED,
        Json(OtpSent {
            email: delivery.email,
        }),
    ))
}

#[derive(Deserialize)]
struct ResetVerifyReq {
    email: String,
    otp: String,
    password: String,
    confirm: String,
}

async fn reset_verify(
    State(state): State<AppState>,
    Json(req): Json<ResetVerifyReq>,
) -> Result<StatusCode> {
    state
        .board
        .lock()
        .check_reset(&req.email, &req.otp, &req.password, &req.confirm)?;
    let secret = req.password;
    let hash = off_lock(move || Ok(auth::hash_passphrase(&secret)?)).await?;
    state
        .board
        .lock()
        .complete_reset(&req.email, &req.otp, hash)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct OAuthReq {
    access_token: String,
}

async fn oauth_login(
    State(state): State<AppState>,
    Json(req): Json<OAuthReq>,
) -> Result<Json<LoginResp>> {
    let provider = state
        .identity_provider
        .clone()
        .ok_or_else(|| BoardError::Remote("sign-in provider not configured".into()))?;
    let profile = provider.resolve(&req.access_token).await.map_err(|e| {
        tracing::warn!(error = %e, "provider sign-in failed");
        BoardError::Remote("sign-in provider rejected the request".into())
    })?;
    let session = state.board.lock().oauth_login(&profile)?;
    login_response(&state, &session)
}

async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfile>> {
    Ok(Json(state.board.lock().profile(&claims.session())?))
}

async fn refresh_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<LoginResp>> {
    login_response(&state, &claims.session())
}

async fn list_notices(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(filter): Query<FilterState>,
) -> Json<Vec<NoticeView>> {
    Json(state.board.lock().ranked(&claims.session(), &filter))
}

async fn create_notice(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(draft): Json<NoticeDraft>,
) -> Result<impl IntoResponse> {
    let notice = state.board.lock().create_notice(&claims.session(), draft)?;
    state.publish(BoardEvent::NoticeCreated {
        id: notice.id,
        title: notice.title.clone(),
        dept: notice.dept,
    });
    Ok((StatusCode::CREATED, Json(notice)))
}

async fn update_notice(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(draft): Json<NoticeDraft>,
) -> Result<Json<Notice>> {
    let notice = state
        .board
        .lock()
        .update_notice(&claims.session(), id, draft)?;
    state.publish(BoardEvent::NoticeUpdated { id });
    Ok(Json(notice))
}

async fn delete_notice(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let notice = state.board.lock().delete_notice(&claims.session(), id)?;
    state.publish(BoardEvent::NoticeDeleted { id });
    if let Some(key) = notice
        .attachment
        .as_deref()
        .and_then(attachments::key_from_url)
        .map(str::to_string)
    {
        let store = state.attachments.clone();
        tokio::spawn(async move {
            if let Err(e) = store.delete(&key).await {
                tracing::warn!(%key, error = %e, "attachment cleanup failed");
            }
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct ToggleResp {
    active: bool,
}

async fn toggle_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<ToggleResp>> {
    let active = state.board.lock().toggle_like(&claims.session(), id)?;
    Ok(Json(ToggleResp { active }))
}

async fn toggle_bookmark(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<ToggleResp>> {
    let active = state.board.lock().toggle_bookmark(&claims.session(), id)?;
    Ok(Json(ToggleResp { active }))
}

async fn toggle_pin(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<ToggleResp>> {
    let active = state.board.lock().toggle_pin(&claims.session(), id)?;
    state.publish(BoardEvent::NoticeUpdated { id });
    Ok(Json(ToggleResp { active }))
}

#[derive(Deserialize)]
struct ReorderReq {
    source: usize,
    dest: usize,
    #[serde(default)]
    filter: FilterState,
}

async fn reorder_notices(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReorderReq>,
) -> Result<StatusCode> {
    state
        .board
        .lock()
        .reorder(&claims.session(), req.source, req.dest, &req.filter)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_attachment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| BoardError::AttachmentRejected(e.to_string()))?
        .ok_or_else(|| BoardError::validation("no file in request"))?;
    let name = field
        .file_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "file".into());
    let data = field
        .bytes()
        .await
        .map_err(|e| BoardError::AttachmentRejected(e.to_string()))?;
    let size = data.len() as u64;
    attachments::check_upload(&name, size, state.config.max_upload_bytes())?;

    let notice = state.board.lock().begin_upload(&claims.session(), id)?;
    let key = attachments::key_for(id, &name);
    let task_state = state.clone();
    tokio::spawn(async move {
        match task_state.attachments.upload(&key, data).await {
            Ok(url) => {
                let patched = task_state
                    .board
                    .lock()
                    .finish_upload(id, url.clone(), name, size);
                if patched {
                    task_state.publish(BoardEvent::AttachmentReady { id, url });
                } else {
                    tracing::info!(id, %key, "notice deleted during upload");
                }
            }
            Err(e) => {
                tracing::warn!(id, %key, error = %e, "attachment upload failed");
                task_state.board.lock().fail_upload(id);
                task_state.publish(BoardEvent::AttachmentFailed {
                    id,
                    reason: "upload failed".into(),
                });
            }
        }
    });
    Ok((StatusCode::ACCEPTED, Json(notice)))
}

async fn serve_attachment(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> std::result::Result<impl IntoResponse, StatusCode> {
    if !attachments::is_valid_key(&key) {
        return Err(StatusCode::NOT_FOUND);
    }
    let file = match state.attachments.open(&key).await {
        Ok(Some(file)) => file,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::warn!(%key, error = %e, "failed to open attachment");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let mime = mime_guess::from_path(&key)
        .first_or_octet_stream()
        .to_string();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&mime)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    Ok((headers, StreamBody::new(ReaderStream::new(file))))
}

async fn feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<Feed> {
    Json(state.board.lock().feed(&claims.session()))
}

#[derive(Serialize)]
struct MarkedResp {
    marked: usize,
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Json<MarkedResp> {
    let added = state.board.lock().mark_read(&claims.session(), id);
    Json(MarkedResp {
        marked: usize::from(added),
    })
}

async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<MarkedResp> {
    let marked = state.board.lock().mark_all_read(&claims.session());
    Json(MarkedResp { marked })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(stream: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = stream.split();
    let mut rx = BroadcastStream::new(state.event_tx.subscribe());
    if sender.send(Message::Text("hello".into())).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            event = rx.next() => match event {
                Some(Ok(text)) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => tracing::debug!(error = %e, "socket lagged behind events"),
                None => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Run the HTTP server with the given configuration.
pub async fn run_http_server(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    housekeeping::run_housekeeping(state.clone());
    tracing::info!(%addr, "notice board listening");
    axum::Server::bind(&addr)
        .serve(build_router(state.clone()).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    state.snapshots.flush().await;
    tracing::info!("notice board stopped");
    Ok(())
}
