//! HTTP routes.
//!
//! | Method | Path                 | Handler                      |
//! |--------|----------------------|------------------------------|
//! | POST   | `/api/create_user`   | run the provisioning workflow |
//! | GET    | `/api/list-folders`  | folder picker listing         |
//! | GET    | `/api/health`        | liveness                      |
//! | GET    | anything else        | static assets, SPA fallback   |

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use ftpgate_kernel::{FolderBrowser, FolderError, ProvisionConfig, Provisioner};
use ftpgate_types::{
    CreateUserRequest, CreateUserResponse, ErrorBody, HealthResponse, ListFoldersQuery,
};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reject::{MethodNotAllowed, PayloadTooLarge, UnsupportedMediaType};
use warp::{Filter, Rejection, Reply};

use crate::constants::MAX_BODY_BYTES;

/// Shared by every request.
pub struct AppState {
    provisioner: Arc<Provisioner>,
    folders: FolderBrowser,
}

impl AppState {
    pub fn new(provisioner: Provisioner) -> Arc<Self> {
        let folders = FolderBrowser::new(provisioner.jail().clone());
        Arc::new(Self {
            provisioner: Arc::new(provisioner),
            folders,
        })
    }

    pub fn from_config(config: &ProvisionConfig) -> Arc<Self> {
        Self::new(Provisioner::from_config(config))
    }
}

/// The full filter tree: API, static assets, rejection handling, CORS, and
/// request logging.
pub fn routes(
    state: Arc<AppState>,
    static_dir: Option<PathBuf>,
    cors_origins: Vec<String>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static {
    let cors = warp::cors()
        .allow_origins(cors_origins.iter().map(String::as_str))
        .allow_credentials(true)
        .allow_methods(["GET", "POST"])
        .allow_headers(["content-type"]);

    api(state)
        .or(static_files(static_dir))
        .recover(handle_rejection)
        .with(cors)
        .with(warp::log::custom(|info| {
            tracing::info!(
                method = %info.method(),
                path = info.path(),
                status = info.status().as_u16(),
                elapsed = ?info.elapsed(),
                "request"
            );
        }))
}

/// `/api/*` only, without CORS or logging.
pub fn api(state: Arc<AppState>) -> BoxedFilter<(warp::reply::Response,)> {
    let create_user = warp::path!("api" / "create_user")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and_then(create_user);

    let list_folders = warp::path!("api" / "list-folders")
        .and(warp::get())
        .and(with_state(state))
        .and(warp::query::<ListFoldersQuery>())
        .and_then(list_folders);

    let health = warp::path!("api" / "health")
        .and(warp::get())
        .map(|| warp::reply::json(&HealthResponse::ok()).into_response());

    create_user.or(list_folders).unify().or(health).unify().boxed()
}

fn with_state(state: Arc<AppState>) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Files under `dir`, falling back to `dir/index.html` for client-side routes.
fn static_files(dir: Option<PathBuf>) -> BoxedFilter<(warp::fs::File,)> {
    match dir {
        Some(dir) => {
            let index = dir.join("index.html");
            warp::get()
                .and(warp::fs::dir(dir).or(warp::fs::file(index)).unify())
                .boxed()
        }
        None => warp::any()
            .and_then(|| async { Err::<warp::fs::File, _>(warp::reject::not_found()) })
            .boxed(),
    }
}

async fn create_user(
    state: Arc<AppState>,
    request: CreateUserRequest,
) -> Result<warp::reply::Response, Infallible> {
    let username = request.username.clone();
    let provisioner = state.provisioner.clone();

    // Detached: a client that hangs up must not cancel a half-applied workflow.
    let task = tokio::spawn(async move { provisioner.provision(&request).await });

    let (status, body) = match task.await {
        Ok(Ok(report)) => (StatusCode::OK, CreateUserResponse::ok(report.message())),
        Ok(Err(failure)) if failure.error.is_validation() => (
            StatusCode::BAD_REQUEST,
            CreateUserResponse::failed(failure.error.to_string()),
        ),
        Ok(Err(_)) => (StatusCode::INTERNAL_SERVER_ERROR, generic_failure(&username)),
        Err(e) => {
            tracing::error!(%username, "provisioning task aborted: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, generic_failure(&username))
        }
    };

    Ok(warp::reply::with_status(warp::reply::json(&body), status).into_response())
}

fn generic_failure(username: &str) -> CreateUserResponse {
    CreateUserResponse::failed(format!("failed to create user {username}; see server logs"))
}

async fn list_folders(
    state: Arc<AppState>,
    query: ListFoldersQuery,
) -> Result<warp::reply::Response, Infallible> {
    let reply = match state.folders.list(query.path.as_deref()).await {
        Ok(listing) => warp::reply::with_status(warp::reply::json(&listing), StatusCode::OK),
        Err(FolderError::Jail(e)) => error_reply(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            tracing::error!(path = ?query.path, "folder listing failed: {}", e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    };
    Ok(reply.into_response())
}

fn error_reply(status: StatusCode, error: String) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&ErrorBody { error }), status)
}

/// Turn filter rejections into JSON errors.
pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        let body = CreateUserResponse::failed(format!("invalid request body: {e}"));
        return Ok(
            warp::reply::with_status(warp::reply::json(&body), StatusCode::BAD_REQUEST).into_response(),
        );
    }

    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if err.find::<PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large".to_string())
    } else if err.find::<UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/json".to_string())
    } else if err.find::<MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        tracing::error!("unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
    };

    Ok(error_reply(status, message).into_response())
}
