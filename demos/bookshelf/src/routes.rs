use std::sync::Arc;
use std::time::Duration;

use ambit_core::HttpError;
use ambit_data::{Page, Pageable};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::models::{check_sort, AuditEntry, Book, CreateBookRequest};
use crate::repository::Ctx;
use crate::service::LibraryService;

#[derive(Clone)]
pub struct AppState {
    pub library: Arc<LibraryService>,
    pub request_timeout: Duration,
}

impl AppState {
    /// Root context of one request.
    fn context(&self) -> Ctx {
        Ctx::background().with_timeout(self.request_timeout)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/books", get(list).post(create))
        .route("/books/{id}", get(show).delete(remove))
        .route("/books/{id}/history", get(history))
        .route("/books/{id}/lend", post(lend))
        .route("/books/{id}/return", post(give_back))
        .with_state(state)
}

async fn list(
    State(state): State<AppState>,
    Query(pageable): Query<Pageable>,
) -> Result<Json<Page<Book>>, HttpError> {
    check_sort(&pageable).map_err(HttpError::BadRequest)?;
    Ok(Json(state.library.list(&state.context(), &pageable).await?))
}

async fn show(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Book>, HttpError> {
    Ok(Json(state.library.get(&state.context(), id).await?))
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<AuditEntry>>, HttpError> {
    Ok(Json(state.library.history(&state.context(), id).await?))
}

async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBookRequest>,
) -> Result<(StatusCode, Json<Book>), HttpError> {
    body.validate().map_err(HttpError::BadRequest)?;
    let book = state.library.add(&state.context(), &body).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn lend(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Book>, HttpError> {
    Ok(Json(state.library.lend(&state.context(), id).await?))
}

async fn give_back(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Book>, HttpError> {
    Ok(Json(state.library.give_back(&state.context(), id).await?))
}

async fn remove(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, HttpError> {
    state.library.remove(&state.context(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
