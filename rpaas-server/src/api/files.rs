//! Extra files
//!
//! Bulk uploads arrive as multipart parts named `files`; the part's file name
//! becomes the extra file name.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rpaas_models::{ExtraFile, RpaasError};
use tracing::info;

use super::binder::Uploads;
use super::error::ApiResult;
use super::resolver::Target;
use super::AppState;

const FILES_PART: &str = "files";

fn extra_files(uploads: &Uploads, max_size: usize) -> ApiResult<Vec<ExtraFile>> {
    let files = uploads
        .files(FILES_PART)
        .map(|upload| {
            let file = ExtraFile {
                name: upload.file_name.clone().unwrap_or_default(),
                content: upload.content.to_vec(),
            };
            file.validate(max_size).map(|_| file)
        })
        .collect::<Result<Vec<_>, _>>()?;
    if files.is_empty() {
        return Err(RpaasError::validation("at least one file is required").into());
    }
    Ok(files)
}

pub async fn list(Target(manager): Target, Path(instance): Path<String>) -> ApiResult<Json<Vec<String>>> {
    let files = manager.get_extra_files(&instance).await?;
    Ok(Json(files.into_iter().map(|f| f.name).collect()))
}

pub async fn get(
    Target(manager): Target,
    Path((instance, name)): Path<(String, String)>,
) -> ApiResult<Json<ExtraFile>> {
    let name = name.trim_start_matches('/');
    let file = manager
        .get_extra_files(&instance)
        .await?
        .into_iter()
        .find(|f| f.name == name)
        .ok_or_else(|| RpaasError::not_found(format!("file \"{}\" does not exist", name)))?;
    Ok(Json(file))
}

pub async fn add(
    State(state): State<AppState>,
    Target(manager): Target,
    Path(instance): Path<String>,
    uploads: Uploads,
) -> ApiResult<StatusCode> {
    let files = extra_files(&uploads, state.config.extra_file_max_size)?;
    let count = files.len();
    manager.create_extra_files(&instance, files).await?;
    info!(instance = %instance, count, "Extra files added");
    Ok(StatusCode::CREATED)
}

pub async fn update(
    State(state): State<AppState>,
    Target(manager): Target,
    Path(instance): Path<String>,
    uploads: Uploads,
) -> ApiResult<StatusCode> {
    let files = extra_files(&uploads, state.config.extra_file_max_size)?;
    manager.update_extra_files(&instance, files).await?;
    Ok(StatusCode::OK)
}

pub async fn remove(
    Target(manager): Target,
    Path((instance, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let name = name.trim_start_matches('/');
    rpaas_models::extra_files::validate_file_name(name)?;
    manager.delete_extra_file(&instance, name).await?;
    Ok(StatusCode::OK)
}
