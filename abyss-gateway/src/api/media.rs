//! Thin REST adapters over C4 for the `Videos/`, `Images/`, and `Live/` reserved
//! subtrees. Per spec.md §1 these routes are deliberately dumb: no MIME sniffing,
//! no video summary schema, no natural sort, no bookmark editor, no rate limiting.
//! Every handler here authorizes through [`crate::authz::AttributeStore`] and then
//! hands back whatever bytes or text C4 already cleared, unmodified.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use camino::Utf8PathBuf;
use serde::Deserialize;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};

use crate::authz::Op;
use crate::extract::SessionUser;
use crate::http::HttpError;
use crate::AppState;

/// Serves the file at `relative` (already namespaced under `Videos/`, `Images/`, or
/// `Live/` by the caller) after authorizing Read, honoring a single-range `Range`
/// header the way a range-capable file handle is expected to (spec.md §4.4 `Get`).
async fn serve_file(
    state: &AppState,
    requester: &crate::identity::User,
    relative: &camino::Utf8Path,
    headers: &HeaderMap,
) -> Result<Response, HttpError> {
    let full = state.attributes.authorized_full_path(relative, requester, Op::Read).await?;

    let mut file = tokio::fs::File::open(&full).await.map_err(HttpError::not_found().err())?;
    let len = file.metadata().await.map_err(HttpError::internal().err())?.len();

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok()).and_then(parse_range);

    match range {
        Some((start, end)) if start <= end && end < len => {
            let chunk_len = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start)).await.map_err(HttpError::internal().err())?;
            let mut buf = vec![0u8; chunk_len as usize];
            file.read_exact(&mut buf).await.map_err(HttpError::internal().err())?;

            Ok((
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}")),
                    (header::ACCEPT_RANGES, "bytes".to_owned()),
                ],
                Body::from(buf),
            )
                .into_response())
        }
        _ => {
            let stream = tokio_util::io::ReaderStream::new(file);
            Ok((StatusCode::OK, [(header::ACCEPT_RANGES, "bytes".to_owned())], Body::from_stream(stream)).into_response())
        }
    }
}

/// Parses a single-range `bytes=start-end` header; multi-range and suffix-range
/// (`bytes=-500`) forms fall back to a full-body response.
fn parse_range(raw: &str) -> Option<(u64, u64)> {
    let spec = raw.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    if end.is_empty() {
        return None;
    }
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Serves the first directory entry under `dir_relative` whose name starts with
/// `prefix`, after authorizing Read on the directory itself. Used for `video.<ext>`
/// and `subtitle.{vtt,ass}`, whose extension isn't fixed by the route (spec.md §6
/// filesystem layout). 404s (not an internal error) when nothing matches — for
/// `subtitle.*` that's the spec's named "subtitle missing" `NotFound` case.
async fn serve_prefixed(
    state: &AppState,
    requester: &crate::identity::User,
    dir_relative: &camino::Utf8Path,
    prefix: &str,
    headers: &HeaderMap,
) -> Result<Response, HttpError> {
    let dir_full = state.attributes.authorized_full_path(dir_relative, requester, Op::Read).await?;

    let mut entries = tokio::fs::read_dir(&dir_full).await.map_err(HttpError::not_found().err())?;
    let mut found = None;
    while let Some(entry) = entries.next_entry().await.map_err(HttpError::internal().err())? {
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(prefix) {
                found = Some(name.to_owned());
                break;
            }
        }
    }

    let Some(name) = found else {
        return Err(HttpError::not_found().msg("no file matching the expected prefix"));
    };

    serve_file(state, requester, &dir_relative.join(name), headers).await
}

pub async fn get_video(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path((klass, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let relative = Utf8PathBuf::from("Videos").join(&klass).join(&id).join("summary.json");
    serve_file(&state, &requester, &relative, &headers).await
}

pub async fn get_video_av(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path((klass, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let dir = Utf8PathBuf::from("Videos").join(&klass).join(&id);
    serve_prefixed(&state, &requester, &dir, "video.", &headers).await
}

pub async fn get_video_subtitle(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path((klass, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let dir = Utf8PathBuf::from("Videos").join(&klass).join(&id);
    serve_prefixed(&state, &requester, &dir, "subtitle.", &headers).await
}

pub async fn get_video_cover(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path((klass, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let relative = Utf8PathBuf::from("Videos").join(&klass).join(&id).join("cover.jpg");
    serve_file(&state, &requester, &relative, &headers).await
}

pub async fn get_video_gallery_item(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path((klass, id, pic)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let relative = Utf8PathBuf::from("Videos").join(&klass).join(&id).join("gallery").join(&pic);
    serve_file(&state, &requester, &relative, &headers).await
}

pub async fn get_video_classes(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
) -> Result<Json<Vec<String>>, HttpError> {
    let names = state.attributes.query_children(camino::Utf8Path::new("Videos"), &requester).await?;
    Ok(Json(names))
}

pub async fn get_video_class_entries(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path(klass): Path<String>,
) -> Result<Json<Vec<String>>, HttpError> {
    let names = state.attributes.query_children(&Utf8PathBuf::from("Videos").join(&klass), &requester).await?;
    Ok(Json(names))
}

#[derive(Deserialize)]
pub struct BulkQueryBody {
    paths: Vec<Utf8PathBuf>,
}

pub async fn post_video_bulkquery(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path(klass): Path<String>,
    Json(body): Json<BulkQueryBody>,
) -> Json<std::collections::HashMap<Utf8PathBuf, bool>> {
    let full_paths: Vec<_> = body.paths.iter().map(|p| Utf8PathBuf::from("Videos").join(&klass).join(p)).collect();
    Json(state.attributes.valid_any(&full_paths, &requester, Op::Read).await)
}

pub async fn get_image_list(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
) -> Result<Json<Vec<String>>, HttpError> {
    let names = state.attributes.query_children(camino::Utf8Path::new("Images"), &requester).await?;
    Ok(Json(names))
}

pub async fn get_image(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let relative = Utf8PathBuf::from("Images").join(&id).join("summary.json");
    serve_file(&state, &requester, &relative, &headers).await
}

pub async fn get_image_page(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path((id, file)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let relative = Utf8PathBuf::from("Images").join(&id).join(&file);
    serve_file(&state, &requester, &relative, &headers).await
}

pub async fn post_image_bulkquery(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Json(body): Json<BulkQueryBody>,
) -> Json<std::collections::HashMap<Utf8PathBuf, bool>> {
    let full_paths: Vec<_> = body.paths.iter().map(|p| Utf8PathBuf::from("Images").join(p)).collect();
    Json(state.attributes.valid_any(&full_paths, &requester, Op::Read).await)
}

#[derive(Deserialize)]
pub struct BookmarkBody {
    bookmark: String,
}

/// The bookmark editor itself is out of scope; this just persists the opaque value
/// an external collaborator sends, the same way `UpdateString` treats any file body.
pub async fn post_image_bookmark(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path(id): Path<String>,
    Json(body): Json<BookmarkBody>,
) -> Result<StatusCode, HttpError> {
    let relative = Utf8PathBuf::from("Images").join(&id).join("bookmark");
    state.attributes.update_string(&relative, &requester, &body.bookmark).await?;
    Ok(StatusCode::OK)
}

pub async fn get_live_item(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path((id, _token, item)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let relative = Utf8PathBuf::from("Live").join(&id).join(&item);
    serve_file(&state, &requester, &relative, &headers).await
}

pub async fn post_live(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    let relative = Utf8PathBuf::from("Live").join(&id);
    state
        .attributes
        .include(&relative, &requester, requester.uuid, crate::authz::Permission::parse("rw,r-,--")?, false)
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn delete_live(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    let relative = Utf8PathBuf::from("Live").join(&id);
    state.attributes.exclude(&relative, &requester).await?;
    Ok(StatusCode::OK)
}
