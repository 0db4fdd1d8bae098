pub mod health;
pub mod media;
pub mod root;
pub mod user;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

/// Wires the canonical verbs from spec.md §6 onto their handlers. Route-level auth
/// is handled per-handler by the [`crate::extract::SessionUser`] extractor rather
/// than a separate allowlist middleware, since the opaque-token model's public
/// surface (challenge/verify/validate) is small enough to name directly below.
pub fn make_router() -> Router<AppState> {
    Router::new()
        .route("/jet/health", get(health::get_health))
        .route("/api/User/validate", post(user::post_validate))
        .route("/api/User/destroy", post(user::post_destroy))
        .route("/api/User/{user}", get(user::get_challenge).post(user::post_verify).patch(user::patch_user))
        .route("/api/User/{user}/open", get(user::get_open))
        .route("/api/Root/chmod", post(root::post_chmod))
        .route("/api/Root/chown", post(root::post_chown))
        .route("/api/Root/init", post(root::post_init))
        .route("/api/Root/ls", get(root::get_ls))
        .route("/api/Video", get(media::get_video_classes))
        .route("/api/Video/{klass}", get(media::get_video_class_entries))
        .route("/api/Video/{klass}/bulkquery", post(media::post_video_bulkquery))
        .route("/api/Video/{klass}/{id}", get(media::get_video))
        .route("/api/Video/{klass}/{id}/cover", get(media::get_video_cover))
        .route("/api/Video/{klass}/{id}/gallery/{pic}", get(media::get_video_gallery_item))
        .route("/api/Video/{klass}/{id}/av", get(media::get_video_av))
        .route("/api/Video/{klass}/{id}/subtitle", get(media::get_video_subtitle))
        .route("/api/Image", get(media::get_image_list))
        .route("/api/Image/bulkquery", post(media::post_image_bulkquery))
        .route("/api/Image/{id}", get(media::get_image))
        .route("/api/Image/{id}/bookmark", post(media::post_image_bookmark))
        .route("/api/Image/{id}/{file}", get(media::get_image_page))
        .route("/api/Live/{id}", post(media::post_live).delete(media::delete_live))
        .route("/api/Live/{id}/{token}/{item}", get(media::get_live_item))
}
