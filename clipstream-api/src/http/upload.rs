//! Multipart upload ingress.

use std::path::{Path, PathBuf};

use axum::{
    extract::{multipart::Field, Multipart, State},
    routing::post,
    Json, Router,
};
use nanoid::nanoid;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use clipstream_core::models::{StreamKey, Upload, UploadId, UploadMetadata};

use crate::http::{AppError, AppResult, AppState, MAX_VIDEO_BYTES};

const ALLOWED_MIME: [&str; 3] = ["video/mp4", "video/quicktime", "video/x-msvideo"];
const ALLOWED_EXTENSIONS: [&str; 3] = ["mp4", "mov", "avi"];

pub fn create_upload_router() -> Router<AppState> {
    Router::new().route("/api/channels/upload-video", post(upload_video))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    message: String,
    stream_key: String,
}

#[derive(Default)]
struct UploadFields {
    channel_name: Option<String>,
    user_email: Option<String>,
    stream_key: Option<String>,
    upload_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    price: Option<String>,
}

/// `POST /api/channels/upload-video`
///
/// Returns 200 once the primary rendition is playable and the catalog entry
/// is registered; the remaining renditions finish in the background.
async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let spool_dir = state.pipeline.spool_dir();
    tokio::fs::create_dir_all(&spool_dir)
        .await
        .map_err(|e| AppError::internal(format!("spool dir unavailable: {e}")))?;

    let mut fields = UploadFields::default();
    let mut spooled: Option<PathBuf> = None;

    let result = read_multipart(&mut multipart, &spool_dir, &mut fields, &mut spooled).await;
    if let Err(e) = result {
        discard_spool(&spooled).await;
        return Err(e);
    }

    match validate(&fields, &spooled) {
        Ok(()) => {}
        Err(e) => {
            discard_spool(&spooled).await;
            return Err(e);
        }
    }

    let stream_key = StreamKey::from_string(fields.stream_key.clone().unwrap_or_default());
    let upload_id = fields
        .upload_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .map_or_else(UploadId::generate, UploadId::from_string);

    let mut upload = Upload::new(
        stream_key.clone(),
        upload_id.clone(),
        spooled.clone().unwrap_or_default(),
    );
    upload.user_email = fields.user_email.clone();
    upload.channel_name = fields.channel_name.clone();
    upload.metadata = UploadMetadata {
        title: fields.title.clone(),
        description: fields.description.clone(),
        price: fields.price.clone(),
    };

    info!(upload_id = %upload_id, stream_key = %stream_key, "Multipart upload received");

    let processed = state.pipeline.process(upload, None).await?;

    Ok(Json(UploadResponse {
        success: true,
        message: format!(
            "upload {} processed, stream is playable at {}",
            processed.upload_id, processed.master_url
        ),
        stream_key: processed.stream_key.to_string(),
    }))
}

async fn read_multipart(
    multipart: &mut Multipart,
    spool_dir: &Path,
    fields: &mut UploadFields,
    spooled: &mut Option<PathBuf>,
) -> AppResult<()> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("video") => {
                let extension = video_extension(&field)?;
                let dest = spool_dir.join(format!("spool-{}.{extension}", nanoid!(12)));
                // Record the spool path before writing so error paths can
                // discard a partial file.
                *spooled = Some(dest.clone());
                spool_video(&mut field, &dest).await?;
            }
            Some("channelName") => fields.channel_name = Some(read_text(field).await?),
            Some("userEmail") => fields.user_email = Some(read_text(field).await?),
            Some("streamKey") => fields.stream_key = Some(read_text(field).await?),
            Some("uploadId") => fields.upload_id = Some(read_text(field).await?),
            Some("title") => fields.title = Some(read_text(field).await?),
            Some("description") => fields.description = Some(read_text(field).await?),
            Some("price") => fields.price = Some(read_text(field).await?),
            other => {
                warn!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }
    Ok(())
}

async fn read_text(field: Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request(format!("unreadable text field: {e}")))
}

/// MP4/MOV/AVI only, by declared content type or file extension. A declared
/// type that is not an accepted video type is rejected outright.
fn video_extension(field: &Field<'_>) -> AppResult<&'static str> {
    if let Some(content_type) = field.content_type() {
        return match content_type {
            "video/mp4" => Ok("mp4"),
            "video/quicktime" => Ok("mov"),
            "video/x-msvideo" => Ok("avi"),
            other => Err(AppError::bad_request(format!(
                "unsupported content type {other}; accepted: {}",
                ALLOWED_MIME.join(", ")
            ))),
        };
    }

    let extension = field
        .file_name()
        .and_then(|n| n.rsplit('.').next())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("mp4") => Ok("mp4"),
        Some("mov") => Ok("mov"),
        Some("avi") => Ok("avi"),
        _ => Err(AppError::bad_request(format!(
            "unsupported video format; accepted: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))),
    }
}

/// Stream the field to disk, enforcing the 2 GiB cap while counting bytes.
async fn spool_video(field: &mut Field<'_>, dest: &Path) -> AppResult<u64> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| AppError::internal(format!("cannot spool upload: {e}")))?;

    let mut written: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => return Err(AppError::bad_request(format!("upload interrupted: {e}"))),
        };
        written += chunk.len() as u64;
        if written > MAX_VIDEO_BYTES {
            return Err(AppError::bad_request("video larger than 2 GiB"));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::internal(format!("spool write failed: {e}")))?;
    }

    file.flush()
        .await
        .map_err(|e| AppError::internal(format!("spool flush failed: {e}")))?;

    if written == 0 {
        return Err(AppError::bad_request("video field is empty"));
    }
    Ok(written)
}

fn validate(fields: &UploadFields, spooled: &Option<PathBuf>) -> AppResult<()> {
    if spooled.is_none() {
        return Err(AppError::bad_request("video file is required"));
    }
    for (value, name) in [
        (&fields.stream_key, "streamKey"),
        (&fields.channel_name, "channelName"),
        (&fields.user_email, "userEmail"),
    ] {
        if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
            return Err(AppError::bad_request(format!("{name} is required")));
        }
    }
    if let Some(price) = &fields.price {
        if price.parse::<f64>().is_err() {
            return Err(AppError::bad_request("price must be a decimal string"));
        }
    }
    Ok(())
}

async fn discard_spool(spooled: &Option<PathBuf>) {
    if let Some(path) = spooled {
        let _ = tokio::fs::remove_file(path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(stream_key: Option<&str>, channel: Option<&str>, email: Option<&str>) -> UploadFields {
        UploadFields {
            channel_name: channel.map(str::to_string),
            user_email: email.map(str::to_string),
            stream_key: stream_key.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_requires_identity_triplet() {
        let spooled = Some(PathBuf::from("/tmp/spool.mp4"));
        assert!(validate(&fields(Some("sk"), Some("chan"), Some("a@b")), &spooled).is_ok());
        assert!(validate(&fields(None, Some("chan"), Some("a@b")), &spooled).is_err());
        assert!(validate(&fields(Some("sk"), None, Some("a@b")), &spooled).is_err());
        assert!(validate(&fields(Some("sk"), Some("chan"), None), &spooled).is_err());
    }

    #[test]
    fn test_validate_requires_video() {
        assert!(validate(&fields(Some("sk"), Some("chan"), Some("a@b")), &None).is_err());
    }

    #[test]
    fn test_validate_price_format() {
        let spooled = Some(PathBuf::from("/tmp/spool.mp4"));
        let mut f = fields(Some("sk"), Some("chan"), Some("a@b"));
        f.price = Some("19.99".to_string());
        assert!(validate(&f, &spooled).is_ok());
        f.price = Some("free".to_string());
        assert!(validate(&f, &spooled).is_err());
    }
}
