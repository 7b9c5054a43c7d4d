use std::path::{Path as FsPath, PathBuf};

use axum::extract::{
    multipart::{Field, Multipart},
    Path, State,
};
use axum::Extension;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::error::{ApiError, ApiResponse, ApiResult};
use super::gate::ClientIp;
use super::state::AppState;
use crate::models::event::EventKind;

/// Extension to accepted MIME types.
const ALLOWED_TYPES: &[(&str, &[&str])] = &[
    ("jpg", &["image/jpeg"]),
    ("jpeg", &["image/jpeg"]),
    ("png", &["image/png"]),
    ("gif", &["image/gif"]),
    ("webp", &["image/webp"]),
    ("mp3", &["audio/mpeg", "audio/mp3"]),
    ("wav", &["audio/wav", "audio/x-wav", "audio/wave"]),
    ("ogg", &["audio/ogg", "application/ogg"]),
    ("mp4", &["video/mp4"]),
    ("webm", &["video/webm", "audio/webm"]),
];

#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub filename: String,
    pub originalname: String,
    pub size: usize,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedFile {
    pub filename: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub url: String,
}

/// Lowercased extension when the extension and declared MIME type form an
/// allowed pair.
pub fn allowed_extension(original_name: &str, mime: &str) -> Option<String> {
    let ext = FsPath::new(original_name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    let mime = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    ALLOWED_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .filter(|(_, mimes)| mimes.contains(&mime.as_str()))
        .map(|_| ext)
}

/// A bare file name inside the upload directory; anything that could walk
/// out of it is rejected.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.starts_with('.')
}

fn stored_name(field: &str, ext: &str) -> String {
    let suffix: u32 = rand::rng().random_range(0..1_000_000_000);
    format!("{}-{}-{}.{}", field, Utc::now().timestamp_millis(), suffix, ext)
}

async fn save_field(
    state: &AppState,
    mut field: Field<'_>,
    field_name: &str,
) -> ApiResult<UploadedFile> {
    let original = field.file_name().unwrap_or("").to_string();
    let mime = field.content_type().unwrap_or("").to_string();
    let ext = allowed_extension(&original, &mime).ok_or_else(|| {
        ApiError::Validation("Only images, audio, and video files are allowed!".into())
    })?;

    let cap = state.settings.upload.max_file_size;
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed upload: {}", e)))?
    {
        if data.len() + chunk.len() > cap {
            return Err(ApiError::PayloadTooLarge);
        }
        data.extend_from_slice(&chunk);
    }

    let dir = PathBuf::from(&state.settings.upload.dir);
    tokio::fs::create_dir_all(&dir).await.map_err(ApiError::internal)?;
    let filename = stored_name(field_name, &ext);
    tokio::fs::write(dir.join(&filename), &data)
        .await
        .map_err(ApiError::internal)?;

    Ok(UploadedFile {
        url: format!("/uploads/{}", filename),
        size: data.len(),
        filename,
        originalname: original,
    })
}

/// Remove files written earlier in a request that then failed.
async fn discard_saved(dir: &FsPath, files: &[UploadedFile]) {
    for f in files {
        if let Err(e) = tokio::fs::remove_file(dir.join(&f.filename)).await {
            warn!(filename = %f.filename, error = %e, "Failed to discard partial upload");
        }
    }
}

/// Saves every `expected_field` part. All or nothing: if any part fails,
/// the files already written for this request are removed.
async fn collect_files(
    state: &AppState,
    multipart: Multipart,
    expected_field: &str,
    max_files: usize,
) -> ApiResult<Vec<UploadedFile>> {
    let mut saved = Vec::new();
    match save_fields(state, multipart, expected_field, max_files, &mut saved).await {
        Ok(()) => Ok(saved),
        Err(e) => {
            discard_saved(FsPath::new(&state.settings.upload.dir), &saved).await;
            Err(e)
        }
    }
}

async fn save_fields(
    state: &AppState,
    mut multipart: Multipart,
    expected_field: &str,
    max_files: usize,
    saved: &mut Vec<UploadedFile>,
) -> ApiResult<()> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some(expected_field) {
            continue;
        }
        if saved.len() >= max_files {
            return Err(ApiError::Validation(format!(
                "Too many files, at most {} allowed",
                max_files
            )));
        }
        saved.push(save_field(state, field, expected_field).await?);
    }
    Ok(())
}

fn record_uploads(state: &AppState, ip: std::net::IpAddr, files: &[UploadedFile]) {
    for f in files {
        info!(filename = %f.filename, size = f.size, "File uploaded");
        state.events.record(
            EventKind::FileUploaded,
            json!({ "filename": f.filename, "size": f.size, "ip": ip.to_string() }),
        );
    }
}

pub async fn upload_single(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    multipart: Multipart,
) -> ApiResult {
    let files = collect_files(&state, multipart, "file", 1).await?;
    let Some(file) = files.first() else {
        return Err(ApiError::Validation("No file uploaded".into()));
    };
    record_uploads(&state, ip, &files);
    Ok(ApiResponse::ok()
        .message("File uploaded successfully")
        .with("file", file))
}

pub async fn upload_multiple(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    multipart: Multipart,
) -> ApiResult {
    let max = state.settings.upload.max_files;
    let files = collect_files(&state, multipart, "files", max).await?;
    if files.is_empty() {
        return Err(ApiError::Validation("No files uploaded".into()));
    }
    record_uploads(&state, ip, &files);
    Ok(ApiResponse::ok()
        .message("Files uploaded successfully")
        .with("files", files))
}

pub async fn list_files(State(state): State<AppState>) -> ApiResult {
    let dir = PathBuf::from(&state.settings.upload.dir);
    let mut files = Vec::new();

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ApiResponse::ok().with("files", files));
        }
        Err(e) => return Err(ApiError::internal(e)),
    };

    while let Some(entry) = entries.next_entry().await.map_err(ApiError::internal)? {
        let meta = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping unreadable upload");
                continue;
            }
        };
        let filename = entry.file_name().to_string_lossy().into_owned();
        files.push(ListedFile {
            url: format!("/uploads/{}", filename),
            size: meta.len(),
            created: meta
                .created()
                .or_else(|_| meta.modified())
                .ok()
                .map(DateTime::<Utc>::from),
            filename,
        });
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));

    Ok(ApiResponse::ok().with("files", files))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Path(filename): Path<String>,
) -> ApiResult {
    if !is_safe_filename(&filename) {
        return Err(ApiError::Validation("Invalid filename".into()));
    }
    let path = PathBuf::from(&state.settings.upload.dir).join(&filename);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("File not found".into()));
        }
        Err(e) => return Err(ApiError::internal(e)),
    }
    state.events.record(
        EventKind::FileDeleted,
        json!({ "filename": filename, "ip": ip.to_string() }),
    );
    Ok(ApiResponse::ok().message("File deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_pairs() {
        assert_eq!(allowed_extension("photo.JPG", "image/jpeg").as_deref(), Some("jpg"));
        assert_eq!(allowed_extension("song.mp3", "audio/mpeg").as_deref(), Some("mp3"));
        assert_eq!(allowed_extension("clip.webm", "video/webm").as_deref(), Some("webm"));
        assert!(allowed_extension("photo.png", "image/jpeg").is_none());
        assert!(allowed_extension("evil.php", "image/png").is_none());
        assert!(allowed_extension("noext", "image/png").is_none());
    }

    #[test]
    fn test_safe_filenames() {
        assert!(is_safe_filename("file-1700000000000-42.png"));
        assert!(!is_safe_filename("../secret"));
        assert!(!is_safe_filename("a/b.png"));
        assert!(!is_safe_filename("a\\b.png"));
        assert!(!is_safe_filename(".."));
        assert!(!is_safe_filename(".hidden"));
        assert!(!is_safe_filename(""));
    }

    #[test]
    fn test_stored_name_shape() {
        let name = stored_name("file", "png");
        let parts: Vec<&str> = name.trim_end_matches(".png").split('-').collect();
        assert_eq!(parts[0], "file");
        assert_eq!(parts.len(), 3);
        assert!(name.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_discard_saved_removes_partial_batch() {
        let dir = std::env::temp_dir().join(format!("sitewarden-upload-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let files: Vec<UploadedFile> = ["a.png", "b.png"]
            .iter()
            .map(|name| UploadedFile {
                filename: name.to_string(),
                originalname: name.to_string(),
                size: 3,
                url: format!("/uploads/{}", name),
            })
            .collect();
        tokio::fs::write(dir.join("a.png"), b"abc").await.unwrap();
        tokio::fs::write(dir.join("keep.png"), b"abc").await.unwrap();

        // b.png was never written; its removal failure must not stop the rest.
        discard_saved(&dir, &files).await;

        assert!(!dir.join("a.png").exists());
        assert!(dir.join("keep.png").exists());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
