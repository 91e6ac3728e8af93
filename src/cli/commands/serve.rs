//! HTTP analysis server.
//!
//! One POST endpoint accepts a multipart analysis request and answers with
//! a Server-Sent Events stream: progress events followed by exactly one
//! terminal event. Requests that fail to parse answer over the same stream,
//! so clients only ever consume one response shape.

use crate::cache::{AnalysisCache, SqliteCache};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::{GranskaError, Result};
use crate::media::{AnalysisInput, AnalysisRequest, Credentials, MediaRef};
use crate::pipeline::Pipeline;
use crate::progress::{ProgressEvent, ProgressSender};
use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

/// Shared application state.
struct AppState {
    settings: Settings,
    cache: Option<Arc<dyn AnalysisCache>>,
}

/// Run the HTTP analysis server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let cache = open_cache(&settings);

    let state = Arc::new(AppState {
        settings: settings.clone(),
        cache,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(settings.server.max_upload_mb * 1024 * 1024))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Granska API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Analyze", "POST /analyze (multipart, answers over SSE)");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the configured result cache. A cache that fails to open downgrades
/// the server to uncached operation instead of refusing to start.
fn open_cache(settings: &Settings) -> Option<Arc<dyn AnalysisCache>> {
    if !settings.cache.enabled {
        return None;
    }
    match SqliteCache::open(&settings.cache_path()) {
        Ok(cache) => Some(Arc::new(cache) as Arc<dyn AnalysisCache>),
        Err(e) => {
            warn!("Could not open the result cache, continuing without it: {}", e);
            None
        }
    }
}

// === Handlers ===

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Accept one analysis request and answer with its progress stream.
async fn analyze(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (progress, rx) = ProgressSender::channel();

    match parse_request(multipart).await {
        Ok(request) => {
            let settings = state.settings.clone();
            let cache = state.cache.clone();
            tokio::spawn(async move {
                match Pipeline::for_request(&request, &settings, cache) {
                    Ok(pipeline) => pipeline.run(request, &progress).await,
                    Err(e) => progress.emit(ProgressEvent::error(e.to_string())),
                }
            });
        }
        // The parse failure becomes the stream's single terminal event
        Err(e) => progress.emit(ProgressEvent::error(e.to_string())),
    }

    let stream = UnboundedReceiverStream::new(rx).filter_map(|event| {
        match Event::default().json_data(&event) {
            Ok(sse_event) => Some(Ok(sse_event)),
            Err(e) => {
                warn!("Dropping unserializable progress event: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// === Request parsing ===

/// Multipart fields as received, before mode resolution.
#[derive(Default)]
struct RawFields {
    mode: Option<String>,
    media_ref: Option<String>,
    media: Option<UploadPart>,
    instruction: Option<String>,
    gemini_api_key: Option<String>,
    openai_api_key: Option<String>,
    language: Option<String>,
}

struct UploadPart {
    data: Vec<u8>,
    file_name: String,
    mime_type: String,
}

async fn parse_request(mut multipart: Multipart) -> Result<AnalysisRequest> {
    let mut fields = RawFields::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GranskaError::InvalidInput(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "mode" => fields.mode = Some(text_field(field, &name).await?),
            "media_ref" => fields.media_ref = Some(text_field(field, &name).await?),
            "media" => {
                let file_name = field.file_name().unwrap_or("upload.bin").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(|e| {
                    GranskaError::InvalidInput(format!("Could not read the media part: {}", e))
                })?;
                fields.media = Some(UploadPart {
                    data: data.to_vec(),
                    file_name,
                    mime_type,
                });
            }
            "instruction" => fields.instruction = Some(text_field(field, &name).await?),
            "gemini_api_key" => fields.gemini_api_key = Some(text_field(field, &name).await?),
            "openai_api_key" => fields.openai_api_key = Some(text_field(field, &name).await?),
            "language" => fields.language = Some(text_field(field, &name).await?),
            other => debug!("Ignoring unknown multipart field: {}", other),
        }
    }

    build_request(fields)
}

async fn text_field(field: Field<'_>, name: &str) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| GranskaError::InvalidInput(format!("Could not read field '{}': {}", name, e)))
}

fn build_request(fields: RawFields) -> Result<AnalysisRequest> {
    let input = match fields.mode.as_deref() {
        Some("uploaded-file") => {
            let part = fields.media.ok_or_else(|| {
                GranskaError::InvalidInput(
                    "Mode 'uploaded-file' requires a 'media' file part".to_string(),
                )
            })?;
            AnalysisInput::Upload {
                data: part.data,
                mime_type: part.mime_type,
                file_name: part.file_name,
            }
        }
        Some("remote-reference") | None => {
            let reference = fields.media_ref.ok_or_else(|| {
                GranskaError::InvalidInput("A 'media_ref' field is required".to_string())
            })?;
            let media = MediaRef::parse(&reference).ok_or_else(|| {
                GranskaError::MediaRef(format!("Unrecognized media reference: {}", reference))
            })?;
            AnalysisInput::Remote { media }
        }
        Some(other) => {
            return Err(GranskaError::InvalidInput(format!("Unknown mode: {}", other)));
        }
    };

    let request = AnalysisRequest {
        input,
        instruction: fields.instruction.unwrap_or_default(),
        credentials: Credentials {
            gemini_api_key: fields.gemini_api_key.unwrap_or_default(),
            openai_api_key: fields.openai_api_key.filter(|key| !key.trim().is_empty()),
        },
        language: fields.language.filter(|lang| !lang.trim().is_empty()),
    };
    request.validate()?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_fields() -> RawFields {
        RawFields {
            mode: Some("remote-reference".to_string()),
            media_ref: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()),
            media: None,
            instruction: Some("summarize this".to_string()),
            gemini_api_key: Some("key".to_string()),
            openai_api_key: None,
            language: None,
        }
    }

    #[test]
    fn test_remote_request_from_fields() {
        let request = build_request(base_fields()).unwrap();
        match request.input {
            AnalysisInput::Remote { media } => assert_eq!(media.id(), "dQw4w9WgXcQ"),
            other => panic!("expected remote input, got {:?}", other),
        }
        assert!(request.credentials.openai_api_key.is_none());
    }

    #[test]
    fn test_missing_mode_defaults_to_remote() {
        let mut fields = base_fields();
        fields.mode = None;
        let request = build_request(fields).unwrap();
        assert!(matches!(request.input, AnalysisInput::Remote { .. }));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let mut fields = base_fields();
        fields.mode = Some("telepathy".to_string());
        let err = build_request(fields).unwrap_err();
        assert!(err.to_string().contains("Unknown mode"));
    }

    #[test]
    fn test_upload_mode_requires_media_part() {
        let mut fields = base_fields();
        fields.mode = Some("uploaded-file".to_string());
        let err = build_request(fields).unwrap_err();
        assert!(err.to_string().contains("media"));
    }

    #[test]
    fn test_upload_request_carries_file_metadata() {
        let mut fields = base_fields();
        fields.mode = Some("uploaded-file".to_string());
        fields.media = Some(UploadPart {
            data: vec![1, 2, 3],
            file_name: "talk.mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
        });
        fields.openai_api_key = Some("sk-test".to_string());
        let request = build_request(fields).unwrap();
        match request.input {
            AnalysisInput::Upload { data, mime_type, file_name } => {
                assert_eq!(data, vec![1, 2, 3]);
                assert_eq!(mime_type, "audio/mpeg");
                assert_eq!(file_name, "talk.mp3");
            }
            other => panic!("expected upload input, got {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_reference_is_rejected() {
        let mut fields = base_fields();
        fields.media_ref = Some("not a reference".to_string());
        let err = build_request(fields).unwrap_err();
        assert!(err.to_string().contains("Unrecognized media reference"));
    }

    #[test]
    fn test_blank_optional_fields_become_none() {
        let mut fields = base_fields();
        fields.openai_api_key = Some("   ".to_string());
        fields.language = Some("".to_string());
        let request = build_request(fields).unwrap();
        assert!(request.credentials.openai_api_key.is_none());
        assert!(request.language.is_none());
    }
}
