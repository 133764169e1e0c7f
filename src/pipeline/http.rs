//! img2img over HTTP against an AUTOMATIC1111-compatible web API.
//!
//! - `initialize` lists `/sdapi/v1/sd-models` and picks the model named by the
//!   last component of the resource directory. When none matches, requests
//!   carry no checkpoint override and the server's loaded model is used
//! - `run` posts the source frame as a base64 PNG to `/sdapi/v1/img2img` and
//!   writes the first returned image into the page buffer
//!
//! Compute-unit selection happens on the server; the requested value is only
//! logged.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::params::GenerationParams;
use crate::core::cancel::CancellationSignal;
use crate::core::page::{PageBuffer, Resolution};
use crate::error::{FlipbookError, FlipbookResult};
use crate::pipeline::{ComputeUnits, Pipeline};

/// Per-request timeout enforced by the HTTP client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// One entry of `/sdapi/v1/sd-models`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SdModel {
    pub title: String,
    pub model_name: String,
}

#[derive(Debug, Serialize)]
struct Img2ImgRequest<'a> {
    init_images: Vec<String>,
    prompt: &'a str,
    denoising_strength: f32,
    steps: u32,
    seed: i64,
    cfg_scale: f32,
    width: u32,
    height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    override_settings: Option<OverrideSettings<'a>>,
}

#[derive(Debug, Serialize)]
struct OverrideSettings<'a> {
    sd_model_checkpoint: &'a str,
}

#[derive(Debug, Deserialize)]
struct Img2ImgResponse {
    images: Vec<String>,
}

/// Pipeline backed by a remote img2img server.
#[derive(Debug)]
pub struct HttpPipeline {
    client: reqwest::Client,
    endpoint: String,
    params: GenerationParams,
    model: Option<String>,
    initialized: bool,
    disposed: bool,
}

impl HttpPipeline {
    /// `endpoint` is the server root, e.g. `http://127.0.0.1:7860`.
    pub fn new(endpoint: impl Into<String>) -> FlipbookResult<Self> {
        Self::with_timeout(endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> FlipbookResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlipbookError::external("reqwest", e))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            params: GenerationParams::default(),
            model: None,
            initialized: false,
            disposed: false,
        })
    }

    /// Model checkpoint chosen during initialization.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.endpoint, route)
    }
}

#[async_trait]
impl Pipeline for HttpPipeline {
    fn name(&self) -> &str {
        "http-img2img"
    }

    async fn initialize(
        &mut self,
        resource_dir: &Path,
        compute_units: ComputeUnits,
    ) -> FlipbookResult<()> {
        if compute_units != ComputeUnits::All {
            info!(
                "compute units '{}' requested; {} selects its own backend",
                compute_units, self.endpoint
            );
        }

        let url = self.url("/sdapi/v1/sd-models");
        let listed: Result<Vec<SdModel>, reqwest::Error> = async {
            self.client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
        }
        .await;
        let models =
            listed.map_err(|e| FlipbookError::pipeline_init(&self.endpoint, e.to_string()))?;

        if models.is_empty() {
            return Err(
                FlipbookError::pipeline_init(&self.endpoint, "the server lists no models")
                    .with_recovery_suggestion("Install a checkpoint on the img2img server"),
            );
        }

        self.model = select_model(&models, resource_dir);
        match &self.model {
            Some(model) => info!("using model '{}' on {}", model, self.endpoint),
            None => warn!(
                "no model matches '{}'; using the checkpoint loaded on {}",
                resource_dir.display(),
                self.endpoint
            ),
        }
        self.initialized = true;
        Ok(())
    }

    fn apply(&mut self, params: &GenerationParams) {
        self.params = params.clone();
    }

    async fn run(
        &mut self,
        source: &RgbaImage,
        destination: &mut PageBuffer,
        cancel: &CancellationSignal,
    ) -> FlipbookResult<()> {
        if !self.initialized || self.disposed {
            return Err(FlipbookError::state(
                if self.disposed { "disposed" } else { "uninitialized" },
                "img2img",
                "the pipeline is not ready",
            ));
        }

        let encoded = encode_png_base64(source)?;
        let body = build_request(
            &self.params,
            self.model.as_deref(),
            encoded,
            destination.resolution(),
        );
        let url = self.url("/sdapi/v1/img2img");
        debug!("posting img2img request for '{}'", self.params.prompt);

        let request = async {
            self.client
                .post(&url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json::<Img2ImgResponse>()
                .await
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FlipbookError::cancelled("img2img request")),
            response = request => response
                .map_err(|e| FlipbookError::generation("img2img request", e.to_string()))?,
        };

        let first = response
            .images
            .first()
            .ok_or_else(|| FlipbookError::generation("img2img response", "no images returned"))?;
        let image = decode_image(first).map_err(|e| e.with_operation("decode img2img result"))?;
        destination.write_image(&image)
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.initialized = false;
            debug!("released img2img session on {}", self.endpoint);
        }
    }
}

/// Pick the checkpoint named by the last component of `resource_dir`.
///
/// A resource directory without a final component (`""`, `"."`) accepts the
/// first listed model. `None` means no listed model matches.
pub fn select_model(models: &[SdModel], resource_dir: &Path) -> Option<String> {
    let wanted = resource_dir
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty());

    match wanted {
        None => models.first().map(|model| model.title.clone()),
        Some(name) => models
            .iter()
            .find(|model| model.model_name == name || model.title.starts_with(name))
            .map(|model| model.title.clone()),
    }
}

fn build_request<'a>(
    params: &'a GenerationParams,
    model: Option<&'a str>,
    init_image: String,
    resolution: Resolution,
) -> Img2ImgRequest<'a> {
    Img2ImgRequest {
        init_images: vec![init_image],
        prompt: &params.prompt,
        denoising_strength: params.strength,
        steps: params.step_count,
        seed: params.seed,
        cfg_scale: params.guidance_scale,
        width: resolution.width,
        height: resolution.height,
        override_settings: model.map(|sd_model_checkpoint| OverrideSettings {
            sd_model_checkpoint,
        }),
    }
}

fn encode_png_base64(image: &RgbaImage) -> FlipbookResult<String> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(general_purpose::STANDARD.encode(&bytes))
}

fn decode_image(encoded: &str) -> FlipbookResult<RgbaImage> {
    // Some servers return data URLs rather than bare base64.
    let payload = encoded
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);
    let bytes = general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| FlipbookError::external("base64", e))?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::CancellationSource;
    use image::Rgba;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Canned reply served by [`serve`].
    struct Reply {
        status: u16,
        body: String,
        delay: Duration,
    }

    impl Reply {
        fn json(body: impl Into<String>) -> Self {
            Self {
                status: 200,
                body: body.into(),
                delay: Duration::ZERO,
            }
        }

        fn status(status: u16) -> Self {
            Self {
                status,
                body: r#"{"error":"server error"}"#.to_string(),
                delay: Duration::ZERO,
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    type Requests = Arc<Mutex<Vec<(String, String)>>>;

    /// Serve canned replies on a local port; records `(path, body)` per request.
    async fn serve<F>(reply: F) -> (String, Requests)
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let requests: Requests = Arc::default();
        let reply = Arc::new(reply);

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let reply = Arc::clone(&reply);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let (path, body) = read_request(&mut stream).await;
                    let canned = (*reply)(&path);
                    seen.lock().unwrap().push((path, body));
                    tokio::time::sleep(canned.delay).await;
                    let response = format!(
                        "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        canned.status,
                        canned.body.len(),
                        canned.body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (format!("http://{}", address), requests)
    }

    async fn read_request(stream: &mut TcpStream) -> (String, String) {
        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..end]).into_owned();
                let length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while data.len() < end + 4 + length {
                    let read = stream.read(&mut chunk).await.unwrap();
                    if read == 0 {
                        break;
                    }
                    data.extend_from_slice(&chunk[..read]);
                }
                let path = head.split_whitespace().nth(1).unwrap_or_default().to_string();
                let body = String::from_utf8_lossy(&data[end + 4..]).into_owned();
                return (path, body);
            }
            let read = stream.read(&mut chunk).await.unwrap();
            if read == 0 {
                return (String::new(), String::new());
            }
            data.extend_from_slice(&chunk[..read]);
        }
    }

    const MODELS_JSON: &str = r#"[
        {"title": "v1-5-pruned-emaonly.safetensors [6ce0161689]", "model_name": "v1-5-pruned-emaonly"},
        {"title": "sdxl-turbo.safetensors [e869ac7d69]", "model_name": "sdxl-turbo"}
    ]"#;

    fn images_json(image: &RgbaImage) -> String {
        format!(r#"{{"images": ["{}"], "info": "{{}}"}}"#, encode_png_base64(image).unwrap())
    }

    fn models() -> Vec<SdModel> {
        vec![
            SdModel {
                title: "v1-5-pruned-emaonly.safetensors [6ce0161689]".to_string(),
                model_name: "v1-5-pruned-emaonly".to_string(),
            },
            SdModel {
                title: "sdxl-turbo.safetensors [e869ac7d69]".to_string(),
                model_name: "sdxl-turbo".to_string(),
            },
        ]
    }

    #[test]
    fn test_select_model_by_resource_dir() {
        let models = models();
        assert_eq!(
            select_model(&models, Path::new("/opt/models/sdxl-turbo")),
            Some("sdxl-turbo.safetensors [e869ac7d69]".to_string())
        );
        assert_eq!(
            select_model(&models, Path::new(".")),
            Some("v1-5-pruned-emaonly.safetensors [6ce0161689]".to_string())
        );
        assert_eq!(select_model(&models, Path::new("StableDiffusion")), None);
        assert_eq!(select_model(&[], Path::new("")), None);
    }

    #[test]
    fn test_request_carries_applied_params() {
        let params = GenerationParams {
            prompt: "hokusai".to_string(),
            strength: 0.3,
            step_count: 12,
            seed: 7,
            guidance_scale: 7.5,
        };
        let request = build_request(
            &params,
            Some("sdxl-turbo"),
            "AAAA".to_string(),
            Resolution::new(512, 256),
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["prompt"], "hokusai");
        assert_eq!(json["steps"], 12);
        assert_eq!(json["seed"], 7);
        assert_eq!(json["width"], 512);
        assert_eq!(json["height"], 256);
        assert_eq!(json["init_images"][0], "AAAA");
        assert_eq!(json["override_settings"]["sd_model_checkpoint"], "sdxl-turbo");

        let anonymous = build_request(&params, None, String::new(), Resolution::default());
        let json = serde_json::to_value(&anonymous).unwrap();
        assert!(json.get("override_settings").is_none());
    }

    #[test]
    fn test_decode_accepts_data_urls() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([5, 6, 7, 255]));
        let encoded = encode_png_base64(&image).unwrap();

        assert_eq!(decode_image(&encoded).unwrap(), image);
        let data_url = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_image(&data_url).unwrap(), image);
        assert!(decode_image("not base64!").is_err());
    }

    #[tokio::test]
    async fn test_run_before_initialize_is_a_state_error() {
        let mut pipeline = HttpPipeline::new("http://127.0.0.1:9/").unwrap();
        let mut buffer = PageBuffer::new(Resolution::new(2, 2)).unwrap();
        let source = CancellationSource::new();

        let err = pipeline
            .run(&RgbaImage::new(2, 2), &mut buffer, &source.signal())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "state");

        pipeline.dispose();
        pipeline.dispose();
    }

    #[tokio::test]
    async fn test_initialize_selects_the_named_model() {
        let (endpoint, requests) = serve(|_| Reply::json(MODELS_JSON)).await;
        let mut pipeline = HttpPipeline::new(endpoint).unwrap();

        pipeline
            .initialize(Path::new("/opt/models/sdxl-turbo"), ComputeUnits::All)
            .await
            .unwrap();

        assert_eq!(pipeline.model(), Some("sdxl-turbo.safetensors [e869ac7d69]"));
        assert_eq!(requests.lock().unwrap()[0].0, "/sdapi/v1/sd-models");
    }

    #[tokio::test]
    async fn test_initialize_without_a_match_uses_the_loaded_checkpoint() {
        let body = images_json(&RgbaImage::new(4, 4));
        let (endpoint, requests) = serve(move |path| match path {
            "/sdapi/v1/sd-models" => Reply::json(MODELS_JSON),
            _ => Reply::json(body.clone()),
        })
        .await;
        let mut pipeline = HttpPipeline::new(endpoint).unwrap();

        pipeline
            .initialize(Path::new("StableDiffusion"), ComputeUnits::All)
            .await
            .unwrap();
        assert_eq!(pipeline.model(), None);

        let mut buffer = PageBuffer::new(Resolution::new(4, 4)).unwrap();
        let cancel = CancellationSource::new();
        pipeline
            .run(&RgbaImage::new(4, 4), &mut buffer, &cancel.signal())
            .await
            .unwrap();

        let requests = requests.lock().unwrap();
        let json: serde_json::Value = serde_json::from_str(&requests[1].1).unwrap();
        assert!(json.get("override_settings").is_none());
    }

    #[tokio::test]
    async fn test_initialize_failures_are_pipeline_init_errors() {
        let (endpoint, _) = serve(|_| Reply::json("[]")).await;
        let mut pipeline = HttpPipeline::new(endpoint).unwrap();
        let err = pipeline
            .initialize(Path::new("."), ComputeUnits::All)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "pipeline_init");

        let (endpoint, _) = serve(|_| Reply::status(503)).await;
        let mut pipeline = HttpPipeline::new(endpoint).unwrap();
        let err = pipeline
            .initialize(Path::new("."), ComputeUnits::All)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "pipeline_init");
    }

    #[tokio::test]
    async fn test_run_posts_params_and_writes_the_result() {
        let generated = RgbaImage::from_pixel(4, 4, Rgba([200, 10, 30, 255]));
        let body = images_json(&generated);
        let (endpoint, requests) = serve(move |path| match path {
            "/sdapi/v1/sd-models" => Reply::json(MODELS_JSON),
            _ => Reply::json(body.clone()),
        })
        .await;

        let mut pipeline = HttpPipeline::new(endpoint).unwrap();
        pipeline
            .initialize(Path::new("sdxl-turbo"), ComputeUnits::All)
            .await
            .unwrap();
        pipeline.apply(&GenerationParams {
            prompt: "hokusai".to_string(),
            seed: 99,
            ..GenerationParams::default()
        });

        let mut buffer = PageBuffer::new(Resolution::new(4, 4)).unwrap();
        let cancel = CancellationSource::new();
        pipeline
            .run(&RgbaImage::new(4, 4), &mut buffer, &cancel.signal())
            .await
            .unwrap();

        assert_eq!(buffer.image(), &generated);
        assert_eq!(buffer.revision(), 1);

        let requests = requests.lock().unwrap();
        let (path, body) = &requests[1];
        assert_eq!(path, "/sdapi/v1/img2img");
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["prompt"], "hokusai");
        assert_eq!(json["seed"], 99);
        assert_eq!(
            json["override_settings"]["sd_model_checkpoint"],
            "sdxl-turbo.safetensors [e869ac7d69]"
        );
    }

    #[tokio::test]
    async fn test_run_maps_server_errors_to_generation() {
        let (endpoint, _) = serve(|path| match path {
            "/sdapi/v1/sd-models" => Reply::json(MODELS_JSON),
            _ => Reply::status(500),
        })
        .await;

        let mut pipeline = HttpPipeline::new(endpoint).unwrap();
        pipeline
            .initialize(Path::new("."), ComputeUnits::All)
            .await
            .unwrap();

        let mut buffer = PageBuffer::new(Resolution::new(4, 4)).unwrap();
        let cancel = CancellationSource::new();
        let err = pipeline
            .run(&RgbaImage::new(4, 4), &mut buffer, &cancel.signal())
            .await
            .unwrap_err();

        assert_eq!(err.category(), "generation");
        assert_eq!(buffer.revision(), 0);
    }

    #[tokio::test]
    async fn test_run_returns_cancelled_mid_request() {
        let (endpoint, _) = serve(|path| match path {
            "/sdapi/v1/sd-models" => Reply::json(MODELS_JSON),
            _ => Reply::json(r#"{"images": []}"#).delayed(Duration::from_secs(30)),
        })
        .await;

        let mut pipeline = HttpPipeline::new(endpoint).unwrap();
        pipeline
            .initialize(Path::new("."), ComputeUnits::All)
            .await
            .unwrap();

        let cancel = CancellationSource::new();
        let signal = cancel.signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let mut buffer = PageBuffer::new(Resolution::new(4, 4)).unwrap();
        let started = std::time::Instant::now();
        let err = pipeline
            .run(&RgbaImage::new(4, 4), &mut buffer, &signal)
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(buffer.revision(), 0);
    }
}
