use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Text-to-image capabilities the pipeline consumes. `generate` makes a
/// standalone image from a prompt; `compose` combines text guidance
/// with reference images into one scene.
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>>;
    async fn compose(
        &self,
        requirements: &str,
        reference_images: &[Vec<u8>],
        index: usize,
    ) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageGenConfig {
    #[serde(default = "default_image_provider")]
    pub provider: String,

    #[serde(default = "default_page_size")]
    pub size: String,

    #[serde(default = "default_quality")]
    pub quality: String,

    pub openai: Option<OpenAiImageConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiImageConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for ImageGenConfig {
    fn default() -> Self {
        Self {
            provider: default_image_provider(),
            size: default_page_size(),
            quality: default_quality(),
            openai: None,
        }
    }
}

fn default_image_provider() -> String {
    "openai".to_string()
}
fn default_page_size() -> String {
    "1024x1024".to_string()
}
fn default_quality() -> String {
    "high".to_string()
}

pub fn create_image_client(config: &ImageGenConfig) -> Result<Arc<dyn ImageClient>> {
    match config.provider.as_str() {
        "openai" => {
            let cfg = config
                .openai
                .as_ref()
                .context("OpenAI image config missing")?;
            Ok(Arc::new(OpenAiImageClient::new(cfg, &config.size, &config.quality)))
        }
        _ => Err(anyhow!("Unknown image provider: {}", config.provider)),
    }
}

// --- OpenAI ---

struct OpenAiImageClient {
    api_key: String,
    model: String,
    base_url: String,
    size: String,
    quality: String,
    client: reqwest::Client,
}

impl OpenAiImageClient {
    fn new(cfg: &OpenAiImageConfig, size: &str, quality: &str) -> Self {
        Self {
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            base_url: cfg
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            size: size.to_string(),
            quality: quality.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct GenerationRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
}

#[derive(Deserialize)]
struct GenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Deserialize)]
struct GeneratedImage {
    b64_json: Option<String>,
}

#[derive(Serialize)]
struct ComposeRequest {
    model: String,
    input: Vec<ComposeInput>,
    tools: Vec<ImageTool>,
}

#[derive(Serialize)]
struct ComposeInput {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "input_text")]
    Text { text: String },
    #[serde(rename = "input_image")]
    Image { image_url: String },
}

#[derive(Serialize)]
struct ImageTool {
    #[serde(rename = "type")]
    kind: String,
    quality: String,
    size: String,
}

#[derive(Deserialize)]
struct ComposeResponse {
    output: Vec<ComposeOutput>,
}

#[derive(Deserialize)]
struct ComposeOutput {
    #[serde(rename = "type")]
    kind: String,
    result: Option<String>,
}

#[async_trait]
impl ImageClient for OpenAiImageClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        let url = format!("{}/images/generations", self.base_url);

        let request_body = GenerationRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            n: 1,
            size: self.size.clone(),
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Image generation API error: {}", error_text));
        }

        let result: GenerationResponse = resp.json().await?;
        let b64 = result
            .data
            .first()
            .and_then(|d| d.b64_json.as_deref())
            .ok_or_else(|| anyhow!("Image generation returned no image data"))?;

        Ok(BASE64.decode(b64)?)
    }

    async fn compose(
        &self,
        requirements: &str,
        reference_images: &[Vec<u8>],
        index: usize,
    ) -> Result<Vec<u8>> {
        let url = format!("{}/responses", self.base_url);

        let mut content = vec![ContentPart::Text {
            text: requirements.to_string(),
        }];
        for bytes in reference_images {
            content.push(ContentPart::Image {
                image_url: format!("data:image/png;base64,{}", BASE64.encode(bytes)),
            });
        }

        let request_body = ComposeRequest {
            model: self.model.clone(),
            input: vec![ComposeInput {
                role: "user".to_string(),
                content,
            }],
            tools: vec![ImageTool {
                kind: "image_generation".to_string(),
                quality: self.quality.clone(),
                size: self.size.clone(),
            }],
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!(
                "Scene composition API error for page {}: {}",
                index,
                error_text
            ));
        }

        let result: ComposeResponse = resp.json().await?;
        let b64 = result
            .output
            .iter()
            .find(|o| o.kind == "image_generation_call")
            .and_then(|o| o.result.as_deref())
            .ok_or_else(|| anyhow!("Scene composition returned no image for page {}", index))?;

        Ok(BASE64.decode(b64)?)
    }
}
