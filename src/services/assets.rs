use crate::core::io::Storage;
use crate::core::plan::CharacterRef;
use crate::services::imagegen::ImageClient;
use crate::services::llm::LlmClient;
use anyhow::{anyhow, Result};
use log::{debug, warn};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// A generated reference image for one character, immutable after
/// creation and shared by every page featuring that character.
#[derive(Clone, Debug)]
pub struct CharacterAsset {
    pub canonical_name: String,
    pub png: Arc<Vec<u8>>,
}

/// Deduplicating store of character base images, keyed by canonical
/// name. Creation is single-flight per key: concurrent requests for
/// the same name collapse into one generation call, while different
/// names generate concurrently.
pub struct AssetCache {
    cache: Cache<String, CharacterAsset>,
    llm: Arc<dyn LlmClient>,
    images: Arc<dyn ImageClient>,
    storage: Arc<dyn Storage>,
    scratch_dir: String,
    attempts: u32,
    retry_delay: Duration,
}

impl AssetCache {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        images: Arc<dyn ImageClient>,
        storage: Arc<dyn Storage>,
        scratch_dir: String,
        attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            cache: Cache::new(64),
            llm,
            images,
            storage,
            scratch_dir,
            attempts,
            retry_delay,
        }
    }

    /// Returns the existing asset without a new generation call when
    /// the name is already resolved (in memory or on disk from an
    /// earlier run); otherwise generates, stores and returns it.
    pub async fn get_or_create(&self, character: &CharacterRef) -> Result<CharacterAsset> {
        let key = character.canonical_name();
        let path = format!("{}/base/{}.png", self.scratch_dir, key);

        let llm = self.llm.clone();
        let images = self.images.clone();
        let storage = self.storage.clone();
        let attempts = self.attempts;
        let retry_delay = self.retry_delay;
        let character = character.clone();
        let init_key = key.clone();

        self.cache
            .try_get_with(key, async move {
                if storage.exists(&path).await? {
                    debug!("Reusing stored base image for \"{init_key}\"");
                    let bytes = storage.read(&path).await?;
                    return Ok(CharacterAsset {
                        canonical_name: init_key,
                        png: Arc::new(bytes),
                    });
                }

                let mut last_err = None;
                for attempt in 1..=attempts {
                    match generate_once(llm.as_ref(), images.as_ref(), &character).await {
                        Ok(bytes) => {
                            storage.write(&path, &bytes).await?;
                            return Ok(CharacterAsset {
                                canonical_name: init_key,
                                png: Arc::new(bytes),
                            });
                        }
                        Err(e) => {
                            warn!(
                                "Base image for \"{init_key}\" failed (attempt {attempt}/{attempts}): {e:#}"
                            );
                            last_err = Some(e);
                            if attempt < attempts {
                                tokio::time::sleep(retry_delay).await;
                            }
                        }
                    }
                }
                Err(last_err.unwrap_or_else(|| anyhow!("no generation attempts configured")))
            })
            .await
            .map_err(|e: Arc<anyhow::Error>| anyhow!("{e:#}"))
    }
}

/// Two-step generation: expand the short storyboard description into
/// concrete physical traits with the text model, then draw from the
/// traits. Keeps the character recognizable across every page.
async fn generate_once(
    llm: &dyn LlmClient,
    images: &dyn ImageClient,
    character: &CharacterRef,
) -> Result<Vec<u8>> {
    let trait_prompt = format!(
        "Return a specific set of defining physical traits for a children's cartoon character with:\n\
         name: \"{}\"\n\
         additional description: \"{}\"\n\n\
         Describe the head, face, body, clothing, limbs and any tail concretely, \
         with emphasis on direction (facing forwards, arms at sides, and so on), \
         so the character can be redrawn identically in different scenes.",
        character.name, character.description
    );

    let traits = llm
        .chat(
            "You are an illustrator's assistant for a children's book studio.",
            &trait_prompt,
        )
        .await?;

    let bytes = images
        .generate(&format!("Style: children's cartoon book\n{}", traits))
        .await?;

    if bytes.is_empty() {
        return Err(anyhow!(
            "image generation returned no usable output for \"{}\"",
            character.name
        ));
    }
    Ok(bytes)
}
