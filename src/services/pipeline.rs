use crate::core::config::Config;
use crate::core::error::PipelineError;
use crate::core::io::Storage;
use crate::core::plan::{PageSpec, Plan};
use crate::core::tracker::{Stage, StageTracker};
use crate::services::assembler;
use crate::services::assets::{AssetCache, CharacterAsset};
use crate::services::imagegen::ImageClient;
use crate::services::llm::LlmClient;
use crate::services::planner::Planner;
use crate::utils::overlay::overlay_narration;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Planning,
    CharacterPrep,
    SceneGen,
    Narration,
    Assembling,
    Done,
}

/// The finished storybook: page-ordered PDF bytes plus a display title.
#[derive(Debug)]
pub struct FinalArtifact {
    pub title: String,
    pub pdf: Vec<u8>,
}

/// Drives one storybook run through Planning -> CharacterPrep ->
/// SceneGen -> Narration -> Assembling. All per-run state (plan,
/// tracker, intermediate images) lives in a scratch directory keyed by
/// run id; re-invoking with the same run id skips completed work.
pub struct Orchestrator {
    config: Config,
    llm: Arc<dyn LlmClient>,
    images: Arc<dyn ImageClient>,
    storage: Arc<dyn Storage>,
    run_id: String,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        images: Arc<dyn ImageClient>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let run_id = Uuid::new_v4().simple().to_string();
        Self::with_run_id(config, llm, images, storage, run_id)
    }

    /// Resume (or deterministically name) a run. Completed stages of an
    /// earlier invocation with the same id are not re-executed.
    pub fn with_run_id(
        config: Config,
        llm: Arc<dyn LlmClient>,
        images: Arc<dyn ImageClient>,
        storage: Arc<dyn Storage>,
        run_id: String,
    ) -> Self {
        Self {
            config,
            llm,
            images,
            storage,
            run_id,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn scratch_dir(&self) -> String {
        format!("{}/{}", self.config.build_folder, self.run_id)
    }

    fn plan_path(&self) -> String {
        format!("{}/plan.json", self.scratch_dir())
    }

    fn state_path(&self) -> String {
        format!("{}/state.json", self.scratch_dir())
    }

    fn scene_path(&self, index: usize) -> String {
        format!("{}/scene/{}.png", self.scratch_dir(), index)
    }

    fn page_path(&self, index: usize) -> String {
        format!("{}/page/{}.png", self.scratch_dir(), index)
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.config.pipeline.retry_delay_seconds)
    }

    pub async fn generate_storybook(
        &self,
        prompt: &str,
    ) -> Result<FinalArtifact, PipelineError> {
        info!("Run {}: {:?}", self.run_id, PipelineStage::Planning);
        let plan = self.planning(prompt).await?;
        let mut tracker = self.load_tracker(plan.page_count()).await;

        info!("Run {}: {:?}", self.run_id, PipelineStage::CharacterPrep);
        let assets = self.character_prep(&plan).await?;

        info!("Run {}: {:?}", self.run_id, PipelineStage::SceneGen);
        self.scene_gen(&plan, &assets, &mut tracker).await?;

        info!("Run {}: {:?}", self.run_id, PipelineStage::Narration);
        self.narration(&plan, &mut tracker).await?;

        info!("Run {}: {:?}", self.run_id, PipelineStage::Assembling);
        let artifact = self.assembling(&plan).await?;

        if self.config.keep_scratch {
            info!("Keeping scratch directory {}", self.scratch_dir());
        } else if let Err(e) = self.storage.remove(&self.scratch_dir()).await {
            warn!("Failed to purge scratch directory: {e:#}");
        }

        info!("Run {}: {:?}", self.run_id, PipelineStage::Done);
        Ok(artifact)
    }

    // --- Planning ---

    async fn planning(&self, prompt: &str) -> Result<Plan, PipelineError> {
        let plan_path = self.plan_path();
        if self.storage.exists(&plan_path).await.unwrap_or(false) {
            if let Ok(bytes) = self.storage.read(&plan_path).await {
                if let Ok(plan) = serde_json::from_slice::<Plan>(&bytes) {
                    if plan.page_count() == self.config.pipeline.page_count {
                        info!("Reusing cached storyboard from {}", plan_path);
                        return Ok(plan);
                    }
                }
            }
        }

        let planner = Planner::new(
            self.llm.clone(),
            self.config.pipeline.page_count,
            self.config.pipeline.attempts,
            self.retry_delay(),
        );
        let plan = planner.obtain_plan(prompt).await?;

        match serde_json::to_vec_pretty(&plan) {
            Ok(bytes) => {
                if let Err(e) = self.storage.write(&plan_path, &bytes).await {
                    warn!("Failed to persist storyboard: {e:#}");
                }
            }
            Err(e) => warn!("Failed to serialize storyboard: {e}"),
        }
        Ok(plan)
    }

    // --- Tracker persistence (best-effort; artifact files are the
    //     fallback source of truth on re-entry) ---

    async fn load_tracker(&self, page_count: usize) -> StageTracker {
        if let Ok(bytes) = self.storage.read(&self.state_path()).await {
            if let Ok(tracker) = serde_json::from_slice::<StageTracker>(&bytes) {
                if tracker.page_count() == page_count {
                    return tracker;
                }
            }
        }
        StageTracker::new(page_count)
    }

    async fn persist_tracker(&self, tracker: &StageTracker) {
        match serde_json::to_vec_pretty(tracker) {
            Ok(bytes) => {
                if let Err(e) = self.storage.write(&self.state_path(), &bytes).await {
                    warn!("Failed to persist stage tracker: {e:#}");
                }
            }
            Err(e) => warn!("Failed to serialize stage tracker: {e}"),
        }
    }

    // --- CharacterPrep ---

    async fn character_prep(
        &self,
        plan: &Plan,
    ) -> Result<HashMap<String, CharacterAsset>, PipelineError> {
        let cache = AssetCache::new(
            self.llm.clone(),
            self.images.clone(),
            self.storage.clone(),
            self.scratch_dir(),
            self.config.pipeline.attempts,
            self.retry_delay(),
        );

        let unique = plan.unique_characters();
        info!("Preparing {} unique character(s)", unique.len());

        let results: Vec<(String, anyhow::Result<CharacterAsset>)> =
            futures_util::stream::iter(unique.iter())
                .map(|character| {
                    let cache = &cache;
                    async move {
                        let outcome = cache.get_or_create(character).await;
                        (character.name.clone(), outcome)
                    }
                })
                .buffer_unordered(self.config.pipeline.concurrency)
                .collect()
                .await;

        let mut assets = HashMap::new();
        for (name, outcome) in results {
            match outcome {
                Ok(asset) => {
                    assets.insert(asset.canonical_name.clone(), asset);
                }
                Err(source) => {
                    return Err(PipelineError::AssetGenerationFailed { name, source });
                }
            }
        }
        Ok(assets)
    }

    // --- SceneGen ---

    async fn scene_gen(
        &self,
        plan: &Plan,
        assets: &HashMap<String, CharacterAsset>,
        tracker: &mut StageTracker,
    ) -> Result<(), PipelineError> {
        // Adopt scene files left by an earlier invocation that crashed
        // before the tracker was persisted.
        for index in tracker.pending(Stage::SceneGen) {
            if self.storage.exists(&self.scene_path(index)).await.unwrap_or(false) {
                tracker.mark_done(Stage::SceneGen, index);
            }
        }

        let pending = tracker.pending(Stage::SceneGen);
        if pending.is_empty() {
            info!("All scenes already composed");
            return Ok(());
        }

        info!("Composing {} scene(s)", pending.len());
        let pb = ProgressBar::new(pending.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let results: Vec<(usize, anyhow::Result<()>)> =
            futures_util::stream::iter(pending.into_iter())
                .map(|index| {
                    let pb = pb.clone();
                    async move {
                        let outcome = self.compose_page(plan.page(index), assets, index).await;
                        pb.inc(1);
                        (index, outcome)
                    }
                })
                .buffer_unordered(self.config.pipeline.concurrency)
                .collect()
                .await;
        pb.finish_and_clear();

        let mut failed = Vec::new();
        for (index, outcome) in results {
            match outcome {
                Ok(()) => tracker.mark_done(Stage::SceneGen, index),
                Err(e) => {
                    warn!("Scene {index} exhausted its retry budget: {e:#}");
                    failed.push(index);
                }
            }
        }
        self.persist_tracker(tracker).await;

        if failed.is_empty() {
            Ok(())
        } else {
            failed.sort_unstable();
            Err(PipelineError::SceneGenerationFailed { indices: failed })
        }
    }

    /// One page's scene composition with its own bounded retry budget.
    /// Failures here never disturb other indices.
    async fn compose_page(
        &self,
        page: &PageSpec,
        assets: &HashMap<String, CharacterAsset>,
        index: usize,
    ) -> anyhow::Result<()> {
        let requirements = scene_requirements(page);
        let references: Vec<Vec<u8>> = page
            .characters
            .iter()
            .filter_map(|c| assets.get(&c.canonical_name()))
            .map(|asset| asset.png.as_ref().clone())
            .collect();

        let attempts = self.config.pipeline.attempts;
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.images.compose(&requirements, &references, index).await {
                Ok(bytes) if bytes.is_empty() => {
                    last_err = Some(anyhow::anyhow!("composition returned empty output"));
                }
                Ok(bytes) => {
                    self.storage.write(&self.scene_path(index), &bytes).await?;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Scene {index} attempt {attempt}/{attempts} failed: {e:#}");
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no composition attempts configured")))
    }

    // --- Narration ---

    async fn narration(
        &self,
        plan: &Plan,
        tracker: &mut StageTracker,
    ) -> Result<(), PipelineError> {
        for index in tracker.pending(Stage::Narration) {
            if self.storage.exists(&self.page_path(index)).await.unwrap_or(false) {
                tracker.mark_done(Stage::Narration, index);
            }
        }

        let pending = tracker.pending(Stage::Narration);
        if pending.is_empty() {
            info!("All pages already narrated");
            return Ok(());
        }

        info!("Overlaying narration on {} page(s)", pending.len());
        let mut failed = Vec::new();
        for index in pending {
            match self.narrate_page(plan.page(index), index).await {
                Ok(()) => tracker.mark_done(Stage::Narration, index),
                Err(e) => {
                    warn!("Narration for page {index} failed: {e:#}");
                    failed.push(index);
                }
            }
        }
        self.persist_tracker(tracker).await;

        if failed.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::NarrationFailed { indices: failed })
        }
    }

    async fn narrate_page(&self, page: &PageSpec, index: usize) -> anyhow::Result<()> {
        let scene = self.storage.read(&self.scene_path(index)).await?;
        let narrated = overlay_narration(&scene, &page.narration)?;
        self.storage.write(&self.page_path(index), &narrated).await?;
        Ok(())
    }

    // --- Assembling ---

    async fn assembling(&self, plan: &Plan) -> Result<FinalArtifact, PipelineError> {
        let pages = self
            .gather_pages()
            .await
            .map_err(|source| PipelineError::AssemblyFailed { source })?;

        let title = plan.title();
        let pdf = assembler::assemble(&title, &pages, self.config.pipeline.page_count)
            .map_err(|source| PipelineError::AssemblyFailed { source })?;

        Ok(FinalArtifact { title, pdf })
    }

    /// Narrated pages in page order 1..=N, regardless of the order in
    /// which their stages completed.
    pub(crate) async fn gather_pages(&self) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut pages = Vec::with_capacity(self.config.pipeline.page_count);
        for index in 1..=self.config.pipeline.page_count {
            pages.push(self.storage.read(&self.page_path(index)).await?);
        }
        Ok(pages)
    }
}

fn scene_requirements(page: &PageSpec) -> String {
    let mut requirements = format!(
        "Illustrate one storybook scene in a children's cartoon style.\n\
         Background: {}\n\
         Narration context: {}",
        page.background, page.narration
    );
    for character in &page.characters {
        requirements.push_str(&format!(
            "\nThe character \"{}\" ({}) appears in the scene, matching the attached reference image.",
            character.name, character.description
        ));
    }
    requirements.push_str("\nLeave the bottom of the image uncluttered for narration text.");
    requirements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::core::io::NativeStorage;
    use crate::core::plan::CharacterRef;
    use crate::services::imagegen::ImageGenConfig;
    use crate::services::llm::LlmConfig;
    use anyhow::Result;
    use async_trait::async_trait;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Mutex;

    fn png_bytes(shade: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(64, 64, Rgba([shade, 128, 200, 255]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    /// Storyboard with "Fox" on pages 1, 3 and 5 (varying case) and
    /// "Bear" on page 2 -- two unique characters.
    fn storyboard_json() -> String {
        let fox = r#"{"name": "Fox", "description": "red fur"}"#;
        let fox_lower = r#"{"name": "fox", "description": "red fur"}"#;
        let bear = r#"{"name": "Bear", "description": "brown, tall"}"#;
        let page = |chars: &str, n: usize| {
            format!(
                r#"{{"characters": [{}], "background": "forest", "narration": "Page {} of the fox story."}}"#,
                chars, n
            )
        };
        format!(
            "[{},{},{},{},{},{}]",
            page(fox, 1),
            page(bear, 2),
            page(fox_lower, 3),
            page("", 4),
            page(fox, 5),
            page("", 6)
        )
    }

    #[derive(Debug)]
    struct MockLlm {
        plan_calls: Mutex<u32>,
        trait_calls: Mutex<u32>,
    }

    impl MockLlm {
        fn new() -> Self {
            Self {
                plan_calls: Mutex::new(0),
                trait_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn chat(&self, _system: &str, user: &str) -> Result<String> {
            if user.contains("story idea") {
                *self.plan_calls.lock().unwrap() += 1;
                return Ok(storyboard_json());
            }
            *self.trait_calls.lock().unwrap() += 1;
            Ok("round head, bushy tail".to_string())
        }
    }

    struct MockImages {
        generate_calls: Mutex<u32>,
        compose_calls: Mutex<HashMap<usize, u32>>,
        /// Remaining failures per index before compose succeeds.
        compose_failures: Mutex<HashMap<usize, u32>>,
    }

    impl MockImages {
        fn new() -> Self {
            Self {
                generate_calls: Mutex::new(0),
                compose_calls: Mutex::new(HashMap::new()),
                compose_failures: Mutex::new(HashMap::new()),
            }
        }

        fn failing(index: usize, times: u32) -> Self {
            let mock = Self::new();
            mock.compose_failures.lock().unwrap().insert(index, times);
            mock
        }

        fn compose_count(&self, index: usize) -> u32 {
            *self.compose_calls.lock().unwrap().get(&index).unwrap_or(&0)
        }
    }

    #[async_trait]
    impl ImageClient for MockImages {
        async fn generate(&self, _prompt: &str) -> Result<Vec<u8>> {
            *self.generate_calls.lock().unwrap() += 1;
            Ok(png_bytes(10))
        }

        async fn compose(&self, _req: &str, _refs: &[Vec<u8>], index: usize) -> Result<Vec<u8>> {
            *self.compose_calls.lock().unwrap().entry(index).or_insert(0) += 1;
            let mut failures = self.compose_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("mock compose failure for page {index}");
                }
            }
            Ok(png_bytes((index * 30) as u8))
        }
    }

    fn test_config(root: &Path) -> Config {
        Config {
            output_folder: root.join("output").to_string_lossy().to_string(),
            build_folder: root.join("build").to_string_lossy().to_string(),
            unattended: true,
            keep_scratch: false,
            llm: LlmConfig {
                provider: "openai".to_string(),
                openai: None,
                gemini: None,
            },
            images: ImageGenConfig::default(),
            pipeline: PipelineConfig {
                page_count: 6,
                attempts: 2,
                retry_delay_seconds: 0,
                concurrency: 3,
            },
        }
    }

    fn orchestrator(
        config: Config,
        llm: Arc<MockLlm>,
        images: Arc<MockImages>,
        run_id: &str,
    ) -> Orchestrator {
        Orchestrator::with_run_id(
            config,
            llm,
            images,
            Arc::new(NativeStorage::new()),
            run_id.to_string(),
        )
    }

    #[tokio::test]
    async fn happy_path_produces_pdf_and_dedups_characters() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(MockLlm::new());
        let images = Arc::new(MockImages::new());
        let orch = orchestrator(test_config(dir.path()), llm.clone(), images.clone(), "run1");

        let artifact = orch.generate_storybook("a fox goes home").await.unwrap();
        assert!(artifact.pdf.starts_with(b"%PDF"));
        assert_eq!(artifact.title, "Page 1 of the fox story");

        assert_eq!(*llm.plan_calls.lock().unwrap(), 1);
        // Fox appears on three pages but is generated once; Bear once.
        assert_eq!(*images.generate_calls.lock().unwrap(), 2);
        for index in 1..=6 {
            assert_eq!(images.compose_count(index), 1);
        }

        // Scratch is purged after successful assembly.
        assert!(!dir.path().join("build/run1").exists());
        Ok(())
    }

    #[tokio::test]
    async fn transient_scene_failure_retries_only_that_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(MockLlm::new());
        let images = Arc::new(MockImages::failing(3, 1));
        let orch = orchestrator(test_config(dir.path()), llm, images.clone(), "run2");

        let artifact = orch.generate_storybook("a fox goes home").await.unwrap();
        assert!(artifact.pdf.starts_with(b"%PDF"));

        assert_eq!(images.compose_count(3), 2, "failed index retried");
        for index in [1, 2, 4, 5, 6] {
            assert_eq!(images.compose_count(index), 1, "index {index} not regenerated");
        }
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_scene_budget_fails_closed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(MockLlm::new());
        // Fails more times than the attempt budget of 2.
        let images = Arc::new(MockImages::failing(2, 10));
        let orch = orchestrator(test_config(dir.path()), llm, images.clone(), "run3");

        let err = orch.generate_storybook("a fox goes home").await.unwrap_err();
        match err {
            PipelineError::SceneGenerationFailed { indices } => assert_eq!(indices, vec![2]),
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(images.compose_count(2), 2, "budget bounded the retries");
        for index in [1, 3, 4, 5, 6] {
            assert_eq!(images.compose_count(index), 1);
        }

        // Narration and assembly never ran.
        let page_dir = dir.path().join("build/run3/page");
        assert!(!page_dir.exists(), "assembler must not be reached");
        // Scratch survives a failed run so it can be resumed.
        assert!(dir.path().join("build/run3/scene/1.png").exists());
        Ok(())
    }

    #[tokio::test]
    async fn reentry_with_same_run_id_skips_completed_stages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = test_config(dir.path());
        config.keep_scratch = true;

        let llm = Arc::new(MockLlm::new());
        let images = Arc::new(MockImages::new());
        let orch = orchestrator(config.clone(), llm, images, "run4");
        orch.generate_storybook("a fox goes home").await.unwrap();

        // Fresh orchestrator and fresh mocks, same run id.
        let llm2 = Arc::new(MockLlm::new());
        let images2 = Arc::new(MockImages::new());
        let orch2 = orchestrator(config, llm2.clone(), images2.clone(), "run4");
        let artifact = orch2.generate_storybook("a fox goes home").await.unwrap();

        assert!(artifact.pdf.starts_with(b"%PDF"));
        assert_eq!(*llm2.plan_calls.lock().unwrap(), 0, "plan not re-requested");
        assert_eq!(
            *images2.generate_calls.lock().unwrap(),
            0,
            "characters not regenerated"
        );
        for index in 1..=6 {
            assert_eq!(images2.compose_count(index), 0, "scenes not recomposed");
        }
        Ok(())
    }

    #[tokio::test]
    async fn resuming_failed_run_recomposes_only_missing_indices() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());

        let llm = Arc::new(MockLlm::new());
        let images = Arc::new(MockImages::failing(5, 10));
        let orch = orchestrator(config.clone(), llm, images.clone(), "run5");
        let err = orch.generate_storybook("a fox goes home").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SceneGenerationFailed { ref indices } if indices == &vec![5]
        ));

        // Second invocation with a healthy backend completes the run.
        let llm2 = Arc::new(MockLlm::new());
        let images2 = Arc::new(MockImages::new());
        let orch2 = orchestrator(config, llm2.clone(), images2.clone(), "run5");
        let artifact = orch2.generate_storybook("a fox goes home").await.unwrap();
        assert!(artifact.pdf.starts_with(b"%PDF"));

        assert_eq!(*llm2.plan_calls.lock().unwrap(), 0);
        assert_eq!(images2.compose_count(5), 1, "only the missing index runs");
        for index in [1, 2, 3, 4, 6] {
            assert_eq!(images2.compose_count(index), 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_scene_fails_narration_for_that_index_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(MockLlm::new());
        let images = Arc::new(MockImages::new());
        let orch = orchestrator(test_config(dir.path()), llm.clone(), images.clone(), "run7");

        // Seed the scratch area as a prior invocation would have left
        // it: cached plan, every scene composed, but page 3's scene
        // bytes are not an image.
        let storage = NativeStorage::new();
        let pages: Vec<PageSpec> = serde_json::from_str(&storyboard_json()).unwrap();
        let plan = Plan::from_pages(pages, 6).unwrap();
        storage
            .write(&orch.plan_path(), &serde_json::to_vec(&plan)?)
            .await?;
        for index in 1..=6 {
            let bytes = if index == 3 {
                b"garbage".to_vec()
            } else {
                png_bytes((index * 30) as u8)
            };
            storage.write(&orch.scene_path(index), &bytes).await?;
        }

        let err = orch.generate_storybook("a fox goes home").await.unwrap_err();
        match err {
            PipelineError::NarrationFailed { indices } => assert_eq!(indices, vec![3]),
            other => panic!("unexpected error: {other:?}"),
        }

        // Scenes were adopted, not recomposed.
        assert_eq!(*llm.plan_calls.lock().unwrap(), 0);
        for index in 1..=6 {
            assert_eq!(images.compose_count(index), 0);
        }

        // The healthy pages were narrated; the assembler never ran.
        for index in [1, 2, 4, 5, 6] {
            assert!(storage.exists(&orch.page_path(index)).await?);
        }
        assert!(!storage.exists(&orch.page_path(3)).await?);
        // Scratch survives so the bad scene can be replaced and resumed.
        assert!(storage.exists(&orch.scene_path(3)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn gathered_pages_are_in_page_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(MockLlm::new());
        let images = Arc::new(MockImages::new());
        let orch = orchestrator(test_config(dir.path()), llm, images, "run6");

        // Pages land on disk in scrambled completion order.
        let storage = NativeStorage::new();
        let mut tracker = StageTracker::new(6);
        for index in [4, 1, 6, 2, 3, 5] {
            storage
                .write(
                    &orch.page_path(index),
                    format!("page-{index}").as_bytes(),
                )
                .await?;
            tracker.mark_done(Stage::Narration, index);
        }
        assert!(tracker.is_complete(Stage::Narration));

        let pages = orch.gather_pages().await?;
        let contents: Vec<String> = pages
            .iter()
            .map(|p| String::from_utf8(p.clone()).unwrap())
            .collect();
        assert_eq!(
            contents,
            vec!["page-1", "page-2", "page-3", "page-4", "page-5", "page-6"]
        );
        Ok(())
    }

    #[test]
    fn scene_requirements_mention_background_narration_and_characters() {
        let page = PageSpec {
            characters: vec![CharacterRef {
                name: "Fox".to_string(),
                description: "red fur".to_string(),
            }],
            background: "grass field, sunny".to_string(),
            narration: "The fox sets out.".to_string(),
        };
        let req = scene_requirements(&page);
        assert!(req.contains("grass field, sunny"));
        assert!(req.contains("The fox sets out."));
        assert!(req.contains("\"Fox\""));
        assert!(req.contains("red fur"));
    }
}
