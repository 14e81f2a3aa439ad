use anyhow::Result;
use prompt2storybook::core::config::Config;
use prompt2storybook::core::io::NativeStorage;
use prompt2storybook::services::imagegen::create_image_client;
use prompt2storybook::services::llm::create_llm;
use prompt2storybook::services::pipeline::Orchestrator;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM and image settings.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let prompt = match std::env::args().nth(1) {
        Some(arg) => arg,
        None => {
            if config.unattended {
                anyhow::bail!("No story prompt given. Pass it as the first argument.");
            }
            inquire::Text::new("Please enter a story idea:").prompt()?
        }
    };

    let llm = create_llm(&config.llm)?;
    let images = create_image_client(&config.images)?;
    let storage = Arc::new(NativeStorage::new());

    let orchestrator = Orchestrator::new(config.clone(), llm, images, storage);
    println!("Generating storybook (run {})...", orchestrator.run_id());

    let artifact = match orchestrator.generate_storybook(&prompt).await {
        Ok(artifact) => artifact,
        Err(e) => {
            eprintln!("Storybook generation failed: {}", e);
            return Err(e.into());
        }
    };

    let filename = format!("{}.pdf", artifact.title.to_lowercase().replace(' ', "_"));
    let out_path = Path::new(&config.output_folder).join(filename);
    tokio::fs::write(&out_path, &artifact.pdf).await?;

    println!("Storybook complete: {:?}", out_path);
    Ok(())
}
