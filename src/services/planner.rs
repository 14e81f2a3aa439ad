use crate::core::error::PipelineError;
use crate::core::plan::{PageSpec, Plan};
use crate::services::llm::LlmClient;
use log::warn;
use std::sync::Arc;
use std::time::Duration;

const STORYBOARDER_SYSTEM_PROMPT: &str = "\
You are a children's storyteller who structures story books in a fixed number of pages.
Based on the user prompted story idea, create a structured storyboard.

Rules:
1. Each page should include
    - characters: list of character names in that panel and physical description of the character (eg. name: \"Peppa Pig\"; description: \"pig, red shirt, happy, green shoes\")
    - background: point form physical description of the background scene (eg. \"grass field, sunny, clouds, sparse trees, house in the distance\")
    - narration: one line that the narrator should say
2. Keep it engaging and age-appropriate.
3. Return it as a JSON list of panels like this:
    [
        {\"characters\": [{\"name\": \"...\", \"description\": \"...\"}, ...],
         \"background\": \"...\",
         \"narration\": \"...\"},
        ...
    ]
Return only the JSON list, nothing else.";

/// Turns a free-text prompt into a validated storyboard. Malformed
/// output and wrong page counts are retried on separate budgets; the
/// error reports which one was exhausted.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    page_count: usize,
    attempts: u32,
    retry_delay: Duration,
}

impl Planner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        page_count: usize,
        attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            llm,
            page_count,
            attempts,
            retry_delay,
        }
    }

    pub async fn obtain_plan(&self, prompt: &str) -> Result<Plan, PipelineError> {
        let user_prompt = format!(
            "Create exactly {} pages for this story idea:\n{}",
            self.page_count, prompt
        );

        let mut malformed_attempts: u32 = 0;
        let mut count_attempts: u32 = 0;
        let mut last_count: usize = 0;

        loop {
            if malformed_attempts >= self.attempts {
                return Err(PipelineError::PlanInvalid {
                    attempts: malformed_attempts,
                });
            }
            if count_attempts >= self.attempts {
                return Err(PipelineError::PlanCountMismatch {
                    expected: self.page_count,
                    got: last_count,
                    attempts: count_attempts,
                });
            }

            let response = match self.llm.chat(STORYBOARDER_SYSTEM_PROMPT, &user_prompt).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Storyboard request failed: {e:#}");
                    malformed_attempts += 1;
                    if malformed_attempts < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    continue;
                }
            };

            let clean = strip_code_blocks(&response);
            let pages: Vec<PageSpec> = match serde_json::from_str(&clean) {
                Ok(pages) => pages,
                Err(e) => {
                    warn!("Storyboard output was not a valid page list: {e}");
                    malformed_attempts += 1;
                    if malformed_attempts < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    continue;
                }
            };

            match Plan::from_pages(pages, self.page_count) {
                Ok(plan) => return Ok(plan),
                Err(got) => {
                    warn!(
                        "Storyboard had {} pages, expected {}; re-requesting",
                        got, self.page_count
                    );
                    last_count = got;
                    count_attempts += 1;
                    if count_attempts < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
    }
}

/// LLMs often wrap JSON in markdown fences despite instructions.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}
