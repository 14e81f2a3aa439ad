use thiserror::Error;

/// Caller-visible failure taxonomy. Every variant names the furthest
/// stage reached and the specific units still outstanding, so a caller
/// can resume the missing work instead of restarting the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storyboard generation returned malformed output after {attempts} attempts")]
    PlanInvalid { attempts: u32 },

    #[error("storyboard had {got} pages instead of {expected} after {attempts} attempts")]
    PlanCountMismatch {
        expected: usize,
        got: usize,
        attempts: u32,
    },

    #[error("character asset generation failed for \"{name}\"")]
    AssetGenerationFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("scene composition failed for pages {indices:?}")]
    SceneGenerationFailed { indices: Vec<usize> },

    #[error("narration overlay failed for pages {indices:?}")]
    NarrationFailed { indices: Vec<usize> },

    #[error("storybook assembly failed")]
    AssemblyFailed {
        #[source]
        source: anyhow::Error,
    },
}
