use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_PAGE_COUNT: usize = 6;

/// One character appearing on a storyboard page, as returned by the planner.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CharacterRef {
    pub name: String,
    pub description: String,
}

impl CharacterRef {
    /// Dedup key: lowercase, spaces replaced with underscores.
    /// Two refs with the same canonical name resolve to the same asset.
    pub fn canonical_name(&self) -> String {
        self.name.trim().to_lowercase().replace(' ', "_")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PageSpec {
    #[serde(default)]
    pub characters: Vec<CharacterRef>,
    pub background: String,
    pub narration: String,
}

/// Validated storyboard: exactly `page_count` pages, in page order.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Plan {
    pages: Vec<PageSpec>,
}

impl Plan {
    /// Rejects wrong-length page lists instead of padding or truncating.
    pub fn from_pages(pages: Vec<PageSpec>, expected: usize) -> Result<Self, usize> {
        if pages.len() != expected {
            return Err(pages.len());
        }
        Ok(Self { pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page indices are 1-based throughout the pipeline.
    pub fn page(&self, index: usize) -> &PageSpec {
        &self.pages[index - 1]
    }

    pub fn pages(&self) -> &[PageSpec] {
        &self.pages
    }

    /// Unique characters across all pages, first occurrence wins.
    pub fn unique_characters(&self) -> Vec<CharacterRef> {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for page in &self.pages {
            for character in &page.characters {
                if seen.insert(character.canonical_name()) {
                    unique.push(character.clone());
                }
            }
        }
        unique
    }

    /// Short title for the finished book, taken from the opening narration.
    pub fn title(&self) -> String {
        let words: Vec<&str> = self.pages[0].narration.split_whitespace().take(6).collect();
        let title = words.join(" ");
        title.trim_end_matches(['.', ',', '!', '?']).to_string()
    }
}
