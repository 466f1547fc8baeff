use crate::core::state::PageKind;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Page topology: index 0 is the cover, `back_cover_page` is the back cover,
/// everything else up to `total_pages` is a story page.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PageLayout {
    #[serde(default = "default_max_story_pages")]
    pub max_story_pages: usize,
    #[serde(default = "default_back_cover_page")]
    pub back_cover_page: usize,
    #[serde(default = "default_total_pages")]
    pub total_pages: usize,
    #[serde(default = "default_initial_pages")]
    pub initial_pages: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_decision_pages")]
    pub decision_pages: Vec<usize>,
}

fn default_max_story_pages() -> usize {
    10
}
fn default_back_cover_page() -> usize {
    11
}
fn default_total_pages() -> usize {
    11
}
fn default_initial_pages() -> usize {
    2
}
fn default_batch_size() -> usize {
    6
}
fn default_decision_pages() -> Vec<usize> {
    vec![3]
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            max_story_pages: default_max_story_pages(),
            back_cover_page: default_back_cover_page(),
            total_pages: default_total_pages(),
            initial_pages: default_initial_pages(),
            batch_size: default_batch_size(),
            decision_pages: default_decision_pages(),
        }
    }
}

impl PageLayout {
    pub fn validate(&self) -> Result<()> {
        if self.back_cover_page == 0 {
            bail!("back_cover_page cannot share index 0 with the cover");
        }
        if self.back_cover_page > self.total_pages {
            bail!(
                "back_cover_page {} is beyond total_pages {}",
                self.back_cover_page,
                self.total_pages
            );
        }
        if self.initial_pages == 0 || self.batch_size == 0 {
            bail!("initial_pages and batch_size must be at least 1");
        }
        if let Some(bad) = self
            .decision_pages
            .iter()
            .find(|&&p| p == 0 || p > self.max_story_pages || p == self.back_cover_page)
        {
            bail!("decision page {} is not a story page", bad);
        }
        Ok(())
    }

    pub fn kind_for(&self, index: usize) -> PageKind {
        if index == 0 {
            PageKind::Cover
        } else if index == self.back_cover_page {
            PageKind::BackCover
        } else {
            PageKind::Story
        }
    }

    pub fn is_decision(&self, index: usize) -> bool {
        self.decision_pages.contains(&index)
    }

    pub fn is_final(&self, index: usize) -> bool {
        index == self.max_story_pages
    }

    /// Shrink a forward batch from `start` so it ends on the first decision
    /// page it would reach.
    pub fn forward_count(&self, start: usize, count: usize) -> usize {
        match self.decision_pages.iter().copied().filter(|&d| d >= start).min() {
            Some(decision) => count.min(decision - start + 1),
            None => count,
        }
    }

    /// Indices of `[start, start + count)` that exist in this layout.
    pub fn clip(&self, start: usize, count: usize) -> impl Iterator<Item = usize> {
        let end = start.saturating_add(count).min(self.total_pages.saturating_add(1));
        start..end.max(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_is_valid() {
        let layout = PageLayout::default();
        assert!(layout.validate().is_ok());
        assert_eq!(layout.kind_for(0), PageKind::Cover);
        assert_eq!(layout.kind_for(5), PageKind::Story);
        assert_eq!(layout.kind_for(11), PageKind::BackCover);
        assert!(layout.is_decision(3));
        assert!(layout.is_final(10));
    }

    #[test]
    fn test_clip_stops_at_total_pages() {
        let layout = PageLayout::default();
        assert_eq!(layout.clip(9, 6).collect::<Vec<_>>(), vec![9, 10, 11]);
        assert_eq!(layout.clip(12, 3).count(), 0);
        assert_eq!(layout.clip(1, 2).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_forward_count_stops_at_decision_page() {
        let layout = PageLayout::default();
        assert_eq!(layout.forward_count(3, 6), 1);
        assert_eq!(layout.forward_count(1, 6), 3);
        assert_eq!(layout.forward_count(4, 6), 6);
        assert_eq!(layout.forward_count(1, 2), 2);

        let layout = PageLayout {
            decision_pages: vec![7, 5],
            ..Default::default()
        };
        assert_eq!(layout.forward_count(4, 6), 2);
        assert_eq!(layout.forward_count(6, 6), 2);
    }

    #[test]
    fn test_invalid_layouts_rejected() {
        let layout = PageLayout {
            back_cover_page: 20,
            ..Default::default()
        };
        assert!(layout.validate().is_err());

        let layout = PageLayout {
            decision_pages: vec![0],
            ..Default::default()
        };
        assert!(layout.validate().is_err());

        let layout = PageLayout {
            batch_size: 0,
            ..Default::default()
        };
        assert!(layout.validate().is_err());
    }
}
