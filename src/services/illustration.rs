use crate::core::state::{Beat, Cast, PageKind, Persona};
use crate::services::image::{ImageClient, ImagePart, ImageRequest};
use anyhow::anyhow;
use log::error;
use std::sync::Arc;
use std::time::Duration;

pub struct IllustrationSynthesizer {
    images: Arc<dyn ImageClient>,
    genre: String,
    aspect_ratio: String,
    timeout: Duration,
}

impl IllustrationSynthesizer {
    pub fn new(images: Arc<dyn ImageClient>, genre: &str, aspect_ratio: &str, timeout: Duration) -> Self {
        Self {
            images,
            genre: genre.to_string(),
            aspect_ratio: aspect_ratio.to_string(),
            timeout,
        }
    }

    /// Render the panel for `beat`. Failures are logged and yield an empty
    /// image.
    pub async fn render(&self, beat: &Beat, kind: PageKind, cast: &Cast) -> Vec<u8> {
        let request = self.compose(beat, kind, cast);
        let result = tokio::time::timeout(self.timeout, self.images.generate_image(&request))
            .await
            .map_err(|_| anyhow!("timed out after {:?}", self.timeout))
            .and_then(|r| r);

        match result {
            Ok(image) => image,
            Err(e) => {
                error!("Illustration failed for {:?} page: {:#}", kind, e);
                Vec::new()
            }
        }
    }

    pub fn compose(&self, beat: &Beat, kind: PageKind, cast: &Cast) -> ImageRequest {
        let mut parts = Vec::new();
        if let Some(hero) = &cast.hero {
            push_reference(&mut parts, "HERO", hero);
        }
        if let Some(co_star) = &cast.co_star {
            push_reference(&mut parts, "CO-STAR", co_star);
        }

        let mut prompt = format!("STYLE: {} comic book art. ", self.genre);
        match kind {
            PageKind::Cover => {
                prompt.push_str("Comic Book Cover. Main visual: [HERO] (REFERENCE) as the principal subject.");
            }
            PageKind::BackCover => {
                prompt.push_str("Comic Back Cover. Dramatic teaser.");
            }
            PageKind::Story => {
                prompt.push_str(&format!(
                    "Vertical panel. SCENE: {}. Use REFERENCES for likeness.",
                    beat.scene
                ));
                if !beat.caption.is_empty() {
                    prompt.push_str(&format!(" CAPTION: \"{}\"", beat.caption));
                }
            }
        }
        parts.push(ImagePart::Text(prompt));

        ImageRequest {
            parts,
            aspect_ratio: self.aspect_ratio.clone(),
        }
    }
}

fn push_reference(parts: &mut Vec<ImagePart>, label: &str, persona: &Persona) {
    if persona.image.is_empty() {
        return;
    }
    parts.push(ImagePart::Text(format!("REFERENCE [{}]:", label)));
    parts.push(ImagePart::Image {
        mime_type: persona.mime_type.clone(),
        data: persona.image.clone(),
    });
}
