use crate::core::io::Storage;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

/// A reference actor whose portrait is attached to every illustration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub image: Vec<u8>,
    pub mime_type: String,
    pub description: String,
}

impl Persona {
    pub fn new(image: Vec<u8>, description: &str) -> Self {
        let mime_type = sniff_image_mime(&image).to_string();
        Self {
            image,
            mime_type,
            description: description.to_string(),
        }
    }

    /// Load a portrait from `path`.
    pub async fn from_file(storage: &dyn Storage, path: &str, description: &str) -> Result<Self> {
        let image = storage
            .read(path)
            .await
            .with_context(|| format!("Failed to load portrait for {}", description))?;
        if image.is_empty() {
            bail!("Portrait {} is empty", path);
        }
        Ok(Self::new(image, description))
    }
}

/// Guess an image MIME type from its magic bytes. Unknown data is sent as JPEG.
pub fn sniff_image_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// The personas active for one generation. Snapshotted per page so a
/// persona swap mid-batch never mixes likenesses within a page.
#[derive(Debug, Clone, Default)]
pub struct Cast {
    pub hero: Option<Arc<Persona>>,
    pub co_star: Option<Arc<Persona>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusChar {
    #[default]
    Hero,
    #[serde(rename = "friend", alias = "co-star", alias = "costar")]
    CoStar,
    #[serde(other)]
    Other,
}

impl FocusChar {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusChar::Hero => "hero",
            FocusChar::CoStar => "friend",
            FocusChar::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Beat {
    #[serde(default, deserialize_with = "null_as_default")]
    pub caption: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dialogue: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub scene: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub focus_char: FocusChar,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<String>,
}

/// Providers send `null` for fields they leave empty.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Beat {
    /// Degraded content used when beat synthesis fails for `page`.
    pub fn fallback(page: usize) -> Self {
        Self {
            caption: "...".to_string(),
            dialogue: String::new(),
            scene: format!("Scene {}", page),
            focus_char: FocusChar::Hero,
            choices: Vec::new(),
        }
    }

    pub fn teaser() -> Self {
        Self {
            scene: "Teaser image".to_string(),
            focus_char: FocusChar::Other,
            ..Default::default()
        }
    }

    pub fn blank() -> Self {
        Self {
            focus_char: FocusChar::Other,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Cover,
    BackCover,
    Story,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub kind: PageKind,
    pub beat: Option<Beat>,
    pub image: Option<Vec<u8>>,
    pub loading: bool,
    pub resolved_choice: Option<String>,
    pub is_decision: bool,
}

impl Page {
    /// A reserved slot, visible to consumers before any content arrives.
    pub fn placeholder(index: usize, kind: PageKind) -> Self {
        Self {
            index,
            kind,
            beat: None,
            image: None,
            loading: true,
            resolved_choice: None,
            is_decision: false,
        }
    }

    pub fn has_image(&self) -> bool {
        self.image.as_ref().is_some_and(|img| !img.is_empty())
    }

    pub fn choices(&self) -> &[String] {
        self.beat.as_ref().map(|b| b.choices.as_slice()).unwrap_or(&[])
    }
}

/// Fields merged into an existing page. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct PageUpdate {
    pub beat: Option<Beat>,
    pub image: Option<Vec<u8>>,
    pub loading: Option<bool>,
    pub is_decision: Option<bool>,
}

impl PageUpdate {
    pub fn beat(beat: Beat, is_decision: bool) -> Self {
        Self {
            beat: Some(beat),
            is_decision: Some(is_decision),
            ..Default::default()
        }
    }

    pub fn finished(image: Vec<u8>) -> Self {
        Self {
            image: Some(image),
            loading: Some(false),
            ..Default::default()
        }
    }

    pub(crate) fn apply(self, page: &mut Page) {
        if let Some(beat) = self.beat {
            page.beat = Some(beat);
        }
        if let Some(image) = self.image {
            page.image = Some(image);
        }
        if let Some(loading) = self.loading {
            page.loading = loading;
        }
        if let Some(is_decision) = self.is_decision {
            page.is_decision = is_decision;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    #[tokio::test]
    async fn test_persona_from_file_sniffs_mime() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("hero.png").to_string_lossy().to_string();
        let storage = NativeStorage::new();
        storage.write(&path, &[0x89, b'P', b'N', b'G', 0x0d, 0x0a]).await?;

        let persona = Persona::from_file(&storage, &path, "Hero").await?;
        assert_eq!(persona.mime_type, "image/png");
        assert_eq!(persona.description, "Hero");

        let missing = temp_dir.path().join("nope.jpg").to_string_lossy().to_string();
        assert!(Persona::from_file(&storage, &missing, "Co-Star").await.is_err());
        Ok(())
    }

    #[test]
    fn test_beat_parsing_accepts_friend_and_unknown_focus() {
        let beat: Beat = serde_json::from_str(
            r#"{"caption": "c", "scene": "s", "focus_char": "friend", "choices": ["A", "B"]}"#,
        )
        .unwrap();
        assert_eq!(beat.focus_char, FocusChar::CoStar);
        assert_eq!(beat.dialogue, "");

        let beat: Beat = serde_json::from_str(r#"{"scene": "s", "focus_char": "villain"}"#).unwrap();
        assert_eq!(beat.focus_char, FocusChar::Other);
        assert!(beat.choices.is_empty());
    }

    #[test]
    fn test_fallback_beat() {
        let beat = Beat::fallback(7);
        assert_eq!(beat.caption, "...");
        assert_eq!(beat.scene, "Scene 7");
        assert_eq!(beat.focus_char, FocusChar::Hero);
        assert!(beat.choices.is_empty());
    }

    #[test]
    fn test_sniff_image_mime() {
        assert_eq!(sniff_image_mime(&[0x89, b'P', b'N', b'G', 0x0d]), "image/png");
        assert_eq!(sniff_image_mime(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_image_mime(&[0xff, 0xd8, 0xff]), "image/jpeg");
        assert_eq!(sniff_image_mime(&[]), "image/jpeg");
    }

    #[test]
    fn test_update_merges_only_given_fields() {
        let mut page = Page::placeholder(2, PageKind::Story);
        PageUpdate::beat(Beat::fallback(2), true).apply(&mut page);
        assert!(page.loading);
        assert!(page.is_decision);

        PageUpdate::finished(vec![1, 2, 3]).apply(&mut page);
        assert!(!page.loading);
        assert!(page.has_image());
        assert_eq!(page.beat, Some(Beat::fallback(2)));
    }
}
