use crate::core::io::Storage;
use crate::core::state::{sniff_image_mime, Page};
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use serde::Serialize;
use std::path::Path;

/// Pages that belong in the finished document: illustrated, no longer
/// loading, ordered by index.
pub fn printable_pages(pages: &[Page]) -> Vec<&Page> {
    let mut printable: Vec<&Page> = pages
        .iter()
        .filter(|p| p.has_image() && !p.loading)
        .collect();
    printable.sort_by_key(|p| p.index);
    printable
}

/// Turns finished pages into a downloadable artifact. Returns the paths written.
#[async_trait]
pub trait DocumentAssembler: Send + Sync {
    async fn assemble(&self, pages: &[Page], storage: &dyn Storage) -> Result<Vec<String>>;
}

/// Writes one image file per printable page plus a `manifest.json`.
#[derive(Debug, Clone)]
pub struct ImageFolderAssembler {
    output_folder: String,
}

impl ImageFolderAssembler {
    pub fn new(output_folder: &str) -> Self {
        Self {
            output_folder: output_folder.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ManifestEntry<'a> {
    index: usize,
    file: String,
    caption: &'a str,
    dialogue: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    choice: Option<&'a str>,
}

fn extension_for(data: &[u8]) -> &'static str {
    match sniff_image_mime(data) {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

#[async_trait]
impl DocumentAssembler for ImageFolderAssembler {
    async fn assemble(&self, pages: &[Page], storage: &dyn Storage) -> Result<Vec<String>> {
        let folder = Path::new(&self.output_folder);
        let mut written = Vec::new();
        let mut manifest = Vec::new();

        for page in printable_pages(pages) {
            let Some(image) = page.image.as_deref() else {
                continue;
            };
            let file = format!("page_{:03}.{}", page.index, extension_for(image));
            let path = folder.join(&file).to_string_lossy().to_string();
            storage.write(&path, image).await?;
            written.push(path);

            let beat = page.beat.as_ref();
            manifest.push(ManifestEntry {
                index: page.index,
                file,
                caption: beat.map(|b| b.caption.as_str()).unwrap_or(""),
                dialogue: beat.map(|b| b.dialogue.as_str()).unwrap_or(""),
                choice: page.resolved_choice.as_deref(),
            });
        }

        let manifest_path = folder.join("manifest.json").to_string_lossy().to_string();
        storage
            .write(&manifest_path, serde_json::to_string_pretty(&manifest)?.as_bytes())
            .await?;
        written.push(manifest_path);

        info!("Exported {} page(s) to {}", manifest.len(), self.output_folder);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::{Beat, PageKind};

    fn page(index: usize, image: Option<Vec<u8>>, loading: bool) -> Page {
        let mut page = Page::placeholder(index, PageKind::Story);
        page.image = image;
        page.loading = loading;
        page.beat = Some(Beat::fallback(index));
        page
    }

    #[test]
    fn test_printable_pages_skip_missing_and_loading() {
        let pages = vec![
            page(3, Some(vec![1]), false),
            page(1, Some(vec![1]), false),
            page(2, Some(Vec::new()), false),
            page(4, Some(vec![1]), true),
            page(5, None, false),
        ];
        let indices: Vec<usize> = printable_pages(&pages).iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_image_folder_export() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let out = temp_dir.path().join("out");
        let assembler = ImageFolderAssembler::new(&out.to_string_lossy());

        let mut decided = page(3, Some(vec![0x89, b'P', b'N', b'G']), false);
        decided.resolved_choice = Some("Open the door".to_string());
        let pages = vec![decided, page(1, Some(vec![0xff, 0xd8]), false), page(2, None, false)];

        let written = assembler.assemble(&pages, &NativeStorage::new()).await?;
        assert_eq!(written.len(), 3);
        assert!(out.join("page_001.jpg").exists());
        assert!(out.join("page_003.png").exists());
        assert!(!out.join("page_002.jpg").exists());

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("manifest.json"))?)?;
        assert_eq!(manifest[0]["index"], 1);
        assert_eq!(manifest[1]["choice"], "Open the door");
        assert_eq!(manifest[1]["caption"], "...");
        Ok(())
    }
}
