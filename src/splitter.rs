//! Default text-splitting collaborator: file bytes → pages → chunked pages.

use crate::chunk::chunk_text;
use crate::error::Result;
use crate::extract::{content_type_for, extract_pages};
use crate::models::{Page, Section, SourceFile};

/// Turns the content of a file into [`Page`]s ready to become sections.
pub trait PageSplitter: Send + Sync {
    fn split(&self, file: &SourceFile, bytes: &[u8]) -> Result<Vec<Page>>;
}

/// Extracts per-page text by content type and chunks each page on paragraph
/// boundaries. Chunks keep the number of the page they came from.
#[derive(Debug, Clone)]
pub struct ExtractingSplitter {
    max_tokens: usize,
}

impl ExtractingSplitter {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl PageSplitter for ExtractingSplitter {
    fn split(&self, file: &SourceFile, bytes: &[u8]) -> Result<Vec<Page>> {
        let content_type = content_type_for(file.filename());
        let pages = extract_pages(bytes, content_type)?;

        let mut out = Vec::new();
        let mut page_offset = 0usize;
        for (page_num, text) in pages.iter().enumerate() {
            for chunk in chunk_text(text, self.max_tokens) {
                out.push(Page {
                    page_num,
                    offset: page_offset + chunk.offset,
                    text: chunk.text,
                });
            }
            page_offset += text.chars().count();
        }
        tracing::debug!(
            file = file.filename(),
            content_type,
            pages = pages.len(),
            chunks = out.len(),
            "split file"
        );
        Ok(out)
    }
}

/// Wrap pages of `file` into sections sharing one category.
pub fn sections_for<'a>(
    file: &'a SourceFile,
    pages: Vec<Page>,
    category: Option<&str>,
) -> Vec<Section<'a>> {
    pages
        .into_iter()
        .map(|page| Section::new(page, file, category.map(str::to_string)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::models::FileContent;

    fn file(name: &str) -> SourceFile {
        SourceFile::new(name, FileContent::InMemory(Vec::new()))
    }

    #[test]
    fn text_file_chunks_keep_page_zero() {
        let splitter = ExtractingSplitter::new(6);
        let text = b"First paragraph here.\n\nSecond paragraph here.";
        let pages = splitter.split(&file("notes.txt"), text).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.page_num == 0));
        assert_eq!(pages[0].offset, 0);
        assert_eq!(pages[1].offset, 23);
    }

    #[test]
    fn unsupported_file_is_extract_error() {
        let splitter = ExtractingSplitter::new(500);
        let err = splitter.split(&file("photo.png"), b"\x89PNG").unwrap_err();
        assert!(matches!(err, SyncError::Extract(_)));
    }

    #[test]
    fn sections_share_category() {
        let f = file("a.txt");
        let pages = vec![Page {
            page_num: 0,
            offset: 0,
            text: "x".into(),
        }];
        let sections = sections_for(&f, pages, Some("docs"));
        assert_eq!(sections[0].category.as_deref(), Some("docs"));
        assert_eq!(sections[0].file.filename(), "a.txt");
    }
}
