//! Core data models used throughout corpus-sync.
//!
//! These types represent the files, pages, sections, and index documents that
//! flow from a [`FileSource`](crate::source::FileSource) into one or more
//! search indexes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::Result;

/// Users and groups permitted to read a file. Empty by default, never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessControl {
    pub oids: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

impl AccessControl {
    pub fn new<I, J, S, T>(oids: I, groups: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            oids: oids.into_iter().map(Into::into).collect(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    /// ACL granting read access to a single user.
    pub fn owner(oid: impl Into<String>) -> Self {
        Self::new([oid.into()], Vec::<String>::new())
    }

    pub fn is_empty(&self) -> bool {
        self.oids.is_empty() && self.groups.is_empty()
    }

    /// Stable textual form, used as part of the document id prefix.
    pub fn canonical(&self) -> String {
        format!(
            "oids={};groups={}",
            self.oids.iter().cloned().collect::<Vec<_>>().join(","),
            self.groups.iter().cloned().collect::<Vec<_>>().join(",")
        )
    }

    pub fn oid_list(&self) -> Vec<String> {
        self.oids.iter().cloned().collect()
    }

    pub fn group_list(&self) -> Vec<String> {
        self.groups.iter().cloned().collect()
    }
}

/// Where the bytes of a [`SourceFile`] live while it is being processed.
#[derive(Debug)]
pub enum FileContent {
    /// A file in a local directory tree, read in place.
    Local(PathBuf),
    /// A download held in transient local storage; removed on drop.
    Transient(NamedTempFile),
    /// Bytes supplied directly by the caller (e.g. a user upload).
    InMemory(Vec<u8>),
}

/// A discovered file: content, ACLs, and optional origin URL.
///
/// Dropping a `SourceFile` releases its content, including any transient
/// download on disk.
#[derive(Debug)]
pub struct SourceFile {
    path: String,
    content: FileContent,
    acls: AccessControl,
    url: Option<String>,
    content_hash: Option<String>,
}

impl SourceFile {
    /// `path` is the file's location in its storage tree; its basename is the
    /// file name used for ids and `sourcefile` values.
    pub fn new(path: impl Into<String>, content: FileContent) -> Self {
        Self {
            path: path.into(),
            content,
            acls: AccessControl::default(),
            url: None,
            content_hash: None,
        }
    }

    pub fn with_acls(mut self, acls: AccessControl) -> Self {
        self.acls = acls;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn acls(&self) -> &AccessControl {
        &self.acls
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    /// Local path of the content, if it lives on disk.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.content {
            FileContent::Local(p) => Some(p),
            FileContent::Transient(t) => Some(t.path()),
            FileContent::InMemory(_) => None,
        }
    }

    pub fn filename(&self) -> &str {
        basename(&self.path)
    }

    /// Extension including the leading dot, lowercased (`".pdf"`), or empty.
    pub fn file_extension(&self) -> String {
        extension_of(self.filename())
    }

    /// Stable identifier derived from the file name and ACL set. Used as the
    /// prefix of every index document id produced from this file.
    pub fn id(&self) -> String {
        let filename = self.filename();
        let ascii: String = filename
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name_hex = hex::encode_upper(filename.as_bytes());
        let acl_hex = if self.acls.is_empty() {
            String::new()
        } else {
            hex::encode_upper(self.acls.canonical().as_bytes())
        };
        format!("file-{}-{}{}", ascii, name_hex, acl_hex)
    }

    /// Read the full content.
    pub async fn read_content(&self) -> Result<Vec<u8>> {
        match &self.content {
            FileContent::Local(p) => Ok(tokio::fs::read(p).await?),
            FileContent::Transient(t) => Ok(tokio::fs::read(t.path()).await?),
            FileContent::InMemory(bytes) => Ok(bytes.clone()),
        }
    }

    /// Directory part of the origin URL below the `/content/` container, or
    /// an empty string when there is no such URL.
    pub fn folder_path(&self) -> String {
        let Some(url) = self.url.as_deref() else {
            return String::new();
        };
        let Ok(parsed) = reqwest::Url::parse(url) else {
            return String::new();
        };
        let path = percent_decode(parsed.path());
        match path.find("/content/") {
            Some(idx) => {
                let rest = &path[idx + "/content/".len()..];
                match rest.rfind('/') {
                    Some(slash) => rest[..slash].to_string(),
                    None => String::new(),
                }
            }
            None => String::new(),
        }
    }
}

/// One page of extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Zero-based page number in the original file.
    pub page_num: usize,
    /// Character offset of this text within the whole document.
    pub offset: usize,
    pub text: String,
}

/// A chunk of a page, tied to the file it came from.
#[derive(Debug, Clone)]
pub struct Section<'a> {
    pub page: Page,
    pub file: &'a SourceFile,
    pub category: Option<String>,
}

impl<'a> Section<'a> {
    pub fn new(page: Page, file: &'a SourceFile, category: Option<String>) -> Self {
        Self {
            page,
            file,
            category,
        }
    }
}

/// Document as stored in a search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(
        rename = "imageEmbedding",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub image_embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub category: Option<String>,
    pub sourcepage: String,
    pub sourcefile: String,
    #[serde(rename = "storageUrl", default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// An entry returned by a recursive storage listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PathEntry {
    pub name: String,
    pub is_directory: bool,
    pub creation_time: DateTime<Utc>,
}

/// A top-level folder and the newest creation time below it.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderEntry {
    pub name: String,
    pub effective_creation_time: DateTime<Utc>,
}

/// `sourcepage` value for a text section: `name.pdf#page=N` (1-based) for
/// PDFs, the bare file name otherwise.
pub fn sourcepage_from_file_page(filename: &str, page: usize) -> String {
    let name = basename(filename);
    if extension_of(name) == ".pdf" {
        format!("{}#page={}", name, page + 1)
    } else {
        name.to_string()
    }
}

/// `sourcepage` value for a section whose page was rendered to an image.
pub fn image_name_from_file_page(filename: &str, page: usize) -> String {
    let name = basename(filename);
    let stem = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    format!("{}-{}.png", stem, page)
}

/// Last `/`- or `\`-separated component of a path.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[dot..].to_lowercase(),
        _ => String::new(),
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(b) = decoded {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
