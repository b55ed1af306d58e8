use std::path::{Component, Path, PathBuf};

use crate::errors::SyncError;

use super::SyncReport;

const PUBLIC_ROOT: &str = "public";

/// Final filename for an uploaded asset: sanitized caller name plus the
/// lower-cased extension of the uploaded file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetName {
    pub stem: String,
    pub extension: String,
}

impl AssetName {
    pub fn new(desired_name: &str, original_extension: &str) -> Result<Self, SyncError> {
        let stem: String = strip_extension(desired_name.trim())
            .chars()
            .filter(|c| is_allowed(*c))
            .collect();

        if stem.is_empty() {
            return Err(SyncError::Validation(format!(
                "name {desired_name:?} has no usable characters"
            )));
        }

        let extension: String = original_extension
            .trim()
            .trim_start_matches('.')
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Ok(Self { stem, extension })
    }

    pub fn file_name(&self) -> String {
        if self.extension.is_empty() {
            self.stem.clone()
        } else {
            format!("{}.{}", self.stem, self.extension)
        }
    }
}

// letters and digits of any script, plus _ ( ) -
fn is_allowed(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '(' | ')' | '-')
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, extension))
            if !stem.is_empty()
                && !extension.is_empty()
                && !stem.ends_with(['/', '\\'])
                && !extension.contains(['/', '\\']) =>
        {
            stem
        }
        _ => name,
    }
}

/// Url the front end serves an asset from: the working copy path without
/// its leading `public/` directory.
pub fn public_url(path: &Path) -> String {
    let served = path.strip_prefix(PUBLIC_ROOT).unwrap_or(path);

    let segments: Vec<String> = served
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    format!("/{}", segments.join("/"))
}

#[derive(Clone, Debug)]
pub struct StoredAsset {
    pub filename: String,
    pub path: PathBuf,
    pub url: String,
    pub report: SyncReport,
}
