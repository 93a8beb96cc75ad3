//! Manifest resolution: artifacts that list the real payload files.

use serde::Deserialize;
use std::path::Path;

use super::{list_regular_files, ResolveError, ResolveParams};
use crate::file::{FileCollection, PipelineFile, PublishType};

fn manifest_lines(input: &Path) -> Result<Vec<String>, ResolveError> {
    let content = std::fs::read_to_string(input)?;
    Ok(content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// One source path per line.
pub(crate) fn resolve_simple(
    input: &Path,
    params: &ResolveParams,
) -> Result<FileCollection, ResolveError> {
    let mut files = FileCollection::new();
    for line in manifest_lines(input)? {
        files.add(PipelineFile::new(params.abs_path(&line))?)?;
    }
    Ok(files)
}

/// CSV rows of `local_path,dest_path` with a pre-determined destination.
pub(crate) fn resolve_map(
    input: &Path,
    params: &ResolveParams,
) -> Result<FileCollection, ResolveError> {
    let mut files = FileCollection::new();
    for line in manifest_lines(input)? {
        let (local_path, dest_path) = line.split_once(',').ok_or_else(|| {
            ResolveError::InvalidFormat(format!("map manifest row missing dest_path: '{}'", line))
        })?;
        let file = PipelineFile::new(params.abs_path(local_path.trim()))?;
        file.set_dest_path(dest_path.trim())?;
        files.add(file)?;
    }
    Ok(files)
}

/// Each line names a file, or a directory whose files are added
/// recursively.
pub(crate) fn resolve_dir(
    input: &Path,
    params: &ResolveParams,
) -> Result<FileCollection, ResolveError> {
    let mut files = FileCollection::new();
    for line in manifest_lines(input)? {
        let abs_path = params.abs_path(&line);
        if abs_path.is_dir() {
            for path in list_regular_files(&abs_path, true)? {
                files.add(PipelineFile::new(path)?)?;
            }
        } else {
            files.add(PipelineFile::new(abs_path)?)?;
        }
    }
    Ok(files)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonManifest {
    #[serde(default)]
    files: Vec<JsonManifestEntry>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonManifestEntry {
    local_path: String,
    #[serde(default)]
    dest_path: Option<String>,
}

/// `{"files": [{"local_path": ..., "dest_path"?: ...}]}`.
pub(crate) fn resolve_json(
    input: &Path,
    params: &ResolveParams,
) -> Result<FileCollection, ResolveError> {
    let content = std::fs::read_to_string(input)?;
    let manifest: JsonManifest = serde_json::from_str(&content)
        .map_err(|e| ResolveError::InvalidFormat(format!("invalid JSON manifest: {}", e)))?;

    let mut files = FileCollection::new();
    for entry in manifest.files {
        let file = PipelineFile::new(params.abs_path(&entry.local_path))?;
        if let Some(dest_path) = entry.dest_path {
            file.set_dest_path(dest_path)?;
        }
        files.add(file)?;
    }
    Ok(files)
}

/// Rows of `dest_path[,PUBLISH_TYPE]` describing previously published files
/// to remove. When the publish type column is omitted it stays unset and
/// the handler assigns the default deletion type later.
pub(crate) fn resolve_delete(input: &Path) -> Result<FileCollection, ResolveError> {
    let mut files = FileCollection::new();
    for line in manifest_lines(input)? {
        let (dest_path, publish_type) = match line.split_once(',') {
            Some((dest_path, name)) => {
                let name = name.trim();
                let publish_type = PublishType::from_manifest_name(name).ok_or_else(|| {
                    ResolveError::InvalidFormat(format!("unknown publish type '{}'", name))
                })?;
                (dest_path.trim(), Some(publish_type))
            }
            None => (line.trim(), None),
        };
        let file = PipelineFile::deletion_for_dest(dest_path);
        if let Some(publish_type) = publish_type {
            file.set_publish_type(publish_type)?;
        }
        files.add(file)?;
    }
    Ok(files)
}
