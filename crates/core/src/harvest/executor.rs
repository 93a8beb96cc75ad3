//! Catalog executor invocation: staging-tree setup and command execution.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{error, info};

use super::HarvestError;
use crate::file::FileCollection;

/// Write the list of destination paths the executor should operate on.
pub(crate) fn write_file_list(
    base_dir: &Path,
    files: &FileCollection,
) -> Result<PathBuf, HarvestError> {
    let path = base_dir.join("file_list.txt");
    let mut content = String::new();
    for file in files {
        if let Some(dest_path) = file.dest_path() {
            content.push_str(&dest_path);
            content.push('\n');
        }
    }
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Symlink each source file into the staging tree at its destination-path
/// layout, so the executor sees the exact published structure.
pub(crate) fn link_sources(base_dir: &Path, files: &FileCollection) -> Result<(), HarvestError> {
    for file in files {
        let src = file.require_src_path()?;
        let dest_path = file.dest_path().ok_or_else(|| {
            HarvestError::MissingDestPath {
                file: file.name().to_string(),
            }
        })?;
        let target = base_dir.join(&dest_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(src, &target)?;
    }
    Ok(())
}

/// Render the command template and run it through `sh -c`, capturing all
/// output. Substitution slots: `{base}`, `{file_list}`, `{log_dir}`.
pub(crate) async fn execute(
    harvester: &str,
    template: &str,
    extra_params: Option<&str>,
    base_dir: &Path,
    file_list: &Path,
    log_dir: &Path,
) -> Result<(), HarvestError> {
    let mut command = template
        .replace("{base}", &base_dir.to_string_lossy())
        .replace("{file_list}", &file_list.to_string_lossy())
        .replace("{log_dir}", &log_dir.to_string_lossy());
    if let Some(extra) = extra_params {
        command.push(' ');
        command.push_str(extra);
    }

    info!("executing: {}", command);
    let output = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        if !stdout.trim().is_empty() {
            info!("executor output: {}", stdout.trim_end());
        }
        Ok(())
    } else {
        error!(
            "executor for '{}' failed ({}): {} {}",
            harvester, output.status, stdout, stderr
        );
        Err(HarvestError::ExecutorFailed {
            harvester: harvester.to_string(),
            output: format!("{}{}", stdout, stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{PipelineFile, PublishType};
    use tempfile::TempDir;

    fn collection_with_dest(dir: &TempDir, name: &str, dest: &str) -> FileCollection {
        let path = dir.path().join(name);
        std::fs::write(&path, b"data").unwrap();
        let file = PipelineFile::new(path).unwrap();
        file.set_publish_type(PublishType::HarvestUpload).unwrap();
        file.set_dest_path(dest).unwrap();
        let mut files = FileCollection::new();
        files.add(file).unwrap();
        files
    }

    #[test]
    fn staging_tree_mirrors_dest_layout() {
        let src_dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let files = collection_with_dest(&src_dir, "a.nc", "moorings/deep/a.nc");

        link_sources(staging.path(), &files).unwrap();
        let link = staging.path().join("moorings/deep/a.nc");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read(&link).unwrap(), b"data");

        let list = write_file_list(staging.path(), &files).unwrap();
        assert_eq!(
            std::fs::read_to_string(list).unwrap(),
            "moorings/deep/a.nc\n"
        );
    }

    #[tokio::test]
    async fn template_substitution_and_failure_capture() {
        let staging = TempDir::new().unwrap();
        let file_list = staging.path().join("file_list.txt");
        std::fs::write(&file_list, "").unwrap();

        // Success leaves evidence of the substituted base dir.
        let marker = staging.path().join("ran");
        let template = "touch {base}/ran && test -f {file_list}";
        execute(
            "h1",
            template,
            None,
            staging.path(),
            &file_list,
            staging.path(),
        )
        .await
        .unwrap();
        assert!(marker.exists());

        // Failure carries the captured output.
        let err = execute(
            "h1",
            "echo boom >&2; exit 3",
            None,
            staging.path(),
            &file_list,
            staging.path(),
        )
        .await
        .unwrap_err();
        match err {
            HarvestError::ExecutorFailed { harvester, output } => {
                assert_eq!(harvester, "h1");
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
