use std::path::{Path, PathBuf};

use tokio::{fs, io::AsyncWriteExt};

use crate::pipeline::error::{PipelineError, staging_failed};

/// Writes the artifact next to its final location and renames it into place,
/// so the analyzer never observes a partially written file.
pub async fn stage_artifact(path: &Path, payload: &[u8]) -> Result<(), PipelineError> {
    let partial_path = partial_path_for(path);

    let mut file = fs::File::create(&partial_path).await.map_err(|err| {
        staging_failed(format!(
            "failed to create staging file '{}': {err}",
            partial_path.display()
        ))
    })?;
    file.write_all(payload).await.map_err(|err| {
        staging_failed(format!(
            "failed to write staging file '{}': {err}",
            partial_path.display()
        ))
    })?;
    file.sync_all().await.map_err(|err| {
        staging_failed(format!(
            "failed to sync staging file '{}': {err}",
            partial_path.display()
        ))
    })?;
    drop(file);

    fs::rename(&partial_path, path).await.map_err(|err| {
        staging_failed(format!(
            "failed to move staged artifact into '{}': {err}",
            path.display()
        ))
    })
}

fn partial_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
