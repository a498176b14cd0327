use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;

use crate::pipeline::error::{PipelineError, launch_failed};

/// External recognition step.
///
/// Implementations block for as long as the analysis takes; callers must not
/// expect cancellation or retry.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Returns the combined textual output for the staged artifact.
    async fn analyze(&self, artifact: &Path) -> Result<String, PipelineError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAnalyzer {
    program: String,
    leading_args: Vec<String>,
    corpus_dir: PathBuf,
}

impl CommandAnalyzer {
    pub fn new(
        program: impl Into<String>,
        leading_args: Vec<String>,
        corpus_dir: PathBuf,
    ) -> Self {
        Self {
            program: program.into(),
            leading_args,
            corpus_dir,
        }
    }
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    async fn analyze(&self, artifact: &Path) -> Result<String, PipelineError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg(&self.corpus_dir)
            .arg(artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            launch_failed(format!(
                "failed to launch analyzer '{}': {err}",
                self.program
            ))
        })?;
        let output = child.wait_with_output().await.map_err(|err| {
            launch_failed(format!(
                "failed to collect analyzer '{}' output: {err}",
                self.program
            ))
        })?;

        if !output.status.success() {
            tracing::debug!(
                target: "pipeline",
                program = %self.program,
                exit_code = output.status.code().unwrap_or(-1),
                "analyzer_exited_non_zero"
            );
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}
