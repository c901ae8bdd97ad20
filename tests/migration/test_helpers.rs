//! Shared fixtures for migration BDD scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use caravan::Reporter;
use caravan::test_support::{RecordingReporter, ScriptedChannel};
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;

#[derive(Clone)]
pub struct MigrationContext {
    pub channel: ScriptedChannel,
    pub recording: Arc<RecordingReporter>,
    pub config_dir: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub outcome: Option<MigrationOutcome>,
    /// Keeps the workspace directory alive for the scenario's lifetime.
    pub(crate) _workspace_tmp: Arc<TempDir>,
}

impl MigrationContext {
    pub fn reporter(&self) -> Arc<dyn Reporter> {
        Arc::clone(&self.recording) as Arc<dyn Reporter>
    }
}

#[derive(Clone, Debug)]
pub enum MigrationOutcome {
    Success(String),
    Failure(String),
}

#[derive(Clone, Debug, Error)]
pub enum MigrationTestError {
    #[error("failed to create workspace: {0}")]
    Workspace(String),
}

#[fixture]
pub fn migration_context_result() -> Result<MigrationContext, MigrationTestError> {
    build_migration_context()
}

#[fixture]
pub fn migration_context(
    migration_context_result: Result<MigrationContext, MigrationTestError>,
) -> MigrationContext {
    migration_context_result
        .unwrap_or_else(|err| panic!("migration context fixture should initialise: {err}"))
}

pub fn build_migration_context() -> Result<MigrationContext, MigrationTestError> {
    let tmp_dir =
        TempDir::new().map_err(|err| MigrationTestError::Workspace(format!("tempdir: {err}")))?;
    let workspace = Utf8PathBuf::from_path_buf(tmp_dir.path().to_path_buf()).map_err(|path| {
        MigrationTestError::Workspace(format!("non-utf8 tempdir path: {}", path.display()))
    })?;
    let config_dir = workspace.join("config");
    std::fs::create_dir_all(config_dir.as_std_path())
        .map_err(|err| MigrationTestError::Workspace(format!("config dir: {err}")))?;

    Ok(MigrationContext {
        channel: ScriptedChannel::new(),
        recording: Arc::new(RecordingReporter::default()),
        config_dir,
        output_dir: workspace,
        outcome: None,
        _workspace_tmp: Arc::new(tmp_dir),
    })
}
