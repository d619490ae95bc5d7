//! The tag-removal decision engine

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::FolderService;
use crate::error::EwsError;
use crate::models::{FolderRef, FolderTagState, RetentionFilter, RunSummary, TagKind, TagUpdate};

/// Callback invoked after each folder, for progress display
pub type SweepProgress = Arc<dyn Fn() + Send + Sync>;

/// A sweep that aborted mid-run. The summary holds the counters accumulated
/// up to the failing folder so the caller can report partial progress.
#[derive(Debug)]
pub struct SweepError {
    pub summary: RunSummary,
    pub source: EwsError,
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sweep aborted ({}): {}", self.summary, self.source)
    }
}

impl std::error::Error for SweepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<SweepError> for EwsError {
    fn from(error: SweepError) -> Self {
        error.source
    }
}

/// Inspects each folder's archive and policy tag and conditionally clears
/// them.
///
/// Counting rules: `found` increments once per tag instance observed, while
/// `changed` increments once per folder persisted, so a folder carrying both
/// tags contributes two to the former and one to the latter.
pub struct TagSweeper {
    service: Arc<dyn FolderService>,
}

impl TagSweeper {
    pub fn new(service: Arc<dyn FolderService>) -> Self {
        Self { service }
    }

    /// Process every folder in the list. With `commit` false, tagged folders
    /// are reported but nothing is written back.
    pub async fn process(
        &self,
        folders: &[FolderRef],
        filter: &RetentionFilter,
        commit: bool,
    ) -> Result<RunSummary, SweepError> {
        self.process_with_progress(folders, filter, commit, None)
            .await
    }

    pub async fn process_with_progress(
        &self,
        folders: &[FolderRef],
        filter: &RetentionFilter,
        commit: bool,
        on_progress: Option<SweepProgress>,
    ) -> Result<RunSummary, SweepError> {
        let mut summary = RunSummary::default();

        for folder in folders {
            summary.examined += 1;

            // The enumeration view carried no tag fields, so every folder is
            // re-read by identifier before any decision.
            let state = match self.service.read_folder_tags(&folder.id).await {
                Ok(state) => state,
                Err(source) => {
                    error!("Failed to read folder {}: {}", folder.id, source);
                    return Err(SweepError { summary, source });
                }
            };

            // Resolved at most once per folder, and only when a tag is
            // present; never carried over to the next folder.
            let mut resolved_path: Option<String> = None;

            let mut update = TagUpdate::default();

            for kind in TagKind::BOTH {
                let Some(tag) = state.tag(kind) else {
                    continue;
                };

                summary.found += 1;
                let path = self
                    .path_for_report(&state, &mut resolved_path)
                    .await;
                info!("Folder with {} tag found, ID: {}", kind, folder.id);
                info!("Folder name: {}", folder.display_name);
                info!("Folder path: {}", path);
                info!("Retention id: {}", tag.retention_id);

                if !filter.allows(&tag.retention_id) {
                    debug!(
                        "Retention id {} not in the requested set, leaving {} tag in place",
                        tag.retention_id, kind
                    );
                    continue;
                }

                if !commit {
                    debug!("Log-only mode, leaving {} tag in place", kind);
                    continue;
                }

                info!("Removing the {} tag", kind);
                if let Err(e) = stage_clear(&state, kind, &mut update) {
                    error!(
                        "Error on removing {} tag from folder: {}. Path: {}",
                        kind, folder.id, path
                    );
                    error!("{}", e);
                    continue;
                }
            }

            if !update.is_empty() {
                match self.service.update_folder(&state.id, &update).await {
                    Ok(()) => {
                        summary.changed += 1;
                        info!("Tag removed successfully");
                    }
                    Err(e) => {
                        let path = self.path_for_report(&state, &mut resolved_path).await;
                        let source = EwsError::Persist {
                            folder_id: state.id.id.clone(),
                            path,
                            message: e.to_string(),
                        };
                        error!("{}", source);
                        return Err(SweepError { summary, source });
                    }
                }
            }

            if let Some(on_progress) = &on_progress {
                on_progress();
            }
        }

        info!("Folders with a personal retention tag found: {}", summary.found);
        info!("Folders with a personal retention tag removed: {}", summary.changed);

        Ok(summary)
    }

    /// Path for log lines. A resolution failure here is not worth aborting
    /// the run over; the line is still useful with the path missing.
    async fn path_for_report(
        &self,
        state: &FolderTagState,
        cache: &mut Option<String>,
    ) -> String {
        if let Some(path) = cache {
            return path.clone();
        }
        let path = match self.service.resolve_folder_path(&state.id).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to get folder path for {}: {}", state.id, e);
                String::new()
            }
        };
        *cache = Some(path.clone());
        path
    }
}

/// Stage an in-memory clear of one tag slot. The update call needs the
/// change key from the re-read; a bind that came back without one cannot be
/// persisted safely.
fn stage_clear(
    state: &FolderTagState,
    kind: TagKind,
    update: &mut TagUpdate,
) -> Result<(), EwsError> {
    if state.id.change_key.is_none() {
        return Err(EwsError::TagMutation {
            folder_id: state.id.id.clone(),
            message: "folder bind returned no change key".to_string(),
        });
    }
    update.stage_clear(kind);
    Ok(())
}
