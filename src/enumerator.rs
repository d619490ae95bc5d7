//! Deep, paginated enumeration of a mailbox folder tree

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::client::{FolderService, RootScope};
use crate::error::EwsError;
use crate::models::FolderRef;

/// Folders fetched per page request
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A traversal that aborted mid-flight. Carries whatever folders arrived
/// before the failing page so callers can still report partial progress.
#[derive(Debug)]
pub struct TraversalError {
    pub partial: Vec<FolderRef>,
    pub source: EwsError,
}

impl fmt::Display for TraversalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "folder enumeration failed after {} folders: {}",
            self.partial.len(),
            self.source
        )
    }
}

impl std::error::Error for TraversalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<TraversalError> for EwsError {
    fn from(error: TraversalError) -> Self {
        error.source
    }
}

/// Enumerates every descendant folder under a root, page by page.
///
/// Order is whatever the service returns across pages; callers must not
/// assume any sorting.
pub struct FolderEnumerator {
    service: Arc<dyn FolderService>,
    page_size: usize,
}

impl FolderEnumerator {
    pub fn new(service: Arc<dyn FolderService>) -> Self {
        Self {
            service,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(service: Arc<dyn FolderService>, page_size: usize) -> Self {
        Self { service, page_size }
    }

    /// Fetch the complete list of descendant folders under the given root.
    ///
    /// Pages are requested by advancing an offset until the service reports
    /// no more results. Any transport failure aborts the traversal; the
    /// folders collected so far come back inside the error.
    pub async fn traverse(&self, scope: RootScope) -> Result<Vec<FolderRef>, TraversalError> {
        let mut folders: Vec<FolderRef> = Vec::new();
        let mut offset = 0;

        loop {
            debug!(
                "Fetching folder page at offset {} (page size {})",
                offset, self.page_size
            );

            let page = match self
                .service
                .find_folders_page(scope, offset, self.page_size)
                .await
            {
                Ok(page) => page,
                Err(source) => {
                    error!("Failed to fetch folder page at offset {}: {}", offset, source);
                    return Err(TraversalError {
                        partial: folders,
                        source,
                    });
                }
            };

            let received = page.folders.len();
            folders.extend(page.folders);
            debug!(
                "Received {} folders ({} total), more available: {}",
                received,
                folders.len(),
                page.more_available
            );

            if !page.more_available {
                break;
            }
            offset += self.page_size;
        }

        info!("Enumerated {} folders", folders.len());
        Ok(folders)
    }
}
