//! Common test utilities and fixtures

use ews_retention_sweep::client::{FolderService, RootScope};
use ews_retention_sweep::error::Result;
use ews_retention_sweep::models::{
    FolderId, FolderPage, FolderRef, FolderTagState, RetentionTag, TagUpdate,
};
use mockall::mock;
use mockall::predicate::*;

/// Create a folder reference as enumeration would return it
pub fn folder_ref(id: &str, name: &str) -> FolderRef {
    FolderRef {
        id: FolderId::new(id),
        display_name: name.to_string(),
    }
}

/// Create the re-read view of a folder with the given tag slots
pub fn tag_state(
    id: &str,
    archive_id: Option<&str>,
    policy_id: Option<&str>,
) -> FolderTagState {
    FolderTagState {
        id: FolderId::with_change_key(id, format!("CK-{}", id)),
        archive_tag: archive_id.map(RetentionTag::new),
        policy_tag: policy_id.map(RetentionTag::new),
    }
}

/// Re-read view whose bind came back without a change key
pub fn tag_state_without_change_key(
    id: &str,
    archive_id: Option<&str>,
    policy_id: Option<&str>,
) -> FolderTagState {
    FolderTagState {
        id: FolderId::new(id),
        archive_tag: archive_id.map(RetentionTag::new),
        policy_tag: policy_id.map(RetentionTag::new),
    }
}

/// One enumeration page
pub fn page(folders: Vec<FolderRef>, more_available: bool) -> FolderPage {
    FolderPage {
        folders,
        more_available,
    }
}

/// A page of `count` folders with ids `prefix-0` .. `prefix-{count-1}`
pub fn page_of(prefix: &str, count: usize, more_available: bool) -> FolderPage {
    let folders = (0..count)
        .map(|i| folder_ref(&format!("{}-{}", prefix, i), &format!("Folder {}", i)))
        .collect();
    page(folders, more_available)
}

// Mock implementation of FolderService for testing
mock! {
    pub FolderService {}

    #[async_trait::async_trait]
    impl FolderService for FolderService {
        async fn find_folders_page(
            &self,
            scope: RootScope,
            offset: usize,
            page_size: usize,
        ) -> Result<FolderPage>;
        async fn read_folder_tags(&self, id: &FolderId) -> Result<FolderTagState>;
        async fn resolve_folder_path(&self, id: &FolderId) -> Result<String>;
        async fn update_folder(&self, id: &FolderId, update: &TagUpdate) -> Result<()>;
    }
}
