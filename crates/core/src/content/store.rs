use super::{Content, ContentError, CreateContentRequest};

/// Trait for content storage backends.
pub trait ContentStore: Send + Sync {
    fn create(&self, request: CreateContentRequest) -> Result<Content, ContentError>;

    /// Get content only if it belongs to `orgname`.
    fn get(&self, orgname: &str, id: &str) -> Result<Option<Content>, ContentError>;

    /// Create a stage output, or return the one an earlier attempt of the
    /// same work item already created under `output_key`.
    fn create_output(
        &self,
        work_item_id: &str,
        output_key: &str,
        request: CreateContentRequest,
    ) -> Result<Content, ContentError>;

    /// Point the content's preview at an uploaded image.
    fn set_preview(&self, id: &str, preview_url: &str) -> Result<(), ContentError>;

    /// Outputs produced by a work item, oldest first.
    fn outputs_of(&self, work_item_id: &str) -> Result<Vec<Content>, ContentError>;
}
