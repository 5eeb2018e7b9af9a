//! The persistence boundary of the importer.
//!
//! The import controller never talks to a database directly; every
//! mutation and every existence check goes through [`Store`]. Text
//! crosses this boundary raw and unescaped, with backslashes from the
//! source document preserved verbatim, and meta values are opaque byte
//! strings that the store must not reinterpret.

use std::path::PathBuf;

use thiserror::Error;

pub type UserId = u64;
pub type PostId = u64;
pub type TermId = u64;
pub type CommentId = u64;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Column values for a post row. Field names follow the columns they
/// land in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostFields {
    pub post_author: UserId,
    pub post_date: String,
    pub post_date_gmt: String,
    pub post_content: String,
    pub post_excerpt: String,
    pub post_title: String,
    pub post_status: String,
    pub post_name: String,
    pub comment_status: String,
    pub ping_status: String,
    pub guid: String,
    pub post_parent: PostId,
    pub menu_order: i64,
    pub post_type: String,
    pub post_password: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommentFields {
    pub comment_post_id: PostId,
    pub comment_author: String,
    pub comment_author_email: String,
    pub comment_author_url: String,
    pub comment_author_ip: String,
    pub comment_date: String,
    pub comment_date_gmt: String,
    pub comment_content: String,
    pub comment_approved: String,
    pub comment_type: String,
    pub comment_parent: CommentId,
    pub user_id: UserId,
}

/// Where uploaded files for a given `YYYY/MM` bucket live on disk and
/// under which URL they are served.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadDir {
    pub path: PathBuf,
    pub url: String,
}

pub trait Store {
    /// Returns the ID of the user with this login, creating the user
    /// when none exists.
    fn find_or_create_user(
        &mut self,
        login: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<UserId, StoreError>;

    fn term_exists(&mut self, slug: &str, taxonomy: &str) -> Result<Option<TermId>, StoreError>;

    fn insert_term(
        &mut self,
        name: &str,
        taxonomy: &str,
        slug: &str,
        parent: TermId,
        description: &str,
    ) -> Result<TermId, StoreError>;

    fn add_term_meta(&mut self, term_id: TermId, key: &str, value: &str)
        -> Result<(), StoreError>;

    /// Looks for a post with the same title and date, the way duplicate
    /// detection works on import.
    fn post_exists(
        &mut self,
        title: &str,
        content: &str,
        date: &str,
    ) -> Result<Option<PostId>, StoreError>;

    fn post_type_exists(&mut self, post_type: &str) -> Result<bool, StoreError>;

    fn get_post_type(&mut self, post_id: PostId) -> Result<Option<String>, StoreError>;

    /// The public URL of an attachment's file, when the post is an
    /// attachment and has one.
    fn get_attachment_url(&mut self, post_id: PostId) -> Result<Option<String>, StoreError>;

    /// Inserts a post row. The hint is the source site's ID for this
    /// post; stores may use it to preserve IDs where possible.
    fn insert_post(
        &mut self,
        fields: &PostFields,
        import_id_hint: PostId,
    ) -> Result<PostId, StoreError>;

    fn add_post_meta(&mut self, post_id: PostId, key: &str, value: &str)
        -> Result<(), StoreError>;

    fn update_post_meta(
        &mut self,
        post_id: PostId,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    fn update_post_parent(&mut self, child: PostId, parent: PostId) -> Result<(), StoreError>;

    /// Looks for a comment by author and date, the duplicate test used
    /// when re-importing comments onto an existing post.
    fn comment_exists(
        &mut self,
        author: &str,
        date: &str,
    ) -> Result<Option<CommentId>, StoreError>;

    fn insert_comment(&mut self, fields: &CommentFields) -> Result<CommentId, StoreError>;

    fn add_comment_meta(
        &mut self,
        comment_id: CommentId,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    fn set_post_terms(
        &mut self,
        post_id: PostId,
        term_ids: &[TermId],
        taxonomy: &str,
    ) -> Result<(), StoreError>;

    fn stick_post(&mut self, post_id: PostId) -> Result<(), StoreError>;

    /// Replaces every occurrence of `from` with `to` across post content
    /// and `enclosure` post meta, the SQL-side half of URL remapping.
    fn update_post_content_substitute(&mut self, from: &str, to: &str)
        -> Result<(), StoreError>;

    fn upload_dir(&mut self, bucket_yyyymm: &str) -> Result<UploadDir, StoreError>;
}
