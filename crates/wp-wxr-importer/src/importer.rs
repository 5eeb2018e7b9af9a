//! The import controller.
//!
//! Drives a WXR entity stream against an injected [`Store`], turning
//! records into idempotent mutations: source IDs are remapped through
//! the `processed_*` tables, references to things that have not been
//! imported yet are parked as orphans and back-filled after the last
//! post, and remote attachment URLs are rewritten to their local
//! replacements, longest URL first, so a longer source URL never loses
//! to one of its own prefixes.
//!
//! Failures are reported per entity and the import continues; only a
//! parse error before the first entity aborts a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attachment::{unique_upload_path, AttachmentFetcher, RemoteFetch};
use crate::entities::{
    Author, Category, Comment, CommentMeta, Entity, Post, PostMeta, Tag, Term, TermMeta,
};
use crate::error::{ImportError, WxrError};
use crate::reader::WxrReader;
use crate::store::{CommentFields, PostFields, PostId, Store, TermId, UserId};

/// How a source author maps onto a user in the target site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorAction {
    MapToExisting(UserId),
    CreateNew,
    UseCurrent,
}

#[derive(Clone, Debug)]
pub struct ImportOptions {
    /// Download attachment files and rewrite their URLs.
    pub fetch_attachments: bool,
    /// Maximum attachment size in bytes; 0 means unlimited.
    pub import_attachment_size_limit: u64,
    /// Per-login decisions collected before the import.
    pub author_actions: BTreeMap<String, AuthorAction>,
    /// The user that absorbs content whose author cannot be resolved.
    pub current_user: UserId,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            fetch_attachments: false,
            import_attachment_size_limit: 0,
            author_actions: BTreeMap::new(),
            current_user: 1,
        }
    }
}

/// Everything the importer remembers across entities. Serializable so
/// that a checkpoint is this state plus the reader's re-entrancy cursor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImportState {
    /// Source author ID to target user ID.
    pub processed_authors: BTreeMap<u64, UserId>,
    /// Source login to target user ID.
    pub author_mapping: BTreeMap<String, UserId>,
    /// Source term ID to target term ID.
    pub processed_terms: BTreeMap<u64, TermId>,
    /// Source post ID to target post ID.
    pub processed_posts: BTreeMap<u64, PostId>,
    /// Source post ID of a child to the source ID of its parent, parked
    /// until both ends are known.
    pub post_orphans: BTreeMap<u64, u64>,
    pub processed_menu_items: BTreeMap<u64, PostId>,
    /// Target menu item ID to the source ID of its parent item.
    pub menu_item_orphans: BTreeMap<PostId, u64>,
    /// Menu items whose target object had not been imported yet; they
    /// are retried after the last post.
    pub missing_menu_items: Vec<BufferedPost>,
    /// Remote URL to local URL, applied longest key first.
    pub url_remap: BTreeMap<String, String>,
    /// Target post ID to the source ID of its `_thumbnail_id`.
    pub featured_images: BTreeMap<PostId, u64>,
}

/// A post with the child records that arrived between its opening and
/// closing tags, processed as one unit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BufferedPost {
    pub post: Post,
    pub meta: Vec<PostMeta>,
    pub comments: Vec<Comment>,
    pub comment_meta: Vec<CommentMeta>,
}

enum PendingTerm {
    Category { category: Category, meta: Vec<TermMeta> },
    Tag { tag: Tag, meta: Vec<TermMeta> },
    Term { term: Term, meta: Vec<TermMeta> },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub authors: usize,
    pub terms: usize,
    pub posts: usize,
    pub url_remaps: usize,
}

/// The known `_menu_item_*` keys as a typed record; anything else under
/// that prefix rides along in `extra` untouched.
#[derive(Clone, Debug, Default)]
struct MenuItemMeta {
    item_type: String,
    object: String,
    object_id: u64,
    menu_item_parent: u64,
    url: String,
    extra: Vec<(String, String)>,
}

impl MenuItemMeta {
    fn from_meta(meta: &[PostMeta]) -> Self {
        let mut fields = Self::default();
        for pair in meta {
            match pair.key.as_str() {
                "_menu_item_type" => fields.item_type = pair.value.clone(),
                "_menu_item_object" => fields.object = pair.value.clone(),
                "_menu_item_object_id" => {
                    fields.object_id = pair.value.trim().parse().unwrap_or(0)
                }
                "_menu_item_menu_item_parent" => {
                    fields.menu_item_parent = pair.value.trim().parse().unwrap_or(0)
                }
                "_menu_item_url" => fields.url = pair.value.clone(),
                key if key.starts_with("_menu_item_") => {
                    fields.extra.push((key.to_string(), pair.value.clone()))
                }
                _ => {}
            }
        }
        fields
    }
}

pub struct ImportSession<S: Store> {
    store: S,
    fetcher: Option<Box<dyn AttachmentFetcher>>,
    options: ImportOptions,
    state: ImportState,

    pending_post: Option<BufferedPost>,
    pending_term: Option<PendingTerm>,
    base_site_url: Option<String>,
}

impl<S: Store> ImportSession<S> {
    pub fn new(store: S, options: ImportOptions) -> Self {
        Self {
            store,
            fetcher: None,
            options,
            state: ImportState::default(),
            pending_post: None,
            pending_term: None,
            base_site_url: None,
        }
    }

    pub fn with_attachment_fetcher(mut self, fetcher: Box<dyn AttachmentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Continues from a previously serialized checkpoint.
    pub fn with_state(mut self, state: ImportState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &ImportState {
        &self.state
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Pulls every entity out of a reader with finished input, processes
    /// them, and runs the back-fill passes.
    pub fn import_stream(&mut self, reader: &mut WxrReader) -> Result<ImportSummary, ImportError> {
        while reader.next_entity() {
            let entity = reader
                .get_entity()
                .cloned()
                .expect("next_entity returned true");
            self.process_entity(entity);
        }

        if let Some(error) = reader.get_last_error() {
            return Err(error.clone().into());
        }
        if reader.is_paused_at_incomplete_input() {
            return Err(WxrError::MalformedXml.into());
        }

        self.finish();
        Ok(self.summary())
    }

    pub fn summary(&self) -> ImportSummary {
        ImportSummary {
            authors: self.state.author_mapping.len(),
            terms: self.state.processed_terms.len(),
            posts: self.state.processed_posts.len(),
            url_remaps: self.state.url_remap.len(),
        }
    }

    /// Feeds one entity. Child records buffer onto their parent; a new
    /// top-level entity processes whatever was buffered before it.
    pub fn process_entity(&mut self, entity: Entity) {
        match entity {
            Entity::SiteOption(option) => {
                if "siteurl" == option.name {
                    self.base_site_url = Some(option.value.trim_end_matches('/').to_string());
                }
            }

            Entity::Author(author) => {
                self.flush_pending();
                if let Err(error) = self.process_author(&author) {
                    tracing::warn!("Failed to import author {}", author.author_login);
                    tracing::debug!(error = %error, "author import failed");
                }
            }

            Entity::Category(category) => {
                self.flush_pending();
                self.pending_term = Some(PendingTerm::Category {
                    category,
                    meta: Vec::new(),
                });
            }
            Entity::Tag(tag) => {
                self.flush_pending();
                self.pending_term = Some(PendingTerm::Tag {
                    tag,
                    meta: Vec::new(),
                });
            }
            Entity::Term(term) => {
                self.flush_pending();
                self.pending_term = Some(PendingTerm::Term {
                    term,
                    meta: Vec::new(),
                });
            }
            Entity::TermMeta(meta) => match &mut self.pending_term {
                Some(
                    PendingTerm::Category { meta: pairs, .. }
                    | PendingTerm::Tag { meta: pairs, .. }
                    | PendingTerm::Term { meta: pairs, .. },
                ) => pairs.push(meta),
                None => tracing::debug!("stray termmeta {:?} ignored", meta.key),
            },

            Entity::Post(post) => {
                self.flush_pending();
                self.pending_post = Some(BufferedPost {
                    post,
                    meta: Vec::new(),
                    comments: Vec::new(),
                    comment_meta: Vec::new(),
                });
            }
            Entity::PostMeta(meta) => match &mut self.pending_post {
                Some(unit) => unit.meta.push(meta),
                None => tracing::debug!("stray postmeta {:?} ignored", meta.key),
            },
            Entity::Comment(comment) => match &mut self.pending_post {
                Some(unit) => unit.comments.push(comment),
                None => tracing::debug!("stray comment {} ignored", comment.comment_id),
            },
            Entity::CommentMeta(meta) => match &mut self.pending_post {
                Some(unit) => unit.comment_meta.push(meta),
                None => tracing::debug!("stray commentmeta {:?} ignored", meta.key),
            },
        }
    }

    /// Processes anything still buffered and runs the back-fill passes:
    /// menu item retries, parent links, attachment URLs, featured images.
    pub fn finish(&mut self) {
        self.flush_pending();

        let missing = std::mem::take(&mut self.state.missing_menu_items);
        for unit in missing {
            if let Err(error) = self.process_menu_item(&unit, true) {
                tracing::warn!("Failed to import menu item {}", unit.post.title);
                tracing::debug!(error = %error, "menu item retry failed");
            }
        }

        self.backfill_parents();
        self.backfill_menu_item_orphans();
        self.backfill_attachment_urls();
        self.remap_featured_images();
    }

    fn flush_pending(&mut self) {
        if let Some(pending) = self.pending_term.take() {
            let (kind, name) = match &pending {
                PendingTerm::Category { category, .. } => ("category", category.name.clone()),
                PendingTerm::Tag { tag, .. } => ("post tag", tag.name.clone()),
                PendingTerm::Term { term, .. } => ("term", term.name.clone()),
            };
            if let Err(error) = self.process_term(pending) {
                tracing::warn!("Failed to import {kind} {name}");
                tracing::debug!(error = %error, "term import failed");
            }
        }

        if let Some(unit) = self.pending_post.take() {
            let title = unit.post.title.clone();
            if let Err(error) = self.process_post_unit(unit) {
                tracing::warn!("Failed to import post {title}");
                tracing::debug!(error = %error, "post import failed");
            }
        }
    }

    fn process_author(&mut self, author: &Author) -> Result<(), ImportError> {
        let login = author.author_login.trim();
        if login.is_empty() {
            tracing::warn!("Skipping author with empty login");
            return Ok(());
        }

        if let Some(&user_id) = self.state.author_mapping.get(login) {
            if let Some(source_id) = author.author_id {
                self.state.processed_authors.entry(source_id).or_insert(user_id);
            }
            return Ok(());
        }

        let action = self
            .options
            .author_actions
            .get(login)
            .cloned()
            .unwrap_or(AuthorAction::CreateNew);

        let user_id = match action {
            AuthorAction::MapToExisting(user_id) => user_id,
            AuthorAction::UseCurrent => self.options.current_user,
            AuthorAction::CreateNew => self.store.find_or_create_user(
                login,
                non_empty(&author.author_email),
                non_empty(&author.author_display_name),
                non_empty(&author.author_first_name),
                non_empty(&author.author_last_name),
            )?,
        };

        if let Some(source_id) = author.author_id {
            self.state.processed_authors.insert(source_id, user_id);
        }
        self.state.author_mapping.insert(login.to_string(), user_id);
        Ok(())
    }

    fn process_term(&mut self, pending: PendingTerm) -> Result<(), ImportError> {
        let (taxonomy, term_id, slug, parent_slug, name, description, meta) = match pending {
            PendingTerm::Category { category, meta } => (
                "category".to_string(),
                category.term_id,
                category.slug,
                category.parent,
                category.name,
                category.description,
                meta,
            ),
            PendingTerm::Tag { tag, meta } => (
                "post_tag".to_string(),
                tag.term_id,
                tag.slug,
                String::new(),
                tag.name,
                tag.description,
                meta,
            ),
            PendingTerm::Term { term, meta } => (
                term.taxonomy,
                term.term_id,
                term.slug,
                term.parent,
                term.name,
                term.description,
                meta,
            ),
        };

        if slug.is_empty() {
            tracing::warn!("Skipping {taxonomy} with empty slug");
            return Ok(());
        }

        // An existing term is remapped, never recreated; its meta stays
        // as it is so re-imports add no rows.
        if let Some(existing) = self.store.term_exists(&slug, &taxonomy)? {
            if let Some(source_id) = term_id {
                self.state.processed_terms.insert(source_id, existing);
            }
            return Ok(());
        }

        let parent_id = if parent_slug.is_empty() {
            0
        } else {
            self.store.term_exists(&parent_slug, &taxonomy)?.unwrap_or(0)
        };

        let new_id = self
            .store
            .insert_term(&name, &taxonomy, &slug, parent_id, &description)?;
        if let Some(source_id) = term_id {
            self.state.processed_terms.insert(source_id, new_id);
        }
        for pair in &meta {
            self.store.add_term_meta(new_id, &pair.key, &pair.value)?;
        }
        Ok(())
    }

    fn process_post_unit(&mut self, unit: BufferedPost) -> Result<(), ImportError> {
        let post = &unit.post;

        if "nav_menu_item" == post.post_type {
            return self.process_menu_item(&unit, false);
        }

        if !self.store.post_type_exists(&post.post_type)? {
            tracing::warn!(
                "Failed to import {}: invalid post type {}",
                post.title,
                post.post_type
            );
            return Ok(());
        }

        let source_id = post.post_id.unwrap_or(0);
        if 0 != source_id && self.state.processed_posts.contains_key(&source_id) {
            return Ok(());
        }

        if "auto-draft" == post.status {
            return Ok(());
        }

        // Duplicate detection: same title and date, same type.
        let already_present = match self.store.post_exists(&post.title, "", &post.post_date)? {
            Some(existing_id) => {
                let existing_type = self.store.get_post_type(existing_id)?;
                if existing_type.as_deref() == Some(post.post_type.as_str()) {
                    Some(existing_id)
                } else {
                    None
                }
            }
            None => None,
        };

        let post_author = self
            .state
            .author_mapping
            .get(&post.creator)
            .copied()
            .unwrap_or(self.options.current_user);

        let mut post_parent = post.post_parent;
        if 0 != post_parent {
            if let Some(&mapped) = self.state.processed_posts.get(&post_parent) {
                post_parent = mapped;
            } else {
                // Parent has not been imported yet; back-filled later.
                if 0 != source_id {
                    self.state.post_orphans.insert(source_id, post_parent);
                }
                post_parent = 0;
            }
        }

        let post_id = if let Some(existing_id) = already_present {
            tracing::info!("Post \u{201c}{}\u{201d} already exists.", post.title);

            /*
             * Re-imports must still learn the local URL of an existing
             * attachment, otherwise content referencing it keeps
             * pointing at the source site.
             */
            if "attachment" == post.post_type {
                let remote_url = if !post.attachment_url.is_empty() {
                    &post.attachment_url
                } else {
                    &post.guid
                };
                if let Some(local_url) = self.store.get_attachment_url(existing_id)? {
                    if !remote_url.is_empty() && local_url != *remote_url {
                        self.state
                            .url_remap
                            .insert(remote_url.clone(), local_url);
                    }
                }
            }

            existing_id
        } else if "attachment" == post.post_type {
            let remote_url = if !post.attachment_url.is_empty() {
                post.attachment_url.clone()
            } else {
                post.guid.clone()
            };
            self.process_attachment(&unit, post_author, post_parent, &remote_url)?
        } else {
            let fields = post_fields(post, post_author, post_parent);
            self.store.insert_post(&fields, source_id)?
        };

        if 0 != source_id {
            self.state.processed_posts.insert(source_id, post_id);
        }

        if post.is_sticky {
            self.store.stick_post(post_id)?;
        }

        self.assign_post_terms(post, post_id)?;
        self.insert_comments(&unit, post_id, already_present.is_some())?;

        if already_present.is_none() {
            self.insert_post_meta(&unit, post_id)?;
        } else {
            // Rows exist already; only the bookkeeping side effects of
            // the meta are wanted on a re-import.
            for pair in &unit.meta {
                if "_thumbnail_id" == pair.key {
                    if let Ok(thumbnail) = pair.value.trim().parse() {
                        self.state.featured_images.insert(post_id, thumbnail);
                    }
                }
            }
        }

        Ok(())
    }

    fn assign_post_terms(&mut self, post: &Post, post_id: PostId) -> Result<(), ImportError> {
        let mut ids_by_taxonomy: BTreeMap<String, Vec<TermId>> = BTreeMap::new();

        for term in &post.terms {
            if "nav_menu" == term.domain {
                continue;
            }

            // WXR 1.0 wrote tag assignments under the "tag" domain.
            let taxonomy = if "tag" == term.domain {
                "post_tag".to_string()
            } else {
                term.domain.clone()
            };
            if taxonomy.is_empty() || (term.slug.is_empty() && term.name.is_empty()) {
                continue;
            }

            let slug = if term.slug.is_empty() {
                term.name.to_lowercase().replace(' ', "-")
            } else {
                term.slug.clone()
            };

            let term_id = match self.store.term_exists(&slug, &taxonomy)? {
                Some(term_id) => term_id,
                // Terms the channel never declared are created on the fly.
                None => match self.store.insert_term(&term.name, &taxonomy, &slug, 0, "") {
                    Ok(term_id) => term_id,
                    Err(error) => {
                        tracing::warn!("Failed to import {} {}", taxonomy, term.name);
                        tracing::debug!(error = %error, "post term import failed");
                        continue;
                    }
                },
            };
            ids_by_taxonomy.entry(taxonomy).or_default().push(term_id);
        }

        for (taxonomy, term_ids) in ids_by_taxonomy {
            self.store.set_post_terms(post_id, &term_ids, &taxonomy)?;
        }
        Ok(())
    }

    /// Inserts comments in ascending source-ID order so that a reply's
    /// parent has always been inserted before it.
    fn insert_comments(
        &mut self,
        unit: &BufferedPost,
        post_id: PostId,
        post_already_present: bool,
    ) -> Result<(), ImportError> {
        let mut comments: Vec<&Comment> = unit.comments.iter().collect();
        comments.sort_by_key(|comment| comment.comment_id);

        let mut inserted: BTreeMap<u64, u64> = BTreeMap::new();
        for comment in comments {
            if post_already_present
                && self
                    .store
                    .comment_exists(&comment.author, &comment.date)?
                    .is_some()
            {
                continue;
            }

            let parent = if 0 == comment.parent {
                0
            } else {
                inserted.get(&comment.parent).copied().unwrap_or(0)
            };

            let fields = CommentFields {
                comment_post_id: post_id,
                comment_author: comment.author.clone(),
                comment_author_email: comment.author_email.clone(),
                comment_author_url: comment.author_url.clone(),
                comment_author_ip: comment.author_ip.clone(),
                comment_date: comment.date.clone(),
                comment_date_gmt: comment.date_gmt.clone(),
                comment_content: comment.content.clone(),
                comment_approved: comment.approved.clone(),
                comment_type: comment.comment_type.clone(),
                comment_parent: parent,
                user_id: comment.user_id,
            };
            let new_id = self.store.insert_comment(&fields)?;
            inserted.insert(comment.comment_id, new_id);

            for meta in unit
                .comment_meta
                .iter()
                .filter(|meta| meta.comment_id == comment.comment_id)
            {
                self.store.add_comment_meta(new_id, &meta.key, &meta.value)?;
            }
        }
        Ok(())
    }

    fn insert_post_meta(&mut self, unit: &BufferedPost, post_id: PostId) -> Result<(), ImportError> {
        for pair in &unit.meta {
            match pair.key.as_str() {
                // Managed by the upload pipeline and the editor; the
                // source site's values would be wrong here.
                "_wp_attached_file" | "_wp_attachment_metadata" | "_edit_lock" => continue,

                "_edit_last" => {
                    let mapped = pair
                        .value
                        .trim()
                        .parse::<u64>()
                        .ok()
                        .and_then(|source| self.state.processed_authors.get(&source).copied());
                    if let Some(user_id) = mapped {
                        self.store
                            .add_post_meta(post_id, "_edit_last", &user_id.to_string())?;
                    }
                }

                // Resolved in a second pass once attachments are known.
                "_thumbnail_id" => {
                    if let Ok(thumbnail) = pair.value.trim().parse() {
                        self.state.featured_images.insert(post_id, thumbnail);
                    }
                }

                _ => self.store.add_post_meta(post_id, &pair.key, &pair.value)?,
            }
        }
        Ok(())
    }

    fn process_menu_item(&mut self, unit: &BufferedPost, is_retry: bool) -> Result<(), ImportError> {
        let post = &unit.post;
        let source_id = post.post_id.unwrap_or(0);
        if 0 != source_id && self.state.processed_menu_items.contains_key(&source_id) {
            return Ok(());
        }

        let meta = MenuItemMeta::from_meta(&unit.meta);

        let Some(menu_slug) = post
            .terms
            .iter()
            .find(|term| "nav_menu" == term.domain)
            .map(|term| term.slug.clone())
        else {
            tracing::warn!("Menu item skipped due to missing menu slug");
            return Ok(());
        };
        let Some(menu_id) = self.store.term_exists(&menu_slug, "nav_menu")? else {
            tracing::warn!("Menu item skipped due to invalid menu slug: {menu_slug}");
            return Ok(());
        };

        let mut object_id = meta.object_id;
        match meta.item_type.as_str() {
            "taxonomy" => match self.state.processed_terms.get(&meta.object_id) {
                Some(&mapped) => object_id = mapped,
                None => {
                    if is_retry {
                        tracing::warn!("Menu item skipped: missing term {}", meta.object_id);
                        return Ok(());
                    }
                    self.state.missing_menu_items.push(unit.clone());
                    return Ok(());
                }
            },
            "post_type" => match self.state.processed_posts.get(&meta.object_id) {
                Some(&mapped) => object_id = mapped,
                None => {
                    if is_retry {
                        tracing::warn!("Menu item skipped: missing post {}", meta.object_id);
                        return Ok(());
                    }
                    self.state.missing_menu_items.push(unit.clone());
                    return Ok(());
                }
            },
            _ => {}
        }

        let parent_source = meta.menu_item_parent;
        let mapped_parent = self
            .state
            .processed_menu_items
            .get(&parent_source)
            .copied()
            .unwrap_or(0);

        let post_author = self
            .state
            .author_mapping
            .get(&post.creator)
            .copied()
            .unwrap_or(self.options.current_user);
        let fields = post_fields(post, post_author, 0);
        let new_id = self.store.insert_post(&fields, source_id)?;

        if 0 != source_id {
            self.state.processed_menu_items.insert(source_id, new_id);
        }
        if 0 != parent_source && 0 == mapped_parent {
            self.state.menu_item_orphans.insert(new_id, parent_source);
        }

        self.store.set_post_terms(new_id, &[menu_id], "nav_menu")?;
        self.store
            .add_post_meta(new_id, "_menu_item_type", &meta.item_type)?;
        self.store
            .add_post_meta(new_id, "_menu_item_object", &meta.object)?;
        self.store
            .add_post_meta(new_id, "_menu_item_object_id", &object_id.to_string())?;
        self.store.add_post_meta(
            new_id,
            "_menu_item_menu_item_parent",
            &mapped_parent.to_string(),
        )?;
        self.store.add_post_meta(new_id, "_menu_item_url", &meta.url)?;
        for (key, value) in &meta.extra {
            self.store.add_post_meta(new_id, key, value)?;
        }

        Ok(())
    }

    fn process_attachment(
        &mut self,
        unit: &BufferedPost,
        post_author: UserId,
        post_parent: PostId,
        remote_url: &str,
    ) -> Result<PostId, ImportError> {
        if !self.options.fetch_attachments {
            return Err(ImportError::AttachmentProcessing(
                "Fetching attachments is not enabled".to_string(),
            ));
        }
        if remote_url.is_empty() {
            return Err(ImportError::AttachmentProcessing(
                "Attachment has no source URL".to_string(),
            ));
        }

        // Relative URLs resolve against the source site.
        let remote_url = if remote_url.starts_with('/') {
            match &self.base_site_url {
                Some(base) => format!("{base}{remote_url}"),
                None => remote_url.to_string(),
            }
        } else {
            remote_url.to_string()
        };

        let (local_url, fetched) = self.fetch_remote_file(&remote_url, unit)?;

        let post = &unit.post;
        let mut fields = post_fields(post, post_author, post_parent);
        fields.guid = local_url.clone();
        let post_id = self
            .store
            .insert_post(&fields, post.post_id.unwrap_or(0))?;

        self.state
            .url_remap
            .insert(remote_url.clone(), local_url.clone());
        if !post.guid.is_empty() && post.guid != remote_url {
            self.state.url_remap.insert(post.guid.clone(), local_url.clone());
        }
        if let Some(final_url) = fetched.final_url {
            if final_url != remote_url {
                self.state.url_remap.insert(final_url, local_url);
            }
        }

        Ok(post_id)
    }

    /// Downloads a remote file into the uploads directory and verifies
    /// the result. Any failure removes the partial file.
    fn fetch_remote_file(
        &mut self,
        remote_url: &str,
        unit: &BufferedPost,
    ) -> Result<(String, RemoteFetch), ImportError> {
        let file_name = remote_file_name(remote_url).ok_or(ImportError::InvalidFileType)?;

        let bucket = upload_bucket(unit);
        let upload_dir = self
            .store
            .upload_dir(&bucket)
            .map_err(|error| ImportError::UploadDir(error.to_string()))?;

        let dest = unique_upload_path(&upload_dir.path, &file_name);

        let fetcher = self.fetcher.as_mut().ok_or_else(|| {
            ImportError::AttachmentProcessing("No attachment fetcher configured".to_string())
        })?;

        let fetched = match fetcher.fetch(remote_url, &dest) {
            Ok(fetched) => fetched,
            Err(error) => {
                let _ = std::fs::remove_file(&dest);
                return Err(ImportError::ImportFile(format!(
                    "Remote server did not respond: {error}"
                )));
            }
        };

        if 200 != fetched.status {
            let _ = std::fs::remove_file(&dest);
            return Err(ImportError::ImportFile(format!(
                "Remote server returned error response {}",
                fetched.status
            )));
        }

        let file_size = std::fs::metadata(&dest).map(|meta| meta.len()).unwrap_or(0);
        if 0 == file_size {
            let _ = std::fs::remove_file(&dest);
            return Err(ImportError::ImportFile(
                "Zero size file downloaded".to_string(),
            ));
        }
        if let Some(expected) = fetched.content_length {
            if expected != file_size {
                let _ = std::fs::remove_file(&dest);
                return Err(ImportError::ImportFile(
                    "Remote file is incorrect size".to_string(),
                ));
            }
        }
        let limit = self.options.import_attachment_size_limit;
        if 0 != limit && file_size > limit {
            let _ = std::fs::remove_file(&dest);
            return Err(ImportError::ImportFile(format!(
                "Remote file is too large, limit is {limit} bytes"
            )));
        }

        let stored_name = dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(file_name);
        let local_url = format!("{}/{}", upload_dir.url.trim_end_matches('/'), stored_name);

        Ok((local_url, fetched))
    }

    /// Links children to parents that were imported after them.
    fn backfill_parents(&mut self) {
        let orphans = std::mem::take(&mut self.state.post_orphans);
        for (child_source, parent_source) in orphans {
            let (Some(&child), Some(&parent)) = (
                self.state.processed_posts.get(&child_source),
                self.state.processed_posts.get(&parent_source),
            ) else {
                continue;
            };
            if let Err(error) = self.store.update_post_parent(child, parent) {
                tracing::debug!(error = %error, "parent backfill failed for {child_source}");
            }
        }
    }

    fn backfill_menu_item_orphans(&mut self) {
        let orphans = std::mem::take(&mut self.state.menu_item_orphans);
        for (child, parent_source) in orphans {
            let Some(&parent) = self.state.processed_menu_items.get(&parent_source) else {
                continue;
            };
            if let Err(error) =
                self.store
                    .update_post_meta(child, "_menu_item_menu_item_parent", &parent.to_string())
            {
                tracing::debug!(error = %error, "menu parent backfill failed for {child}");
            }
        }
    }

    /// Rewrites remote URLs in content to their local replacements.
    /// Longer URLs substitute first so that a URL is never clobbered by
    /// a remap of one of its own prefixes.
    fn backfill_attachment_urls(&mut self) {
        let mut remaps: Vec<(String, String)> = self
            .state
            .url_remap
            .iter()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();
        remaps.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        for (from, to) in remaps {
            if let Err(error) = self.store.update_post_content_substitute(&from, &to) {
                tracing::debug!(error = %error, "URL remap failed for {from}");
            }
        }
    }

    fn remap_featured_images(&mut self) {
        let featured = std::mem::take(&mut self.state.featured_images);
        for (post_id, source_thumbnail) in featured {
            let Some(&thumbnail) = self.state.processed_posts.get(&source_thumbnail) else {
                continue;
            };
            if let Err(error) =
                self.store
                    .update_post_meta(post_id, "_thumbnail_id", &thumbnail.to_string())
            {
                tracing::debug!(error = %error, "featured image remap failed for {post_id}");
            }
        }
    }
}

fn post_fields(post: &Post, author: UserId, parent: PostId) -> PostFields {
    PostFields {
        post_author: author,
        post_date: post.post_date.clone(),
        post_date_gmt: post.post_date_gmt.clone(),
        post_content: post.content.clone(),
        post_excerpt: post.excerpt.clone(),
        post_title: post.title.clone(),
        post_status: post.status.clone(),
        post_name: post.post_name.clone(),
        comment_status: post.comment_status.clone(),
        ping_status: post.ping_status.clone(),
        guid: post.guid.clone(),
        post_parent: parent,
        menu_order: post.menu_order,
        post_type: post.post_type.clone(),
        post_password: post.post_password.clone(),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// The `YYYY/MM` uploads bucket for an attachment: the directory stub
/// recorded in `_wp_attached_file` when it looks like a date bucket,
/// otherwise the post date.
fn upload_bucket(unit: &BufferedPost) -> String {
    if let Some(meta) = unit.meta.iter().find(|meta| "_wp_attached_file" == meta.key) {
        if let Some((dir, _file)) = meta.value.rsplit_once('/') {
            if looks_like_yyyymm(dir) {
                return dir.to_string();
            }
        }
    }

    let date = unit.post.post_date.as_bytes();
    if date.len() >= 7
        && date[..4].iter().all(u8::is_ascii_digit)
        && b'-' == date[4]
        && date[5..7].iter().all(u8::is_ascii_digit)
    {
        let date = &unit.post.post_date;
        return format!("{}/{}", &date[..4], &date[5..7]);
    }

    String::new()
}

fn looks_like_yyyymm(dir: &str) -> bool {
    let bytes = dir.as_bytes();
    7 == bytes.len()
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && b'/' == bytes[4]
        && bytes[5..7].iter().all(u8::is_ascii_digit)
}

fn remote_file_name(remote_url: &str) -> Option<String> {
    let parsed = url::Url::parse(remote_url).ok()?;
    let name = parsed.path_segments()?.last()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
