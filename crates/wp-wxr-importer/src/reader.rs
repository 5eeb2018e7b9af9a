//! Chunked WXR entity reader.
//!
//! Layered on the XML processor, this reader walks a WordPress eXtended
//! RSS document and emits one typed [`Entity`] at a time: site options,
//! authors, the three term shapes, posts, and the child records nested
//! inside them. It is a lazy, restartable producer: `next_entity()`
//! pumps the processor only until one entity has been fully buffered,
//! and when the underlying input runs out mid-token the reader pauses
//! so the caller can append more bytes and retry. At most one entity is
//! held in memory at a time, no matter how large the document.

use std::collections::VecDeque;

use wp_xml_api::{CursorError, TokenType, XmlProcessor, XmlProcessorError};

use crate::entities::{
    Author, Category, Comment, CommentMeta, Entity, Post, PostMeta, PostTerm, SiteOption, Tag,
    Term, TermMeta,
};
use crate::error::WxrError;

const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";
const CONTENT_NAMESPACE: &str = "http://purl.org/rss/1.0/modules/content/";
const WXR_NAMESPACE_ROOT: &str = "http://wordpress.org/export/";

/// Which WXR vocabulary an element's namespace belongs to.
///
/// Exports declare the `wp` and `excerpt` namespaces with the URI of
/// their own WXR version (1.0, 1.1, or 1.2), so matching goes by the
/// shared root rather than by one exact URI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Ns {
    None,
    Wp,
    Dc,
    Content,
    Excerpt,
    Other,
}

fn classify_namespace(uri: &str) -> Ns {
    if uri.is_empty() {
        return Ns::None;
    }
    if uri == DC_NAMESPACE {
        return Ns::Dc;
    }
    if uri == CONTENT_NAMESPACE {
        return Ns::Content;
    }
    if let Some(rest) = uri.strip_prefix(WXR_NAMESPACE_ROOT) {
        return if rest.trim_end_matches('/').ends_with("excerpt") {
            Ns::Excerpt
        } else {
            Ns::Wp
        };
    }
    Ns::Other
}

/// Structural position within the document, tracked as elements open
/// and close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Rss,
    Channel,
    Author,
    Category,
    Tag,
    Term,
    Item,
    PostMeta,
    Comment,
    CommentMeta,
    TermMeta,
    Field(FieldId),
    Unknown,
}

/// A leaf element whose text content lands in a builder field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldId {
    WxrVersion,
    BaseSiteUrl,
    BaseBlogUrl,

    AuthorId,
    AuthorLogin,
    AuthorEmail,
    AuthorDisplayName,
    AuthorFirstName,
    AuthorLastName,

    TermId,
    TermTaxonomy,
    TermSlug,
    TermParent,
    TermName,
    TermDescription,

    Title,
    Link,
    PubDate,
    Creator,
    Guid,
    Description,
    ContentEncoded,
    ExcerptEncoded,
    PostId,
    PostDate,
    PostDateGmt,
    CommentStatus,
    PingStatus,
    PostName,
    Status,
    PostParent,
    MenuOrder,
    PostType,
    PostPassword,
    IsSticky,
    AttachmentUrl,
    ItemCategory,

    MetaKey,
    MetaValue,

    CommentId,
    CommentAuthor,
    CommentAuthorEmail,
    CommentAuthorUrl,
    CommentAuthorIp,
    CommentDate,
    CommentDateGmt,
    CommentContent,
    CommentApproved,
    CommentType,
    CommentParent,
    CommentUserId,
}

enum OpenEntity {
    Author(Author),
    Category { category: Category, emitted: bool },
    Tag { tag: Tag, emitted: bool },
    Term { term: Term, emitted: bool },
    Post { post: Box<Post>, emitted: bool },
}

#[derive(Default)]
struct MetaPair {
    key: String,
    value: String,
}

enum OpenSub {
    PostMeta(MetaPair),
    Comment { comment: Box<Comment>, emitted: bool },
    TermMeta(MetaPair),
}

pub struct WxrReader {
    processor: XmlProcessor,
    scopes: Vec<Scope>,

    current_entity: Option<OpenEntity>,
    current_sub: Option<OpenSub>,
    /// A `wp:commentmeta` being built inside the current comment.
    current_comment_sub: Option<MetaPair>,

    /// Text of the field element being read, concatenated across
    /// adjacent text and CDATA tokens.
    text: String,
    pending_category_domain: Option<String>,
    pending_category_slug: Option<String>,

    /// Source IDs of the most recently emitted parent records, for the
    /// back-references on child records.
    last_post_id: Option<u64>,
    last_comment_id: Option<u64>,
    last_term_id: Option<u64>,

    pending: VecDeque<Entity>,
    entity: Option<Entity>,

    wxr_version: Option<String>,
    base_site_url: Option<String>,
    base_blog_url: Option<String>,

    last_error: Option<WxrError>,
    xml_error: Option<XmlProcessorError>,
    finished: bool,
    resumed: bool,
}

impl WxrReader {
    /// Reads a fully buffered document.
    pub fn from_string(xml: impl Into<Vec<u8>>) -> Self {
        Self::with_processor(XmlProcessor::from_string(xml), false)
    }

    /// Reads a document that arrives in chunks through `append_bytes`.
    pub fn for_streaming(xml: impl Into<Vec<u8>>) -> Self {
        Self::with_processor(XmlProcessor::for_streaming(xml), false)
    }

    /// Resumes a streaming read from a cursor previously returned by
    /// [`WxrReader::get_reentrancy_cursor`]. The bytes must continue the
    /// document at the offset the cursor was taken at.
    pub fn create_for_streaming(
        xml: impl Into<Vec<u8>>,
        cursor: &str,
    ) -> Result<Self, CursorError> {
        let processor = XmlProcessor::create_for_streaming(xml, cursor)?;
        let mut reader = Self::with_processor(processor, true);

        // Cursors are only handed out between entities, so the open
        // elements can only be the envelope.
        let breadcrumbs: Vec<(String, String)> = reader
            .processor
            .get_breadcrumbs()
            .into_iter()
            .map(|(namespace, local_name)| (namespace.to_string(), local_name.to_string()))
            .collect();
        for (namespace, local_name) in breadcrumbs {
            let scope = match (reader.scopes.last(), local_name.as_str()) {
                (None, "rss") => Scope::Rss,
                (Some(Scope::Rss), "channel")
                    if Ns::None == classify_namespace(&namespace) =>
                {
                    Scope::Channel
                }
                _ => Scope::Unknown,
            };
            reader.scopes.push(scope);
        }

        Ok(reader)
    }

    fn with_processor(processor: XmlProcessor, resumed: bool) -> Self {
        Self {
            processor,
            scopes: Vec::new(),
            current_entity: None,
            current_sub: None,
            current_comment_sub: None,
            text: String::new(),
            pending_category_domain: None,
            pending_category_slug: None,
            last_post_id: None,
            last_comment_id: None,
            last_term_id: None,
            pending: VecDeque::new(),
            entity: None,
            wxr_version: None,
            base_site_url: None,
            base_blog_url: None,
            last_error: None,
            xml_error: None,
            finished: false,
            resumed,
        }
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> bool {
        self.processor.append_bytes(bytes)
    }

    pub fn input_finished(&mut self) {
        self.processor.input_finished();
    }

    pub fn is_paused_at_incomplete_input(&self) -> bool {
        self.processor.is_paused_at_incomplete_input()
    }

    pub fn get_last_error(&self) -> Option<&WxrError> {
        self.last_error.as_ref()
    }

    /// The XML-level error behind a [`WxrError::MalformedXml`], for
    /// diagnostics.
    pub fn get_underlying_xml_error(&self) -> Option<&XmlProcessorError> {
        self.xml_error.as_ref()
    }

    pub fn get_wxr_version(&self) -> Option<&str> {
        self.wxr_version.as_deref()
    }

    pub fn get_base_site_url(&self) -> Option<&str> {
        self.base_site_url.as_deref()
    }

    pub fn get_base_blog_url(&self) -> Option<&str> {
        self.base_blog_url.as_deref()
    }

    /// The most recently produced entity.
    pub fn get_entity(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    /// A resumption cursor, available only between entities: once any
    /// part of an entity has been read, the reader must re-read it from
    /// the start after a resume.
    pub fn get_reentrancy_cursor(&self) -> Option<String> {
        if self.current_entity.is_some()
            || self.current_sub.is_some()
            || self.current_comment_sub.is_some()
            || !self.pending.is_empty()
        {
            return None;
        }
        self.processor.get_reentrancy_cursor()
    }

    /// Advances to the next entity in the document.
    ///
    /// Returns `true` with the entity available from `get_entity()`.
    /// Returns `false` when paused for more input (check
    /// `is_paused_at_incomplete_input()`), at the end of the document,
    /// or on error (check `get_last_error()`).
    pub fn next_entity(&mut self) -> bool {
        if self.last_error.is_some() {
            return false;
        }

        self.entity = None;

        loop {
            if let Some(entity) = self.pending.pop_front() {
                self.entity = Some(entity);
                return true;
            }

            if self.finished {
                return false;
            }

            if !self.processor.next_token() {
                if self.processor.is_paused_at_incomplete_input() {
                    return false;
                }

                if let Some(error) = self.processor.get_last_error() {
                    self.xml_error = Some(*error);
                    self.last_error = Some(WxrError::MalformedXml);
                    return false;
                }

                // Completed cleanly. A document that never produced a
                // version was no WXR export at all.
                self.finished = true;
                if self.wxr_version.is_none() && !self.resumed {
                    self.last_error = Some(WxrError::InvalidWxrVersion);
                    return false;
                }
                continue;
            }

            if let Err(error) = self.process_token() {
                self.last_error = Some(error);
                return false;
            }
        }
    }

    fn process_token(&mut self) -> Result<(), WxrError> {
        match self.processor.get_token_type() {
            Some(TokenType::Tag) => {
                if self.processor.is_tag_closer() {
                    let Some(scope) = self.scopes.pop() else {
                        return Ok(());
                    };
                    self.leave_scope(scope)
                } else {
                    let is_empty = self.processor.is_empty_element();
                    let scope = self.enter_element()?;
                    if is_empty {
                        self.leave_scope(scope)
                    } else {
                        self.scopes.push(scope);
                        Ok(())
                    }
                }
            }

            Some(TokenType::Text) | Some(TokenType::CdataSection) => {
                if matches!(self.scopes.last(), Some(Scope::Field(_))) {
                    let chunk = self.processor.get_modifiable_text();
                    self.text.push_str(&chunk);
                }
                Ok(())
            }

            _ => Ok(()),
        }
    }

    /// Maps the opened element onto a scope, starting builders and
    /// capturing attributes where the vocabulary calls for it.
    fn enter_element(&mut self) -> Result<Scope, WxrError> {
        let namespace = self
            .processor
            .get_tag_namespace()
            .map(|uri| classify_namespace(&uri))
            .unwrap_or(Ns::Other);
        let local_name = match self.processor.get_tag_local_name() {
            Some(local_name) => local_name.to_string(),
            None => return Ok(Scope::Unknown),
        };

        let parent = self.scopes.last().copied();

        let scope = match (parent, namespace, local_name.as_str()) {
            (None, _, "rss") => Scope::Rss,
            (None, _, _) => return Err(WxrError::InvalidWxrVersion),

            (Some(Scope::Rss), Ns::None, "channel") => Scope::Channel,

            (Some(Scope::Channel), Ns::Wp, "wxr_version") => Scope::Field(FieldId::WxrVersion),
            (Some(Scope::Channel), Ns::Wp, "base_site_url") => {
                Scope::Field(FieldId::BaseSiteUrl)
            }
            (Some(Scope::Channel), Ns::Wp, "base_blog_url") => {
                Scope::Field(FieldId::BaseBlogUrl)
            }

            (Some(Scope::Channel), Ns::Wp, "author") => {
                self.current_entity = Some(OpenEntity::Author(Author::default()));
                Scope::Author
            }
            (Some(Scope::Channel), Ns::Wp, "category") => {
                self.current_entity = Some(OpenEntity::Category {
                    category: Category::default(),
                    emitted: false,
                });
                Scope::Category
            }
            (Some(Scope::Channel), Ns::Wp, "tag") => {
                self.current_entity = Some(OpenEntity::Tag {
                    tag: Tag::default(),
                    emitted: false,
                });
                Scope::Tag
            }
            (Some(Scope::Channel), Ns::Wp, "term") => {
                self.current_entity = Some(OpenEntity::Term {
                    term: Term::default(),
                    emitted: false,
                });
                Scope::Term
            }
            (Some(Scope::Channel), Ns::None, "item") => {
                // The version marker must precede the first item.
                if self.wxr_version.is_none() && !self.resumed {
                    return Err(WxrError::InvalidWxrVersion);
                }
                self.current_entity = Some(OpenEntity::Post {
                    post: Box::default(),
                    emitted: false,
                });
                Scope::Item
            }

            (Some(Scope::Author), Ns::Wp, field) => match field {
                "author_id" => Scope::Field(FieldId::AuthorId),
                "author_login" => Scope::Field(FieldId::AuthorLogin),
                "author_email" => Scope::Field(FieldId::AuthorEmail),
                "author_display_name" => Scope::Field(FieldId::AuthorDisplayName),
                "author_first_name" => Scope::Field(FieldId::AuthorFirstName),
                "author_last_name" => Scope::Field(FieldId::AuthorLastName),
                _ => Scope::Unknown,
            },

            (Some(Scope::Category), Ns::Wp, field) => match field {
                "term_id" => Scope::Field(FieldId::TermId),
                "category_nicename" => Scope::Field(FieldId::TermSlug),
                "category_parent" => Scope::Field(FieldId::TermParent),
                "cat_name" => Scope::Field(FieldId::TermName),
                "category_description" => Scope::Field(FieldId::TermDescription),
                "termmeta" => self.enter_termmeta(),
                _ => Scope::Unknown,
            },

            (Some(Scope::Tag), Ns::Wp, field) => match field {
                "term_id" => Scope::Field(FieldId::TermId),
                "tag_slug" => Scope::Field(FieldId::TermSlug),
                "tag_name" => Scope::Field(FieldId::TermName),
                "tag_description" => Scope::Field(FieldId::TermDescription),
                "termmeta" => self.enter_termmeta(),
                _ => Scope::Unknown,
            },

            (Some(Scope::Term), Ns::Wp, field) => match field {
                "term_id" => Scope::Field(FieldId::TermId),
                "term_taxonomy" => Scope::Field(FieldId::TermTaxonomy),
                "term_slug" => Scope::Field(FieldId::TermSlug),
                "term_parent" => Scope::Field(FieldId::TermParent),
                "term_name" => Scope::Field(FieldId::TermName),
                "term_description" => Scope::Field(FieldId::TermDescription),
                "termmeta" => self.enter_termmeta(),
                _ => Scope::Unknown,
            },

            (Some(Scope::Item), Ns::None, "title") => Scope::Field(FieldId::Title),
            (Some(Scope::Item), Ns::None, "link") => Scope::Field(FieldId::Link),
            (Some(Scope::Item), Ns::None, "pubDate") => Scope::Field(FieldId::PubDate),
            (Some(Scope::Item), Ns::Dc, "creator") => Scope::Field(FieldId::Creator),
            (Some(Scope::Item), Ns::None, "guid") => Scope::Field(FieldId::Guid),
            (Some(Scope::Item), Ns::None, "description") => Scope::Field(FieldId::Description),
            (Some(Scope::Item), Ns::Content, "encoded") => Scope::Field(FieldId::ContentEncoded),
            (Some(Scope::Item), Ns::Excerpt, "encoded") => Scope::Field(FieldId::ExcerptEncoded),
            (Some(Scope::Item), Ns::None, "category") => {
                self.pending_category_domain = self.processor.get_attribute(None, "domain");
                self.pending_category_slug = self.processor.get_attribute(None, "nicename");
                Scope::Field(FieldId::ItemCategory)
            }
            (Some(Scope::Item), Ns::Wp, field) => match field {
                "post_id" => Scope::Field(FieldId::PostId),
                "post_date" => Scope::Field(FieldId::PostDate),
                "post_date_gmt" => Scope::Field(FieldId::PostDateGmt),
                "comment_status" => Scope::Field(FieldId::CommentStatus),
                "ping_status" => Scope::Field(FieldId::PingStatus),
                "post_name" => Scope::Field(FieldId::PostName),
                "status" => Scope::Field(FieldId::Status),
                "post_parent" => Scope::Field(FieldId::PostParent),
                "menu_order" => Scope::Field(FieldId::MenuOrder),
                "post_type" => Scope::Field(FieldId::PostType),
                "post_password" => Scope::Field(FieldId::PostPassword),
                "is_sticky" => Scope::Field(FieldId::IsSticky),
                "attachment_url" => Scope::Field(FieldId::AttachmentUrl),
                "postmeta" => {
                    self.emit_open_post();
                    self.current_sub = Some(OpenSub::PostMeta(MetaPair::default()));
                    Scope::PostMeta
                }
                "comment" => {
                    self.emit_open_post();
                    self.current_sub = Some(OpenSub::Comment {
                        comment: Box::default(),
                        emitted: false,
                    });
                    Scope::Comment
                }
                _ => Scope::Unknown,
            },

            (Some(Scope::PostMeta), Ns::Wp, "meta_key")
            | (Some(Scope::TermMeta), Ns::Wp, "meta_key")
            | (Some(Scope::CommentMeta), Ns::Wp, "meta_key") => Scope::Field(FieldId::MetaKey),
            (Some(Scope::PostMeta), Ns::Wp, "meta_value")
            | (Some(Scope::TermMeta), Ns::Wp, "meta_value")
            | (Some(Scope::CommentMeta), Ns::Wp, "meta_value") => {
                Scope::Field(FieldId::MetaValue)
            }

            (Some(Scope::Comment), Ns::Wp, field) => match field {
                "comment_id" => Scope::Field(FieldId::CommentId),
                "comment_author" => Scope::Field(FieldId::CommentAuthor),
                "comment_author_email" => Scope::Field(FieldId::CommentAuthorEmail),
                "comment_author_url" => Scope::Field(FieldId::CommentAuthorUrl),
                "comment_author_IP" => Scope::Field(FieldId::CommentAuthorIp),
                "comment_date" => Scope::Field(FieldId::CommentDate),
                "comment_date_gmt" => Scope::Field(FieldId::CommentDateGmt),
                "comment_content" => Scope::Field(FieldId::CommentContent),
                "comment_approved" => Scope::Field(FieldId::CommentApproved),
                "comment_type" => Scope::Field(FieldId::CommentType),
                "comment_parent" => Scope::Field(FieldId::CommentParent),
                "comment_user_id" => Scope::Field(FieldId::CommentUserId),
                "commentmeta" => {
                    self.emit_open_comment();
                    self.current_comment_sub = Some(MetaPair::default());
                    Scope::CommentMeta
                }
                _ => Scope::Unknown,
            },

            _ => Scope::Unknown,
        };

        if let Scope::Field(_) = scope {
            self.text.clear();
        }

        Ok(scope)
    }

    fn enter_termmeta(&mut self) -> Scope {
        self.emit_open_term();
        self.current_sub = Some(OpenSub::TermMeta(MetaPair::default()));
        Scope::TermMeta
    }

    /// Emits the post being built, so its child records follow it.
    fn emit_open_post(&mut self) {
        if let Some(OpenEntity::Post { post, emitted }) = &mut self.current_entity {
            if !*emitted {
                *emitted = true;
                self.last_post_id = post.post_id;
                self.pending.push_back(Entity::Post((**post).clone()));
            }
        }
    }

    fn emit_open_term(&mut self) {
        match &mut self.current_entity {
            Some(OpenEntity::Category { category, emitted }) if !*emitted => {
                *emitted = true;
                self.last_term_id = category.term_id;
                self.pending.push_back(Entity::Category(category.clone()));
            }
            Some(OpenEntity::Tag { tag, emitted }) if !*emitted => {
                *emitted = true;
                self.last_term_id = tag.term_id;
                self.pending.push_back(Entity::Tag(tag.clone()));
            }
            Some(OpenEntity::Term { term, emitted }) if !*emitted => {
                *emitted = true;
                self.last_term_id = term.term_id;
                self.pending.push_back(Entity::Term(term.clone()));
            }
            _ => {}
        }
    }

    fn emit_open_comment(&mut self) {
        if let Some(OpenSub::Comment { comment, emitted }) = &mut self.current_sub {
            if !*emitted {
                *emitted = true;
                comment.post_id = self.last_post_id;
                self.last_comment_id = Some(comment.comment_id);
                self.pending.push_back(Entity::Comment((**comment).clone()));
            }
        }
    }

    /// Finishes whatever the closed element was building: commits field
    /// text, or emits the completed record.
    fn leave_scope(&mut self, scope: Scope) -> Result<(), WxrError> {
        match scope {
            Scope::Field(field) => {
                let text = std::mem::take(&mut self.text);
                self.commit_field(field, text)
            }

            Scope::Author => {
                if let Some(OpenEntity::Author(author)) = self.current_entity.take() {
                    self.pending.push_back(Entity::Author(author));
                }
                Ok(())
            }

            Scope::Category | Scope::Tag | Scope::Term => {
                match self.current_entity.take() {
                    Some(OpenEntity::Category { category, emitted }) if !emitted => {
                        self.pending.push_back(Entity::Category(category));
                    }
                    Some(OpenEntity::Tag { tag, emitted }) if !emitted => {
                        self.pending.push_back(Entity::Tag(tag));
                    }
                    Some(OpenEntity::Term { term, emitted }) if !emitted => {
                        self.pending.push_back(Entity::Term(term));
                    }
                    _ => {}
                }
                self.last_term_id = None;
                Ok(())
            }

            Scope::Item => {
                if let Some(OpenEntity::Post { post, emitted }) = self.current_entity.take() {
                    if !emitted {
                        self.pending.push_back(Entity::Post(*post));
                    }
                }
                self.last_post_id = None;
                Ok(())
            }

            Scope::PostMeta => {
                if let Some(OpenSub::PostMeta(pair)) = self.current_sub.take() {
                    self.pending.push_back(Entity::PostMeta(PostMeta {
                        post_id: self.last_post_id,
                        key: pair.key,
                        value: pair.value,
                    }));
                }
                Ok(())
            }

            Scope::Comment => {
                if let Some(OpenSub::Comment { mut comment, emitted }) = self.current_sub.take() {
                    if !emitted {
                        comment.post_id = self.last_post_id;
                        self.pending.push_back(Entity::Comment(*comment));
                    }
                }
                self.last_comment_id = None;
                Ok(())
            }

            Scope::CommentMeta => {
                if let Some(pair) = self.current_comment_sub.take() {
                    self.pending.push_back(Entity::CommentMeta(CommentMeta {
                        comment_id: self.last_comment_id.unwrap_or(0),
                        key: pair.key,
                        value: pair.value,
                    }));
                }
                Ok(())
            }

            Scope::TermMeta => {
                if let Some(OpenSub::TermMeta(pair)) = self.current_sub.take() {
                    self.pending.push_back(Entity::TermMeta(TermMeta {
                        term_id: self.last_term_id,
                        key: pair.key,
                        value: pair.value,
                    }));
                }
                Ok(())
            }

            Scope::Rss | Scope::Channel | Scope::Unknown => Ok(()),
        }
    }

    fn commit_field(&mut self, field: FieldId, text: String) -> Result<(), WxrError> {
        use FieldId as F;

        match field {
            F::WxrVersion => {
                let version = text.trim();
                if !matches!(version, "1.0" | "1.1" | "1.2") {
                    return Err(WxrError::InvalidWxrVersion);
                }
                self.wxr_version = Some(version.to_string());
                return Ok(());
            }
            F::BaseSiteUrl => {
                self.base_site_url = Some(text.clone());
                self.pending.push_back(Entity::SiteOption(SiteOption {
                    name: "siteurl".to_string(),
                    value: text,
                }));
                return Ok(());
            }
            F::BaseBlogUrl => {
                self.base_blog_url = Some(text.clone());
                self.pending.push_back(Entity::SiteOption(SiteOption {
                    name: "home".to_string(),
                    value: text,
                }));
                return Ok(());
            }
            _ => {}
        }

        // Meta key/value pairs resolve to the innermost open record.
        if matches!(field, F::MetaKey | F::MetaValue) {
            if let Some(pair) = &mut self.current_comment_sub {
                match field {
                    F::MetaKey => pair.key = text,
                    _ => pair.value = text,
                }
                return Ok(());
            }
            match &mut self.current_sub {
                Some(OpenSub::PostMeta(pair)) | Some(OpenSub::TermMeta(pair)) => {
                    match field {
                        F::MetaKey => pair.key = text,
                        _ => pair.value = text,
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        if let Some(OpenSub::Comment { comment, .. }) = &mut self.current_sub {
            match field {
                F::CommentId => comment.comment_id = parse_id(&text),
                F::CommentAuthor => comment.author = text,
                F::CommentAuthorEmail => comment.author_email = text,
                F::CommentAuthorUrl => comment.author_url = text,
                F::CommentAuthorIp => comment.author_ip = text,
                F::CommentDate => comment.date = text,
                F::CommentDateGmt => comment.date_gmt = text,
                F::CommentContent => comment.content = text,
                F::CommentApproved => comment.approved = text,
                F::CommentType => comment.comment_type = text,
                F::CommentParent => comment.parent = parse_id(&text),
                F::CommentUserId => comment.user_id = parse_id(&text),
                _ => {}
            }
            return Ok(());
        }

        match &mut self.current_entity {
            Some(OpenEntity::Author(author)) => match field {
                F::AuthorId => author.author_id = text.trim().parse().ok(),
                F::AuthorLogin => author.author_login = text,
                F::AuthorEmail => author.author_email = text,
                F::AuthorDisplayName => author.author_display_name = text,
                F::AuthorFirstName => author.author_first_name = text,
                F::AuthorLastName => author.author_last_name = text,
                _ => {}
            },

            Some(OpenEntity::Category { category, .. }) => match field {
                F::TermId => category.term_id = text.trim().parse().ok(),
                F::TermSlug => category.slug = text,
                F::TermParent => category.parent = text,
                F::TermName => category.name = text,
                F::TermDescription => category.description = text,
                _ => {}
            },

            Some(OpenEntity::Tag { tag, .. }) => match field {
                F::TermId => tag.term_id = text.trim().parse().ok(),
                F::TermSlug => tag.slug = text,
                F::TermName => tag.name = text,
                F::TermDescription => tag.description = text,
                _ => {}
            },

            Some(OpenEntity::Term { term, .. }) => match field {
                F::TermId => term.term_id = text.trim().parse().ok(),
                F::TermTaxonomy => term.taxonomy = text,
                F::TermSlug => term.slug = text,
                F::TermParent => term.parent = text,
                F::TermName => term.name = text,
                F::TermDescription => term.description = text,
                _ => {}
            },

            Some(OpenEntity::Post { post, .. }) => match field {
                F::Title => post.title = text,
                F::Link => post.link = text,
                F::PubDate => post.pub_date = text,
                F::Creator => post.creator = text,
                F::Guid => post.guid = text,
                F::Description => post.description = text,
                F::ContentEncoded => post.content = text,
                F::ExcerptEncoded => post.excerpt = text,
                F::PostId => post.post_id = text.trim().parse().ok(),
                F::PostDate => post.post_date = text,
                F::PostDateGmt => post.post_date_gmt = text,
                F::CommentStatus => post.comment_status = text,
                F::PingStatus => post.ping_status = text,
                F::PostName => post.post_name = text,
                F::Status => post.status = text,
                F::PostParent => post.post_parent = parse_id(&text),
                F::MenuOrder => post.menu_order = text.trim().parse().unwrap_or(0),
                F::PostType => post.post_type = text,
                F::PostPassword => post.post_password = text,
                F::IsSticky => post.is_sticky = "1" == text.trim(),
                F::AttachmentUrl => post.attachment_url = text,
                F::ItemCategory => post.terms.push(PostTerm {
                    domain: self.pending_category_domain.take().unwrap_or_default(),
                    slug: self.pending_category_slug.take().unwrap_or_default(),
                    name: text,
                }),
                _ => {}
            },

            None => {}
        }

        Ok(())
    }
}

fn parse_id(text: &str) -> u64 {
    text.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_WXR: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        "\n",
        r#"<rss version="2.0""#,
        r#" xmlns:excerpt="http://wordpress.org/export/1.2/excerpt/""#,
        r#" xmlns:content="http://purl.org/rss/1.0/modules/content/""#,
        r#" xmlns:dc="http://purl.org/dc/elements/1.1/""#,
        r#" xmlns:wp="http://wordpress.org/export/1.2/">"#,
        r#"<channel>"#,
        r#"<title>Test Blog</title>"#,
        r#"<wp:wxr_version>1.2</wp:wxr_version>"#,
        r#"<wp:base_site_url>http://example.test</wp:base_site_url>"#,
        r#"<wp:base_blog_url>http://example.test</wp:base_blog_url>"#,
        r#"<wp:author><wp:author_id>2</wp:author_id>"#,
        r#"<wp:author_login><![CDATA[editor]]></wp:author_login>"#,
        r#"<wp:author_email><![CDATA[editor@example.test]]></wp:author_email>"#,
        r#"<wp:author_display_name><![CDATA[Ed Itor]]></wp:author_display_name>"#,
        r#"<wp:author_first_name><![CDATA[Ed]]></wp:author_first_name>"#,
        r#"<wp:author_last_name><![CDATA[Itor]]></wp:author_last_name></wp:author>"#,
        r#"<wp:category><wp:term_id>7</wp:term_id>"#,
        r#"<wp:category_nicename>news</wp:category_nicename>"#,
        r#"<wp:category_parent></wp:category_parent>"#,
        r#"<wp:cat_name><![CDATA[News]]></wp:cat_name>"#,
        r#"<wp:termmeta><wp:meta_key><![CDATA[color]]></wp:meta_key>"#,
        r#"<wp:meta_value><![CDATA[red]]></wp:meta_value></wp:termmeta>"#,
        r#"</wp:category>"#,
        r#"<wp:tag><wp:term_id>8</wp:term_id>"#,
        r#"<wp:tag_slug>tips</wp:tag_slug>"#,
        r#"<wp:tag_name><![CDATA[Tips]]></wp:tag_name></wp:tag>"#,
        r#"<item>"#,
        r#"<title>Hello world</title>"#,
        r#"<link>http://example.test/?p=10</link>"#,
        r#"<dc:creator><![CDATA[editor]]></dc:creator>"#,
        r#"<guid>http://example.test/?p=10</guid>"#,
        r#"<content:encoded><![CDATA[Welcome to ]]><![CDATA[the blog]]></content:encoded>"#,
        r#"<excerpt:encoded><![CDATA[]]></excerpt:encoded>"#,
        r#"<wp:post_id>10</wp:post_id>"#,
        r#"<wp:post_date>2024-01-02 03:04:05</wp:post_date>"#,
        r#"<wp:status>publish</wp:status>"#,
        r#"<wp:post_parent>0</wp:post_parent>"#,
        r#"<wp:post_type>post</wp:post_type>"#,
        r#"<wp:is_sticky>0</wp:is_sticky>"#,
        r#"<category domain="category" nicename="news"><![CDATA[News]]></category>"#,
        r#"<category domain="post_tag" nicename="tips"><![CDATA[Tips]]></category>"#,
        r#"<wp:postmeta><wp:meta_key>mood</wp:meta_key>"#,
        r#"<wp:meta_value><![CDATA[sunny]]></wp:meta_value></wp:postmeta>"#,
        r#"<wp:comment><wp:comment_id>31</wp:comment_id>"#,
        r#"<wp:comment_author><![CDATA[Visitor]]></wp:comment_author>"#,
        r#"<wp:comment_date>2024-01-03 00:00:00</wp:comment_date>"#,
        r#"<wp:comment_content><![CDATA[Nice post]]></wp:comment_content>"#,
        r#"<wp:comment_approved>1</wp:comment_approved>"#,
        r#"<wp:comment_parent>0</wp:comment_parent>"#,
        r#"<wp:commentmeta><wp:meta_key>rating</wp:meta_key>"#,
        r#"<wp:meta_value>5</wp:meta_value></wp:commentmeta>"#,
        r#"</wp:comment>"#,
        r#"</item>"#,
        r#"</channel>"#,
        r#"</rss>"#,
    );

    fn read_all(reader: &mut WxrReader) -> Vec<Entity> {
        let mut entities = Vec::new();
        while reader.next_entity() {
            entities.push(reader.get_entity().cloned().unwrap());
        }
        entities
    }

    #[test]
    fn reads_the_full_entity_stream_in_document_order() {
        let mut reader = WxrReader::from_string(SAMPLE_WXR);
        let entities = read_all(&mut reader);
        assert!(reader.get_last_error().is_none());
        assert_eq!(reader.get_wxr_version(), Some("1.2"));
        assert_eq!(reader.get_base_site_url(), Some("http://example.test"));

        let kinds: Vec<&str> = entities
            .iter()
            .map(|entity| match entity {
                Entity::SiteOption(_) => "site_option",
                Entity::Author(_) => "author",
                Entity::Category(_) => "category",
                Entity::Tag(_) => "tag",
                Entity::Term(_) => "term",
                Entity::Post(_) => "post",
                Entity::PostMeta(_) => "postmeta",
                Entity::Comment(_) => "comment",
                Entity::CommentMeta(_) => "commentmeta",
                Entity::TermMeta(_) => "termmeta",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "site_option",
                "site_option",
                "author",
                "category",
                "termmeta",
                "tag",
                "post",
                "postmeta",
                "comment",
                "commentmeta",
            ]
        );
    }

    #[test]
    fn author_fields_are_populated() {
        let mut reader = WxrReader::from_string(SAMPLE_WXR);
        let entities = read_all(&mut reader);
        let author = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::Author(author) => Some(author),
                _ => None,
            })
            .unwrap();

        assert_eq!(
            author,
            &Author {
                author_id: Some(2),
                author_login: "editor".to_string(),
                author_email: "editor@example.test".to_string(),
                author_display_name: "Ed Itor".to_string(),
                author_first_name: "Ed".to_string(),
                author_last_name: "Itor".to_string(),
            }
        );
    }

    #[test]
    fn category_and_termmeta_are_linked() {
        let mut reader = WxrReader::from_string(SAMPLE_WXR);
        let entities = read_all(&mut reader);

        let category = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::Category(category) => Some(category),
                _ => None,
            })
            .unwrap();
        assert_eq!(category.term_id, Some(7));
        assert_eq!(category.slug, "news");
        assert_eq!(category.name, "News");
        assert_eq!(category.parent, "");

        let meta = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::TermMeta(meta) => Some(meta),
                _ => None,
            })
            .unwrap();
        assert_eq!(meta.term_id, Some(7));
        assert_eq!(meta.key, "color");
        assert_eq!(meta.value, "red");
    }

    #[test]
    fn post_concatenates_adjacent_cdata_and_captures_terms() {
        let mut reader = WxrReader::from_string(SAMPLE_WXR);
        let entities = read_all(&mut reader);

        let post = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::Post(post) => Some(post),
                _ => None,
            })
            .unwrap();

        assert_eq!(post.post_id, Some(10));
        assert_eq!(post.title, "Hello world");
        assert_eq!(post.creator, "editor");
        assert_eq!(post.content, "Welcome to the blog");
        assert_eq!(post.status, "publish");
        assert_eq!(post.post_type, "post");
        assert!(!post.is_sticky);
        assert_eq!(
            post.terms,
            vec![
                PostTerm {
                    domain: "category".to_string(),
                    slug: "news".to_string(),
                    name: "News".to_string(),
                },
                PostTerm {
                    domain: "post_tag".to_string(),
                    slug: "tips".to_string(),
                    name: "Tips".to_string(),
                },
            ]
        );
    }

    #[test]
    fn children_carry_back_references() {
        let mut reader = WxrReader::from_string(SAMPLE_WXR);
        let entities = read_all(&mut reader);

        let meta = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::PostMeta(meta) => Some(meta),
                _ => None,
            })
            .unwrap();
        assert_eq!(meta.post_id, Some(10));
        assert_eq!(meta.key, "mood");
        assert_eq!(meta.value, "sunny");

        let comment = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::Comment(comment) => Some(comment),
                _ => None,
            })
            .unwrap();
        assert_eq!(comment.comment_id, 31);
        assert_eq!(comment.post_id, Some(10));
        assert_eq!(comment.author, "Visitor");

        let comment_meta = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::CommentMeta(meta) => Some(meta),
                _ => None,
            })
            .unwrap();
        assert_eq!(comment_meta.comment_id, 31);
        assert_eq!(comment_meta.key, "rating");
        assert_eq!(comment_meta.value, "5");
    }

    #[test]
    fn streaming_in_small_chunks_produces_the_same_entities() {
        let mut expected_reader = WxrReader::from_string(SAMPLE_WXR);
        let expected = read_all(&mut expected_reader);

        let bytes = SAMPLE_WXR.as_bytes();
        let mut reader = WxrReader::for_streaming(&bytes[..1]);
        let mut fed = 1;
        let mut entities = Vec::new();

        loop {
            if reader.next_entity() {
                entities.push(reader.get_entity().cloned().unwrap());
                continue;
            }
            if fed < bytes.len() {
                let next = (fed + 7).min(bytes.len());
                reader.append_bytes(&bytes[fed..next]);
                fed = next;
                continue;
            }
            if reader.is_paused_at_incomplete_input() {
                reader.input_finished();
                continue;
            }
            break;
        }

        assert!(reader.get_last_error().is_none());
        assert_eq!(entities, expected);
    }

    #[test]
    fn cursor_resume_continues_the_entity_stream() {
        let mut expected_reader = WxrReader::from_string(SAMPLE_WXR);
        let expected = read_all(&mut expected_reader);

        // Feed a prefix that ends mid-way through the channel, right
        // inside the category element.
        let split = SAMPLE_WXR.find("<wp:tag>").unwrap();
        let bytes = SAMPLE_WXR.as_bytes();

        let mut head = WxrReader::for_streaming(&bytes[..split]);
        let mut entities = Vec::new();
        while head.next_entity() {
            entities.push(head.get_entity().cloned().unwrap());
        }
        assert!(head.is_paused_at_incomplete_input());

        let cursor = head
            .get_reentrancy_cursor()
            .expect("between entities a cursor is available");

        let mut tail = WxrReader::create_for_streaming(&bytes[split..], &cursor).unwrap();
        tail.input_finished();
        while tail.next_entity() {
            entities.push(tail.get_entity().cloned().unwrap());
        }

        assert!(tail.get_last_error().is_none(), "{:?}", tail.get_last_error());
        assert_eq!(entities, expected);
    }

    #[test]
    fn missing_version_is_rejected_with_the_fixed_message() {
        let xml = r#"<rss><channel><item><title>No version</title></item></channel></rss>"#;
        let mut reader = WxrReader::from_string(xml);
        assert!(!reader.next_entity());
        assert_eq!(reader.get_last_error(), Some(&WxrError::InvalidWxrVersion));
        assert_eq!(
            reader.get_last_error().unwrap().to_string(),
            "This does not appear to be a WXR file, missing/invalid WXR version number"
        );
    }

    #[test]
    fn bad_version_value_is_rejected() {
        let xml = concat!(
            r#"<rss xmlns:wp="http://wordpress.org/export/1.2/"><channel>"#,
            r#"<wp:wxr_version>2.0</wp:wxr_version>"#,
            r#"</channel></rss>"#,
        );
        let mut reader = WxrReader::from_string(xml);
        assert!(!reader.next_entity());
        assert_eq!(reader.get_last_error(), Some(&WxrError::InvalidWxrVersion));
    }

    #[test]
    fn non_rss_root_is_rejected() {
        let mut reader = WxrReader::from_string("<html><body/></html>");
        assert!(!reader.next_entity());
        assert_eq!(reader.get_last_error(), Some(&WxrError::InvalidWxrVersion));
    }

    #[test]
    fn malformed_xml_is_reported_with_the_fixed_message() {
        let xml = r#"<rss><channel><wp:wxr_version>1.2</wp:version></channel>"#;
        let mut reader = WxrReader::from_string(xml);
        assert!(!reader.next_entity());
        assert_eq!(reader.get_last_error(), Some(&WxrError::MalformedXml));
        assert_eq!(
            reader.get_last_error().unwrap().to_string(),
            "There was an error when reading this WXR file"
        );
        assert!(reader.get_underlying_xml_error().is_some());
    }

    #[test]
    fn accepts_wxr_1_0_and_1_1_namespaces() {
        for version in ["1.0", "1.1"] {
            let xml = format!(
                concat!(
                    r#"<rss xmlns:wp="http://wordpress.org/export/{v}/"><channel>"#,
                    r#"<wp:wxr_version>{v}</wp:wxr_version>"#,
                    r#"<wp:author><wp:author_login>a</wp:author_login></wp:author>"#,
                    r#"</channel></rss>"#,
                ),
                v = version
            );
            let mut reader = WxrReader::from_string(xml);
            let entities = read_all(&mut reader);
            assert!(reader.get_last_error().is_none());
            assert_eq!(reader.get_wxr_version(), Some(version));
            assert_eq!(entities.len(), 1);
        }
    }

    #[test]
    fn unknown_elements_are_consumed_without_derailing() {
        let xml = concat!(
            r#"<rss xmlns:wp="http://wordpress.org/export/1.2/"><channel>"#,
            r#"<wp:wxr_version>1.2</wp:wxr_version>"#,
            r#"<generator>https://wordpress.org/?v=6.4</generator>"#,
            r#"<item><title>Post</title>"#,
            r#"<unknown><nested>deep</nested></unknown>"#,
            r#"<wp:post_id>1</wp:post_id>"#,
            r#"<wp:post_type>post</wp:post_type>"#,
            r#"</item>"#,
            r#"</channel></rss>"#,
        );
        let mut reader = WxrReader::from_string(xml);
        let entities = read_all(&mut reader);
        assert!(reader.get_last_error().is_none());

        let post = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::Post(post) => Some(post),
                _ => None,
            })
            .unwrap();
        assert_eq!(post.title, "Post");
        assert_eq!(post.post_id, Some(1));
    }

    #[test]
    fn empty_meta_value_elements_produce_empty_strings() {
        let xml = concat!(
            r#"<rss xmlns:wp="http://wordpress.org/export/1.2/"><channel>"#,
            r#"<wp:wxr_version>1.2</wp:wxr_version>"#,
            r#"<item><wp:post_id>1</wp:post_id><wp:post_type>post</wp:post_type>"#,
            r#"<wp:postmeta><wp:meta_key>empty</wp:meta_key><wp:meta_value/></wp:postmeta>"#,
            r#"</item></channel></rss>"#,
        );
        let mut reader = WxrReader::from_string(xml);
        let entities = read_all(&mut reader);
        assert!(reader.get_last_error().is_none());

        let meta = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::PostMeta(meta) => Some(meta),
                _ => None,
            })
            .unwrap();
        assert_eq!(meta.key, "empty");
        assert_eq!(meta.value, "");
    }
}
