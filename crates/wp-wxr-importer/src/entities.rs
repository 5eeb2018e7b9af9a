//! Typed records produced by the WXR reader.
//!
//! Each record carries only the fields the WXR vocabulary defines for
//! it, plus a back-reference to its owning record where one exists.
//! Values stay as the strings found in the document; meta values in
//! particular may hold serialized payloads that must pass through
//! byte-for-byte.

use serde::{Deserialize, Serialize};

/// A site-wide setting found in the channel, such as the base site URL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteOption {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub author_id: Option<u64>,
    pub author_login: String,
    pub author_email: String,
    pub author_display_name: String,
    pub author_first_name: String,
    pub author_last_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub term_id: Option<u64>,
    pub slug: String,
    /// Slug of the parent category; empty at the top level.
    pub parent: String,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub term_id: Option<u64>,
    pub slug: String,
    pub name: String,
    pub description: String,
}

/// A term of an arbitrary taxonomy, exported as `wp:term`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub term_id: Option<u64>,
    pub taxonomy: String,
    pub slug: String,
    /// Slug of the parent term within the same taxonomy.
    pub parent: String,
    pub name: String,
    pub description: String,
}

/// A taxonomy assignment attached to an item:
/// `<category domain="post_tag" nicename="news">News</category>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTerm {
    pub domain: String,
    pub slug: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: Option<u64>,
    pub title: String,
    pub link: String,
    pub pub_date: String,
    /// Login of the author, from `dc:creator`.
    pub creator: String,
    pub guid: String,
    pub description: String,
    /// The full post body, from `content:encoded`.
    pub content: String,
    /// The excerpt, from `excerpt:encoded`.
    pub excerpt: String,
    pub post_date: String,
    pub post_date_gmt: String,
    pub comment_status: String,
    pub ping_status: String,
    pub post_name: String,
    pub status: String,
    pub post_parent: u64,
    pub menu_order: i64,
    pub post_type: String,
    pub post_password: String,
    pub is_sticky: bool,
    /// Source URL for attachment posts, from `wp:attachment_url`.
    pub attachment_url: String,
    pub terms: Vec<PostTerm>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMeta {
    /// Source ID of the owning post.
    pub post_id: Option<u64>,
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: u64,
    /// Source ID of the owning post.
    pub post_id: Option<u64>,
    pub author: String,
    pub author_email: String,
    pub author_url: String,
    pub author_ip: String,
    pub date: String,
    pub date_gmt: String,
    pub content: String,
    pub approved: String,
    pub comment_type: String,
    /// Source ID of the parent comment; 0 for top-level comments.
    pub parent: u64,
    pub user_id: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentMeta {
    /// Source ID of the owning comment.
    pub comment_id: u64,
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermMeta {
    /// Source ID of the owning term.
    pub term_id: Option<u64>,
    pub key: String,
    pub value: String,
}

/// One record from the document, emitted in document order. Child
/// records follow their parent: a `Post` is emitted before its
/// `PostMeta` and `Comment` records, a `Comment` before its
/// `CommentMeta`, a term before its `TermMeta`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    SiteOption(SiteOption),
    Author(Author),
    Category(Category),
    Tag(Tag),
    Term(Term),
    Post(Post),
    PostMeta(PostMeta),
    Comment(Comment),
    CommentMeta(CommentMeta),
    TermMeta(TermMeta),
}
