//! Core types for Chirpgate

use serde::{Deserialize, Serialize};

use crate::media::MediaItem;

/// A post to publish
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostRequest {
    pub text: String,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl PostRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A post as confirmed by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedItem {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub like_count: u64,
    pub retweet_count: u64,
    pub reply_count: u64,
    pub quote_count: u64,
}

/// A post with engagement metrics, as returned by lookup and search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDetails {
    pub id: String,
    pub text: String,
    /// Empty when the platform omitted it
    pub author_id: String,
    /// RFC 3339 timestamp, empty when the platform omitted it
    pub created_at: String,
    pub metrics: PostMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub name: String,
    pub followers_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: u32,
}

/// Posts matching a search, with the authors the platform expanded
///
/// `authors` is not index-aligned with `posts`; join on `author_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    pub posts: Vec<PostDetails>,
    pub authors: Vec<Author>,
}

impl SearchResults {
    pub fn author_of(&self, post: &PostDetails) -> Option<&Author> {
        self.authors.iter().find(|a| a.id == post.author_id)
    }
}

/// Which endpoint performed a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteRoute {
    Modern,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub id: String,
    pub deleted: bool,
    pub route: DeleteRoute,
}
