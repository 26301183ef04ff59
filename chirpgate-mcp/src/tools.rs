//! Tool definitions and argument parsing

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use libchirpgate::media::{MediaItem, MediaKind};
use libchirpgate::validation::{MAX_MEDIA_ITEMS, MAX_POST_CHARS, MAX_SEARCH_COUNT, MIN_SEARCH_COUNT};
use libchirpgate::{ChirpgateError, PostRequest, Result, SearchRequest, SearchResults};

pub const POST_TWEET: &str = "post_tweet";
pub const SEARCH_TWEETS: &str = "search_tweets";
pub const DELETE_TWEET: &str = "delete_tweet";

#[derive(Debug, Deserialize)]
pub struct PostTweetArgs {
    pub text: String,
    #[serde(default, alias = "reply_to_id")]
    pub reply_to_tweet_id: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl From<PostTweetArgs> for PostRequest {
    fn from(args: PostTweetArgs) -> Self {
        PostRequest {
            text: args.text,
            reply_to: args.reply_to_tweet_id.filter(|id| !id.trim().is_empty()),
            media: args.media,
        }
    }
}

fn default_count() -> u32 {
    MIN_SEARCH_COUNT
}

#[derive(Debug, Deserialize)]
pub struct SearchTweetsArgs {
    pub query: String,
    #[serde(default = "default_count")]
    pub count: u32,
}

impl From<SearchTweetsArgs> for SearchRequest {
    fn from(args: SearchTweetsArgs) -> Self {
        SearchRequest {
            query: args.query,
            max_results: args.count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteTweetArgs {
    #[serde(alias = "id")]
    pub tweet_id: String,
}

/// Deserialize tool arguments, reporting problems as validation errors
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| {
        ChirpgateError::Validation(format!("invalid arguments for {}: {}", tool, e))
    })
}

pub fn tool_definitions() -> Value {
    let media_types: Vec<&str> = MediaKind::ALL.iter().map(|k| k.as_str()).collect();

    json!([
        {
            "name": POST_TWEET,
            "description": "Post a tweet, optionally as a reply and with up to four images",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "Tweet text",
                        "minLength": 1,
                        "maxLength": MAX_POST_CHARS
                    },
                    "reply_to_tweet_id": {
                        "type": "string",
                        "description": "ID of the tweet to reply to"
                    },
                    "media": {
                        "type": "array",
                        "maxItems": MAX_MEDIA_ITEMS,
                        "items": {
                            "type": "object",
                            "properties": {
                                "data": {
                                    "type": "string",
                                    "description": "Base64-encoded image (max 5 MB decoded)"
                                },
                                "media_type": {
                                    "type": "string",
                                    "enum": media_types
                                }
                            },
                            "required": ["data", "media_type"]
                        }
                    }
                },
                "required": ["text"]
            }
        },
        {
            "name": SEARCH_TWEETS,
            "description": "Search tweets from the last seven days",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "count": {
                        "type": "integer",
                        "description": "Number of tweets to return",
                        "minimum": MIN_SEARCH_COUNT,
                        "maximum": MAX_SEARCH_COUNT
                    }
                },
                "required": ["query", "count"]
            }
        },
        {
            "name": DELETE_TWEET,
            "description": "Delete a tweet by ID",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tweet_id": {
                        "type": "string",
                        "description": "ID of the tweet to delete"
                    }
                },
                "required": ["tweet_id"]
            }
        }
    ])
}

/// Search results with each post's author inlined
pub fn render_search(results: &SearchResults) -> Value {
    let tweets: Vec<Value> = results
        .posts
        .iter()
        .map(|post| {
            json!({
                "id": post.id,
                "text": post.text,
                "created_at": post.created_at,
                "author": results.author_of(post).map(|a| json!({
                    "id": a.id,
                    "username": a.username,
                    "name": a.name,
                    "followers_count": a.followers_count
                })),
                "metrics": post.metrics
            })
        })
        .collect();

    json!({ "count": tweets.len(), "tweets": tweets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use libchirpgate::{Author, PostDetails};

    #[test]
    fn test_tool_definitions_names() {
        let tools = tool_definitions();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec![POST_TWEET, SEARCH_TWEETS, DELETE_TWEET]);
        assert_eq!(
            tools[0]["inputSchema"]["properties"]["media"]["items"]["properties"]["media_type"]
                ["enum"],
            json!(["image/jpeg", "image/png", "image/gif"])
        );
    }

    #[test]
    fn test_post_args_accept_reply_alias() {
        let args: PostTweetArgs = parse_args(
            POST_TWEET,
            json!({"text": "hi", "reply_to_id": "123"}),
        )
        .unwrap();
        let request = PostRequest::from(args);
        assert_eq!(request.reply_to.as_deref(), Some("123"));
        assert!(request.media.is_empty());
    }

    #[test]
    fn test_unknown_media_type_is_validation_error() {
        let result: Result<PostTweetArgs> = parse_args(
            POST_TWEET,
            json!({"text": "hi", "media": [{"data": "AAAA", "media_type": "image/webp"}]}),
        );
        assert_eq!(result.unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_missing_query_is_validation_error() {
        let result: Result<SearchTweetsArgs> = parse_args(SEARCH_TWEETS, json!({"count": 10}));
        assert!(result.unwrap_err().to_string().contains("query"));
    }

    #[test]
    fn test_delete_args_accept_id_alias() {
        let args: DeleteTweetArgs = parse_args(DELETE_TWEET, json!({"id": "9"})).unwrap();
        assert_eq!(args.tweet_id, "9");
    }

    #[test]
    fn test_render_search_inlines_author() {
        let results = SearchResults {
            posts: vec![PostDetails {
                id: "1".to_string(),
                text: "hello".to_string(),
                author_id: "10".to_string(),
                ..Default::default()
            }],
            authors: vec![Author {
                id: "10".to_string(),
                username: "ferris".to_string(),
                ..Default::default()
            }],
        };
        let rendered = render_search(&results);
        assert_eq!(rendered["count"], 1);
        assert_eq!(rendered["tweets"][0]["author"]["username"], "ferris");
        assert_eq!(rendered["tweets"][0]["metrics"]["like_count"], 0);
    }
}
