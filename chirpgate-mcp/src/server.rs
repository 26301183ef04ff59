//! MCP server over newline-delimited stdio

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use libchirpgate::validation::{validate_post, validate_post_id, validate_search};
use libchirpgate::{Broker, ChirpgateError, PostRequest, SearchRequest};

use crate::jsonrpc::{
    json_rpc_error, json_rpc_response, tool_text_result, JsonRpcRequest, INVALID_PARAMS,
    METHOD_NOT_FOUND, NOT_INITIALIZED, PARSE_ERROR,
};
use crate::tools::{
    self, DeleteTweetArgs, PostTweetArgs, SearchTweetsArgs, DELETE_TWEET, POST_TWEET,
    SEARCH_TWEETS,
};

pub const MCP_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "chirpgate";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct McpServer {
    broker: Broker,
    initialized: bool,
}

impl McpServer {
    pub fn new(broker: Broker) -> Self {
        Self {
            broker,
            initialized: false,
        }
    }

    /// Serve requests until the reader reaches end of input
    ///
    /// Requests are handled one at a time, in arrival order.
    pub async fn serve<R, W>(&mut self, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => self.handle(request).await,
                Err(e) => {
                    warn!("Unparseable request: {}", e);
                    Some(json_rpc_error(None, PARSE_ERROR, &format!("Parse error: {}", e)))
                }
            };

            if let Some(response) = response {
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                writer.write_all(&out).await?;
                writer.flush().await?;
            }
        }

        info!("Input closed, shutting down");
        Ok(())
    }

    pub async fn handle(&mut self, request: JsonRpcRequest) -> Option<Value> {
        let method = request.method.as_str();
        debug!("Request: {}", method);

        if method == "initialize" {
            return Some(json_rpc_response(
                request.id,
                json!({
                    "protocolVersion": MCP_VERSION,
                    "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
                    "capabilities": { "tools": {} }
                }),
            ));
        }

        if method == "notifications/initialized" {
            self.initialized = true;
            return None;
        }

        if !self.initialized {
            if request.is_notification() {
                return None;
            }
            return Some(json_rpc_error(
                request.id,
                NOT_INITIALIZED,
                "Server not initialized",
            ));
        }

        match method {
            "ping" => Some(json_rpc_response(request.id, json!({}))),
            "tools/list" => Some(json_rpc_response(
                request.id,
                json!({ "tools": tools::tool_definitions() }),
            )),
            "tools/call" => {
                let Some(params) = request.params.as_ref().and_then(|p| p.as_object()) else {
                    return Some(json_rpc_error(
                        request.id,
                        INVALID_PARAMS,
                        "params must be an object",
                    ));
                };
                let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
                    return Some(json_rpc_error(
                        request.id,
                        INVALID_PARAMS,
                        "params.name must be a string",
                    ));
                };
                let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let result = self.call_tool(name, args).await;
                Some(json_rpc_response(request.id, result))
            }
            _ if request.is_notification() => None,
            _ => Some(json_rpc_error(
                request.id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", method),
            )),
        }
    }

    /// Run a tool and render its outcome as an MCP tool result
    pub async fn call_tool(&self, name: &str, args: Value) -> Value {
        let outcome = match name {
            POST_TWEET => self.post_tweet(args).await,
            SEARCH_TWEETS => self.search_tweets(args).await,
            DELETE_TWEET => self.delete_tweet(args).await,
            _ => return tool_text_result(&format!("Unknown tool: {}", name), true),
        };

        match outcome {
            Ok(text) => tool_text_result(&text, false),
            Err(e) => render_error(name, &e),
        }
    }

    async fn post_tweet(&self, args: Value) -> libchirpgate::Result<String> {
        let request = PostRequest::from(tools::parse_args::<PostTweetArgs>(POST_TWEET, args)?);
        validate_post(&request)?;

        let posted = self.broker.post(request).await?;
        pretty(&json!({
            "id": posted.id,
            "text": posted.text,
            "url": format!("https://x.com/i/status/{}", posted.id)
        }))
    }

    async fn search_tweets(&self, args: Value) -> libchirpgate::Result<String> {
        let request =
            SearchRequest::from(tools::parse_args::<SearchTweetsArgs>(SEARCH_TWEETS, args)?);
        validate_search(&request)?;

        let results = self.broker.search(request).await?;
        pretty(&tools::render_search(&results))
    }

    async fn delete_tweet(&self, args: Value) -> libchirpgate::Result<String> {
        let args = tools::parse_args::<DeleteTweetArgs>(DELETE_TWEET, args)?;
        validate_post_id(&args.tweet_id)?;

        let outcome = self.broker.delete(&args.tweet_id).await?;
        pretty(&outcome)
    }
}

fn pretty<T: serde::Serialize>(value: &T) -> libchirpgate::Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| ChirpgateError::Internal(e.to_string()))
}

/// Quota errors are a request to wait, not a failure
fn render_error(tool: &str, error: &ChirpgateError) -> Value {
    if error.is_quota() {
        info!("{} deferred: {}", tool, error);
        return tool_text_result(&format!("Please wait: {}", error), false);
    }

    warn!("{} failed: {}", tool, error);
    tool_text_result(
        &format!("Error [{}] (status {}): {}", error.code(), error.status(), error),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use libchirpgate::api::mock::MockTransport;
    use libchirpgate::api::Method;
    use libchirpgate::config::Config;
    use libchirpgate::credentials::MemoryStore;
    use libchirpgate::Session;
    use std::sync::Arc;

    fn server(mock: &MockTransport) -> McpServer {
        let mut config = Config::default();
        config.auth.oauth1.api_key = Some("key".to_string());
        config.auth.oauth1.api_secret = Some("secret".to_string());
        config.auth.oauth1.access_token = Some("token".to_string());
        config.auth.oauth1.access_token_secret = Some("token-secret".to_string());
        let session = Session::from_config(&config).unwrap();
        let broker = Broker::new(
            &config,
            session,
            Arc::new(mock.clone()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        McpServer::new(broker)
    }

    fn request(raw: Value) -> JsonRpcRequest {
        serde_json::from_value(raw).unwrap()
    }

    async fn initialized(mock: &MockTransport) -> McpServer {
        let mut server = server(mock);
        let none = server
            .handle(request(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
            .await;
        assert!(none.is_none());
        server
    }

    fn call(id: u64, name: &str, arguments: Value) -> JsonRpcRequest {
        request(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }))
    }

    #[tokio::test]
    async fn test_initialize() {
        let mock = MockTransport::new();
        let mut server = server(&mock);

        let response = server
            .handle(request(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})))
            .await
            .unwrap();

        assert_eq!(response["result"]["protocolVersion"], MCP_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], SERVER_NAME);
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_requests_before_initialized_are_rejected() {
        let mock = MockTransport::new();
        let mut server = server(&mock);

        let response = server
            .handle(request(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let mock = MockTransport::new();
        let mut server = initialized(&mock).await;

        let response = server
            .handle(request(json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"})))
            .await
            .unwrap();
        assert_eq!(response["result"]["tools"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let mock = MockTransport::new();
        let mut server = initialized(&mock).await;

        let response = server
            .handle(request(json!({"jsonrpc": "2.0", "id": 4, "method": "resources/subscribe"})))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_search_count_below_minimum_never_reaches_platform() {
        let mock = MockTransport::new();
        let mut server = initialized(&mock).await;

        let response = server
            .handle(call(5, SEARCH_TWEETS, json!({"query": "rust", "count": 5})))
            .await
            .unwrap();

        let result = &response["result"];
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("VALIDATION_ERROR"));
        assert!(text.contains("between 10 and 100"));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_post_then_rate_limited_post_is_not_an_error() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Post,
            "/2/tweets",
            201,
            r#"{"data":{"id":"77","text":"Hello world!"}}"#,
        );
        let mut server = initialized(&mock).await;

        let first = server
            .handle(call(6, POST_TWEET, json!({"text": "Hello world!"})))
            .await
            .unwrap();
        assert_eq!(first["result"]["isError"], false);
        let text = first["result"]["content"][0]["text"].as_str().unwrap();
        let posted: Value = serde_json::from_str(text).unwrap();
        assert_eq!(posted["id"], "77");

        let second = server
            .handle(call(7, POST_TWEET, json!({"text": "Again"})))
            .await
            .unwrap();
        assert_eq!(second["result"]["isError"], false);
        assert!(second["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Please wait: Rate limit: wait"));
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_platform_error_renders_code_and_status() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Delete,
            "/2/tweets/8",
            404,
            r#"{"title":"Not Found Error","detail":"Could not find tweet.","status":404}"#,
        );
        let mut server = initialized(&mock).await;

        let response = server
            .handle(call(8, DELETE_TWEET, json!({"tweet_id": "8"})))
            .await
            .unwrap();

        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Error [Not Found Error] (status 404)"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let mock = MockTransport::new();
        let mut server = initialized(&mock).await;

        let response = server.handle(call(9, "like_tweet", json!({}))).await.unwrap();
        assert_eq!(response["result"]["isError"], true);
    }

    #[tokio::test]
    async fn test_serve_over_line_stream() {
        let mock = MockTransport::new();
        let mut server = server(&mock);

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            "\n",
            "not json\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n"
        );
        let mut output = Vec::new();
        server
            .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["error"]["code"], PARSE_ERROR);
        assert_eq!(responses[2]["id"], 2);
        assert_eq!(responses[2]["result"], json!({}));
    }
}
