//! fetch_page_text 工具：抓取 URL 并提取可见文本与链接
//!
//! 参数只接受 {"url": "..."}；非 http/https 地址在发起网络请求前即以参数错误拒绝。
//! 成功返回 {success, url, text, length, links}；网络或 HTTP 状态失败作为工具执行错误上报。
//! 文本超过 max_text_chars 时截断并追加 ...[truncated]（length 仍为截断前长度）。

use async_trait::async_trait;
use reqwest::{Client, Url};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::FetchSection;
use crate::core::ToolError;
use crate::scraper::{build_client, extract_links, extract_visible_text, fetch_page, is_http_url};
use crate::tools::schema::json_schema_for;
use crate::tools::{parse_args, Tool};

pub const FETCH_PAGE_TEXT: &str = "fetch_page_text";

/// fetch_page_text 的参数
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FetchPageArgs {
    /// The full URL to fetch (must start with http:// or https://)
    pub url: String,
}

/// 抓取工具：超时、User-Agent、文本与链接数量上限由配置决定
pub struct FetchPageTool {
    client: Client,
    max_text_chars: usize,
    max_links: usize,
}

impl FetchPageTool {
    pub fn new(timeout_secs: u64, user_agent: &str, max_text_chars: usize, max_links: usize) -> Self {
        Self {
            client: build_client(timeout_secs, user_agent),
            max_text_chars,
            max_links,
        }
    }

    pub fn from_config(cfg: &FetchSection) -> Self {
        Self::new(
            cfg.timeout_secs,
            &cfg.user_agent,
            cfg.max_text_chars,
            cfg.max_links,
        )
    }

    async fn fetch(&self, url: &str) -> Result<Value, ToolError> {
        if !is_http_url(url) {
            return Err(ToolError::InvalidArguments(format!("Invalid URL: {}", url)));
        }
        let base = Url::parse(url)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid URL: {}: {}", url, e)))?;

        let html = fetch_page(&self.client, url)
            .await
            .map_err(|e| ToolError::Execution(format!("Failed to fetch URL: {}", e)))?;

        let text = extract_visible_text(&html);
        let length = text.chars().count();
        let text = if self.max_text_chars > 0 && length > self.max_text_chars {
            text.chars().take(self.max_text_chars).collect::<String>() + "\n...[truncated]"
        } else {
            text
        };
        let links = extract_links(&html, &base, self.max_links);

        Ok(json!({
            "success": true,
            "url": url,
            "text": text,
            "length": length,
            "links": links,
        }))
    }
}

#[async_trait]
impl Tool for FetchPageTool {
    fn name(&self) -> &str {
        FETCH_PAGE_TEXT
    }

    fn description(&self) -> &str {
        "Fetch a URL and extract its visible text content. Use this when you need to get \
         content from a webpage to complete product analysis tasks. Returns the extracted \
         text that can be analyzed for product information, plus the links found on the page."
    }

    fn input_schema(&self) -> Value {
        json_schema_for::<FetchPageArgs>()
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let args: FetchPageArgs = parse_args(args)?;
        let url = args.url.trim();
        tracing::info!(url = %url, "fetch_page_text");
        self.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn tool() -> FetchPageTool {
        FetchPageTool::new(5, "scout-test", 0, 10)
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let err = tool()
            .invoke(json!({"url": "ftp://example.com/file"}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidArguments("Invalid URL: ftp://example.com/file".to_string())
        );

        let err = tool().invoke(json!({"url": "example.com"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_rejects_unknown_fields() {
        let err = tool()
            .invoke(json!({"url": "https://a.test", "depth": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_schema_requires_url() {
        let schema = tool().input_schema();
        assert_eq!(schema["required"], json!(["url"]));
        assert_eq!(schema["additionalProperties"], false);
    }

    #[tokio::test]
    async fn test_fetches_text_and_links() {
        let server = MockServer::start().await;
        let html = r#"<html><body>
            <h1>Widget Pro</h1>
            <script>ignored()</script>
            <p>Founded in 2015 in Berlin.</p>
            <a href="/about">About us</a>
        </body></html>"#;
        Mock::given(method("GET"))
            .and(path("/product"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(html),
            )
            .mount(&server)
            .await;

        let url = format!("{}/product", server.uri());
        let out = tool().invoke(json!({ "url": url })).await.unwrap();

        assert_eq!(out["success"], true);
        assert_eq!(out["url"], url.as_str());
        let text = out["text"].as_str().unwrap();
        assert!(text.contains("Widget Pro"));
        assert!(text.contains("Founded in 2015"));
        assert!(!text.contains("ignored"));
        assert_eq!(out["length"], text.chars().count());
        assert_eq!(out["links"][0]["href"], format!("{}/about", server.uri()));
        assert_eq!(out["links"][0]["text"], "About us");
    }

    #[tokio::test]
    async fn test_http_error_is_execution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = tool()
            .invoke(json!({ "url": format!("{}/missing", server.uri()) }))
            .await
            .unwrap_err();
        match err {
            ToolError::Execution(msg) => assert!(msg.starts_with("Failed to fetch URL")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncates_long_text() {
        let server = MockServer::start().await;
        let body = format!("<p>{}</p>", "x".repeat(500));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let out = FetchPageTool::new(5, "scout-test", 100, 10)
            .invoke(json!({ "url": server.uri() }))
            .await
            .unwrap();
        let text = out["text"].as_str().unwrap();
        assert!(text.ends_with("...[truncated]"));
        assert!(out["length"].as_u64().unwrap() > 100);
    }
}
