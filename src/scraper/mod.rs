//! 网页抓取与文本提取
//!
//! fetch_page：GET 页面（跟随重定向、超时、固定 User-Agent）；
//! extract_visible_text：去掉 script/style/noscript/svg 后用 html2text（TrivialDecorator，纯文本无链接标记）提取可读文本，
//! 逐行去空白后以 " \n" 拼接；
//! extract_links：用 scraper 解析 a[href]，提取 http(s) 链接（相对地址按页面 URL 解析）。

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use ::scraper::{Html, Selector};
use html2text::from_read_with_decorator;
use html2text::render::TrivialDecorator;
use regex::Regex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "product-scraper-prototype/0.1 (+https://example.com)";

/// html2text 的换行宽度
const RENDER_WIDTH: usize = 120;

/// 页面中的一个链接
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLink {
    pub href: String,
    pub text: String,
}

/// 构建抓取用的 HTTP 客户端
pub fn build_client(timeout_secs: u64, user_agent: &str) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .unwrap_or_default()
}

/// 是否为 http/https 地址
pub fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// 获取页面原始 HTML；非 2xx 状态视为错误
pub async fn fetch_page(client: &Client, url: &str) -> Result<String, reqwest::Error> {
    tracing::debug!(url = %url, "fetching page");
    let resp = client.get(url).send().await?.error_for_status()?;
    let mut body = resp.text().await?;
    // 去除 BOM
    if body.starts_with('\u{FEFF}') {
        body = body['\u{FEFF}'.len_utf8()..].to_string();
    }
    Ok(body)
}

fn invisible_blocks() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        ["script", "style", "noscript", "svg"]
            .iter()
            .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).ok())
            .collect()
    })
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// html2text 失败时的回退：DOM 文本节点逐个输出（实体已解码）
fn dom_text(html: &str) -> String {
    Html::parse_document(html)
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join("\n")
}

/// 提取可见文本：每个非空行去首尾空白后以 " \n" 连接
pub fn extract_visible_text(html: &str) -> String {
    let mut cleaned = html.to_string();
    for re in invisible_blocks() {
        cleaned = re.replace_all(&cleaned, " ").into_owned();
    }

    let rendered =
        match from_read_with_decorator(cleaned.as_bytes(), RENDER_WIDTH, TrivialDecorator::new()) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => dom_text(&cleaned),
        };

    rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" \n")
}

/// 提取页面链接：去重、只保留 http(s)、最多 max 条（0 表示不限）
pub fn extract_links(html: &str, base: &Url, max: usize) -> Vec<PageLink> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&selector) {
        let raw_href = anchor.value().attr("href").unwrap_or("").trim();
        if raw_href.is_empty() || raw_href.starts_with('#') {
            continue;
        }
        let Ok(resolved) = base.join(raw_href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let href = resolved.to_string();
        if !seen.insert(href.clone()) {
            continue;
        }
        let text = collapse_whitespace(&anchor.text().collect::<String>());
        links.push(PageLink { href, text });
        if max > 0 && links.len() >= max {
            break;
        }
    }
    links
}
