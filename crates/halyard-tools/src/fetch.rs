use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FetchConfig;
use crate::executor::{
    BoxFuture, ConfirmationQuery, Icon, Tool, ToolDeclaration, ToolError, ToolErrorKind, ToolEvent,
    ToolEventTx, ToolInvocation, ToolResult, deserialize_params, parameters_schema,
    truncate_tool_output,
};

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'`()\[\]{}]+"#).unwrap());

const MAX_URLS: usize = 20;
const MAX_REDIRECTS: usize = 3;

#[derive(Debug, Deserialize, JsonSchema)]
struct WebFetchParams {
    /// Prompt containing up to 20 http(s) URLs and instructions for what to
    /// do with their content.
    prompt: String,
}

/// Fetches the URLs mentioned in a prompt and returns their text content.
#[derive(Debug)]
pub struct WebFetchTool {
    declaration: ToolDeclaration,
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl WebFetchTool {
    #[must_use]
    pub fn new(config: &FetchConfig) -> Self {
        let redirect = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            if validate_url(attempt.url().as_str()).is_err() {
                return attempt.error("redirect to a blocked host");
            }
            attempt.follow()
        });
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .redirect(redirect)
            .build()
            .unwrap_or_default();

        Self {
            declaration: ToolDeclaration {
                name: "web_fetch".to_owned(),
                display_name: "WebFetch".to_owned(),
                description: "Fetches the http(s) URLs embedded in the prompt and returns \
                              their content as plain text. Local and private network \
                              addresses are not reachable."
                    .to_owned(),
                icon: Icon::Globe,
                parameters: parameters_schema::<WebFetchParams>(),
                is_output_markdown: true,
                can_update_output: false,
            },
            client,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

impl Tool for WebFetchTool {
    fn declaration(&self) -> &ToolDeclaration {
        &self.declaration
    }

    fn build(&self, params: serde_json::Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let params: WebFetchParams = deserialize_params(params)?;
        let urls = extract_urls(&params.prompt);
        if urls.is_empty() {
            return Err(ToolError::InvalidParams {
                message: "prompt must contain at least one URL starting with http:// or https://"
                    .to_owned(),
            });
        }
        if urls.len() > MAX_URLS {
            return Err(ToolError::InvalidParams {
                message: format!("prompt contains {} URLs, at most {MAX_URLS} allowed", urls.len()),
            });
        }
        for url in &urls {
            validate_url(url)?;
        }
        Ok(Box::new(WebFetchInvocation {
            prompt: params.prompt,
            urls,
            client: self.client.clone(),
            max_body_bytes: self.max_body_bytes,
        }))
    }
}

#[derive(Debug)]
struct WebFetchInvocation {
    prompt: String,
    urls: Vec<String>,
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl WebFetchInvocation {
    async fn run(&self, cancel: &CancellationToken) -> ToolResult {
        let mut sections = Vec::with_capacity(self.urls.len());
        let mut fetched = 0usize;
        for url in &self.urls {
            let outcome = tokio::select! {
                () = cancel.cancelled() => return ToolResult::from_error(&ToolError::Cancelled),
                r = fetch_text(&self.client, url, self.max_body_bytes) => r,
            };
            match outcome {
                Ok(text) => {
                    fetched += 1;
                    sections.push(format!("Content from {url}:\n{text}"));
                }
                Err(e) => {
                    tracing::warn!(url, error = %e, "web fetch failed");
                    sections.push(format!("Failed to fetch {url}: {e}"));
                }
            }
        }

        let body = sections.join("\n\n");
        if fetched == 0 {
            return ToolResult::failure(ToolErrorKind::Execution, body);
        }
        ToolResult::success(
            truncate_tool_output(&body),
            format!("Fetched {fetched} of {} URL(s)", self.urls.len()),
        )
    }
}

impl ToolInvocation for WebFetchInvocation {
    fn tool_name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> String {
        let prompt: String = self.prompt.chars().take(100).collect();
        if prompt.len() < self.prompt.len() {
            format!("Processing URLs from: \"{prompt}...\"")
        } else {
            format!("Processing URLs from: \"{prompt}\"")
        }
    }

    fn confirmation_query<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ConfirmationQuery, ToolError>> {
        Box::pin(std::future::ready(Ok(ConfirmationQuery::Info {
            prompt: self.prompt.clone(),
            urls: self.urls.clone(),
        })))
    }

    fn execute(
        &self,
        cancel: CancellationToken,
        events: Option<ToolEventTx>,
    ) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            let result = self.run(&cancel).await;
            if let Some(tx) = &events {
                let _ = tx.send(ToolEvent::Completed {
                    tool_name: self.tool_name().to_owned(),
                    success: !result.is_error(),
                });
            }
            result
        })
    }
}

/// URLs in order of appearance, trailing sentence punctuation removed,
/// duplicates dropped.
fn extract_urls(prompt: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for m in URL_RE.find_iter(prompt) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_owned());
        }
    }
    urls
}

/// Reject malformed URLs, schemes other than http(s), and hosts on
/// loopback, private or link-local networks.
fn validate_url(raw: &str) -> Result<(), ToolError> {
    let parsed = Url::parse(raw).map_err(|_| ToolError::InvalidParams {
        message: format!("invalid URL: {raw}"),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ToolError::InvalidParams {
            message: format!("scheme not allowed: {}", parsed.scheme()),
        });
    }

    if let Some(host) = parsed.host()
        && is_private_host(&host)
    {
        return Err(ToolError::PermissionDenied {
            reason: format!(
                "private/local host blocked: {}",
                parsed.host_str().unwrap_or("")
            ),
            hard: true,
        });
    }

    Ok(())
}

fn is_private_v4(v4: std::net::Ipv4Addr) -> bool {
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
}

fn is_private_host(host: &url::Host<&str>) -> bool {
    match host {
        url::Host::Domain(d) => {
            let d = d.to_ascii_lowercase();
            d == "localhost" || d.ends_with(".localhost")
        }
        url::Host::Ipv4(v4) => is_private_v4(*v4),
        url::Host::Ipv6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            let seg = v6.segments();
            // fe80::/10 link-local
            if seg[0] & 0xffc0 == 0xfe80 {
                return true;
            }
            // fc00::/7 unique local
            if seg[0] & 0xfe00 == 0xfc00 {
                return true;
            }
            v6.to_ipv4_mapped().is_some_and(is_private_v4)
        }
    }
}

/// Download `url` and reduce it to text. HTML is parsed and its visible
/// text extracted; other content types are returned as-is.
async fn fetch_text(
    client: &reqwest::Client,
    url: &str,
    max_body_bytes: usize,
) -> Result<String, ToolError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| ToolError::Execution(std::io::Error::other(e.to_string())))?;

    if !resp.status().is_success() {
        return Err(ToolError::Execution(std::io::Error::other(format!(
            "HTTP {}",
            resp.status(),
        ))));
    }

    let is_html = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html") || ct.contains("xhtml"));

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ToolError::Execution(std::io::Error::other(e.to_string())))?;

    if bytes.len() > max_body_bytes {
        return Err(ToolError::Execution(std::io::Error::other(format!(
            "response too large: {} bytes (max: {max_body_bytes})",
            bytes.len(),
        ))));
    }

    let body = String::from_utf8_lossy(&bytes).into_owned();
    if !is_html {
        return Ok(body);
    }
    tokio::task::spawn_blocking(move || html_to_text(&body))
        .await
        .map_err(|e| ToolError::Execution(std::io::Error::other(e.to_string())))
}

fn html_to_text(html: &str) -> String {
    let soup = scrape_core::Soup::parse(html);
    let text = soup
        .find_all("body")
        .ok()
        .and_then(|tags| tags.into_iter().next())
        .map(|body| body.text())
        .unwrap_or_default();
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn tool() -> WebFetchTool {
        WebFetchTool::new(&FetchConfig::default())
    }

    #[test]
    fn extracts_urls_in_order_without_duplicates() {
        let urls = extract_urls(
            "Summarize https://example.com/a. Then compare with (http://example.org/b) \
             and https://example.com/a again",
        );
        assert_eq!(urls, vec!["https://example.com/a", "http://example.org/b"]);
    }

    #[test]
    fn validate_url_accepts_public_http_and_https() {
        assert!(validate_url("https://example.com/page").is_ok());
        assert!(validate_url("http://example.com").is_ok());
    }

    #[test]
    fn validate_url_rejects_other_schemes() {
        let err = validate_url("ftp://example.com/file").unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }));
    }

    #[test]
    fn validate_url_blocks_private_hosts() {
        for url in [
            "http://localhost:8080",
            "http://127.0.0.1/",
            "http://10.0.0.5/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://api.localhost/",
        ] {
            let err = validate_url(url).unwrap_err();
            assert!(err.is_hard_denial(), "{url} should be blocked");
        }
    }

    #[test]
    fn build_requires_a_url() {
        let err = tool().build(json!({"prompt": "no links here"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }));
    }

    #[test]
    fn build_rejects_private_url() {
        let err = tool()
            .build(json!({"prompt": "read http://127.0.0.1:9000/secret"}))
            .unwrap_err();
        assert!(err.is_hard_denial());
    }

    #[tokio::test]
    async fn confirmation_query_lists_urls() {
        let inv = tool()
            .build(json!({"prompt": "summarize https://example.com/docs"}))
            .unwrap();
        let query = inv
            .confirmation_query(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            query,
            ConfirmationQuery::Info {
                prompt: "summarize https://example.com/docs".into(),
                urls: vec!["https://example.com/docs".into()],
            }
        );
    }

    #[test]
    fn html_reduced_to_visible_text() {
        let text = html_to_text(
            "<html><head><title>t</title></head>\
             <body><h1>Title</h1>\n<p>Hello world</p></body></html>",
        );
        assert!(text.contains("Title"));
        assert!(text.contains("Hello world"));
    }

    #[tokio::test]
    async fn fetch_text_converts_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html><body><h1>Docs</h1><p>Install it.</p></body></html>"),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let text = fetch_text(&client, &format!("{}/page", server.uri()), 1024)
            .await
            .unwrap();
        assert!(text.contains("Docs"));
        assert!(text.contains("Install it."));
        assert!(!text.contains("<h1>"));
    }

    #[tokio::test]
    async fn fetch_text_passes_plain_text_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string("<not html>"),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let text = fetch_text(&client, &format!("{}/raw", server.uri()), 1024)
            .await
            .unwrap();
        assert_eq!(text, "<not html>");
    }

    #[tokio::test]
    async fn fetch_text_rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_text(&client, &server.uri(), 10).await.unwrap_err();
        assert!(err.to_string().contains("response too large"));
    }

    #[tokio::test]
    async fn fetch_text_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_text(&client, &server.uri(), 1024).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
