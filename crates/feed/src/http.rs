//! REST API feeds. One `ApiFeed` handles a single integration: it applies
//! the configured auth to every request, walks pagination until the feed is
//! exhausted, and paces requests with a token bucket.

use crate::{FeedError, RecordFeed};
use exponential_backoff::Backoff;
use governor::{Quota, RateLimiter};
use models::{ApiAuth, HttpApiConfig, Pagination, TestOutcome};
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct ApiFeed {
    cfg: HttpApiConfig,
    client: reqwest::Client,
    limiter: Option<DirectLimiter>,
    /// OAuth2 access token, fetched once per feed instance.
    token: tokio::sync::Mutex<Option<String>>,
    max_retries: u32,
}

impl ApiFeed {
    pub fn new(cfg: &HttpApiConfig, max_retries: u32) -> Result<Self, models::ConfigError> {
        cfg.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .map_err(|err| models::ConfigError::InvalidBaseUrl {
                url: cfg.base_url.clone(),
                detail: err.to_string(),
            })?;
        let limiter = cfg.rate_limit.map(|per_second| {
            let per_second = NonZeroU32::new(per_second.max(1)).expect("nonzero");
            RateLimiter::direct(Quota::per_second(per_second))
        });
        Ok(Self {
            cfg: cfg.clone(),
            client,
            limiter,
            token: tokio::sync::Mutex::new(None),
            max_retries,
        })
    }

    async fn bearer_token(&self) -> Result<Option<String>, FeedError> {
        let ApiAuth::OAuth2ClientCredentials {
            token_url,
            client_id,
            client_secret,
            scope,
        } = &self.cfg.auth
        else {
            return Ok(None);
        };
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(Some(token.clone()));
        }

        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id.clone()),
            ("client_secret", client_secret.clone()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope.clone()));
        }
        let response = self
            .client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !response.status().is_success() {
            return Err(FeedError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let body: Value = response.json().await.map_err(map_reqwest_err)?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FeedError::Auth("token endpoint response had no access_token".to_string())
            })?
            .to_string();
        *cached = Some(token.clone());
        Ok(Some(token))
    }

    async fn get_once(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<(Value, Option<String>), FeedError> {
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        request = match &self.cfg.auth {
            ApiAuth::None => request,
            ApiAuth::ApiKey { header, key } => request.header(header.as_str(), key.as_str()),
            ApiAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            ApiAuth::Bearer { token } => request.bearer_auth(token),
            ApiAuth::OAuth2ClientCredentials { .. } => {
                let token = self.bearer_token().await?.unwrap_or_default();
                request.bearer_auth(token)
            }
        };

        let response = request.send().await.map_err(map_reqwest_err)?;
        let status = response.status();
        if !status.is_success() {
            let err = match status.as_u16() {
                401 | 403 => FeedError::Auth(format!("{url} returned {status}")),
                404 => FeedError::NotFound(format!("{url} returned {status}")),
                408 | 429 | 500..=599 => {
                    FeedError::Unreachable(format!("{url} returned {status}"))
                }
                _ => FeedError::Protocol(format!("{url} returned {status}")),
            };
            return Err(err);
        }
        let link_next = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_link_next);
        let body: Value = response.json().await.map_err(map_reqwest_err)?;
        Ok((body, link_next))
    }

    /// GET with the configured rate limit and transient-failure retries.
    async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<(Value, Option<String>), FeedError> {
        let backoff = Backoff::new(
            self.max_retries,
            Duration::from_millis(500),
            Some(Duration::from_secs(30)),
        );
        let mut attempt = 0u32;
        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }
            match self.get_once(url, query).await {
                Ok(ok) => return Ok(ok),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    let Some(delay) = backoff.next(attempt) else {
                        return Err(err);
                    };
                    tracing::warn!(url, attempt, %err, "transient API failure, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.cfg.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn records_of(&self, body: &Value) -> Result<Vec<Value>, FeedError> {
        let projected = project(body, &self.cfg.data_path).ok_or_else(|| {
            FeedError::Protocol(format!(
                "dataPath {:?} selected nothing from the response",
                self.cfg.data_path
            ))
        })?;
        match projected {
            Value::Array(records) => Ok(records.clone()),
            other => Err(FeedError::Protocol(format!(
                "dataPath {:?} selected a {} rather than an array",
                self.cfg.data_path,
                type_name(other)
            ))),
        }
    }
}

#[async_trait::async_trait]
impl RecordFeed for ApiFeed {
    async fn test(&self) -> TestOutcome {
        let Some(endpoint) = self.cfg.endpoints.first() else {
            return TestOutcome {
                ok: false,
                message: "no endpoints configured".to_string(),
                sample_count: None,
            };
        };
        let url = self.endpoint_url(endpoint);
        let query = initial_query(&self.cfg.pagination);
        match self.get_json(&url, &query).await {
            Ok((body, _)) => match self.records_of(&body) {
                Ok(records) => TestOutcome {
                    ok: true,
                    message: format!("{url} responded with {} record(s)", records.len()),
                    sample_count: Some(records.len() as u64),
                },
                Err(err) => TestOutcome {
                    ok: false,
                    message: err.to_string(),
                    sample_count: None,
                },
            },
            Err(err) => TestOutcome {
                ok: false,
                message: err.to_string(),
                sample_count: None,
            },
        }
    }

    fn endpoints(&self) -> Vec<String> {
        self.cfg.endpoints.clone()
    }

    #[tracing::instrument(skip(self, on_page))]
    async fn fetch_records(
        &self,
        endpoint: &str,
        on_page: &mut (dyn FnMut(Vec<Value>) + Send),
    ) -> Result<u64, FeedError> {
        let base = self.endpoint_url(endpoint);
        let mut total = 0u64;
        let mut state = PageState::first(&self.cfg.pagination);

        loop {
            let (url, query) = state.request(&base, &self.cfg.pagination);
            let (body, link_next) = self.get_json(&url, &query).await?;
            let records = self.records_of(&body)?;
            let count = records.len();
            total += count as u64;
            if count > 0 {
                on_page(records);
            }
            tracing::debug!(endpoint, count, total, "fetched API page");

            match state.advance(&self.cfg.pagination, &body, link_next, count) {
                Some(next) => state = next,
                None => return Ok(total),
            }
        }
    }
}

/// Where we are in a paginated pull.
#[derive(Debug)]
enum PageState {
    Single,
    Page(u64),
    Offset(u64),
    Cursor(Option<String>),
    Link(Option<String>),
}

impl PageState {
    fn first(pagination: &Pagination) -> PageState {
        match pagination {
            Pagination::None => PageState::Single,
            Pagination::Page { .. } => PageState::Page(1),
            Pagination::Offset { .. } => PageState::Offset(0),
            Pagination::Cursor { .. } => PageState::Cursor(None),
            Pagination::LinkHeader => PageState::Link(None),
        }
    }

    fn request(&self, base: &str, pagination: &Pagination) -> (String, Vec<(String, String)>) {
        match (self, pagination) {
            (PageState::Page(page), Pagination::Page { param, .. }) => {
                (base.to_string(), vec![(param.clone(), page.to_string())])
            }
            (PageState::Offset(offset), Pagination::Offset {
                offset_param,
                limit_param,
                page_size,
            }) => (
                base.to_string(),
                vec![
                    (offset_param.clone(), offset.to_string()),
                    (limit_param.clone(), page_size.to_string()),
                ],
            ),
            (PageState::Cursor(Some(cursor)), Pagination::Cursor { cursor_param, .. }) => (
                base.to_string(),
                vec![(cursor_param.clone(), cursor.clone())],
            ),
            (PageState::Link(Some(url)), _) => (url.clone(), Vec::new()),
            _ => (base.to_string(), Vec::new()),
        }
    }

    /// The state for the next request, or None when the feed is exhausted.
    fn advance(
        &self,
        pagination: &Pagination,
        body: &Value,
        link_next: Option<String>,
        count: usize,
    ) -> Option<PageState> {
        match (self, pagination) {
            (PageState::Single, _) => None,
            (PageState::Page(page), Pagination::Page { page_size, .. }) => {
                if count == 0 || count < *page_size as usize {
                    None
                } else {
                    Some(PageState::Page(page + 1))
                }
            }
            (PageState::Offset(offset), Pagination::Offset { page_size, .. }) => {
                if count == 0 || count < *page_size as usize {
                    None
                } else {
                    Some(PageState::Offset(offset + *page_size as u64))
                }
            }
            (PageState::Cursor(_), Pagination::Cursor { cursor_path, .. }) => {
                let next = project(body, cursor_path)
                    .and_then(Value::as_str)
                    .filter(|c| !c.is_empty())
                    .map(|c| c.to_string());
                if count == 0 {
                    return None;
                }
                next.map(|cursor| PageState::Cursor(Some(cursor)))
            }
            (PageState::Link(_), _) => {
                if count == 0 {
                    return None;
                }
                link_next.map(|url| PageState::Link(Some(url)))
            }
            _ => None,
        }
    }
}

/// Follows a dot path into a JSON value. An empty path selects the value
/// itself.
fn project<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

/// Extracts the `rel="next"` target of an RFC 5988 Link header.
fn parse_link_next(header: &str) -> Option<String> {
    for part in header.split(',') {
        let part = part.trim();
        let Some((target, params)) = part.split_once(';') else {
            continue;
        };
        if params
            .split(';')
            .any(|p| p.trim().eq_ignore_ascii_case("rel=\"next\"") || p.trim().eq_ignore_ascii_case("rel=next"))
        {
            let target = target.trim();
            return Some(
                target
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
            );
        }
    }
    None
}

fn initial_query(pagination: &Pagination) -> Vec<(String, String)> {
    let (_, query) = PageState::first(pagination).request("", pagination);
    query
}

fn map_reqwest_err(err: reqwest::Error) -> FeedError {
    if err.is_timeout() {
        FeedError::Timeout(Duration::from_secs(0))
    } else if err.is_connect() {
        FeedError::Unreachable(err.to_string())
    } else {
        FeedError::Protocol(err.to_string())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn project_follows_dot_paths() {
        let body = json!({"data": {"items": [1, 2, 3]}, "next": null});
        assert_eq!(
            project(&body, "data.items"),
            Some(&json!([1, 2, 3]))
        );
        assert_eq!(project(&body, ""), Some(&body));
        assert_eq!(project(&body, "data.missing"), None);
    }

    #[test]
    fn link_header_next_is_extracted() {
        let header = r#"<https://api.test/parts?page=3>; rel="next", <https://api.test/parts?page=1>; rel="first""#;
        assert_eq!(
            parse_link_next(header),
            Some("https://api.test/parts?page=3".to_string())
        );
        assert_eq!(parse_link_next(r#"<https://x>; rel="prev""#), None);
    }

    #[test]
    fn page_state_walks_page_pagination() {
        let pagination = Pagination::Page {
            param: "page".to_string(),
            page_size: 2,
        };
        let state = PageState::first(&pagination);
        let (_, query) = state.request("https://api.test/parts", &pagination);
        assert_eq!(query, vec![("page".to_string(), "1".to_string())]);

        // A full page continues, a short page stops.
        let next = state
            .advance(&pagination, &json!([]), None, 2)
            .expect("should continue");
        assert!(matches!(next, PageState::Page(2)));
        assert!(next.advance(&pagination, &json!([]), None, 1).is_none());
    }

    #[test]
    fn page_state_walks_cursor_pagination() {
        let pagination = Pagination::Cursor {
            cursor_path: "meta.next".to_string(),
            cursor_param: "cursor".to_string(),
        };
        let state = PageState::first(&pagination);
        let body = json!({"meta": {"next": "abc123"}});
        let next = state
            .advance(&pagination, &body, None, 10)
            .expect("should continue");
        let (_, query) = next.request("https://api.test/parts", &pagination);
        assert_eq!(query, vec![("cursor".to_string(), "abc123".to_string())]);

        // A missing or empty cursor ends the walk.
        assert!(next
            .advance(&pagination, &json!({"meta": {}}), None, 10)
            .is_none());
    }

    #[tokio::test]
    async fn fetches_and_paginates_against_a_local_server() {
        use std::io::{Read, Write};

        // A tiny HTTP/1.1 responder: page 1 is full, page 2 is short.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().unwrap();
                let mut buf = [0u8; 2048];
                let n = socket.read(&mut buf).unwrap();
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let body = if request.contains("page=1") {
                    r#"{"data":[{"sku":"A1"},{"sku":"A2"}]}"#
                } else {
                    r#"{"data":[{"sku":"A3"}]}"#
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).unwrap();
            }
        });

        let cfg = HttpApiConfig {
            base_url: format!("http://{addr}"),
            auth: ApiAuth::None,
            endpoints: vec!["/parts".to_string()],
            data_path: "data".to_string(),
            pagination: Pagination::Page {
                param: "page".to_string(),
                page_size: 2,
            },
            rate_limit: None,
            timeout_secs: 5,
            field_mapping: Default::default(),
        };
        let feed = ApiFeed::new(&cfg, 0).unwrap();

        let mut fetched = Vec::new();
        let total = feed
            .fetch_records("/parts", &mut |page| fetched.extend(page))
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(
            fetched,
            vec![
                json!({"sku": "A1"}),
                json!({"sku": "A2"}),
                json!({"sku": "A3"})
            ]
        );
        server.join().unwrap();
    }
}
