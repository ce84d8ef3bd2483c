use std::time::Instant;

use recrawl_core::{ErrorKind, FetchConfig, FetchResult, FetchStatus};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};

use crate::extract::Extractor;

const STANDARD_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Disposition of one fetch attempt, carrying the signals the caller needs
/// beyond the stored [`FetchResult`]: whether this failure should mark the
/// domain dead, whether it was a timeout (which must never mark the domain
/// dead — the server may just be slow), and the closed-taxonomy reason to
/// use when recording a [`recrawl_core::FailedUrl`] row.
pub struct FetchOutcome {
    pub result: FetchResult,
    pub mark_domain_dead: bool,
    pub timed_out: bool,
    /// `None` for a successful (`Done`) outcome; always `Some` for `Failed`.
    pub error_kind: Option<ErrorKind>,
}

/// Which phase of the request a transport error surfaced in — connect-time
/// failures (dial, DNS, TLS handshake) are distinguished from body-read
/// failures because the dead-set rule only fires on connect-time
/// refusal/reset, not on a reset partway through reading a response that
/// did, briefly, connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorPhase {
    Connect,
    Body,
}

/// Classify a transport-level failure into the closed error taxonomy,
/// along with whether it should mark the domain dead and whether it was a
/// timeout. Shared by every failure path in this module so the
/// refused/reset/no-route/no-such-host dead-marking rule lives in exactly
/// one place.
fn classify_fetch_error(err: &reqwest::Error, phase: ErrorPhase) -> (ErrorKind, bool, bool) {
    if err.is_timeout() {
        return (ErrorKind::HttpTimeout, false, true);
    }

    let message = format!("{err:?}").to_ascii_lowercase();
    let refused = message.contains("connection refused") || message.contains("connectionrefused");
    let reset = message.contains("connection reset") || message.contains("connectionreset");
    let no_route = message.contains("no route to host");
    let no_such_host = message.contains("no such host")
        || message.contains("nodename nor servname")
        || message.contains("failed to lookup address");

    match phase {
        // Dial-time failure: refused/reset/no-route/no-such-host are all
        // definitive for the dead-set rule.
        ErrorPhase::Connect => {
            if no_such_host {
                (ErrorKind::HttpDnsError, true, false)
            } else if refused || reset || no_route {
                (ErrorKind::HttpRefused, true, false)
            } else {
                (ErrorKind::HttpError, false, false)
            }
        }
        // A reset while already reading a response body means the host was
        // briefly reachable; treated as a non-fatal, retryable-on-a-later-
        // run failure rather than proof the domain is dead.
        ErrorPhase::Body => {
            if reset {
                (ErrorKind::HttpReset, false, false)
            } else {
                (ErrorKind::HttpError, false, false)
            }
        }
    }
}

fn error_phase(err: &reqwest::Error) -> ErrorPhase {
    if err.is_connect() {
        ErrorPhase::Connect
    } else {
        ErrorPhase::Body
    }
}

/// Fetch a single URL. Builds the request with the configured user agent
/// (set on the client) and a standard `Accept` header, follows at most one
/// redirect manually (the client itself is configured with no automatic
/// redirect following), and applies the `StatusOnly` shortcut when
/// configured.
pub async fn fetch_one(
    client: &Client,
    url: &str,
    domain: &str,
    config: &FetchConfig,
    extractor: &dyn Extractor,
) -> FetchOutcome {
    let start = Instant::now();
    let method = if config.head_only {
        reqwest::Method::HEAD
    } else {
        reqwest::Method::GET
    };

    let first = client
        .request(method.clone(), url)
        .header(ACCEPT, STANDARD_ACCEPT)
        .send()
        .await;

    let response = match first {
        Ok(resp) if resp.status().is_redirection() => {
            match follow_one_redirect(client, &method, url, &resp).await {
                Ok(Some(second)) => second,
                Ok(None) => resp,
                Err(outcome) => return finish(domain, url, start, outcome),
            }
        }
        Ok(resp) => resp,
        Err(err) => {
            let fetch_time_ms = start.elapsed().as_millis() as u64;
            let (kind, mark_domain_dead, timed_out) =
                classify_fetch_error(&err, error_phase(&err));
            return FetchOutcome {
                mark_domain_dead,
                timed_out,
                error_kind: Some(kind),
                result: FetchResult {
                    url: url.to_string(),
                    domain: domain.to_string(),
                    status_code: None,
                    content_type: None,
                    content_length: None,
                    title: None,
                    description: None,
                    language: None,
                    body: None,
                    redirect_url: None,
                    fetch_time_ms,
                    crawled_at: chrono::Utc::now(),
                    error: Some(err.to_string()),
                    status: FetchStatus::Failed,
                },
            };
        }
    };

    let redirect_url = response.url().as_str();
    let redirect_url = if redirect_url != url {
        Some(redirect_url.to_string())
    } else {
        None
    };
    let status_code = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_length_header = response.content_length();

    if config.status_only {
        let fetch_time_ms = start.elapsed().as_millis() as u64;
        let status = status_for(status_code);
        return FetchOutcome {
            mark_domain_dead: false,
            timed_out: false,
            error_kind: (status == FetchStatus::Failed).then_some(ErrorKind::HttpError),
            result: FetchResult {
                url: url.to_string(),
                domain: domain.to_string(),
                status_code: Some(status_code.as_u16()),
                content_type,
                content_length: content_length_header,
                title: None,
                description: None,
                language: None,
                body: None,
                redirect_url,
                fetch_time_ms,
                crawled_at: chrono::Utc::now(),
                error: None,
                status,
            },
        };
    }

    let is_html = content_type
        .as_deref()
        .map(|ct| ct.contains("html"))
        .unwrap_or(false);

    let body_result = read_truncated(response, config.max_body_bytes).await;
    let fetch_time_ms = start.elapsed().as_millis() as u64;

    let body = match body_result {
        Ok(bytes) => bytes,
        Err(err) => {
            let (kind, mark_domain_dead, timed_out) =
                classify_fetch_error(&err, ErrorPhase::Body);
            return FetchOutcome {
                mark_domain_dead,
                timed_out,
                error_kind: Some(kind),
                result: FetchResult {
                    url: url.to_string(),
                    domain: domain.to_string(),
                    status_code: Some(status_code.as_u16()),
                    content_type,
                    content_length: content_length_header,
                    title: None,
                    description: None,
                    language: None,
                    body: None,
                    redirect_url,
                    fetch_time_ms,
                    crawled_at: chrono::Utc::now(),
                    error: Some(err.to_string()),
                    status: FetchStatus::Failed,
                },
            };
        }
    };

    // Body-size accounting: max(declared content-length, bytes actually
    // read), computed once and reused for both the stored record and the
    // stats byte counter.
    let content_length = Some(content_length_header.unwrap_or(0).max(body.len() as u64));

    let (title, description, language) = if status_code == StatusCode::OK && is_html {
        let meta = extractor.extract(&body, url);
        (meta.title, meta.description, meta.language)
    } else {
        (None, None, None)
    };

    let status = status_for(status_code);
    FetchOutcome {
        mark_domain_dead: false,
        timed_out: false,
        error_kind: (status == FetchStatus::Failed).then_some(ErrorKind::HttpError),
        result: FetchResult {
            url: url.to_string(),
            domain: domain.to_string(),
            status_code: Some(status_code.as_u16()),
            content_type,
            content_length,
            title,
            description,
            language,
            body: Some(body),
            redirect_url,
            fetch_time_ms,
            crawled_at: chrono::Utc::now(),
            error: None,
            status,
        },
    }
}

fn status_for(status: StatusCode) -> FetchStatus {
    if status.is_success() || status.is_redirection() {
        FetchStatus::Done
    } else {
        FetchStatus::Failed
    }
}

/// Patch the domain and elapsed fetch time into an outcome produced by the
/// redirect path, which builds its `FetchResult` via [`redirect_error_result`]
/// without knowing either — without this, every multi-hop-redirect or
/// redirect-target-parse-error row would be stored with an empty `domain`
/// and a zero `fetch_time_ms`.
fn finish(domain: &str, url: &str, start: Instant, mut outcome: FetchOutcome) -> FetchOutcome {
    let _ = url;
    outcome.result.domain = domain.to_string();
    outcome.result.fetch_time_ms = start.elapsed().as_millis() as u64;
    outcome
}

/// Follow at most one redirect hop. `Ok(None)` means the original response
/// should be used as-is (no `Location` header); `Ok(Some(_))` is the
/// followed response; `Err(_)` means the original or the followed response
/// was itself a redirect — multi-hop redirects are treated as an error.
async fn follow_one_redirect(
    client: &Client,
    method: &reqwest::Method,
    original_url: &str,
    first: &reqwest::Response,
) -> Result<Option<reqwest::Response>, FetchOutcome> {
    let location = match first
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(loc) => loc,
        None => return Ok(None),
    };

    let next_url = match reqwest::Url::parse(original_url).and_then(|base| base.join(location)) {
        Ok(url) => url,
        Err(err) => {
            return Err(FetchOutcome {
                mark_domain_dead: false,
                timed_out: false,
                error_kind: Some(ErrorKind::HttpError),
                result: redirect_error_result(original_url, &err.to_string()),
            })
        }
    };

    let second = client
        .request(method.clone(), next_url)
        .header(ACCEPT, STANDARD_ACCEPT)
        .send()
        .await;

    match second {
        Ok(resp) if resp.status().is_redirection() => Err(FetchOutcome {
            mark_domain_dead: false,
            timed_out: false,
            error_kind: Some(ErrorKind::HttpError),
            result: redirect_error_result(original_url, "multi-hop redirect"),
        }),
        Ok(resp) => Ok(Some(resp)),
        Err(err) => {
            let (kind, mark_domain_dead, timed_out) =
                classify_fetch_error(&err, error_phase(&err));
            Err(FetchOutcome {
                mark_domain_dead,
                timed_out,
                error_kind: Some(kind),
                result: redirect_error_result(original_url, &err.to_string()),
            })
        }
    }
}

fn redirect_error_result(url: &str, error: &str) -> FetchResult {
    FetchResult {
        url: url.to_string(),
        domain: String::new(),
        status_code: None,
        content_type: None,
        content_length: None,
        title: None,
        description: None,
        language: None,
        body: None,
        redirect_url: None,
        fetch_time_ms: 0,
        crawled_at: chrono::Utc::now(),
        error: Some(error.to_string()),
        status: FetchStatus::Failed,
    }
}

async fn read_truncated(response: reqwest::Response, max_bytes: usize) -> reqwest::Result<Vec<u8>> {
    use futures::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024));
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            break;
        }
        let take = remaining.min(chunk.len());
        buf.extend_from_slice(&chunk[..take]);
        if buf.len() >= max_bytes {
            break;
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::DefaultExtractor;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> FetchConfig {
        FetchConfig {
            timeout_secs: 5,
            user_agent: "recrawl-test/0.1".to_string(),
            head_only: false,
            status_only: false,
            max_body_bytes: 1024,
            probe_timeout_ms: 500,
        }
    }

    #[tokio::test]
    async fn records_success_with_extracted_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><head><title>Hi</title></head></html>"),
            )
            .mount(&server)
            .await;

        let client = Client::new();
        let outcome = fetch_one(&client, &server.uri(), "example.com", &config(), &DefaultExtractor).await;

        assert_eq!(outcome.result.status_code, Some(200));
        assert_eq!(outcome.result.title.as_deref(), Some("Hi"));
        assert!(!outcome.mark_domain_dead);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn records_4xx_as_failed_without_marking_domain_dead() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::new();
        let outcome = fetch_one(&client, &server.uri(), "example.com", &config(), &DefaultExtractor).await;

        assert_eq!(outcome.result.status_code, Some(404));
        assert_eq!(outcome.result.status, FetchStatus::Failed);
        assert!(!outcome.mark_domain_dead);
    }

    #[tokio::test]
    async fn status_only_skips_body_and_extraction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><head><title>Hi</title></head></html>"),
            )
            .mount(&server)
            .await;

        let mut cfg = config();
        cfg.status_only = true;
        let client = Client::new();
        let outcome = fetch_one(&client, &server.uri(), "example.com", &cfg, &DefaultExtractor).await;

        assert_eq!(outcome.result.status_code, Some(200));
        assert!(outcome.result.title.is_none());
        assert!(outcome.result.body.is_none());
    }

    #[tokio::test]
    async fn connection_refused_marks_domain_dead_with_http_refused_reason() {
        let client = Client::new();
        // Nothing listens on this port; refusal happens at connect time.
        let outcome = fetch_one(
            &client,
            "http://127.0.0.1:1/",
            "example.com",
            &config(),
            &DefaultExtractor,
        )
        .await;

        assert!(outcome.mark_domain_dead);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.error_kind, Some(ErrorKind::HttpRefused));
        assert_eq!(outcome.result.status, FetchStatus::Failed);
    }

    #[tokio::test]
    async fn multi_hop_redirect_error_keeps_domain_and_fetch_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/next"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/next"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/final"))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/start", server.uri());
        let outcome = fetch_one(&client, &url, "example.com", &config(), &DefaultExtractor).await;

        assert_eq!(outcome.result.status, FetchStatus::Failed);
        assert_eq!(outcome.result.domain, "example.com");
        assert!(outcome.result.error.as_deref().unwrap_or("").contains("multi-hop"));
    }
}
