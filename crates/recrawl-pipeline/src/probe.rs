use std::time::Duration;

use reqwest::Client;

/// Outcome of probing one domain with a single HEAD request. Any HTTP
/// response at all (1xx-5xx) counts as reachable, and a probe timeout is
/// treated as reachable too: a slow server is not necessarily a dead one.
/// Only a definitive connection-level failure counts as unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
}

/// HEAD one sample URL from a domain with a short timeout. Reuses the same
/// refused/reset/no-route/no-such-host string classification as the fetch
/// path, since "definitive connection refusal" means the same thing at
/// probe time as it does at fetch time.
pub async fn probe_domain(client: &Client, sample_url: &str, timeout: Duration) -> ProbeOutcome {
    let result = tokio::time::timeout(
        timeout,
        client.head(sample_url).send(),
    )
    .await;

    match result {
        // Any HTTP response, including error statuses, means the host is up.
        Ok(Ok(_response)) => ProbeOutcome::Reachable,
        // The probe's own timeout elapsed: conservatively reachable.
        Err(_elapsed) => ProbeOutcome::Reachable,
        Ok(Err(err)) => {
            if is_definitive_refusal(&err) {
                ProbeOutcome::Unreachable
            } else {
                ProbeOutcome::Reachable
            }
        }
    }
}

fn is_definitive_refusal(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return false;
    }
    let message = format!("{err:?}").to_ascii_lowercase();
    message.contains("connection refused")
        || message.contains("connectionrefused")
        || message.contains("connection reset")
        || message.contains("connectionreset")
        || message.contains("no route to host")
        || message.contains("no such host")
        || message.contains("nodename nor servname")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn any_response_is_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Client::new();
        let outcome = probe_domain(&client, &server.uri(), Duration::from_millis(500)).await;
        assert_eq!(outcome, ProbeOutcome::Reachable);
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        let client = Client::new();
        // Nothing is listening on this port; the connection is refused
        // almost immediately rather than timing out.
        let outcome = probe_domain(
            &client,
            "http://127.0.0.1:1",
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }
}
