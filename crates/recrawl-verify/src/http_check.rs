use std::time::Duration;

use reqwest::Client;

/// Result of GETing both schemes for one domain.
pub struct HttpCheck {
    pub http_status: Option<u16>,
    pub https_status: Option<u16>,
    pub http_error: Option<String>,
    pub https_error: Option<String>,
}

impl HttpCheck {
    /// Alive if either scheme produced an HTTP response at all, regardless
    /// of status code.
    pub fn alive(&self) -> bool {
        self.http_status.is_some() || self.https_status.is_some()
    }
}

async fn get_root(client: &Client, scheme: &str, domain: &str, timeout: Duration) -> (Option<u16>, Option<String>) {
    let url = format!("{scheme}://{domain}/");
    match tokio::time::timeout(timeout, client.get(&url).send()).await {
        Ok(Ok(response)) => (Some(response.status().as_u16()), None),
        Ok(Err(err)) => (None, Some(err.to_string())),
        Err(_) => (None, Some(format!("{scheme} GET of {domain} timed out after {timeout:?}"))),
    }
}

/// GET `https://{domain}/` and `http://{domain}/` concurrently. Only called
/// when the domain is DNS-alive.
pub async fn check_http(client: &Client, domain: &str, timeout: Duration) -> HttpCheck {
    let (https, http) = tokio::join!(
        get_root(client, "https", domain, timeout),
        get_root(client, "http", domain, timeout),
    );
    HttpCheck {
        https_status: https.0,
        https_error: https.1,
        http_status: http.0,
        http_error: http.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Client {
        Client::builder()
            .redirect(reqwest::redirect::Policy::limited(1))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn any_status_code_counts_as_alive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let domain_url = server.uri();
        let stripped = domain_url.trim_start_matches("http://");
        let check = check_http(&client(), stripped, Duration::from_secs(2)).await;
        assert!(check.alive());
        assert_eq!(check.http_status, Some(503));
    }

    #[tokio::test]
    async fn unreachable_host_is_not_alive() {
        let check = check_http(&client(), "127.0.0.1:1", Duration::from_millis(500)).await;
        assert!(!check.alive());
        assert!(check.http_error.is_some());
    }
}
