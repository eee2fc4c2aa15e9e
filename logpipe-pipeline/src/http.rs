//! Plain request/response carriers exchanged between flushers and the HTTP
//! sink. The sink owns the actual client; flushers only describe what to
//! send and interpret what came back.

use std::time::Duration;

use bytes::Bytes;
use http::Method;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_TRY_CNT: u32 = 3;

/// One outbound HTTP request, fully described.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub use_https: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    /// Cheap to clone; retries re-send the same body.
    pub body: Bytes,
    pub timeout: Duration,
    pub max_try_cnt: u32,
}

impl HttpRequest {
    pub fn new(method: Method, host: impl Into<String>) -> Self {
        HttpRequest {
            method,
            use_https: false,
            host: host.into(),
            port: 80,
            path: "/".to_owned(),
            query: String::new(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_try_cnt: DEFAULT_MAX_TRY_CNT,
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        let mut url = format!("{}://{}:{}{}", scheme, self.host, self.port, self.path);
        if !self.query.is_empty() {
            url.push('?');
            url.push_str(&self.query);
        }
        url
    }
}

/// What came back, reduced to the parts flushers care about.
#[derive(Clone, Debug, Default)]
pub struct HttpResponse {
    /// Zero when the request never got a response (transport failure).
    pub status_code: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_query_only_when_set() {
        let mut request = HttpRequest::new(Method::POST, "example.com");
        request.port = 443;
        request.use_https = true;
        request.path = "/logstores/demo/shards/lb".to_owned();
        assert_eq!(request.url(), "https://example.com:443/logstores/demo/shards/lb");
        request.query = "type=log".to_owned();
        assert!(request.url().ends_with("?type=log"));
    }
}
