//! HTTP requests as sequences.
//!
//! Response bodies are bridged like any other byte stream, so a large body
//! is consumed line by line and the connection is closed as soon as the
//! pipeline stops pulling.

use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Body, Client, Response};
use reqwest::redirect::Policy;

use crate::bridge::{self, Emit, ReadConfig, ReadMode, WriteMode};
use crate::error::{PipelineError, Result};
use crate::sequence::Sequence;

/// Hop limit for redirects.
pub const MAX_REDIRECTS: usize = 5;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for [`Sequence::http`] and [`Sequence::post`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// HTTP method. Defaults to `GET` for `http` and `POST` for `post`.
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    /// `None` disables the timeout.
    pub timeout: Option<Duration>,
    pub redirects: usize,
    /// How upstream values are encoded into a request body.
    pub input: WriteMode,
    /// How the response body is read.
    pub output: ReadConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            method: None,
            headers: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
            redirects: MAX_REDIRECTS,
            input: WriteMode::Line,
            output: ReadConfig::default(),
        }
    }
}

impl HttpConfig {
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output(mut self, config: ReadConfig) -> Self {
        self.output = config;
        self
    }

    fn resolve_method(&self, default: Method) -> Result<Method> {
        match &self.method {
            None => Ok(default),
            Some(name) => Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .map_err(|_| PipelineError::invalid("http", format!("Unknown method '{name}'"))),
        }
    }

    fn client(&self) -> Result<Client> {
        Ok(Client::builder()
            .redirect(Policy::limited(self.redirects))
            .timeout(self.timeout)
            .build()?)
    }
}

/// A prepared request target shared by every pull of an HTTP sequence.
struct Fetcher {
    client: Client,
    method: Method,
    config: HttpConfig,
}

impl Fetcher {
    fn new(config: HttpConfig, default_method: Method) -> Result<Self> {
        Ok(Self {
            client: config.client()?,
            method: config.resolve_method(default_method)?,
            config,
        })
    }

    /// A fetcher whose response bodies are read as text.
    fn text(operator: &'static str, config: HttpConfig, default_method: Method) -> Result<Self> {
        if config.output.mode == ReadMode::Binary {
            return Err(bridge::binary_on_text(operator));
        }
        Self::new(config, default_method)
    }

    fn fetch(&self, url: &str, body: Option<Body>) -> Result<Sequence<String>> {
        let response = self.send(url, body)?;
        Ok(bridge::read_stream(response, &self.config.output))
    }

    fn fetch_binary(&self, url: &str) -> Result<Sequence<Vec<u8>>> {
        let response = self.send(url, None)?;
        Ok(bridge::read_binary(response, &self.config.output))
    }

    fn send(&self, url: &str, body: Option<Body>) -> Result<Response> {
        let mut request = self.client.request(self.method.clone(), url);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        tracing::debug!(method = %self.method, url, "sending request");
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Http {
                url: url.to_string(),
                status: status.to_string(),
            });
        }
        Ok(response)
    }
}

impl Sequence<String> {
    /// Treat each element as a URL, fetch it and emit the response body.
    ///
    /// Redirects are followed up to [`HttpConfig::redirects`] hops. A non-2xx
    /// final status ends the sequence with [`PipelineError::Http`].
    /// A [`ReadMode::Binary`] output config is rejected; use
    /// [`http_binary`](Self::http_binary) for raw bodies.
    pub fn http(self, config: HttpConfig) -> Result<Sequence<String>> {
        let fetcher = Fetcher::text("http", config, Method::GET)?;
        Ok(self
            .try_map(move |url| fetcher.fetch(url.trim(), None))
            .flatten::<String>())
    }

    /// Like [`http`](Self::http) but emits the bodies as raw byte chunks.
    pub fn http_binary(self, config: HttpConfig) -> Result<Sequence<Vec<u8>>> {
        let fetcher = Fetcher::new(config, Method::GET)?;
        Ok(self
            .try_map(move |url| fetcher.fetch_binary(url.trim()))
            .flatten::<Vec<u8>>())
    }
}

impl<T: Emit + Send + 'static> Sequence<T> {
    /// Send this whole sequence as the body of one request to `url`.
    ///
    /// The request is made on first pull and the body is streamed from the
    /// upstream as the client writes it.
    pub fn post(self, url: impl Into<String>, config: HttpConfig) -> Result<Sequence<String>> {
        let url = url.into();
        let fetcher = Fetcher::text("post", config, Method::POST)?;
        Ok(self.wrap(move |input| {
            let body = Body::new(input.reader(fetcher.config.input));
            fetcher
                .fetch(&url, Some(body))
                .unwrap_or_else(Sequence::failed)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serve every connection with `respond(request)` until the test exits.
    fn serve<R: Into<Vec<u8>>>(
        respond: impl Fn(&str) -> R + Send + 'static,
    ) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (seen_tx, seen_rx) = mpsc::channel();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = stream.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = stream.read(&mut buf).unwrap();
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request);
                    let chunked = text.to_ascii_lowercase().contains("transfer-encoding: chunked");
                    let done = if chunked {
                        text.ends_with("0\r\n\r\n")
                    } else {
                        text.contains("\r\n\r\n")
                    };
                    if n == 0 || done {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&request).into_owned();
                let response: Vec<u8> = respond(&request).into();
                let _ = seen_tx.send(request);
                stream.write_all(&response).unwrap();
            }
        });
        (url, seen_rx)
    }

    fn reply(status: &str, extra: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n{extra}\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn test_get_yields_lines() {
        let (url, _) = serve(|_| reply("200 OK", "", "alpha\nbeta\n"));
        let out = Sequence::from_value(url)
            .http(HttpConfig::default())
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(out, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_non_success_status_fails() {
        let (url, _) = serve(|_| reply("404 Not Found", "", "missing"));
        let err = Sequence::from_value(url.clone())
            .http(HttpConfig::default())
            .unwrap()
            .values()
            .unwrap_err();
        match err {
            PipelineError::Http { url: failed, status } => {
                assert_eq!(failed, url);
                assert!(status.contains("404"));
            }
            other => panic!("Expected Http error, got {other:?}"),
        }
    }

    #[test]
    fn test_redirect_is_followed() {
        let (url, _) = serve(|request| {
            if request.starts_with("GET /final") {
                reply("200 OK", "", "landed")
            } else {
                reply("302 Found", "Location: /final\r\n", "")
            }
        });
        let out = Sequence::from_value(format!("{url}/start"))
            .http(HttpConfig::default())
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(out, vec!["landed"]);
    }

    #[test]
    fn test_redirect_loop_is_bounded() {
        let (url, seen) = serve(|_| reply("302 Found", "Location: /again\r\n", ""));
        let result = Sequence::from_value(url)
            .http(HttpConfig::default())
            .unwrap()
            .values();
        assert!(result.is_err());
        let requests = seen.try_iter().count();
        assert!((MAX_REDIRECTS..=MAX_REDIRECTS + 1).contains(&requests), "{requests} requests");
    }

    #[test]
    fn test_post_streams_upstream_body() {
        let (url, seen) = serve(|_| reply("201 Created", "", "stored"));
        let out = Sequence::from_collection(vec!["one", "two"])
            .post(url, HttpConfig::default().header("X-Test", "1"))
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(out, vec!["stored"]);

        let request = seen.recv().unwrap();
        assert!(request.starts_with("POST /"));
        assert!(request.to_ascii_lowercase().contains("x-test: 1"));
        assert!(request.contains("one\n"));
        assert!(request.contains("two\n"));
    }

    #[test]
    fn test_binary_body_is_not_decoded() {
        let (url, _) = serve(|_| {
            let mut response =
                b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\n".to_vec();
            response.extend_from_slice(&[0xff, 0xfe, 0x00, 0x01]);
            response
        });
        let chunks = Sequence::from_value(url)
            .http_binary(HttpConfig::default())
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(chunks.concat(), vec![255, 254, 0, 1]);
    }

    #[test]
    fn test_text_request_rejects_binary_mode() {
        let binary = HttpConfig::default().output(ReadConfig::default().mode(ReadMode::Binary));
        let err = Sequence::from_value("http://localhost".to_string())
            .http(binary.clone())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument { operator: "http", .. }));

        let err = Sequence::from_value("body")
            .post("http://localhost", binary)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument { operator: "post", .. }));
    }

    #[test]
    fn test_unknown_method_is_validation_error() {
        let err = Sequence::from_value("http://localhost".to_string())
            .http(HttpConfig::default().method("NOT A METHOD"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument { .. }));
    }
}
