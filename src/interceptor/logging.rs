//! Request/response logging stage.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use log::info;
use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderName, PROXY_AUTHORIZATION, SET_COOKIE};
use reqwest::{Request, Response};

use super::{Interceptor, Next};
use crate::error::{Error, Result};

/// Log target used for every line this stage writes.
pub const LOG_TARGET: &str = "reqchain::http";

/// How much of each exchange is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    /// Nothing.
    #[default]
    None,
    /// Request and response lines.
    Basic,
    /// Request and response lines plus headers.
    Headers,
    /// Lines, headers and bodies.
    Body,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::None => "none",
            LogLevel::Basic => "basic",
            LogLevel::Headers => "headers",
            LogLevel::Body => "body",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(LogLevel::None),
            "basic" => Ok(LogLevel::Basic),
            "headers" => Ok(LogLevel::Headers),
            "body" => Ok(LogLevel::Body),
            _ => anyhow::bail!(
                "Unknown log level: {}. Expected none, basic, headers or body.",
                s
            ),
        }
    }
}

const REDACTED: &str = "██";

/// Writes each exchange to the `log` facade at `info` level.
#[derive(Debug, Clone)]
pub struct LoggingInterceptor {
    level: LogLevel,
    redacted: Vec<HeaderName>,
}

impl LoggingInterceptor {
    /// Credentials and cookies are redacted by default.
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            redacted: vec![AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE, SET_COOKIE],
        }
    }

    /// Also redacts the values of `name`.
    pub fn redact_header(mut self, name: HeaderName) -> Self {
        if !self.redacted.contains(&name) {
            self.redacted.push(name);
        }
        self
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    fn header_lines(&self, headers: &HeaderMap, lines: &mut Vec<String>) {
        for (name, value) in headers {
            let value = if self.redacted.contains(name) {
                REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            lines.push(format!("{}: {}", name, value));
        }
    }

    pub(crate) fn request_lines(&self, request: &Request) -> Vec<String> {
        let mut lines = Vec::new();
        let body = request.body().map(|body| body.as_bytes());

        let mut start = format!("--> {} {}", request.method(), request.url());
        if self.level == LogLevel::Basic {
            match body {
                Some(Some(bytes)) => start.push_str(&format!(" ({}-byte body)", bytes.len())),
                Some(None) => start.push_str(" (streaming body)"),
                None => {}
            }
        }
        lines.push(start);

        if self.level < LogLevel::Headers {
            return lines;
        }
        self.header_lines(request.headers(), &mut lines);

        match (self.level, body) {
            (LogLevel::Body, Some(Some(bytes))) => {
                lines.push(String::new());
                lines.push(body_line(bytes));
                lines.push(format!(
                    "--> END {} ({}-byte body)",
                    request.method(),
                    bytes.len()
                ));
            }
            (LogLevel::Body, Some(None)) => {
                lines.push(format!("--> END {} (streaming body omitted)", request.method()));
            }
            _ => lines.push(format!("--> END {}", request.method())),
        }
        lines
    }

    pub(crate) fn response_lines(
        &self,
        response: &Response,
        elapsed: Duration,
        body: Option<&[u8]>,
    ) -> Vec<String> {
        let mut lines = Vec::new();
        let status = response.status();
        let reason = status.canonical_reason().unwrap_or("");
        let millis = elapsed.as_millis();

        let start = match (self.level, response.content_length()) {
            (LogLevel::Basic, Some(len)) => format!(
                "<-- {} {} {} ({}ms, {}-byte body)",
                status.as_u16(),
                reason,
                response.url(),
                millis,
                len
            ),
            _ => format!(
                "<-- {} {} {} ({}ms)",
                status.as_u16(),
                reason,
                response.url(),
                millis
            ),
        };
        lines.push(start);

        if self.level < LogLevel::Headers {
            return lines;
        }
        self.header_lines(response.headers(), &mut lines);

        match body {
            Some(bytes) if self.level == LogLevel::Body => {
                lines.push(String::new());
                lines.push(body_line(bytes));
                lines.push(format!("<-- END HTTP ({}-byte body)", bytes.len()));
            }
            _ => lines.push("<-- END HTTP".to_string()),
        }
        lines
    }
}

fn body_line(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("(binary {}-byte body omitted)", bytes.len()),
    }
}

/// Reads the whole body, then rebuilds the response around the buffered bytes.
async fn buffer_body(response: Response) -> Result<(Response, Bytes)> {
    let response: http::Response<reqwest::Body> = response.into();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.map_err(Error::from)?.to_bytes();
    let rebuilt = http::Response::from_parts(parts, reqwest::Body::from(bytes.clone()));
    Ok((Response::from(rebuilt), bytes))
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response> {
        if self.level == LogLevel::None {
            return next.run(request).await;
        }

        for line in self.request_lines(&request) {
            info!(target: LOG_TARGET, "{}", line);
        }

        let start = Instant::now();
        let response = match next.run(request).await {
            Ok(response) => response,
            Err(e) => {
                info!(target: LOG_TARGET, "<-- HTTP FAILED: {}", e);
                return Err(e);
            }
        };
        let elapsed = start.elapsed();

        if self.level < LogLevel::Body {
            for line in self.response_lines(&response, elapsed, None) {
                info!(target: LOG_TARGET, "{}", line);
            }
            return Ok(response);
        }

        let (response, body) = buffer_body(response).await?;
        for line in self.response_lines(&response, elapsed, Some(&body)) {
            info!(target: LOG_TARGET, "{}", line);
        }
        Ok(response)
    }
}
