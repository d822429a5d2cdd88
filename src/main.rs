use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use reqchain::{HttpRequest, HttpResponse, LogLevel, Method};

/// reqchain - send an HTTP request from the command line
///
/// Prints the response body to stdout. Exits with a non-zero status when the call fails
/// (connection refused, timeout, bad configuration), or on 4xx/5xx with --fail.
///
/// Examples:
///   reqchain get https://httpbin.org/get -q page=2
///   reqchain post https://httpbin.org/post --json '{"name":"widget"}' --retry 3
///   reqchain put https://example.com/upload -F file=@report.pdf -F note=weekly
#[derive(Parser, Debug)]
#[command(author, version = env!("REQCHAIN_VERSION"), about)]
struct Cli {
    /// HTTP method: get, post, put, patch or delete
    #[arg(value_name = "METHOD")]
    method: Method,

    /// Absolute http(s) URL
    #[arg(value_name = "URL")]
    url: String,

    /// Request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Query parameter, "name=value" (repeatable)
    #[arg(short = 'q', long = "query", value_name = "NAME=VALUE", value_parser = parse_pair)]
    query: Vec<(String, String)>,

    /// Raw request body
    #[arg(short = 'd', long = "data", value_name = "DATA", group = "payload")]
    data: Option<String>,

    /// JSON request body
    #[arg(long = "json", value_name = "JSON", group = "payload")]
    json: Option<String>,

    /// Multipart field, "name=value" or "name=@path" for a file (repeatable)
    #[arg(short = 'F', long = "form", value_name = "NAME=VALUE", value_parser = parse_pair, group = "payload")]
    form: Vec<(String, String)>,

    /// Attempts for network failures, the first one included
    #[arg(long = "retry", value_name = "N")]
    retry: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long = "retry-delay", value_name = "MS", default_value_t = reqchain::interceptor::DEFAULT_SLEEP_MILLIS)]
    retry_delay: u64,

    /// Exchange logging: none, basic, headers or body
    #[arg(long = "log", value_name = "LEVEL", env = "REQCHAIN_LOG")]
    log: Option<LogLevel>,

    /// Connect timeout in seconds
    #[arg(long = "connect-timeout", value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Read timeout in seconds
    #[arg(long = "read-timeout", value_name = "SECS")]
    read_timeout: Option<u64>,

    /// Timeout for each attempt as a whole, in seconds
    #[arg(long = "write-timeout", value_name = "SECS")]
    write_timeout: Option<u64>,

    /// Proxy URL
    #[arg(long = "proxy", value_name = "URL", env = "REQCHAIN_PROXY")]
    proxy: Option<String>,

    /// Do not follow redirects
    #[arg(long = "no-redirects")]
    no_redirects: bool,

    /// User-Agent header value
    #[arg(long = "user-agent", value_name = "UA", env = "REQCHAIN_USER_AGENT")]
    user_agent: Option<String>,

    /// Basic credentials, "user:password", sent after a 401 challenge
    #[arg(short = 'u', long = "user", value_name = "USER:PASSWORD")]
    user: Option<String>,

    /// Accept invalid TLS certificates and host names
    #[arg(short = 'k', long = "insecure")]
    insecure: bool,

    /// Print the status line and response headers before the body
    #[arg(short = 'i', long = "include")]
    include: bool,

    /// Treat 4xx/5xx responses as failures
    #[arg(short = 'f', long = "fail")]
    fail: bool,
}

fn parse_header(s: &str) -> Result<(String, String)> {
    let (name, value) = s
        .split_once(':')
        .with_context(|| format!("Invalid header {:?}, expected \"Name: value\"", s))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn parse_pair(s: &str) -> Result<(String, String)> {
    let (name, value) = s
        .split_once('=')
        .with_context(|| format!("Invalid field {:?}, expected \"name=value\"", s))?;
    Ok((name.to_string(), value.to_string()))
}

fn build_request(cli: &Cli) -> Result<HttpRequest> {
    let mut request = HttpRequest::new(cli.method, cli.url.as_str())?;

    request = request.add_headers(cli.headers.iter().map(|(n, v)| (n, v)));
    request = request.query_map(cli.query.iter().map(|(n, v)| (n, v)));

    if let Some(data) = &cli.data {
        request = request.body_string(data.clone());
    }
    if let Some(json) = &cli.json {
        let value: serde_json::Value =
            serde_json::from_str(json).context("Invalid --json body")?;
        request = request.body_json(&value);
    }
    if !cli.form.is_empty() {
        let mut form = request.multipart_form_builder();
        for (name, value) in &cli.form {
            form = match value.strip_prefix('@') {
                Some(path) => form.add_file(name, PathBuf::from(path), None),
                None => form.add(name, value),
            };
        }
        request = form.build();
    }

    if let Some(attempts) = cli.retry {
        request = request.retry_with(attempts, cli.retry_delay);
    }
    if let Some(level) = cli.log {
        request = request.log_level(level);
    }
    if let Some(secs) = cli.connect_timeout {
        request = request.connect_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = cli.read_timeout {
        request = request.read_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = cli.write_timeout {
        request = request.write_timeout(Duration::from_secs(secs));
    }
    if let Some(proxy) = &cli.proxy {
        let proxy = proxy
            .parse()
            .with_context(|| format!("Invalid proxy URL {:?}", proxy))?;
        request = request.proxy_url(proxy);
    }
    if cli.no_redirects {
        request = request.follow_redirects(false);
    }
    if let Some(user_agent) = &cli.user_agent {
        request = request.user_agent(user_agent.as_str());
    }
    if let Some(user) = &cli.user {
        let (name, password) = user.split_once(':').unwrap_or((user.as_str(), ""));
        request = request.basic_auth(name, password);
    }
    if cli.insecure {
        request = request
            .accept_invalid_certs(true)
            .hostname_verification(false);
    }
    Ok(request)
}

fn print_response(out: &mut impl Write, response: &HttpResponse, include: bool) -> Result<()> {
    if include {
        if let Some(status) = response.status() {
            let version = response.version().map(|v| format!("{:?}", v));
            writeln!(
                out,
                "{} {}",
                version.as_deref().unwrap_or("HTTP/1.1"),
                status
            )?;
            for (name, value) in response.headers() {
                writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
            }
            writeln!(out)?;
        }
    }
    out.write_all(response.bytes())?;
    out.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = match cli.log {
        Some(level) if level != LogLevel::None => "warn,reqchain=info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let request = build_request(&cli)?;
    let response = request.send().await;

    let mut stdout = std::io::stdout().lock();
    print_response(&mut stdout, &response, cli.include)?;

    let response = response
        .into_result()
        .with_context(|| format!("{} {} failed", cli.method, cli.url))?;
    if cli.fail {
        response.error_for_status()?;
    }
    Ok(())
}
