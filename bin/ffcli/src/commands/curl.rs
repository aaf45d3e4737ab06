use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use ffcli_client::{Client, FetchEvent, FetchRequest, HeaderList, RedirectMode};

#[derive(Args, Debug)]
pub struct CurlArgs {
    pub url: String,

    #[arg(short = 'X', long = "request", visible_alias = "method")]
    pub method: Option<String>,

    /// Extra header, "Name: value"
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Request body (implies POST)
    #[arg(short = 'd', long = "data", visible_alias = "data-raw")]
    pub data: Option<String>,

    /// Print request and response headers to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Write the body to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Follow redirects
    #[arg(short = 'L', long)]
    pub location: bool,

    #[arg(short = 's', long, hide = true)]
    pub silent: bool,

    #[arg(short = 'S', long, hide = true)]
    pub show_error: bool,

    #[arg(long, hide = true)]
    pub compressed: bool,

    /// Exit with 22 on HTTP errors and drop the body
    #[arg(long, conflicts_with = "fail_with_body")]
    pub fail: bool,

    /// Exit with 22 on HTTP errors but still write the body
    #[arg(long)]
    pub fail_with_body: bool,

    /// Let the extension perform the request
    #[arg(long)]
    pub real_proxy: bool,

    /// Use the user agent of a real tab
    #[arg(long)]
    pub real_ua: bool,

    /// Use this container's cookies
    #[arg(short, long, conflicts_with = "tab")]
    pub container: Option<String>,

    /// Use this tab's cookies (and run inside it with --real-proxy)
    #[arg(short, long)]
    pub tab: Option<i64>,
}

/// Exit status of curl for HTTP errors with `--fail`.
const EXIT_HTTP_ERROR: i32 = 22;

fn parse_headers(raw: &[String]) -> HeaderList {
    raw.iter()
        .map(|h| match h.split_once(": ") {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (h.trim_end_matches(':').to_string(), String::new()),
        })
        .collect()
}

/// Path and query of `url`, as shown in curl's request line.
fn request_target(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}

fn print_headers(prefix: char, headers: &HeaderList) {
    for (k, v) in headers {
        eprintln!("{} {}: {}", prefix, k, v);
    }
    eprintln!("{}", prefix);
}

pub async fn run(client: &Client, args: CurlArgs) -> anyhow::Result<i32> {
    let store_id = if let Some(container) = &args.container {
        Some(client.container_store(container).await?)
    } else if let Some(tab) = args.tab {
        Some(client.tab_store(tab).await?)
    } else {
        None
    };

    let method = args
        .method
        .clone()
        .unwrap_or_else(|| if args.data.is_some() { "POST" } else { "GET" }.to_string());
    let request = FetchRequest {
        headers: parse_headers(&args.headers),
        body: args.data.clone().unwrap_or_default().into(),
        ..FetchRequest::new(args.url.clone())
    }
    .method(method)
    .store_id(store_id)
    .real_ua(args.real_ua)
    .redirect(if args.location {
        RedirectMode::Follow
    } else {
        RedirectMode::Manual
    });

    let mut fetch = if args.real_proxy {
        client.fetch(&request.tab_id(args.tab).cache(Some("no-store".to_string())))
    } else {
        client.local_fetch(request)
    };

    let mut tracked = false;
    let mut status = 0u16;
    let mut out: Option<Box<dyn Write>> = None;
    while let Some(event) = fetch.next_event().await {
        match event? {
            FetchEvent::RequestSent(req) => {
                tracked = true;
                if args.verbose {
                    eprintln!("> {} {}", req.method, request_target(&req.url));
                    print_headers('>', &req.headers);
                }
            }
            FetchEvent::HeadersReceived(resp) => {
                status = resp.status;
                if args.verbose {
                    let line = resp
                        .status_line
                        .clone()
                        .unwrap_or_else(|| format!("HTTP {}", resp.status));
                    eprintln!("< {}", line);
                    print_headers('<', &resp.headers);
                }
            }
            FetchEvent::Response(resp) if !tracked => {
                status = resp.status;
                if args.verbose {
                    eprintln!("< HTTP {}", resp.status);
                    print_headers('<', &resp.headers);
                }
            }
            FetchEvent::Body(chunk) => {
                fetch.discard_buffered();
                if args.fail_with_body || !(args.fail && status >= 400) {
                    if out.is_none() {
                        out = Some(match &args.output {
                            Some(path) => Box::new(std::fs::File::create(path)?),
                            None => Box::new(std::io::stdout()),
                        });
                    }
                    if let Some(out) = out.as_mut() {
                        out.write_all(&chunk)?;
                    }
                }
            }
            _ => {}
        }
    }
    if let Some(mut out) = out {
        out.flush()?;
    }

    if (args.fail || args.fail_with_body) && status >= 400 {
        eprintln!("The requested URL returned error: {}", status);
        return Ok(EXIT_HTTP_ERROR);
    }
    Ok(0)
}
