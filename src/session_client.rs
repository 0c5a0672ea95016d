use easy_error::{Error, ResultExt};
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;

// Hard-coded copy of the headers the JSFiddle web site expects, captured
// with the Chrome debugger. accept-encoding is deliberately absent: reqwest
// negotiates it itself so the gzip/brotli support can decompress bodies
// transparently.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,\
             */*;q=0.8,application/signed-exchange;v=b3",
        ),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    headers.insert(header::ORIGIN, HeaderValue::from_static("https://jsfiddle.net"));
    headers.insert(
        header::REFERER,
        HeaderValue::from_static("https://jsfiddle.net/user/login/"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-user"),
        HeaderValue::from_static("?1"),
    );
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_5) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/76.0.3809.100 fiddle-fetch/0.8",
        ),
    );
    headers
}

/// Wrapper around `reqwest::blocking::Client` that sends the fixed browser
/// header set with every request and carries the session cookies from the
/// login exchange into everything that follows.
pub struct SessionClient {
    client: Client,
}

impl SessionClient {
    pub fn new() -> Result<Self, Error> {
        let client = Client::builder()
            .default_headers(browser_headers())
            .cookie_store(true)
            .build()
            .context("Could not build HTTP client")?;

        Ok(SessionClient { client })
    }

    /// Fetches `url` and returns the response body as text.
    pub fn get_text(&self, url: &str) -> Result<String, Error> {
        self.client
            .get(url)
            .send()
            .context(format!("Could not retrieve page {url}"))?
            .text()
            .context(format!("Could not read response from {url}"))
    }

    /// Posts `fields` form-encoded to `url` and returns the response body
    /// as text.
    pub fn post_form(&self, url: &str, fields: &HashMap<String, String>) -> Result<String, Error> {
        self.client
            .post(url)
            .form(fields)
            .send()
            .context(format!("Could not post form to {url}"))?
            .text()
            .context(format!("Could not read response from {url}"))
    }
}
