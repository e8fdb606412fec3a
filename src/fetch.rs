use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE, SET_COOKIE};
use scraper::Html;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::FetchError;
use crate::parser::text::decode_body;
use crate::session::{cookie_header, CookieJar};

const BASE_BACKOFF_MS: u64 = 2000;

/// The server emits Latin-1; pagination requests ask for it explicitly.
pub const ACCEPT_LATIN1: &str = "text/html; charset=latin1;";

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub url: String,
    pub accept: Option<&'static str>,
    pub cookies: CookieJar,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Request {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn latin1(mut self) -> Self {
        self.accept = Some(ACCEPT_LATIN1);
        self
    }

    pub fn with_cookies(mut self, jar: &CookieJar) -> Self {
        self.cookies = jar.clone();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn text(&self) -> String {
        decode_body(&self.body)
    }

    pub fn html(&self) -> Html {
        Html::parse_document(&self.text())
    }
}

/// The crawling engine the pipeline issues its requests through.
/// Retries and throttling live behind this seam.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError>;
}

/// reqwest-backed fetcher with a fixed inter-request delay and backoff retries.
pub struct HttpFetcher {
    client: reqwest::Client,
    delay: Duration,
    pdf_delay: Duration,
    max_retries: u32,
    last_request: Mutex<Option<Instant>>,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|source| FetchError::Transport {
                url: settings.base_url.clone(),
                source,
            })?;

        Ok(HttpFetcher {
            client,
            delay: settings.download_delay(),
            pdf_delay: settings.pdf_download_delay(),
            max_retries: settings.max_retries,
            last_request: Mutex::new(None),
        })
    }

    async fn throttle(&self, url: &str) {
        let wait = if url.contains("getPDF.do") {
            self.pdf_delay
        } else {
            self.delay
        };
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < wait {
                tokio::time::sleep(wait - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn send_once(&self, request: &Request) -> Result<Response, FetchError> {
        let mut builder = self.client.get(&request.url);
        if let Some(accept) = request.accept {
            builder = builder.header(ACCEPT, accept);
        }
        if let Some(cookies) = cookie_header(&request.cookies) {
            builder = builder.header(COOKIE, cookies);
        }

        let response = builder
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: request.url.clone(),
                source,
            })?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(String::from)
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: request.url.clone(),
                source,
            })?
            .to_vec();

        Ok(Response {
            url,
            status,
            set_cookies,
            body,
        })
    }
}

/// Doubling wait before retry `attempt`, saturating instead of overflowing.
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt)))
}

fn should_retry(result: &Result<Response, FetchError>) -> bool {
    match result {
        Ok(r) => r.status == 429 || (500..600).contains(&r.status),
        Err(FetchError::Transport { .. }) => true,
        Err(_) => false,
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        let mut attempt = 0;
        loop {
            self.throttle(&request.url).await;
            let result = self.send_once(&request).await;

            if !should_retry(&result) || attempt >= self.max_retries {
                let response = result?;
                if !(200..400).contains(&response.status) {
                    return Err(FetchError::Status {
                        url: request.url,
                        status: response.status,
                    });
                }
                debug!(url = %request.url, status = response.status, bytes = response.body.len(), "fetched");
                return Ok(response);
            }

            let backoff = backoff(attempt);
            warn!(
                "Retrying {} (attempt {}/{}), backing off {:.1}s",
                request.url,
                attempt + 1,
                self.max_retries,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}
