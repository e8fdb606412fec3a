use std::collections::BTreeMap;

/// Cookie name -> value, as replayed on the next request of a traversal.
pub type CookieJar = BTreeMap<String, String>;

/// Parse `Set-Cookie` header values into a jar. Attributes after the first `;`
/// are dropped; malformed entries (no `=`) are ignored.
pub fn cookies_from_headers<S: AsRef<str>>(set_cookie: &[S]) -> CookieJar {
    set_cookie
        .iter()
        .filter_map(|header| {
            let (name, rest) = header.as_ref().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = rest.split(';').next().unwrap_or("").trim();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Render a jar as a single `Cookie:` request header value.
pub fn cookie_header(jar: &CookieJar) -> Option<String> {
    if jar.is_empty() {
        return None;
    }
    Some(
        jar.iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Per-traversal state, threaded explicitly through every step.
#[derive(Debug, Clone, Default)]
pub struct TraversalContext {
    pub query: String,
    pub page: u32,
    pub start_page: Option<u32>,
    pub cookies: CookieJar,
    pub pages_fetched: u32,
}

impl TraversalContext {
    pub fn new(query: impl Into<String>, start_page: Option<u32>) -> Self {
        TraversalContext {
            query: query.into(),
            page: 1,
            start_page,
            ..Default::default()
        }
    }

    /// Merge cookies issued by the latest response; newer values win.
    pub fn absorb_cookies<S: AsRef<str>>(&mut self, set_cookie: &[S]) {
        self.cookies.extend(cookies_from_headers(set_cookie));
    }
}
