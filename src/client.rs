//! MediaWiki API client
//!
//! The downloader only needs two calls from a wiki: log in, and look up a
//! file's current revision. [`WikiApi`] is that narrow seam;
//! [`MediaWikiClient`] implements it over `api.php` with reqwest.

use crate::error::ClientError;
use crate::resolve::FileReference;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};
use url::Url;

/// Sent with every request, API and file transfer alike
pub const USER_AGENT: &str = concat!(
    "wikiget/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/clpo13/wikiget)"
);

/// Login for private wikis
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything that identifies one authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteKey {
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub credentials: Option<Credentials>,
}

impl SiteKey {
    pub fn for_reference(reference: &FileReference, credentials: Option<&Credentials>) -> Self {
        Self {
            scheme: reference.scheme.clone(),
            host: reference.site_host.clone(),
            path: reference.script_path.clone(),
            credentials: credentials.cloned(),
        }
    }

    /// `{scheme}://{host}{path}api.php`
    pub fn api_url(&self) -> Result<Url, ClientError> {
        let raw = format!("{}://{}{}api.php", self.scheme, self.host, self.path);
        Url::parse(&raw).map_err(|_| ClientError::Endpoint(raw))
    }
}

/// A connection to one wiki, optionally logged in
///
/// The HTTP client carries the cookie jar, so file transfers made through
/// [`Session::http`] are authenticated too.
#[derive(Debug, Clone)]
pub struct Session {
    host: String,
    api_url: Url,
    http: reqwest::Client,
    user: Option<String>,
}

impl Session {
    pub fn new(host: impl Into<String>, api_url: Url, http: reqwest::Client) -> Self {
        Self {
            host: host.into(),
            api_url,
            http,
            user: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Logged-in user name, if any
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

/// Current revision of a file as reported by the wiki
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub canonical_title: String,
    pub url: String,
    pub size: Option<u64>,
    pub sha1: Option<String>,
}

#[async_trait]
pub trait WikiApi: Send + Sync {
    /// Connect to a wiki, logging in when the key carries credentials
    async fn authenticate(&self, site: &SiteKey) -> Result<Session, ClientError>;

    /// Look up `title`; [`ClientError::NotFound`] if the wiki has no such file
    async fn get_file_info(&self, session: &Session, title: &str) -> Result<FileInfo, ClientError>;
}

/// HTTP settings shared by every session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// [`WikiApi`] over a real `api.php`
pub struct MediaWikiClient {
    config: ClientConfig,
}

#[derive(Deserialize)]
struct TokenResponse {
    query: TokenQuery,
}

#[derive(Deserialize)]
struct TokenQuery {
    tokens: Tokens,
}

#[derive(Deserialize)]
struct Tokens {
    logintoken: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    login: LoginResult,
}

#[derive(Deserialize)]
struct LoginResult {
    result: String,
    #[serde(default)]
    reason: Option<Value>,
}

#[derive(Deserialize)]
struct ImageQueryResponse {
    #[serde(default)]
    query: Option<ImageQuery>,
}

#[derive(Deserialize)]
struct ImageQuery {
    #[serde(default)]
    pages: Vec<ImagePage>,
}

#[derive(Deserialize)]
struct ImagePage {
    title: String,
    #[serde(default)]
    invalidreason: Option<String>,
    #[serde(default)]
    imageinfo: Vec<ImageInfo>,
}

#[derive(Deserialize)]
struct ImageInfo {
    url: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    sha1: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// One reqwest client, and so one cookie jar, per session
    fn build_http(&self, host: &str) -> Result<reqwest::Client, ClientError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&self.config.user_agent)
            .cookie_store(true);
        if let Some(timeout) = self.config.timeout {
            builder = builder.connect_timeout(timeout);
        }
        builder.build().map_err(|source| ClientError::Connect {
            site: host.to_string(),
            source,
        })
    }

    async fn call(
        &self,
        session: &Session,
        post: bool,
        params: &[(&str, &str)],
    ) -> Result<Value, ClientError> {
        let mut query = vec![("format", "json"), ("formatversion", "2")];
        query.extend_from_slice(params);

        let request = if post {
            session.http.post(session.api_url.clone()).form(&query)
        } else {
            session.http.get(session.api_url.clone()).query(&query)
        };
        let request = match self.config.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };

        debug!("API request to {}: {:?}", session.api_url, redact(params));

        let response = request.send().await.map_err(|source| ClientError::Connect {
            site: session.host.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url: session.api_url.to_string(),
                status,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.get("error") {
            let field = |name: &str| {
                error
                    .get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            return Err(ClientError::Api {
                code: field("code"),
                info: field("info"),
            });
        }

        Ok(body)
    }

    async fn login(&self, session: &Session, credentials: &Credentials) -> Result<(), ClientError> {
        let body = self
            .call(
                session,
                false,
                &[("action", "query"), ("meta", "tokens"), ("type", "login")],
            )
            .await?;
        let tokens: TokenResponse = parse(body)?;

        let body = self
            .call(
                session,
                true,
                &[
                    ("action", "login"),
                    ("lgname", credentials.username.as_str()),
                    ("lgpassword", credentials.password.as_str()),
                    ("lgtoken", tokens.query.tokens.logintoken.as_str()),
                ],
            )
            .await?;
        let login: LoginResponse = parse(body)?;

        if login.login.result == "Success" {
            return Ok(());
        }

        let reason = match login.login.reason {
            Some(Value::String(text)) => text,
            Some(Value::Object(obj)) => obj
                .get("text")
                .or_else(|| obj.get("code"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => login.login.result,
        };
        Err(ClientError::LoginRejected(reason))
    }
}

#[async_trait]
impl WikiApi for MediaWikiClient {
    async fn authenticate(&self, site: &SiteKey) -> Result<Session, ClientError> {
        info!("Connecting to {}", site.host);

        let api_url = site.api_url()?;
        let http = self.build_http(&site.host)?;
        let mut session = Session::new(site.host.clone(), api_url, http);

        // Surfaces a wrong --path here rather than on the first lookup
        self.call(&session, false, &[("action", "query"), ("meta", "siteinfo")])
            .await?;

        if let Some(credentials) = &site.credentials {
            info!("Attempting to authenticate with credentials");
            self.login(&session, credentials).await?;
            session.user = Some(credentials.username.clone());
        }

        Ok(session)
    }

    async fn get_file_info(&self, session: &Session, title: &str) -> Result<FileInfo, ClientError> {
        let body = self
            .call(
                session,
                false,
                &[
                    ("action", "query"),
                    ("prop", "imageinfo"),
                    ("iiprop", "url|size|sha1"),
                    ("titles", title),
                ],
            )
            .await?;
        let response: ImageQueryResponse = parse(body)?;

        let page = response
            .query
            .and_then(|q| q.pages.into_iter().next())
            .ok_or_else(|| ClientError::NotFound(title.to_string()))?;

        if let Some(reason) = &page.invalidreason {
            debug!("Title '{}' rejected by the wiki: {}", title, reason);
        }

        // Files from a shared repository are "missing" locally yet still
        // carry imageinfo, so imageinfo alone decides existence.
        let info = page
            .imageinfo
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(title.to_string()))?;

        Ok(FileInfo {
            canonical_title: page.title,
            url: info.url,
            size: info.size,
            sha1: info.sha1,
        })
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ClientError> {
    serde_json::from_value(body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

fn redact<'a>(params: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
    params
        .iter()
        .map(|&(k, v)| if k == "lgpassword" { (k, "<redacted>") } else { (k, v) })
        .collect()
}

/// Sessions keyed by site and credentials, established at most once each
///
/// Concurrent callers asking for the same key wait on the same login.
/// A failed login is not cached; the next caller tries again.
pub struct SessionCache {
    api: Arc<dyn WikiApi>,
    sessions: Mutex<HashMap<SiteKey, Arc<OnceCell<Arc<Session>>>>>,
}

impl SessionCache {
    pub fn new(api: Arc<dyn WikiApi>) -> Self {
        Self {
            api,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn api(&self) -> &dyn WikiApi {
        self.api.as_ref()
    }

    pub async fn session(&self, key: &SiteKey) -> Result<Arc<Session>, ClientError> {
        let cell = {
            let mut sessions = self.sessions.lock().await;
            Arc::clone(sessions.entry(key.clone()).or_default())
        };

        cell.get_or_try_init(|| async {
            self.api.authenticate(key).await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Number of sessions established so far
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::resolve;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingApi {
        logins: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl WikiApi for CountingApi {
        async fn authenticate(&self, site: &SiteKey) -> Result<Session, ClientError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.reject {
                return Err(ClientError::LoginRejected("bad password".to_string()));
            }
            Ok(Session::new(
                site.host.clone(),
                site.api_url()?,
                reqwest::Client::new(),
            ))
        }

        async fn get_file_info(&self, _: &Session, title: &str) -> Result<FileInfo, ClientError> {
            Err(ClientError::NotFound(title.to_string()))
        }
    }

    fn key(host: &str, user: Option<&str>) -> SiteKey {
        SiteKey {
            scheme: "https".to_string(),
            host: host.to_string(),
            path: "/w/".to_string(),
            credentials: user.map(|u| Credentials::new(u, "secret")),
        }
    }

    #[test]
    fn test_api_url() {
        let reference = resolve("File:A.jpg", Some("http://localhost:8080"), Some("/")).unwrap();
        let key = SiteKey::for_reference(&reference, None);
        assert_eq!(key.api_url().unwrap().as_str(), "http://localhost:8080/api.php");

        let reference = resolve("https://en.wikipedia.org/wiki/File:A.jpg", None, None).unwrap();
        let key = SiteKey::for_reference(&reference, None);
        assert_eq!(
            key.api_url().unwrap().as_str(),
            "https://en.wikipedia.org/w/api.php"
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_user_agent() {
        assert!(USER_AGENT.starts_with("wikiget/"));
        assert!(USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_session_cache_reuses_sessions() {
        let api = Arc::new(CountingApi {
            logins: AtomicUsize::new(0),
            reject: false,
        });
        let cache = SessionCache::new(api.clone());

        let site = key("commons.wikimedia.org", Some("alice"));
        let lookups = (0..8).map(|_| cache.session(&site));
        let sessions = futures::future::join_all(lookups).await;
        assert!(sessions.iter().all(Result::is_ok));
        assert_eq!(api.logins.load(Ordering::SeqCst), 1);

        // different credentials or host means a different session
        cache.session(&key("commons.wikimedia.org", None)).await.unwrap();
        cache.session(&key("en.wikipedia.org", Some("alice"))).await.unwrap();
        assert_eq!(api.logins.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn test_session_cache_retries_failed_login() {
        let api = Arc::new(CountingApi {
            logins: AtomicUsize::new(0),
            reject: true,
        });
        let cache = SessionCache::new(api.clone());
        let site = key("private.example.org", Some("bob"));

        assert!(matches!(
            cache.session(&site).await,
            Err(ClientError::LoginRejected(_))
        ));
        assert!(cache.session(&site).await.is_err());
        assert_eq!(api.logins.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_redact() {
        let params = [("lgname", "alice"), ("lgpassword", "hunter2")];
        let shown = format!("{:?}", redact(&params));
        assert!(!shown.contains("hunter2"));
    }
}
