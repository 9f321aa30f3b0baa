//! Reference resolution: user input to wiki + file title
//!
//! Accepts either a bare title (`File:Example.jpg`) or the URL of a file
//! description page (`https://en.wikipedia.org/wiki/File:Example.jpg`).
//! Pure string work, no network access.

use crate::error::ResolutionError;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

/// Wiki used when neither a URL nor `--site` names one
pub const DEFAULT_SITE: &str = "commons.wikimedia.org";

/// Script path used when neither a URL nor `--path` names one
pub const DEFAULT_PATH: &str = "/w/";

/// Namespace prefixes MediaWiki treats as files, in canonical spelling
pub const FILE_NAMESPACES: &[&str] = &["File", "Image"];

const DEFAULT_SCHEME: &str = "https";

/// A stem of at least one character, then `.ext`
static EXTENSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.+\.\w+$").unwrap());

/// A parsed file reference; immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    /// Input exactly as supplied
    pub raw: String,
    /// `http` or `https`
    pub scheme: String,
    /// Host of the wiki, with a port if one was given
    pub site_host: String,
    /// Directory holding `api.php`, always with leading and trailing `/`
    pub script_path: String,
    /// Normalized title including its namespace, e.g. `File:Example.jpg`
    pub title: String,
}

impl FileReference {
    /// Title without its namespace prefix; also the default output name
    pub fn name(&self) -> &str {
        self.title
            .split_once(':')
            .map(|(_, name)| name)
            .unwrap_or(&self.title)
    }

    /// `scheme://host`, as shown in log lines
    pub fn site_url(&self) -> String {
        format!("{}://{}", self.scheme, self.site_host)
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.title, self.site_host)
    }
}

/// Resolve `raw` into a [`FileReference`].
///
/// For a URL, host and script path come from the URL and `site`/`path` are
/// ignored. Otherwise `site`/`path` apply, falling back to [`DEFAULT_SITE`]
/// and [`DEFAULT_PATH`].
pub fn resolve(
    raw: &str,
    site: Option<&str>,
    path: Option<&str>,
) -> Result<FileReference, ResolutionError> {
    let input = raw.trim();

    if let Some(url) = parse_page_url(input) {
        if site.is_some() || path.is_some() {
            warn!("Target is a URL; ignoring site specified with --site/--path");
        }
        return resolve_url(raw, &url);
    }

    let (namespace, name) =
        split_namespace(input).ok_or_else(|| ResolutionError::MissingNamespace(raw.to_string()))?;
    let name = normalize_name(&decode(name));
    validate_name(raw, &name)?;

    let (scheme, site_host) = split_site(site.unwrap_or(DEFAULT_SITE));
    Ok(FileReference {
        raw: raw.to_string(),
        scheme,
        site_host,
        script_path: normalize_path(path.unwrap_or(DEFAULT_PATH)),
        title: format!("{}:{}", namespace, name),
    })
}

/// Only absolute http(s) URLs with a host count; `File:x.jpg` parses as a
/// `file:` URL and must fall through to the bare-title branch.
fn parse_page_url(input: &str) -> Option<Url> {
    let url = Url::parse(input).ok()?;
    let web = matches!(url.scheme(), "http" | "https");
    (web && url.host_str().is_some()).then_some(url)
}

fn resolve_url(raw: &str, url: &Url) -> Result<FileReference, ResolutionError> {
    let malformed = || ResolutionError::MalformedUrl(raw.to_string());
    let host = url.host_str().ok_or_else(malformed)?;
    let site_host = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let segments: Vec<String> = url
        .path_segments()
        .map(|s| s.map(decode).collect())
        .unwrap_or_default();

    // index.php?title=File:... form
    let query_title = url
        .query_pairs()
        .find(|(key, _)| key == "title")
        .map(|(_, value)| value.into_owned());

    let (candidate, script_path) = match query_title {
        Some(title) => {
            let script_path = segments
                .iter()
                .position(|s| s == "index.php")
                .map(|idx| join_path(&segments[..idx]));
            (title, script_path)
        }
        None => {
            let idx = segments
                .iter()
                .rposition(|s| split_namespace(s).is_some())
                .ok_or_else(malformed)?;
            (segments[idx].clone(), detect_script_path(&segments[..idx]))
        }
    };

    let (namespace, name) = split_namespace(&candidate).ok_or_else(malformed)?;
    let name = normalize_name(name);
    validate_name(raw, &name)?;

    let script_path = script_path.unwrap_or_else(|| {
        debug!(
            "Could not detect script path in '{}'; using {}",
            raw, DEFAULT_PATH
        );
        DEFAULT_PATH.to_string()
    });

    Ok(FileReference {
        raw: raw.to_string(),
        scheme: url.scheme().to_string(),
        site_host,
        script_path,
        title: format!("{}:{}", namespace, name),
    })
}

/// Best effort: `/prefix/index.php/File:X` gives `/prefix/`; the common
/// `/wiki/File:X` article path maps to the conventional `/w/`.
fn detect_script_path(before_title: &[String]) -> Option<String> {
    if let Some(idx) = before_title.iter().position(|s| s == "index.php") {
        return Some(join_path(&before_title[..idx]));
    }
    if before_title == ["wiki"] {
        return Some(DEFAULT_PATH.to_string());
    }
    None
}

fn join_path(segments: &[String]) -> String {
    let inner: Vec<&str> = segments
        .iter()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();
    if inner.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", inner.join("/"))
    }
}

/// Split `File:Name` into the canonical namespace and the rest
fn split_namespace(title: &str) -> Option<(&'static str, &str)> {
    let (prefix, rest) = title.split_once(':')?;
    let prefix = prefix.trim_matches(|c: char| c.is_whitespace() || c == '_');
    FILE_NAMESPACES
        .iter()
        .find(|ns| ns.eq_ignore_ascii_case(prefix))
        .map(|ns| (*ns, rest))
}

/// MediaWiki title rules: underscores are spaces, runs of whitespace
/// collapse, first letter is uppercase.
fn normalize_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    // MediaWiki leaves letters like `ß` alone rather than expanding them
    let mut upper = first.to_uppercase();
    let first = match (upper.next(), upper.next()) {
        (Some(single), None) => single,
        _ => first,
    };
    std::iter::once(first).chain(chars).collect()
}

fn validate_name(raw: &str, name: &str) -> Result<(), ResolutionError> {
    let invalid = |reason| ResolutionError::InvalidTitle {
        raw: raw.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("empty file name"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("file names cannot contain path separators"));
    }
    if !EXTENSION.is_match(name) {
        return Err(invalid("file name has no extension"));
    }
    Ok(())
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// `--site` may carry a scheme (`http://wiki.lan:8080`)
fn split_site(site: &str) -> (String, String) {
    let site = site.trim().trim_end_matches('/');
    match site.split_once("://") {
        Some((scheme, host)) => (scheme.to_ascii_lowercase(), host.to_string()),
        None => (DEFAULT_SCHEME.to_string(), site.to_string()),
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_title_uses_defaults() {
        let r = resolve("File:Example.jpg", None, None).unwrap();
        assert_eq!(r.title, "File:Example.jpg");
        assert_eq!(r.site_host, DEFAULT_SITE);
        assert_eq!(r.script_path, DEFAULT_PATH);
        assert_eq!(r.scheme, "https");
        assert_eq!(r.name(), "Example.jpg");
    }

    #[test]
    fn test_bare_title_uses_options() {
        let r = resolve("Image:Example.svg", Some("en.wikipedia.org"), Some("wiki/w")).unwrap();
        assert_eq!(r.title, "Image:Example.svg");
        assert_eq!(r.site_host, "en.wikipedia.org");
        assert_eq!(r.script_path, "/wiki/w/");
    }

    #[test]
    fn test_site_with_scheme() {
        let r = resolve("File:A.png", Some("http://127.0.0.1:8080/"), Some("/")).unwrap();
        assert_eq!(r.scheme, "http");
        assert_eq!(r.site_host, "127.0.0.1:8080");
        assert_eq!(r.script_path, "/");
        assert_eq!(r.site_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_missing_namespace() {
        let err = resolve("NotAFile.jpg", None, None).unwrap_err();
        assert!(matches!(err, ResolutionError::MissingNamespace(ref raw) if raw == "NotAFile.jpg"));

        let err = resolve("Category:Example.jpg", None, None).unwrap_err();
        assert!(matches!(err, ResolutionError::MissingNamespace(_)));
    }

    #[test]
    fn test_invalid_titles() {
        assert!(matches!(
            resolve("File:NoExtension", None, None),
            Err(ResolutionError::InvalidTitle { .. })
        ));
        assert!(matches!(
            resolve("File:a/b.jpg", None, None),
            Err(ResolutionError::InvalidTitle { .. })
        ));
        assert!(matches!(
            resolve("File:", None, None),
            Err(ResolutionError::InvalidTitle { .. })
        ));
        assert!(matches!(
            resolve("File:.jpg", None, None),
            Err(ResolutionError::InvalidTitle { .. })
        ));
        assert!(resolve("File:a.jpg", None, None).is_ok());
    }

    #[test]
    fn test_title_normalization() {
        let r = resolve("  file:my_holiday   photo.JPG ", None, None).unwrap();
        assert_eq!(r.title, "File:My holiday photo.JPG");
        assert_eq!(r.raw, "  file:my_holiday   photo.JPG ");

        let r = resolve("IMAGE : example.png", None, None).unwrap();
        assert_eq!(r.title, "Image:Example.png");
    }

    #[test]
    fn test_first_letter_without_single_uppercase() {
        let r = resolve("File:ßtraße.jpg", None, None).unwrap();
        assert_eq!(r.title, "File:ßtraße.jpg");
        assert_eq!(r.name(), "ßtraße.jpg");

        let r = resolve("File:éclair.png", None, None).unwrap();
        assert_eq!(r.title, "File:Éclair.png");
    }

    #[test]
    fn test_percent_decoding() {
        let r = resolve("File:Caf%C3%A9.jpg", None, None).unwrap();
        assert_eq!(r.title, "File:Café.jpg");
    }

    #[test]
    fn test_url_wins_over_options() {
        let r = resolve(
            "https://en.wikipedia.org/wiki/File:Example.jpg",
            Some("de.wikipedia.org"),
            Some("/other/"),
        )
        .unwrap();
        assert_eq!(r.site_host, "en.wikipedia.org");
        assert_eq!(r.script_path, "/w/");
        assert_eq!(r.title, "File:Example.jpg");
    }

    #[test]
    fn test_url_encoded_title() {
        let r = resolve(
            "https://commons.wikimedia.org/wiki/File:Caf%C3%A9_du_Monde.jpg",
            None,
            None,
        )
        .unwrap();
        assert_eq!(r.title, "File:Café du Monde.jpg");
        assert_eq!(r.name(), "Café du Monde.jpg");
    }

    #[test]
    fn test_url_index_php_forms() {
        let r = resolve("http://wiki.example.org/mw/index.php/Image:Logo.png", None, None).unwrap();
        assert_eq!(r.script_path, "/mw/");
        assert_eq!(r.scheme, "http");

        let r = resolve(
            "https://wiki.example.org/w/index.php?title=File:Logo.png&action=history",
            None,
            None,
        )
        .unwrap();
        assert_eq!(r.script_path, "/w/");
        assert_eq!(r.title, "File:Logo.png");

        let r = resolve("https://wiki.example.org:8443/index.php?title=File:Logo.png", None, None).unwrap();
        assert_eq!(r.site_host, "wiki.example.org:8443");
        assert_eq!(r.script_path, "/");
    }

    #[test]
    fn test_url_unknown_layout_falls_back() {
        let r = resolve("https://wiki.example.org/pages/File:Logo.png", None, None).unwrap();
        assert_eq!(r.script_path, DEFAULT_PATH);
    }

    #[test]
    fn test_malformed_url() {
        let err = resolve("https://en.wikipedia.org/wiki/Main_Page", None, None).unwrap_err();
        assert!(matches!(err, ResolutionError::MalformedUrl(_)));

        let err = resolve("https://en.wikipedia.org/w/index.php?title=Main_Page", None, None).unwrap_err();
        assert!(matches!(err, ResolutionError::MalformedUrl(_)));
    }
}
