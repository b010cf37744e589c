//! Stylesheet reference extraction and rewriting
//!
//! Cached stylesheets must not point back at the origin server, otherwise
//! playback would still depend on it. Every `url(...)` and `@import "..."`
//! reference that can be cached is rewritten to the cache service location of
//! the same asset, using the same key derivation the cacher stores it under.

use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

static RE_CSS_URL: OnceLock<Regex> = OnceLock::new();
static RE_CSS_IMPORT: OnceLock<Regex> = OnceLock::new();

fn css_url_regex() -> &'static Regex {
    RE_CSS_URL.get_or_init(|| {
        Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).unwrap()
    })
}

fn css_import_regex() -> &'static Regex {
    RE_CSS_IMPORT.get_or_init(|| Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).unwrap())
}

/// Schemes that never point at a fetchable resource
const NON_CACHABLE_PREFIXES: &[&str] = &["data:", "blob:", "about:", "javascript:", "#"];

/// Quote character and raw target of a reference match
fn reference_target<'t>(caps: &Captures<'t>) -> Option<(&'static str, &'t str)> {
    if let Some(m) = caps.get(1) {
        Some(("\"", m.as_str()))
    } else if let Some(m) = caps.get(2) {
        Some(("'", m.as_str()))
    } else {
        caps.get(3).map(|m| ("", m.as_str()))
    }
}

/// Rewrites stylesheet references to point at the cache service
#[derive(Debug, Clone)]
pub struct AssetRewriter {
    /// Base URL of the cache service, without trailing slash
    assets_origin: String,
}

impl AssetRewriter {
    /// Create a rewriter for the cache service at `assets_origin`
    pub fn new(assets_origin: &Url) -> Self {
        Self {
            assets_origin: assets_origin.as_str().trim_end_matches('/').to_string(),
        }
    }

    /// Base URL of the cache service
    pub fn assets_origin(&self) -> &str {
        &self.assets_origin
    }

    /// Every raw reference in a stylesheet, without duplicates
    pub fn extract_css_urls(css: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for re in [css_url_regex(), css_import_regex()] {
            for caps in re.captures_iter(css) {
                if let Some((_, raw)) = reference_target(&caps) {
                    let raw = raw.trim();
                    if !raw.is_empty() && seen.insert(raw.to_string()) {
                        urls.push(raw.to_string());
                    }
                }
            }
        }

        urls
    }

    /// Resolve `raw` against `base` and return it if it is worth caching
    pub fn resolve_cachable_url(&self, base: &Url, raw: &str) -> Option<Url> {
        let raw = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        if raw.is_empty() {
            return None;
        }

        let lower = raw.to_ascii_lowercase();
        if NON_CACHABLE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return None;
        }

        let mut resolved = base.join(raw).ok()?;
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            return None;
        }
        resolved.set_fragment(None);

        if self.is_cache_url(resolved.as_str()) {
            return None;
        }

        Some(resolved)
    }

    /// Cache service location of a session asset
    pub fn cache_url(&self, session_id: u64, url: &Url) -> String {
        format!("{}/{}", self.assets_origin, super::asset_key(session_id, url))
    }

    /// Rewrite every cachable reference in `css` to its cache service location
    pub fn rewrite_css(&self, session_id: u64, base: &Url, css: &str) -> String {
        let rewritten = css_url_regex().replace_all(css, |caps: &Captures| {
            match self.rewrite_reference(session_id, base, caps) {
                Some((quote, target)) => format!("url({}{}{})", quote, target, quote),
                None => caps[0].to_string(),
            }
        });

        css_import_regex()
            .replace_all(&rewritten, |caps: &Captures| {
                match self.rewrite_reference(session_id, base, caps) {
                    Some((quote, target)) => format!("@import {}{}{}", quote, target, quote),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn rewrite_reference(
        &self,
        session_id: u64,
        base: &Url,
        caps: &Captures,
    ) -> Option<(&'static str, String)> {
        let (quote, raw) = reference_target(caps)?;
        let resolved = self.resolve_cachable_url(base, raw)?;
        Some((quote, self.cache_url(session_id, &resolved)))
    }

    fn is_cache_url(&self, url: &str) -> bool {
        url == self.assets_origin
            || url
                .strip_prefix(self.assets_origin.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> AssetRewriter {
        AssetRewriter::new(&Url::parse("https://cache.test/assets/").unwrap())
    }

    fn base() -> Url {
        Url::parse("https://example.com/css/app.css").unwrap()
    }

    #[test]
    fn test_extract_all_reference_forms() {
        let css = r#"
            @import url(sub.css);
            @import "print.css";
            @import 'theme.css';
            .a { background: url("img/a.png") }
            .b { background: URL( 'img/b.png' ) }
            .c { background: url(img/a.png) }
        "#;

        let urls = AssetRewriter::extract_css_urls(css);
        assert_eq!(urls.len(), 5);
        for expected in ["sub.css", "print.css", "theme.css", "img/a.png", "img/b.png"] {
            assert!(urls.iter().any(|u| u == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_extract_ignores_empty_references() {
        assert!(AssetRewriter::extract_css_urls(".a { background: url() }").is_empty());
        assert!(AssetRewriter::extract_css_urls(".a { color: red }").is_empty());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let r = rewriter();
        assert_eq!(
            r.resolve_cachable_url(&base(), "sub.css").unwrap().as_str(),
            "https://example.com/css/sub.css"
        );
        assert_eq!(
            r.resolve_cachable_url(&base(), "/fonts/x.woff2").unwrap().as_str(),
            "https://example.com/fonts/x.woff2"
        );
        assert_eq!(
            r.resolve_cachable_url(&base(), "//cdn.example.org/a.png").unwrap().as_str(),
            "https://cdn.example.org/a.png"
        );
        assert_eq!(
            r.resolve_cachable_url(&base(), "img/a.svg#icon").unwrap().as_str(),
            "https://example.com/css/img/a.svg"
        );
    }

    #[test]
    fn test_resolve_rejects_non_cachable() {
        let r = rewriter();
        assert!(r.resolve_cachable_url(&base(), "data:image/png;base64,AAAA").is_none());
        assert!(r.resolve_cachable_url(&base(), "DATA:image/png;base64,AAAA").is_none());
        assert!(r.resolve_cachable_url(&base(), "#filter").is_none());
        assert!(r.resolve_cachable_url(&base(), "  ").is_none());
        assert!(r.resolve_cachable_url(&base(), "ftp://example.com/a.png").is_none());
        assert!(r
            .resolve_cachable_url(&base(), "https://cache.test/assets/42/abc.png")
            .is_none());
        assert!(r
            .resolve_cachable_url(&base(), "https://cache.test/assets-other/a.png")
            .is_some());
    }

    #[test]
    fn test_rewrite_points_at_cache() {
        let r = rewriter();
        let css = r#"@import url(sub.css); @import "x.css"; .a{background:url('a.png')} .d{background:url(data:image/png;base64,AA)}"#;
        let out = r.rewrite_css(42, &base(), css);

        let sub = Url::parse("https://example.com/css/sub.css").unwrap();
        let x = Url::parse("https://example.com/css/x.css").unwrap();
        let a = Url::parse("https://example.com/css/a.png").unwrap();

        assert!(out.contains(&format!("@import url({});", r.cache_url(42, &sub))));
        assert!(out.contains(&format!("@import \"{}\";", r.cache_url(42, &x))));
        assert!(out.contains(&format!("url('{}')", r.cache_url(42, &a))));
        assert!(out.contains("url(data:image/png;base64,AA)"));
        assert!(!out.contains("example.com"));
    }

    #[test]
    fn test_rewrite_is_stable_for_cached_references() {
        let r = rewriter();
        let once = r.rewrite_css(7, &base(), ".a{background:url(a.png)}");
        let twice = r.rewrite_css(7, &base(), &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_cache_url_uses_asset_key() {
        let r = rewriter();
        let u = Url::parse("https://example.com/a.png").unwrap();
        assert_eq!(
            r.cache_url(3, &u),
            format!("https://cache.test/assets/{}", crate::assets::asset_key(3, &u))
        );
    }
}
