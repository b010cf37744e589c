//! Media type classification for cached assets

/// Known web asset extensions and their media types
const EXTENSION_TYPES: &[(&str, &str)] = &[
    ("css", "text/css; charset=utf-8"),
    ("js", "text/javascript; charset=utf-8"),
    ("mjs", "text/javascript; charset=utf-8"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("ico", "image/vnd.microsoft.icon"),
    ("bmp", "image/bmp"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("txt", "text/plain; charset=utf-8"),
    ("xml", "text/xml; charset=utf-8"),
    ("wasm", "application/wasm"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mp3", "audio/mpeg"),
];

/// Guess a media type from the extension of a URL path
pub fn content_type_for_path(path: &str) -> Option<&'static str> {
    let ext = super::path_extension(path)?;
    EXTENSION_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, content_type)| *content_type)
}

/// Whether a media type denotes a stylesheet
pub fn is_stylesheet(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..8)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("text/css"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path("/a/b/site.css"), Some("text/css; charset=utf-8"));
        assert_eq!(content_type_for_path("/fonts/x.WOFF2"), Some("font/woff2"));
        assert_eq!(content_type_for_path("/img/logo.png"), Some("image/png"));
        assert_eq!(content_type_for_path("/unknown.xyz"), None);
        assert_eq!(content_type_for_path("/"), None);
    }

    #[test]
    fn test_is_stylesheet() {
        assert!(is_stylesheet("text/css"));
        assert!(is_stylesheet("text/css; charset=utf-8"));
        assert!(is_stylesheet("TEXT/CSS"));
        assert!(!is_stylesheet("text/javascript"));
        assert!(!is_stylesheet("text/cs"));
        assert!(!is_stylesheet(""));
    }
}
