//! Source URL validation and history normalisation.

use url::Url;

use crate::error::{EngineError, Result};

/// Parses a user-supplied URL, accepting only absolute `http`/`https` URLs.
pub fn parse_source_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation("empty URL"));
    }
    let url = Url::parse(trimmed)
        .map_err(|e| EngineError::validation(format!("invalid URL {trimmed}: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(EngineError::validation(format!(
                "unsupported URL scheme {other}: {trimmed}"
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(EngineError::validation(format!("URL has no host: {trimmed}")));
    }
    Ok(url)
}

const YOUTUBE_KEPT_PARAMS: [&str; 3] = ["v", "list", "id"];
const TRACKING_PARAMS: [&str; 3] = ["si", "feature", "ab_channel"];

/// Key under which a URL is recorded in the history store, so that trivially
/// different links to the same media compare equal:
/// - scheme and fragment are dropped, host is lowercased
/// - `www.` and `m.` host prefixes are dropped
/// - `youtu.be/ID` becomes `youtube.com/watch?v=ID`
/// - YouTube queries keep only `v`, `list` and `id`; other hosts lose `utm_*`,
///   `si`, `feature` and `ab_channel`
/// - a trailing `/` is trimmed
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = parse_source_url(raw)?;
    url.set_fragment(None);

    let mut host = url.host_str().unwrap_or_default().to_string();
    for prefix in ["www.", "m."] {
        if let Some(rest) = host.strip_prefix(prefix) {
            host = rest.to_string();
        }
    }
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut path = url.path().to_string();
    if host == "youtu.be" {
        let video = path.trim_matches('/').to_string();
        if !video.is_empty() {
            host = "youtube.com".to_string();
            path = "/watch".to_string();
            params.retain(|(k, _)| k != "v");
            params.insert(0, ("v".to_string(), video));
        }
    }

    let youtube = host.contains("youtube");
    params.retain(|(k, _)| {
        if youtube {
            YOUTUBE_KEPT_PARAMS.contains(&k.as_str())
        } else {
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        }
    });

    let mut key = host;
    if let Some(port) = url.port() {
        key.push_str(&format!(":{port}"));
    }
    key.push_str(&path);
    if params.is_empty() {
        while key.ends_with('/') {
            key.pop();
        }
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&params)
            .finish();
        key.push('?');
        key.push_str(&query);
    }
    Ok(key)
}
