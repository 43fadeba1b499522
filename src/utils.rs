use reqwest::Url;

/// Keeps scheme, host and port of a URL and hides the path, which may carry
/// instance identifiers.
pub fn mask_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) if parsed.has_host() => {
            let host = parsed.host_str().unwrap_or_default();
            let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();
            let path = if parsed.path().trim_matches('/').is_empty() {
                ""
            } else {
                "/***"
            };
            format!("{}://{host}{port}{path}", parsed.scheme())
        }
        _ => "***".to_string(),
    }
}

/// Shows only the last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}
