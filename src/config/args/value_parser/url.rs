use url::Url;

const INVALID_SCHEME: &str = "Service URL scheme must be https:// or http://";
const MISSING_HOST: &str = "Service URL must have a host";

pub fn check_scheme(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(INVALID_SCHEME.to_string());
    }
    if parsed.host_str().is_none() {
        return Err(MISSING_HOST.to_string());
    }

    Ok(url.to_string())
}
