#![forbid(unsafe_code)]

//! Minimal Google Cloud plumbing for cloud mode: an access token from the
//! GCE metadata server, Secret Manager access for the API key, and Cloud
//! Storage object download/upload over the JSON API.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use std::env;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const STORAGE_BASE: &str = "https://storage.googleapis.com";
const SECRET_MANAGER_BASE: &str = "https://secretmanager.googleapis.com/v1";

/// Obtains an OAuth access token: the `GCP_ACCESS_TOKEN` environment
/// variable wins, otherwise the instance metadata server is asked (which
/// works on GCE and Cloud Run with an attached service account).
pub fn fetch_access_token(agent: &ureq::Agent) -> Result<String> {
    if let Ok(token) = env::var("GCP_ACCESS_TOKEN") {
        let token = token.trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    let response: Value = agent
        .get(METADATA_TOKEN_URL)
        .set("Metadata-Flavor", "Google")
        .call()
        .context("requesting an access token from the metadata server")?
        .into_json()
        .context("decoding the metadata server token response")?;
    response["access_token"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("metadata server returned no access_token"))
}

/// Reads the latest version of a Secret Manager secret as UTF-8 text.
pub fn access_secret(
    agent: &ureq::Agent,
    token: &str,
    project_id: &str,
    secret_name: &str,
) -> Result<String> {
    let url = format!(
        "{SECRET_MANAGER_BASE}/projects/{project_id}/secrets/{secret_name}/versions/latest:access"
    );
    let response: Value = agent
        .get(&url)
        .set("Authorization", &format!("Bearer {token}"))
        .call()
        .with_context(|| format!("accessing secret {secret_name}"))?
        .into_json()
        .context("decoding the secret payload response")?;
    let encoded = response["payload"]["data"]
        .as_str()
        .ok_or_else(|| anyhow!("secret {secret_name} has no payload"))?;
    let bytes = BASE64
        .decode(encoded)
        .context("base64-decoding the secret payload")?;
    String::from_utf8(bytes).context("secret payload is not UTF-8")
}

pub fn download_object(
    agent: &ureq::Agent,
    token: &str,
    bucket: &str,
    object: &str,
) -> Result<String> {
    agent
        .get(&object_media_url(bucket, object))
        .set("Authorization", &format!("Bearer {token}"))
        .call()
        .with_context(|| format!("downloading gs://{bucket}/{object}"))?
        .into_string()
        .with_context(|| format!("reading gs://{bucket}/{object}"))
}

pub fn upload_object(
    agent: &ureq::Agent,
    token: &str,
    bucket: &str,
    object: &str,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    agent
        .post(&object_upload_url(bucket, object))
        .set("Authorization", &format!("Bearer {token}"))
        .set("Content-Type", content_type)
        .send_bytes(body)
        .with_context(|| format!("uploading gs://{bucket}/{object}"))?;
    Ok(())
}

/// Object names are one path segment in the JSON API, so slashes inside
/// them must be percent-encoded.
fn object_media_url(bucket: &str, object: &str) -> String {
    format!(
        "{STORAGE_BASE}/storage/v1/b/{bucket}/o/{}?alt=media",
        urlencoding::encode(object)
    )
}

fn object_upload_url(bucket: &str, object: &str) -> String {
    format!(
        "{STORAGE_BASE}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={}",
        urlencoding::encode(object)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_urls_encode_slashes_in_names() {
        assert_eq!(
            object_media_url("bucket", "input/url_list.txt"),
            "https://storage.googleapis.com/storage/v1/b/bucket/o/input%2Furl_list.txt?alt=media"
        );
        assert_eq!(
            object_upload_url("bucket", "output/20240101/file.csv"),
            "https://storage.googleapis.com/upload/storage/v1/b/bucket/o?uploadType=media&name=output%2F20240101%2Ffile.csv"
        );
    }
}
