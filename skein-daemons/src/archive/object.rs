//! Object store archive backend
//!
//! Uploads artifacts to the site's S3-compatible store over plain HTTP:
//! `PUT {url}/{bucket}/{key}` with key `<subpath>/<pipeline>/<id>/<file>`.
//! Successful uploads rewrite the payload entries to their object URLs.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use skein_core::domain::workspace::S3Site;
use tracing::debug;

use crate::archive::ArchiveError;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Client for one site's object store.
#[derive(Debug)]
pub struct ObjectStore {
    client: Client,
    url: String,
    bucket: String,
}

impl ObjectStore {
    pub fn new(site: &S3Site) -> Self {
        Self {
            client: Client::new(),
            url: site.url.trim_end_matches('/').to_string(),
            bucket: site.bucket.clone(),
        }
    }

    /// Uploads the payload files under the key prefix.
    pub async fn upload(
        &self,
        prefix: &str,
        payload: &mut [String],
    ) -> Result<(), ArchiveError> {
        for entry in payload.iter_mut() {
            let source = Path::new(entry);
            if !source.exists() {
                return Err(ArchiveError::MissingSource(entry.clone()));
            }
            let key = format!("{prefix}/{}", file_name(source));
            let body = tokio::fs::read(source).await?;
            let target = format!("{}/{}/{}", self.url, self.bucket, key);

            let response = self
                .client
                .put(&target)
                .timeout(UPLOAD_TIMEOUT)
                .body(body)
                .send()
                .await
                .map_err(|err| ArchiveError::Upload(format!("{target}: {err}")))?;
            if !response.status().is_success() {
                return Err(ArchiveError::Upload(format!(
                    "{target}: status {}",
                    response.status()
                )));
            }

            debug!(from = %entry, %target, "uploaded");
            *entry = format!("s3://{}/{}", self.bucket, key);
        }
        Ok(())
    }

    /// Removes objects under the key prefix for the payload files.
    pub async fn delete(&self, prefix: &str, payload: &[String]) -> Result<(), ArchiveError> {
        for entry in payload {
            let key = format!("{prefix}/{}", file_name(Path::new(entry)));
            let target = format!("{}/{}/{}", self.url, self.bucket, key);
            let response = self
                .client
                .delete(&target)
                .send()
                .await
                .map_err(|err| ArchiveError::Upload(format!("{target}: {err}")))?;
            if !response.status().is_success() && response.status().as_u16() != 404 {
                return Err(ArchiveError::Upload(format!(
                    "{target}: status {}",
                    response.status()
                )));
            }
            debug!(%target, "removed");
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> S3Site {
        S3Site {
            url: "http://objects.local:9000/".to_string(),
            bucket: "skein".to_string(),
            subpath: "archive".to_string(),
        }
    }

    #[test]
    fn test_store_trims_trailing_slash() {
        let store = ObjectStore::new(&site());
        assert_eq!(store.url, "http://objects.local:9000");
        assert_eq!(store.bucket, "skein");
    }

    #[tokio::test]
    async fn test_upload_missing_source() {
        let store = ObjectStore::new(&site());
        let mut payload = vec!["/nope/gone.dat".to_string()];
        let err = store.upload("archive/p/w-1", &mut payload).await.unwrap_err();
        assert!(matches!(err, ArchiveError::MissingSource(_)));
    }
}
