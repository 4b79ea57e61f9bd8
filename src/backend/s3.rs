use log::{debug, info};
use regex::Regex;
use rusoto_core::{HttpClient, Region};
use rusoto_credential::DefaultCredentialsProvider;
use rusoto_s3::{GlacierJobParameters, HeadObjectRequest, ListObjectsV2Request, RestoreObjectRequest, RestoreRequest, S3Client, S3};
use tokio::runtime::Runtime;

use crate::backend::store::FileStore;
use crate::backend::FileRef;
use crate::error::BackendError;

/// Days a restored object stays readable
static RESTORE_DAYS: i64 = 7;

/// Objects in an S3 bucket, folders being key prefixes
///
/// rusoto is async; calls are driven to completion on a private runtime so the rest of the
/// engine stays synchronous.
pub struct S3Store {
    client: S3Client,
    bucket: String,
    runtime: Runtime,
}

impl S3Store {
    pub fn new(bucket: &str, region: &str) -> Result<S3Store, BackendError> {
        let region: Region = region.parse().map_err(|err| BackendError::Store(format!("bad region {}: {}", region, err)))?;
        let dispatcher = HttpClient::new().map_err(|err| BackendError::Store(err.to_string()))?;
        let credentials = DefaultCredentialsProvider::new().map_err(|err| BackendError::Store(err.to_string()))?;
        let runtime = Runtime::new().map_err(|err| BackendError::Store(format!("can't start runtime: {}", err)))?;
        info!("Listing files from s3://{} ({})", bucket, region.name());
        Ok(S3Store { client: S3Client::new_with(dispatcher, credentials, region), bucket: bucket.to_string(), runtime })
    }
}

impl FileStore for S3Store {
    fn list(&self, folder: &str, pattern: &Regex) -> Result<Vec<FileRef>, BackendError> {
        let prefix = key_prefix(folder);
        let mut files = Vec::new();
        let mut continuation_token = None;

        loop {
            let request = ListObjectsV2Request {
                bucket: self.bucket.clone(),
                prefix: Some(prefix.clone()),
                delimiter: Some("/".to_string()),
                continuation_token: continuation_token.take(),
                ..Default::default()
            };
            let output = self
                .runtime
                .block_on(self.client.list_objects_v2(request))
                .map_err(|err| BackendError::Store(format!("can't list s3://{}/{}: {}", self.bucket, prefix, err)))?;

            for object in output.contents.unwrap_or_default() {
                let Some(key) = object.key else { continue };
                let name = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
                if !name.is_empty() && pattern.is_match(&name) {
                    files.push(FileRef { id: key, name, folder: folder.to_string() });
                }
            }

            match output.next_continuation_token {
                Some(token) if output.is_truncated.unwrap_or(false) => continuation_token = Some(token),
                _ => break,
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("{} object(s) under s3://{}/{} match {}", files.len(), self.bucket, prefix, pattern);
        Ok(files)
    }

    fn is_archived(&self, file: &FileRef) -> Result<bool, BackendError> {
        let request = HeadObjectRequest { bucket: self.bucket.clone(), key: file.id.clone(), ..Default::default() };
        let output = self
            .runtime
            .block_on(self.client.head_object(request))
            .map_err(|err| BackendError::Store(format!("can't read s3://{}/{}: {}", self.bucket, file.id, err)))?;
        Ok(archived(output.storage_class.as_deref(), output.restore.as_deref()))
    }

    fn request_unarchive(&self, files: &[FileRef]) -> Result<(), BackendError> {
        for file in files {
            info!("Requesting restore of s3://{}/{}", self.bucket, file.id);
            let request = RestoreObjectRequest {
                bucket: self.bucket.clone(),
                key: file.id.clone(),
                restore_request: Some(RestoreRequest {
                    days: Some(RESTORE_DAYS),
                    glacier_job_parameters: Some(GlacierJobParameters { tier: "Standard".to_string() }),
                    ..Default::default()
                }),
                ..Default::default()
            };
            self.runtime
                .block_on(self.client.restore_object(request))
                .map_err(|err| BackendError::Store(format!("can't restore s3://{}/{}: {}", self.bucket, file.id, err)))?;
        }
        Ok(())
    }
}

/// Key prefix for a folder: no leading slash, one trailing slash
fn key_prefix(folder: &str) -> String {
    let folder = folder.trim_matches('/');
    match folder.is_empty() {
        true => String::new(),
        false => format!("{}/", folder),
    }
}

/// Cold storage classes count as archived until a restore has completed
fn archived(storage_class: Option<&str>, restore: Option<&str>) -> bool {
    let cold = matches!(storage_class, Some("GLACIER") | Some("DEEP_ARCHIVE"));
    let restored = restore.map_or(false, |status| status.contains("ongoing-request=\"false\""));
    cold && !restored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folders_become_key_prefixes() {
        assert_eq!(key_prefix("/output/run1/sentieon/"), "output/run1/sentieon/");
        assert_eq!(key_prefix(""), "");
    }

    #[test]
    fn glacier_objects_are_archived_until_restored() {
        assert!(archived(Some("GLACIER"), None));
        assert!(archived(Some("DEEP_ARCHIVE"), Some("ongoing-request=\"true\"")));
        assert!(!archived(Some("GLACIER"), Some("ongoing-request=\"false\", expiry-date=\"Fri, 21 Dec 2012 00:00:00 GMT\"")));
        assert!(!archived(Some("STANDARD"), None));
        assert!(!archived(None, None));
    }
}
