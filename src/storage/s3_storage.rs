use anyhow::Result;
use s3::{creds::Credentials, error::S3Error, Bucket, Region};

use super::SyncStorage;

/// S3 compatible object storage. `prefix` is prepended to every path so
/// several administrations can share a bucket.
pub struct S3Storage {
    bucket: Bucket,
    prefix: String,
}

impl S3Storage {
    pub fn new(
        endpoint: &str,
        bucket_name: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        prefix: &str,
    ) -> Result<Self> {
        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)?;
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };
        let bucket = Bucket::new(bucket_name, region, credentials)?;
        Ok(Self {
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    fn key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }
}

impl SyncStorage for S3Storage {
    fn exists(&self, path: &str) -> Result<bool> {
        match self.bucket.head_object(self.key(path)) {
            Ok((_, 200)) => Ok(true),
            Ok((_, 404)) | Err(S3Error::Http(404, _)) => Ok(false),
            Ok((_, code)) => Err(anyhow::anyhow!(
                "S3 returned status {} for path: {}",
                code,
                path
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        log::debug!("STORAGE GET: path='{}'", path);
        let response = self.bucket.get_object(self.key(path))?;
        if response.status_code() != 200 {
            log::error!(
                "STORAGE GET ERROR: S3 returned status {} for path '{}'",
                response.status_code(),
                path
            );
            return Err(anyhow::anyhow!(
                "S3 returned error status {} for path: {}",
                response.status_code(),
                path
            ));
        }
        let bytes = response.bytes().to_vec();
        log::debug!("STORAGE GET RESULT: {} bytes", bytes.len());
        Ok(bytes)
    }

    fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        log::debug!("STORAGE PUT: path='{}', size={} bytes", path, content.len());
        let response = self.bucket.put_object(self.key(path), content)?;
        if response.status_code() != 200 {
            return Err(anyhow::anyhow!(
                "S3 returned error status {} writing path: {}",
                response.status_code(),
                path
            ));
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        log::debug!("STORAGE DELETE: path='{}'", path);
        let response = self.bucket.delete_object(self.key(path))?;
        match response.status_code() {
            200 | 204 | 404 => Ok(()),
            code => Err(anyhow::anyhow!(
                "S3 returned error status {} deleting path: {}",
                code,
                path
            )),
        }
    }
}
