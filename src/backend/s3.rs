//! S3 backend implementation
//!
//! Exposes Amazon S3 or S3-compatible storage (MinIO, LocalStack, etc.)
//! through the cooperative backend interface. Backend paths are object keys;
//! a mount's bound root acts as the key prefix.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_stream::try_stream;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use tracing::{debug, trace};

use crate::backend::{
    AsyncBackend, AsyncBackendFile, Attributes, Capabilities, DirEntry, OpenMode,
};
use crate::config::S3Config;
use crate::error::{FuseBridgeError, Result};

/// S3 metadata key for storing POSIX file mode
const S3_MODE_METADATA_KEY: &str = "posix-mode";

/// S3 backend for Amazon S3 and S3-compatible storage
pub struct S3Backend {
    client: Client,
    bucket: String,
    read_only: bool,
}

impl S3Backend {
    /// Create a new S3 backend from configuration
    pub async fn new(config: S3Config) -> Result<Self> {
        let mut sdk_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(Region::new(region.clone()));
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(s3_config_builder.build()),
            bucket: config.bucket,
            read_only: config.read_only,
        })
    }

    /// Source URI for logs and mount names
    pub fn uri(&self, root: &str) -> String {
        format!("s3://{}/{}", self.bucket, root.trim_start_matches('/'))
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(FuseBridgeError::NotSupported(
                "S3 bucket mounted read-only".to_string(),
            ));
        }
        Ok(())
    }

    /// Create S3 metadata HashMap with mode
    fn mode_to_metadata(mode: u32) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert(S3_MODE_METADATA_KEY.to_string(), format!("{:o}", mode));
        metadata
    }

    async fn put_empty(&self, key: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(Vec::new()))
            .send()
            .await
            .map_err(|e| FuseBridgeError::Backend(format!("S3 PutObject error: {}", e)))?;
        Ok(())
    }

    /// Stream every key under `prefix`, optionally stopping at `/`
    fn list_stream(
        &self,
        prefix: String,
        delimited: bool,
    ) -> impl Stream<Item = Result<ListedKey>> + Send + 'static {
        let client = self.client.clone();
        let bucket = self.bucket.clone();

        try_stream! {
            let mut continuation_token: Option<String> = None;

            loop {
                let mut request = client.list_objects_v2().bucket(&bucket).prefix(&prefix);
                if delimited {
                    request = request.delimiter("/");
                }
                if let Some(token) = continuation_token.take() {
                    request = request.continuation_token(token);
                }

                let result = request.send().await.map_err(|e| {
                    let service_error = e.into_service_error();
                    FuseBridgeError::Backend(format!(
                        "S3 ListObjectsV2 error for prefix '{}': {:?}",
                        prefix, service_error
                    ))
                })?;

                for obj in result.contents() {
                    if let Some(key) = obj.key() {
                        yield ListedKey::Object {
                            key: key.to_string(),
                            size: obj.size().unwrap_or(0) as u64,
                            mtime: obj
                                .last_modified()
                                .map(|dt| timestamp(dt.secs()))
                                .unwrap_or(SystemTime::UNIX_EPOCH),
                        };
                    }
                }

                for common_prefix in result.common_prefixes() {
                    if let Some(p) = common_prefix.prefix() {
                        yield ListedKey::Prefix(p.to_string());
                    }
                }

                if result.is_truncated().unwrap_or(false) {
                    continuation_token = result.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }
        }
    }
}

enum ListedKey {
    Object {
        key: String,
        size: u64,
        mtime: SystemTime,
    },
    Prefix(String),
}

fn timestamp(secs: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH
        .checked_add(Duration::from_secs(secs.max(0) as u64))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Convert a backend path to an S3 key
fn path_to_key(path: &str) -> String {
    path.trim_start_matches('/').trim_end_matches('/').to_string()
}

fn dir_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

#[async_trait]
impl AsyncBackend for S3Backend {
    fn name(&self) -> &str {
        "s3"
    }

    fn capabilities(&self) -> Capabilities {
        if self.read_only {
            Capabilities::read_only()
        } else {
            Capabilities {
                write: true,
                random_write: false, // S3 doesn't support partial writes
                rename: false,       // S3 has no native rename
                set_mode: true,      // Stored in S3 user metadata
            }
        }
    }

    async fn info(&self, path: &str) -> Result<Attributes> {
        let key = path_to_key(path);
        trace!("info: path={} key={}", path, key);

        // Bucket root always exists
        if key.is_empty() {
            return Ok(Attributes::directory(SystemTime::now()));
        }

        // First try as a file (HeadObject)
        let head_result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        match head_result {
            Ok(output) => {
                let size = output.content_length().unwrap_or(0) as u64;
                let mtime = output
                    .last_modified()
                    .map(|dt| timestamp(dt.secs()))
                    .unwrap_or(SystemTime::now());

                // Read mode from S3 user metadata
                let mode = output
                    .metadata()
                    .and_then(|m| m.get(S3_MODE_METADATA_KEY))
                    .and_then(|v| u32::from_str_radix(v, 8).ok());

                let attrs = Attributes::file(size, mtime);
                return Ok(match mode {
                    Some(mode) => attrs.with_mode(mode),
                    None => attrs,
                });
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if !service_error.is_not_found() {
                    return Err(FuseBridgeError::Backend(format!(
                        "S3 HeadObject error: {}",
                        service_error
                    )));
                }
            }
        }

        // Try as a directory (check if any objects exist with this prefix)
        let list_result = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(dir_prefix(&key))
            .max_keys(1)
            .send()
            .await
            .map_err(|e| {
                FuseBridgeError::Backend(format!(
                    "S3 ListObjectsV2 error for '{}': {:?}",
                    key,
                    e.into_service_error()
                ))
            })?;

        if list_result.key_count().unwrap_or(0) > 0 || !list_result.common_prefixes().is_empty()
        {
            return Ok(Attributes::directory(SystemTime::now()));
        }

        Err(FuseBridgeError::NotFound(path.to_string()))
    }

    async fn ls(&self, path: &str, detail: bool) -> Result<Vec<DirEntry>> {
        let prefix = dir_prefix(&path_to_key(path));
        debug!("ls: path={} prefix={}", path, prefix);

        let listed: Vec<ListedKey> = self.list_stream(prefix.clone(), true).try_collect().await?;

        let mut entries = Vec::with_capacity(listed.len());
        for item in listed {
            match item {
                ListedKey::Object { key, size, mtime } => {
                    // Skip the directory's own marker object
                    if key == prefix || key.ends_with('/') {
                        continue;
                    }
                    if detail {
                        entries.push(DirEntry::detailed(key, Attributes::file(size, mtime)));
                    } else {
                        entries.push(DirEntry::new(key));
                    }
                }
                ListedKey::Prefix(p) => {
                    if detail {
                        entries.push(DirEntry::detailed(p, Attributes::directory(SystemTime::now())));
                    } else {
                        entries.push(DirEntry::new(p));
                    }
                }
            }
        }

        if entries.is_empty() && !prefix.is_empty() && !self.info(path).await?.is_dir() {
            return Err(FuseBridgeError::NotADirectory(path.to_string()));
        }

        Ok(entries)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn AsyncBackendFile>> {
        let key = path_to_key(path);
        debug!("open: key={} mode={:?}", key, mode);

        match mode {
            OpenMode::Read => {
                let attrs = self.info(path).await?;
                if attrs.is_dir() {
                    return Err(FuseBridgeError::IsADirectory(path.to_string()));
                }
                Ok(Box::new(S3Reader {
                    client: self.client.clone(),
                    bucket: self.bucket.clone(),
                    key,
                    size: attrs.size,
                    pos: 0,
                }))
            }
            OpenMode::Write => {
                self.check_writable()?;
                Ok(Box::new(S3Writer {
                    client: self.client.clone(),
                    bucket: self.bucket.clone(),
                    key,
                    buffer: BytesMut::new(),
                    dirty: true,
                }))
            }
        }
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        // Directories in S3 are virtual; a zero-byte "key/" object marks one
        let key = dir_prefix(&path_to_key(path));
        debug!("mkdir: key={}", key);
        self.put_empty(&key).await
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        let key = dir_prefix(&path_to_key(path));
        debug!("rmdir: key={}", key);

        let list_result = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&key)
            .max_keys(2) // 1 for dir placeholder + 1 for any content
            .send()
            .await
            .map_err(|e| {
                FuseBridgeError::Backend(format!(
                    "S3 ListObjectsV2 rmdir check error: {:?}",
                    e.into_service_error()
                ))
            })?;

        if list_result
            .contents()
            .iter()
            .any(|obj| obj.key().map(|k| k != key).unwrap_or(true))
        {
            return Err(FuseBridgeError::NotEmpty(path.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| FuseBridgeError::Backend(format!("S3 DeleteObject error: {}", e)))?;

        Ok(())
    }

    async fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        self.check_writable()?;
        let key = path_to_key(path);
        debug!("rm: key={} recursive={}", key, recursive);

        if !recursive {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| FuseBridgeError::Backend(format!("S3 DeleteObject error: {}", e)))?;
            return Ok(());
        }

        // Delete the object itself and everything under its prefix
        let mut keys = vec![key.clone()];
        let listed: Vec<ListedKey> = self.list_stream(dir_prefix(&key), false).try_collect().await?;
        keys.extend(listed.into_iter().filter_map(|item| match item {
            ListedKey::Object { key, .. } => Some(key),
            ListedKey::Prefix(_) => None,
        }));

        // DeleteObjects accepts at most 1000 keys per request
        for chunk in keys.chunks(1000) {
            let objects = chunk
                .iter()
                .map(|k| {
                    aws_sdk_s3::types::ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| FuseBridgeError::Backend(format!("Invalid key {}: {}", k, e)))
                })
                .collect::<Result<Vec<_>>>()?;

            let delete = aws_sdk_s3::types::Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| FuseBridgeError::Backend(format!("Failed to build delete: {}", e)))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| FuseBridgeError::Backend(format!("S3 DeleteObjects error: {}", e)))?;
        }

        Ok(())
    }

    async fn touch(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        let key = path_to_key(path);
        debug!("touch: key={}", key);
        self.put_empty(&key).await
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.check_writable()?;
        let key = path_to_key(path);
        debug!("chmod: key={} mode={:o}", key, mode);

        // S3 doesn't allow updating metadata in place, so we need to copy the object
        // to itself with new metadata
        let copy_source = format!("{}/{}", self.bucket, key);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(&key)
            .copy_source(&copy_source)
            .metadata_directive(aws_sdk_s3::types::MetadataDirective::Replace)
            .set_metadata(Some(Self::mode_to_metadata(mode & 0o7777)))
            .send()
            .await
            .map_err(|e| FuseBridgeError::Backend(format!("S3 CopyObject error: {}", e)))?;

        Ok(())
    }
}

/// Ranged reader over one object
struct S3Reader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    pos: u64,
}

#[async_trait]
impl AsyncBackendFile for S3Reader {
    async fn read(&mut self, size: usize) -> Result<Bytes> {
        if size == 0 || self.pos >= self.size {
            return Ok(Bytes::new());
        }
        let end = (self.pos + size as u64).min(self.size) - 1;
        let range = format!("bytes={}-{}", self.pos, end);
        trace!("read: key={} range={}", self.key, range);

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    FuseBridgeError::NotFound(self.key.clone())
                } else {
                    FuseBridgeError::Backend(format!("S3 GetObject error: {}", service_error))
                }
            })?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| FuseBridgeError::Backend(format!("S3 read body error: {}", e)))?
            .into_bytes();

        self.pos += body.len() as u64;
        Ok(body)
    }

    async fn write(&mut self, _data: &[u8]) -> Result<usize> {
        Err(FuseBridgeError::NotSupported("write on read stream".to_string()))
    }

    async fn seek(&mut self, offset: u64) -> Result<u64> {
        self.pos = offset;
        Ok(offset)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Buffered writer; the object is uploaded whole on flush/close
struct S3Writer {
    client: Client,
    bucket: String,
    key: String,
    buffer: BytesMut,
    dirty: bool,
}

#[async_trait]
impl AsyncBackendFile for S3Writer {
    async fn read(&mut self, _size: usize) -> Result<Bytes> {
        Err(FuseBridgeError::NotSupported("read on write stream".to_string()))
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.buffer.extend_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    async fn seek(&mut self, offset: u64) -> Result<u64> {
        if offset != self.buffer.len() as u64 {
            return Err(FuseBridgeError::NotSupported(
                "S3 doesn't support partial writes".to_string(),
            ));
        }
        Ok(offset)
    }

    fn tell(&self) -> u64 {
        self.buffer.len() as u64
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        debug!("upload: key={} size={}", self.key, self.buffer.len());
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(ByteStream::from(self.buffer.clone().freeze()))
            .send()
            .await
            .map_err(|e| FuseBridgeError::Backend(format!("S3 PutObject error: {}", e)))?;
        self.dirty = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.flush().await
    }
}
