use async_trait::async_trait;
use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::ProvideCredentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{config::Region, Client, Config as S3Config};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::domain::{
    identity::BucketIdentity,
    storage::{
        BackendConnector, CompletedPartRef, ObjectBackend, ObjectInfo, ObjectSummary, PutOptions,
        RemoteError, StorageError,
    },
};

const PROVIDER_NAME: &str = "s3-permcheck";

/// Characters S3 leaves unescaped in a URI path segment
const S3_URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// `x-amz-copy-source` value for `key` in `bucket`, each path segment escaped
fn copy_source(bucket: &str, key: &str) -> String {
    let key = key
        .split('/')
        .map(|segment| utf8_percent_encode(segment, S3_URI_ENCODE).to_string())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", bucket, key)
}

/// Turn an SDK failure into the raw code/status/message triple
fn remote_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let remote = match err.as_service_error() {
        Some(service) => RemoteError {
            code: service.code().map(str::to_string),
            status,
            message: service
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| service.to_string()),
        },
        None => RemoteError {
            code: None,
            status,
            message: DisplayErrorContext(&err).to_string(),
        },
    };
    tracing::debug!("S3 {} failed: {:?}", operation, remote);
    remote
}

#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    bucket_name: String,
}

impl S3Backend {
    /// Create an S3 backend bound to one bucket identity
    pub async fn from_identity(identity: &BucketIdentity) -> Result<Self, StorageError> {
        let region_chain =
            RegionProviderChain::first_try(identity.region.as_ref().map(|r| Region::new(r.clone())))
                .or_default_provider();

        let region = region_chain.region().await.ok_or_else(|| {
            tracing::error!("AWS_REGION must be set for bucket '{}'", identity.name);
            StorageError::Setup(format!("no region configured for bucket '{}'", identity.name))
        })?;

        let credentials_provider: Arc<dyn ProvideCredentials> = match &identity.credentials {
            Some(pair) => Arc::new(Credentials::new(
                &pair.access_key_id,
                &pair.secret_access_key,
                pair.session_token.clone(),
                None,
                PROVIDER_NAME,
            )),
            None => Arc::new(
                DefaultCredentialsChain::builder()
                    .region(region.clone())
                    .build()
                    .await,
            ),
        };

        let mut s3_config_builder = S3Config::builder()
            .behavior_version_latest()
            .region(region)
            .credentials_provider(credentials_provider)
            // Retries belong to the harness retry policy
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(std::time::Duration::from_secs(identity.timeout_secs))
                    .build(),
            );

        // Custom S3-compatible endpoints (MinIO, Ceph, ...)
        if let Some(endpoint_url) = &identity.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if identity.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            bucket_name: identity.bucket_name.clone(),
        })
    }

    fn metadata(options: &PutOptions) -> Option<std::collections::HashMap<String, String>> {
        if options.metadata.is_empty() {
            None
        } else {
            Some(options.metadata.clone())
        }
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn bucket(&self) -> &str {
        &self.bucket_name
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        options: &PutOptions,
    ) -> Result<(), RemoteError> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(options.content_type.clone())
            .set_metadata(Self::metadata(options))
            .send()
            .await
            .map_err(|e| remote_error("put_object", e))?;
        Ok(())
    }

    async fn get_object(
        &self,
        key: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, RemoteError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| remote_error("get_object", e))?;

        // Direct streaming - no buffering
        Ok(Box::new(result.body.into_async_read()))
    }

    async fn head_object(&self, key: &str) -> Result<ObjectInfo, RemoteError> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| remote_error("head_object", e))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: head.content_length().unwrap_or(0).max(0) as u64,
            content_type: head.content_type().map(str::to_string),
            e_tag: head.e_tag().map(str::to_string),
            last_modified: head.last_modified().map(|t| t.secs()),
            metadata: head.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn list_objects(
        &self,
        prefix: &str,
        max_keys: Option<i32>,
    ) -> Result<Vec<ObjectSummary>, RemoteError> {
        let summarize = |object: &aws_sdk_s3::types::Object| {
            object.key().map(|key| ObjectSummary {
                key: key.to_string(),
                size: object.size().unwrap_or(0).max(0) as u64,
            })
        };

        if let Some(max_keys) = max_keys {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(prefix)
                .max_keys(max_keys)
                .send()
                .await
                .map_err(|e| remote_error("list_objects_v2", e))?;
            return Ok(page.contents().iter().filter_map(summarize).collect());
        }

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket_name)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| remote_error("list_objects_v2", e))?;
            objects.extend(page.contents().iter().filter_map(summarize));
        }
        Ok(objects)
    }

    async fn delete_object(&self, key: &str) -> Result<(), RemoteError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| remote_error("delete_object", e))?;
        Ok(())
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<(), RemoteError> {
        self.client
            .copy_object()
            .bucket(&self.bucket_name)
            .copy_source(copy_source(&self.bucket_name, src_key))
            .key(dst_key)
            .send()
            .await
            .map_err(|e| remote_error("copy_object", e))?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        options: &PutOptions,
    ) -> Result<String, RemoteError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .set_content_type(options.content_type.clone())
            .set_metadata(Self::metadata(options))
            .send()
            .await
            .map_err(|e| remote_error("create_multipart_upload", e))?;

        created.upload_id().map(str::to_string).ok_or_else(|| {
            RemoteError::transport("Multipart upload creation response missing upload ID")
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, RemoteError> {
        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| remote_error("upload_part", e))?;

        Ok(uploaded.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPartRef>,
    ) -> Result<(), RemoteError> {
        let parts: Vec<CompletedPart> = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .e_tag(part.e_tag)
                    .part_number(part.part_number)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| remote_error("complete_multipart_upload", e))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), RemoteError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| remote_error("abort_multipart_upload", e))?;
        Ok(())
    }
}

/// Connects every identity to a real S3-compatible service
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Connector;

#[async_trait]
impl BackendConnector for S3Connector {
    async fn connect(
        &self,
        identity: &BucketIdentity,
    ) -> Result<Arc<dyn ObjectBackend>, StorageError> {
        tracing::debug!(
            "Creating S3 client for '{}' (bucket: {}, endpoint: {})",
            identity.name,
            identity.bucket_name,
            identity.endpoint_url.as_deref().unwrap_or("aws")
        );
        let backend = S3Backend::from_identity(identity).await?;
        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::CredentialPair;
    use parking_lot::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Local HTTP endpoint answering every request with `status`, keeping the
    /// request heads it saw
    async fn fake_endpoint(
        status: &'static str,
        body: &'static str,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket);
                    loop {
                        let mut head = String::new();
                        let mut content_length = 0usize;
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                                return;
                            }
                            if line == "\r\n" {
                                break;
                            }
                            if let Some((name, value)) = line.split_once(':') {
                                if name.eq_ignore_ascii_case("content-length") {
                                    content_length = value.trim().parse().unwrap_or(0);
                                }
                            }
                            head.push_str(&line);
                        }
                        let mut request_body = vec![0u8; content_length];
                        if reader.read_exact(&mut request_body).await.is_err() {
                            return;
                        }
                        seen.lock().push(head);

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/xml\r\nContent-Length: {}\r\n\r\n{}",
                            status,
                            body.len(),
                            body
                        );
                        if reader.get_mut().write_all(response.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        (format!("http://{}", address), requests)
    }

    async fn backend(endpoint: &str) -> S3Backend {
        let identity = BucketIdentity::new("fake", "bucket")
            .with_endpoint(endpoint)
            .with_region("us-east-1")
            .with_path_style(true)
            .with_credentials(CredentialPair::new("key", "secret"));
        S3Backend::from_identity(&identity).await.unwrap()
    }

    #[test]
    fn test_copy_source_escapes_each_segment() {
        assert_eq!(
            copy_source("bucket", "dir/a b+c%.txt"),
            "bucket/dir/a%20b%2Bc%25.txt"
        );
        assert_eq!(
            copy_source("bucket", "ci/run-1/obj_v2.~tmp"),
            "bucket/ci/run-1/obj_v2.~tmp"
        );
    }

    #[tokio::test]
    async fn test_unavailable_service_is_called_once() {
        let (endpoint, requests) = fake_endpoint(
            "503 Service Unavailable",
            "<Error><Code>ServiceUnavailable</Code><Message>busy</Message></Error>",
        )
        .await;
        let backend = backend(&endpoint).await;

        let err = backend.delete_object("key.txt").await.unwrap_err();

        assert_eq!(err.status, Some(503));
        assert_eq!(requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_copy_sends_escaped_source() {
        let (endpoint, requests) = fake_endpoint(
            "200 OK",
            "<CopyObjectResult><ETag>\"etag\"</ETag></CopyObjectResult>",
        )
        .await;
        let backend = backend(&endpoint).await;

        backend
            .copy_object("dir/a b+c%.txt", "dst.txt")
            .await
            .unwrap();

        let requests = requests.lock();
        let header = requests[0]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("x-amz-copy-source")
                    .then(|| value.trim().to_string())
            })
            .unwrap();
        assert_eq!(header, "bucket/dir/a%20b%2Bc%25.txt");
    }
}
