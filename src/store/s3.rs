//! AWS SDK backed object store
//!
//! The SDK is async; transfers are driven by OS worker threads, so each call
//! blocks on a private multi-threaded Tokio runtime.

use super::error::{StoreError, StoreResult};
use super::types::{
    ByteRange, CompletedPart, ObjectHead, ObjectKey, PartBody, PutOptions, RestorationTier,
    RestoreRequest, RestoreStatus, StorageClass,
};
use super::ObjectStore;
use crate::config::{Credentials, ResourceConfig, UriStyle};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials as AwsCredentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as AwsCompletedPart, GlacierJobParameters,
    RestoreRequest as AwsRestoreRequest, ServerSideEncryption, StorageClass as AwsStorageClass,
    Tier,
};
use aws_sdk_s3::Client as AwsS3Client;
use bytes::Bytes;
use rand::Rng;
use std::fmt::Debug;
use tokio::runtime::Runtime;

/// Object store talking to S3 or an S3-compatible endpoint
pub struct S3ObjectStore {
    client: AwsS3Client,
    runtime: Runtime,
    endpoint: Option<String>,
}

impl S3ObjectStore {
    /// Build a client from the resource configuration.
    ///
    /// When several hostnames are configured one is picked at random, so
    /// independent processes spread load across them.
    pub fn connect(config: &ResourceConfig, credentials: &Credentials) -> StoreResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let endpoint = if config.hostnames.is_empty() {
            None
        } else {
            let index = rand::rng().random_range(0..config.hostnames.len());
            Some(format!(
                "{}://{}",
                config.protocol.scheme(),
                config.hostnames[index]
            ))
        };

        let aws_credentials = AwsCredentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            None,
            None,
            "nimbus-s3",
        );

        let client = runtime.block_on(async {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(config.region.clone()))
                .credentials_provider(aws_credentials)
                .load()
                .await;

            let mut builder = aws_sdk_s3::config::Builder::from(&shared);
            if let Some(endpoint) = &endpoint {
                builder = builder.endpoint_url(endpoint);
            }
            if config.uri_style == UriStyle::Path {
                builder = builder.force_path_style(true);
            }
            AwsS3Client::from_conf(builder.build())
        });

        tracing::debug!(
            endpoint = endpoint.as_deref().unwrap_or("aws"),
            region = %config.region,
            "S3 client ready"
        );

        Ok(Self {
            client,
            runtime,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn body_stream(body: PartBody) -> StoreResult<ByteStream> {
        match body {
            PartBody::Memory(bytes) => Ok(ByteStream::from(bytes)),
            PartBody::File {
                path,
                offset,
                length,
            } => ByteStream::read_from()
                .path(&path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e))),
        }
    }
}

fn to_aws_class(class: StorageClass) -> AwsStorageClass {
    AwsStorageClass::from(class.as_str())
}

fn to_aws_tier(tier: RestorationTier) -> Tier {
    match tier {
        RestorationTier::Expedited => Tier::Expedited,
        RestorationTier::Standard => Tier::Standard,
        RestorationTier::Bulk => Tier::Bulk,
    }
}

/// Classify an SDK failure by its service error code
fn map_sdk_error<E>(error: SdkError<E>, key: &ObjectKey) -> StoreError
where
    E: ProvideErrorMetadata + Debug,
{
    if let Some(code) = error.code() {
        let message = error.message().unwrap_or_default().to_string();
        return match code {
            "NoSuchKey" | "NotFound" => StoreError::NotFound {
                bucket: key.bucket.clone(),
                key: key.key.clone(),
            },
            "NoSuchBucket" => StoreError::BucketNotFound(key.bucket.clone()),
            "AccessDenied" => StoreError::AccessDenied(message),
            "InvalidAccessKeyId" | "SignatureDoesNotMatch" => {
                StoreError::Authentication(format!("{}: {}", code, message))
            }
            "InvalidObjectState" => StoreError::InvalidObjectState(key.to_string()),
            "NotImplemented" => StoreError::NotImplemented(message),
            "NoSuchUpload" => StoreError::NoSuchUpload(message),
            "SlowDown" => StoreError::RateLimitExceeded(message),
            "InvalidRange" => StoreError::InvalidRange(message),
            other => StoreError::Service {
                code: other.to_string(),
                message,
            },
        };
    }

    match error {
        SdkError::DispatchFailure(e) => {
            StoreError::Network(format!("Network dispatch failure: {:?}", e))
        }
        SdkError::TimeoutError(e) => StoreError::Timeout(format!("{:?}", e)),
        SdkError::ResponseError(e) => StoreError::Network(format!("Response error: {:?}", e)),
        other => StoreError::Sdk(format!("{:?}", other)),
    }
}

impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    fn head_object(&self, key: &ObjectKey) -> StoreResult<Option<ObjectHead>> {
        self.runtime.block_on(async {
            let response = match self
                .client
                .head_object()
                .bucket(&key.bucket)
                .key(&key.key)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    if e.as_service_error().map(|s| s.is_not_found()) == Some(true) {
                        return Ok(None);
                    }
                    return Err(map_sdk_error(e, key));
                }
            };

            let storage_class = response
                .storage_class()
                .and_then(|c| c.as_str().parse().ok())
                .unwrap_or_default();

            Ok(Some(ObjectHead {
                size: response.content_length().unwrap_or(0).max(0) as u64,
                etag: response.e_tag().map(|s| s.to_string()),
                storage_class,
                restore: response.restore().and_then(RestoreStatus::from_header),
            }))
        })
    }

    fn put_object(
        &self,
        key: &ObjectKey,
        body: PartBody,
        options: &PutOptions,
        content_md5: Option<&str>,
    ) -> StoreResult<String> {
        self.runtime.block_on(async {
            let stream = Self::body_stream(body).await?;
            let mut request = self
                .client
                .put_object()
                .bucket(&key.bucket)
                .key(&key.key)
                .storage_class(to_aws_class(options.storage_class))
                .body(stream);
            if options.server_side_encryption {
                request = request.server_side_encryption(ServerSideEncryption::Aes256);
            }
            if let Some(md5) = content_md5 {
                request = request.content_md5(md5);
            }

            let response = request.send().await.map_err(|e| map_sdk_error(e, key))?;
            Ok(response.e_tag().unwrap_or_default().to_string())
        })
    }

    fn get_object(&self, key: &ObjectKey, range: Option<ByteRange>) -> StoreResult<Bytes> {
        self.runtime.block_on(async {
            let mut request = self.client.get_object().bucket(&key.bucket).key(&key.key);
            if let Some(range) = range {
                request = request.range(range.to_header());
            }

            let response = request.send().await.map_err(|e| map_sdk_error(e, key))?;
            let data = response
                .body
                .collect()
                .await
                .map_err(|e| StoreError::Network(format!("Failed to read body: {}", e)))?;
            Ok(data.into_bytes())
        })
    }

    fn create_multipart_upload(
        &self,
        key: &ObjectKey,
        options: &PutOptions,
    ) -> StoreResult<String> {
        self.runtime.block_on(async {
            let mut request = self
                .client
                .create_multipart_upload()
                .bucket(&key.bucket)
                .key(&key.key)
                .storage_class(to_aws_class(options.storage_class));
            if options.server_side_encryption {
                request = request.server_side_encryption(ServerSideEncryption::Aes256);
            }

            let response = request.send().await.map_err(|e| map_sdk_error(e, key))?;
            response
                .upload_id()
                .map(|s| s.to_string())
                .ok_or_else(|| StoreError::MultipartUpload("No upload ID returned".to_string()))
        })
    }

    fn upload_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: u32,
        body: PartBody,
        content_md5: Option<&str>,
    ) -> StoreResult<CompletedPart> {
        self.runtime.block_on(async {
            let stream = Self::body_stream(body).await?;
            let mut request = self
                .client
                .upload_part()
                .bucket(&key.bucket)
                .key(&key.key)
                .upload_id(upload_id)
                .part_number(part_number as i32)
                .body(stream);
            if let Some(md5) = content_md5 {
                request = request.content_md5(md5);
            }

            let response = request.send().await.map_err(|e| map_sdk_error(e, key))?;
            let etag = response.e_tag().ok_or_else(|| {
                StoreError::MultipartUpload(format!("No ETag returned for part {}", part_number))
            })?;
            Ok(CompletedPart {
                part_number,
                etag: etag.to_string(),
            })
        })
    }

    fn complete_multipart_upload(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<String> {
        let completed: Vec<AwsCompletedPart> = parts
            .iter()
            .map(|p| {
                AwsCompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();

        self.runtime.block_on(async {
            let response = self
                .client
                .complete_multipart_upload()
                .bucket(&key.bucket)
                .key(&key.key)
                .upload_id(upload_id)
                .multipart_upload(upload)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;
            Ok(response.e_tag().unwrap_or_default().to_string())
        })
    }

    fn abort_multipart_upload(&self, key: &ObjectKey, upload_id: &str) -> StoreResult<()> {
        self.runtime.block_on(async {
            self.client
                .abort_multipart_upload()
                .bucket(&key.bucket)
                .key(&key.key)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;
            Ok(())
        })
    }

    fn copy_object(
        &self,
        source: &ObjectKey,
        destination: &ObjectKey,
        options: &PutOptions,
    ) -> StoreResult<String> {
        self.runtime.block_on(async {
            let mut request = self
                .client
                .copy_object()
                .copy_source(format!("{}/{}", source.bucket, source.key))
                .bucket(&destination.bucket)
                .key(&destination.key)
                .storage_class(to_aws_class(options.storage_class));
            if options.server_side_encryption {
                request = request.server_side_encryption(ServerSideEncryption::Aes256);
            }

            let response = request.send().await.map_err(|e| map_sdk_error(e, source))?;
            Ok(response
                .copy_object_result()
                .and_then(|r| r.e_tag())
                .unwrap_or_default()
                .to_string())
        })
    }

    fn delete_object(&self, key: &ObjectKey) -> StoreResult<()> {
        self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(&key.bucket)
                .key(&key.key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;
            Ok(())
        })
    }

    fn restore_object(&self, key: &ObjectKey, request: &RestoreRequest) -> StoreResult<()> {
        let job = GlacierJobParameters::builder()
            .tier(to_aws_tier(request.tier))
            .build()
            .map_err(|e| StoreError::Sdk(e.to_string()))?;
        let restore = AwsRestoreRequest::builder()
            .days(request.days as i32)
            .glacier_job_parameters(job)
            .build();

        self.runtime.block_on(async {
            self.client
                .restore_object()
                .bucket(&key.bucket)
                .key(&key.key)
                .restore_request(restore)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;
            Ok(())
        })
    }
}
