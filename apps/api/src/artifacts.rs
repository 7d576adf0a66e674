use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::run::ArtifactRef;
use crate::render::converter::ExportFormat;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const LATEX_CONTENT_TYPE: &str = "application/x-tex";

pub fn pdf_key(run_id: Uuid) -> String {
    format!("runs/{run_id}/cv.pdf")
}

pub fn source_key(run_id: Uuid) -> String {
    format!("runs/{run_id}/cv.tex")
}

pub fn export_key(run_id: Uuid, format: ExportFormat) -> String {
    format!("runs/{run_id}/cv.{}", format.extension())
}

/// Blob storage for compiled documents and their sources.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;
}

/// Stores the PDF and its LaTeX source for `run_id`.
pub async fn store_document(
    store: &dyn ArtifactStore,
    run_id: Uuid,
    pdf: Bytes,
    source: &str,
) -> Result<ArtifactRef, StoreError> {
    let artifact = ArtifactRef {
        pdf_key: pdf_key(run_id),
        source_key: source_key(run_id),
    };
    store
        .put(
            &artifact.source_key,
            Bytes::from(source.to_string()),
            LATEX_CONTENT_TYPE,
        )
        .await?;
    store.put(&artifact.pdf_key, pdf, PDF_CONTENT_TYPE).await?;
    Ok(artifact)
}

/// S3 (or MinIO) bucket backend.
#[derive(Clone)]
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("S3 upload failed: {e}")))?;

        info!("Uploaded artifact to s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map_or(false, |s| s.is_no_such_key()) {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::Backend(format!("S3 download failed: {e}"))
                }
            })?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("S3 body read failed: {e}")))?;
        Ok(body.into_bytes())
    }
}
