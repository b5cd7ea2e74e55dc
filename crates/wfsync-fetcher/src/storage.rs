//! Storage service client used to obtain ephemeral artifact URLs

use crate::error::FetchResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of stored workflow artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    #[default]
    Unspecified,
    Binary,
    Config,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactType::Unspecified => "unspecified",
            ArtifactType::Binary => "binary",
            ArtifactType::Config => "config",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadArtifactRequest {
    /// Artifact identifier, usually the workflow ID
    pub id: String,
    pub artifact_type: ArtifactType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadArtifactResponse {
    pub url: String,
    pub expiry: Option<DateTime<Utc>>,
}

/// Client of the artifact storage service.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn download_artifact(
        &self,
        request: &DownloadArtifactRequest,
    ) -> FetchResult<DownloadArtifactResponse>;
}
