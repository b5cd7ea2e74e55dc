//! Ledger reader collaborator and the registry reads built on it
//!
//! The controller never decodes chain payloads. A [`LedgerReader`] answers
//! named method reads with JSON values; this module only knows the shape of
//! the workflow registry's responses.

use crate::config::{
    GET_ACTIVE_ALLOWLISTED_REQUESTS_REVERSE, GET_WORKFLOW_LIST_BY_DON, TOTAL_ALLOWLISTED_REQUESTS,
    WORKFLOW_REGISTRY_CONTRACT,
};
use crate::error::LedgerError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use wfsync_types::{AllowlistedRequest, Don, Head, WorkflowMetadataView};

/// Finality a read must be served at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Finalized,
    Unconfirmed,
}

/// Contract instance reads are bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBinding {
    pub address: String,
    pub name: String,
}

impl ContractBinding {
    /// Binding of the workflow registry contract at `address`.
    pub fn workflow_registry(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: WORKFLOW_REGISTRY_CONTRACT.to_string(),
        }
    }

    pub fn read_identifier(&self, method: &str) -> ReadIdentifier {
        ReadIdentifier {
            address: self.address.clone(),
            contract: self.name.clone(),
            method: method.to_string(),
        }
    }
}

/// Fully qualified name of one read method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadIdentifier {
    pub address: String,
    pub contract: String,
    pub method: String,
}

impl fmt::Display for ReadIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.address, self.contract, self.method)
    }
}

/// Reads the latest value of a contract method together with the head it was read at.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn query(
        &self,
        identifier: &ReadIdentifier,
        confidence: Confidence,
        params: serde_json::Value,
    ) -> Result<(serde_json::Value, Head), LedgerError>;
}

/// Builds a reader once the configured chain is reachable.
#[async_trait]
pub trait LedgerReaderFactory: Send + Sync {
    async fn new_reader(
        &self,
        binding: &ContractBinding,
    ) -> Result<Arc<dyn LedgerReader>, LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetWorkflowListParams {
    pub don_family: String,
    pub start: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowListResponse {
    #[serde(default)]
    pub list: Vec<WorkflowMetadataView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistedRequestsParams {
    pub start_index: u64,
    pub end_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistedRequestsResponse {
    #[serde(default)]
    pub allowlisted_requests: Vec<AllowlistedRequest>,

    /// No older active request remains below the window
    #[serde(default)]
    pub search_complete: bool,
}

async fn query_as<P, R>(
    reader: &dyn LedgerReader,
    identifier: &ReadIdentifier,
    confidence: Confidence,
    params: &P,
) -> Result<(R, Head), LedgerError>
where
    P: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let params = serde_json::to_value(params)?;
    let (value, head) = reader.query(identifier, confidence, params).await?;
    let decoded = serde_json::from_value(value).map_err(|source| LedgerError::Decode {
        identifier: identifier.to_string(),
        source,
    })?;
    Ok((decoded, head))
}

/// Read every workflow declared for the DON's families.
///
/// Each family is read in pages of `page_size`; a short page ends the family.
/// Returns the head of the last read, or the genesis head if nothing was read.
pub async fn fetch_workflow_metadata(
    reader: &dyn LedgerReader,
    binding: &ContractBinding,
    don: &Don,
    page_size: u64,
) -> Result<(Vec<WorkflowMetadataView>, Head), LedgerError> {
    let identifier = binding.read_identifier(GET_WORKFLOW_LIST_BY_DON);
    let mut head_at_last_read = None;
    let mut workflows = Vec::new();

    for family in &don.families {
        let mut params = GetWorkflowListParams {
            don_family: family.clone(),
            start: 0,
            limit: page_size,
        };

        loop {
            let (page, head): (WorkflowListResponse, Head) =
                query_as(reader, &identifier, Confidence::Finalized, &params).await?;
            head_at_last_read = Some(head);

            let page_len = page.list.len() as u64;
            for metadata in page.list {
                validate_metadata(&metadata);
                workflows.push(metadata);
            }

            if page_len < page_size {
                break;
            }
            params.start += page_len;
        }
    }

    Ok((workflows, head_at_last_read.unwrap_or_else(Head::genesis)))
}

/// Log incomplete metadata without dropping it.
fn validate_metadata(metadata: &WorkflowMetadataView) {
    if metadata.workflow_id.is_zero() {
        tracing::warn!(
            workflow_name = %metadata.workflow_name,
            "Workflow metadata has an empty workflow ID"
        );
    }
    if metadata.owner.is_empty() {
        tracing::warn!(
            workflow_id = %metadata.workflow_id,
            "Workflow metadata has an empty owner"
        );
    }
    if metadata.binary_url.is_empty() || metadata.config_url.is_empty() {
        tracing::warn!(
            workflow_id = %metadata.workflow_id,
            binary_url = %metadata.binary_url,
            config_url = %metadata.config_url,
            "Workflow metadata has an empty binary or config URL"
        );
    }
}

/// New allowlisted requests since `last_seen`, with the ledger's current total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistDelta {
    pub requests: Vec<AllowlistedRequest>,
    pub total: u64,
    pub head: Head,
}

/// Read allowlisted requests added after the first `last_seen` ones.
///
/// Windows of at most `page_size` indices are read from the newest index
/// backwards until the ledger reports the search complete or the window
/// reaches `last_seen`.
pub async fn fetch_allowlisted_requests_delta(
    reader: &dyn LedgerReader,
    binding: &ContractBinding,
    last_seen: u64,
    page_size: u64,
) -> Result<AllowlistDelta, LedgerError> {
    let identifier = binding.read_identifier(TOTAL_ALLOWLISTED_REQUESTS);
    let (total, mut head): (u64, Head) = query_as(
        reader,
        &identifier,
        Confidence::Unconfirmed,
        &serde_json::Value::Null,
    )
    .await?;

    if total == last_seen || total == 0 {
        return Ok(AllowlistDelta {
            requests: Vec::new(),
            total,
            head,
        });
    }

    let identifier = binding.read_identifier(GET_ACTIVE_ALLOWLISTED_REQUESTS_REVERSE);
    let mut requests = Vec::new();
    let mut end_index = total - 1;

    loop {
        let start_index = end_index
            .saturating_sub(page_size.saturating_sub(1))
            .max(last_seen);
        let params = AllowlistedRequestsParams {
            start_index,
            end_index,
        };

        tracing::debug!(start_index, end_index, "Getting active allowlisted requests");
        let (response, read_head): (AllowlistedRequestsResponse, Head) =
            query_as(reader, &identifier, Confidence::Unconfirmed, &params).await?;
        head = read_head;

        tracing::debug!(
            fetched = response.allowlisted_requests.len(),
            search_complete = response.search_complete,
            height = %head.height,
            "Allowlisted requests window read"
        );
        requests.extend(response.allowlisted_requests);

        if response.search_complete || start_index <= last_seen {
            break;
        }
        end_index = end_index.saturating_sub(page_size);
    }

    Ok(AllowlistDelta {
        requests,
        total,
        head,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use wfsync_types::{WorkflowId, WorkflowStatus};

    /// Reader answering each call from a queue and recording the params.
    struct ScriptedReader {
        responses: Mutex<Vec<serde_json::Value>>,
        calls: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl ScriptedReader {
        fn new(responses: Vec<serde_json::Value>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, serde_json::Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LedgerReader for ScriptedReader {
        async fn query(
            &self,
            identifier: &ReadIdentifier,
            _confidence: Confidence,
            params: serde_json::Value,
        ) -> Result<(serde_json::Value, Head), LedgerError> {
            let call_no = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((identifier.method.clone(), params));
                calls.len()
            };
            let value = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LedgerError::Unavailable("script exhausted".into()))?;
            Ok((
                value,
                Head {
                    height: call_no.to_string(),
                    ..Default::default()
                },
            ))
        }
    }

    fn metadata_json(id: u8, family: &str) -> serde_json::Value {
        json!({
            "workflow_id": hex::encode([id; 32]),
            "owner": "aabb",
            "status": "active",
            "workflow_name": format!("wf-{id}"),
            "binary_url": "file:///bin",
            "config_url": "file:///cfg",
            "don_family": family,
        })
    }

    fn request_json(digest: u8, expiry: u32) -> serde_json::Value {
        json!({
            "request_digest": hex::encode([digest; 32]),
            "owner": "aabb",
            "expiry_timestamp": expiry,
        })
    }

    #[test]
    fn test_read_identifier_display() {
        let binding = ContractBinding::workflow_registry("0x01");
        let id = binding.read_identifier(GET_WORKFLOW_LIST_BY_DON);
        assert_eq!(id.to_string(), "0x01-WorkflowRegistry-getWorkflowListByDON");
    }

    #[tokio::test]
    async fn test_metadata_paginates_until_short_page() {
        let reader = ScriptedReader::new(vec![
            json!({"list": [metadata_json(1, "a"), metadata_json(2, "a")]}),
            json!({"list": [metadata_json(3, "a")]}),
        ]);
        let don = Don {
            id: 1,
            families: vec!["a".to_string()],
        };

        let binding = ContractBinding::workflow_registry("0x01");
        let (workflows, head) = fetch_workflow_metadata(&reader, &binding, &don, 2)
            .await
            .unwrap();

        assert_eq!(workflows.len(), 3);
        assert_eq!(workflows[2].workflow_id, WorkflowId::new([3; 32]));
        assert_eq!(workflows[0].status, WorkflowStatus::Active);
        assert_eq!(head.height, "2");

        let calls = reader.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1["start"], 0);
        assert_eq!(calls[1].1["start"], 2);
        assert_eq!(calls[1].1["limit"], 2);
    }

    #[tokio::test]
    async fn test_metadata_reads_every_family() {
        let reader = ScriptedReader::new(vec![
            json!({"list": [metadata_json(1, "a")]}),
            json!({"list": []}),
        ]);
        let don = Don {
            id: 1,
            families: vec!["a".to_string(), "b".to_string()],
        };

        let binding = ContractBinding::workflow_registry("0x01");
        let (workflows, _) = fetch_workflow_metadata(&reader, &binding, &don, 10)
            .await
            .unwrap();

        assert_eq!(workflows.len(), 1);
        let calls = reader.calls();
        assert_eq!(calls[0].1["don_family"], "a");
        assert_eq!(calls[1].1["don_family"], "b");
    }

    #[tokio::test]
    async fn test_metadata_without_families_uses_genesis_head() {
        let reader = ScriptedReader::new(vec![]);
        let binding = ContractBinding::workflow_registry("0x01");
        let (workflows, head) = fetch_workflow_metadata(&reader, &binding, &Don::default(), 10)
            .await
            .unwrap();

        assert!(workflows.is_empty());
        assert_eq!(head, Head::genesis());
    }

    #[tokio::test]
    async fn test_metadata_decode_error_is_reported() {
        let reader = ScriptedReader::new(vec![json!({"list": [{"workflow_id": "zz"}]})]);
        let don = Don {
            id: 1,
            families: vec!["a".to_string()],
        };

        let binding = ContractBinding::workflow_registry("0x01");
        let err = fetch_workflow_metadata(&reader, &binding, &don, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_allowlist_unchanged_total_reads_nothing_else() {
        let reader = ScriptedReader::new(vec![json!(5)]);
        let binding = ContractBinding::workflow_registry("0x01");

        let delta = fetch_allowlisted_requests_delta(&reader, &binding, 5, 1000)
            .await
            .unwrap();

        assert!(delta.requests.is_empty());
        assert_eq!(delta.total, 5);
        assert_eq!(reader.calls().len(), 1);
        assert_eq!(reader.calls()[0].0, TOTAL_ALLOWLISTED_REQUESTS);
    }

    #[tokio::test]
    async fn test_allowlist_window_starts_at_last_seen() {
        let reader = ScriptedReader::new(vec![
            json!(7),
            json!({"allowlisted_requests": [request_json(6, 100), request_json(5, 100)], "search_complete": false}),
        ]);
        let binding = ContractBinding::workflow_registry("0x01");

        let delta = fetch_allowlisted_requests_delta(&reader, &binding, 5, 1000)
            .await
            .unwrap();

        assert_eq!(delta.requests.len(), 2);
        assert_eq!(delta.total, 7);
        let calls = reader.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, GET_ACTIVE_ALLOWLISTED_REQUESTS_REVERSE);
        assert_eq!(calls[1].1["start_index"], 5);
        assert_eq!(calls[1].1["end_index"], 6);
    }

    #[tokio::test]
    async fn test_allowlist_reads_backwards_until_search_complete() {
        let reader = ScriptedReader::new(vec![
            json!(25),
            json!({"allowlisted_requests": [request_json(1, 100)], "search_complete": false}),
            json!({"allowlisted_requests": [request_json(2, 100)], "search_complete": true}),
        ]);
        let binding = ContractBinding::workflow_registry("0x01");

        let delta = fetch_allowlisted_requests_delta(&reader, &binding, 0, 10)
            .await
            .unwrap();

        assert_eq!(delta.requests.len(), 2);
        assert_eq!(delta.head.height, "3");
        let calls = reader.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].1["start_index"], 15);
        assert_eq!(calls[1].1["end_index"], 24);
        assert_eq!(calls[2].1["start_index"], 5);
        assert_eq!(calls[2].1["end_index"], 14);
    }

    #[tokio::test]
    async fn test_allowlist_stops_when_window_reaches_last_seen() {
        let reader = ScriptedReader::new(vec![
            json!(12),
            json!({"allowlisted_requests": [], "search_complete": false}),
            json!({"allowlisted_requests": [], "search_complete": false}),
        ]);
        let binding = ContractBinding::workflow_registry("0x01");

        let delta = fetch_allowlisted_requests_delta(&reader, &binding, 0, 10)
            .await
            .unwrap();

        assert!(delta.requests.is_empty());
        let calls = reader.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].1["start_index"], 0);
        assert_eq!(calls[2].1["end_index"], 1);
    }
}
