//! S3 XML request and response bodies

use crate::types::{CompletedPart, ObjectInfo, ObjectPage};
use crate::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ErrorBody {
    pub code: String,
    pub message: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CompleteMultipartUploadResult {
    #[serde(rename = "ETag")]
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<Contents>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Contents {
    key: String,
    last_modified: String,
    #[serde(rename = "ETag")]
    etag: Option<String>,
    #[serde(default)]
    size: u64,
}

/// Parse an `<Error>` document; `None` if the body is not one
pub(crate) fn parse_error(xml: &str) -> Option<ErrorBody> {
    if !xml.contains("<Error>") {
        return None;
    }
    quick_xml::de::from_str(xml).ok()
}

pub(crate) fn parse_initiate(xml: &str) -> Result<String> {
    let result: InitiateMultipartUploadResult = quick_xml::de::from_str(xml)
        .map_err(|e| StoreError::InvalidResponse(format!("InitiateMultipartUpload: {}", e)))?;
    if result.upload_id.is_empty() {
        return Err(StoreError::InvalidResponse("Missing UploadId".to_string()));
    }
    Ok(result.upload_id)
}

/// Completion can fail after a 200 status; the error arrives in the body.
pub(crate) fn parse_complete(xml: &str) -> Result<String> {
    if let Some(error) = parse_error(xml) {
        return Err(StoreError::S3 {
            code: error.code,
            message: error.message.unwrap_or_default(),
            status: 200,
            request_id: error.request_id,
        });
    }
    let result: CompleteMultipartUploadResult = quick_xml::de::from_str(xml)
        .map_err(|e| StoreError::InvalidResponse(format!("CompleteMultipartUpload: {}", e)))?;
    result
        .etag
        .map(|s| trim_etag(&s))
        .ok_or_else(|| StoreError::InvalidResponse("Missing ETag".to_string()))
}

pub(crate) fn parse_list_objects(xml: &str) -> Result<ObjectPage> {
    let result: ListBucketResult = quick_xml::de::from_str(xml)
        .map_err(|e| StoreError::InvalidResponse(format!("ListObjectsV2: {}", e)))?;

    let objects = result
        .contents
        .into_iter()
        .map(|c| {
            let last_modified = DateTime::parse_from_rfc3339(&c.last_modified)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| {
                    StoreError::InvalidResponse(format!(
                        "bad LastModified for {}: {}",
                        c.key, e
                    ))
                })?;
            Ok(ObjectInfo {
                key: c.key,
                last_modified,
                etag: c.etag.map(|s| trim_etag(&s)).unwrap_or_default(),
                size: c.size,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ObjectPage {
        objects,
        next_continuation_token: result
            .next_continuation_token
            .filter(|_| result.is_truncated),
    })
}

pub(crate) fn complete_request_body(parts: &[CompletedPart]) -> String {
    let mut xml = String::from("<CompleteMultipartUpload>");
    for part in parts {
        xml.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>\"{}\"</ETag></Part>",
            part.part_number, part.etag
        ));
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

pub(crate) fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}
