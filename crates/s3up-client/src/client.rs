//! S3 REST implementation of [`ObjectStore`]

use crate::{
    error::ConfigError,
    sign::{self, CanonicalRequest, UNSIGNED_PAYLOAD},
    source::PartBody,
    store::ObjectStore,
    types::*,
    xml, Result, StoreConfig, StoreError,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{header, Body, Client, Method, Response};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Request body variants; streamed bodies are sent unsigned
enum Payload {
    Empty,
    Bytes(Bytes),
    Stream(PartBody),
}

/// Path-style S3 client bound to one bucket
pub struct S3Store {
    config: StoreConfig,
    bucket: String,
    host: String,
    http: Client,
}

impl S3Store {
    /// Create a new store for `bucket`
    pub fn new(config: StoreConfig, bucket: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let bucket = bucket.into();
        if bucket.is_empty() || bucket.contains('/') {
            return Err(ConfigError::Store(format!("invalid bucket name: {:?}", bucket)).into());
        }

        let endpoint = url::Url::parse(config.base_url())
            .map_err(|e| ConfigError::Store(e.to_string()))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ConfigError::Store("endpoint has no host".to_string()).into())
            }
        };

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            config
                .user_agent
                .parse()
                .map_err(|_| ConfigError::Store("invalid user agent".to_string()))?,
        );

        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            config,
            bucket,
            host,
            http,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Bucket this store writes to
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn path(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => format!(
                "/{}/{}",
                sign::uri_encode(&self.bucket, true),
                sign::uri_encode(key, false)
            ),
            None => format!("/{}", sign::uri_encode(&self.bucket, true)),
        }
    }

    async fn request(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(&str, String)],
        headers: Vec<(&'static str, String)>,
        payload: Payload,
    ) -> Result<Response> {
        let path = self.path(key);
        let query = sign::canonical_query(query);
        let url = if query.is_empty() {
            format!("{}{}", self.config.base_url(), path)
        } else {
            format!("{}{}?{}", self.config.base_url(), path, query)
        };

        let now = Utc::now();
        let payload_hash = match &payload {
            Payload::Empty => sign::sha256_hex(b""),
            Payload::Bytes(data) => sign::sha256_hex(data),
            Payload::Stream(_) => UNSIGNED_PAYLOAD.to_string(),
        };

        let mut signed = BTreeMap::new();
        signed.insert("host".to_string(), self.host.clone());
        signed.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        signed.insert("x-amz-date".to_string(), sign::amz_date(now));

        let mut req = self.http.request(method.clone(), &url);

        for (name, value) in headers {
            if name.starts_with("x-amz-") {
                signed.insert(name.to_string(), value);
            } else {
                req = req.header(name, value);
            }
        }
        for (name, value) in signed.iter().filter(|(name, _)| *name != "host") {
            req = req.header(name.as_str(), value.as_str());
        }

        if let Some(credentials) = &self.config.credentials {
            let authorization = sign::authorization(
                credentials,
                &self.config.region,
                now,
                &CanonicalRequest {
                    method: method.as_str(),
                    uri: &path,
                    query: &query,
                    headers: &signed,
                    payload_hash: &payload_hash,
                },
            );
            req = req.header(header::AUTHORIZATION, authorization);
        }

        req = match payload {
            Payload::Empty => req,
            Payload::Bytes(data) => req.body(data),
            Payload::Stream(body) => req
                .header(header::CONTENT_LENGTH, body.len())
                .body(Body::wrap_stream(body.into_stream())),
        };

        debug!("Sending {} request to {}", method, url);
        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::from_s3_xml(&text, status.as_u16()));
        }

        Ok(response)
    }
}

fn etag_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(xml::trim_etag)
}

fn body_payload(body: PartBody) -> Payload {
    if body.is_empty() {
        Payload::Bytes(Bytes::new())
    } else {
        Payload::Stream(body)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self, options), fields(bucket = %self.bucket))]
    async fn initiate_multipart_upload(&self, key: &str, options: &PutOptions) -> Result<String> {
        let response = self
            .request(
                Method::POST,
                Some(key),
                &[("uploads", String::new())],
                options.headers(),
                Payload::Empty,
            )
            .await?;
        let text = response.text().await?;
        xml::parse_initiate(&text)
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, length = body.len()))]
    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        index: u32,
        body: PartBody,
    ) -> Result<String> {
        let query = [
            ("partNumber", index.to_string()),
            ("uploadId", session_id.to_string()),
        ];
        let response = self
            .request(Method::PUT, Some(key), &query, Vec::new(), body_payload(body))
            .await?;
        etag_header(&response).ok_or_else(|| StoreError::InvalidResponse("Missing ETag".to_string()))
    }

    #[instrument(skip(self, parts), fields(bucket = %self.bucket, parts = parts.len()))]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let body = xml::complete_request_body(parts);
        let response = self
            .request(
                Method::POST,
                Some(key),
                &[("uploadId", session_id.to_string())],
                vec![("content-type", "application/xml".to_string())],
                Payload::Bytes(Bytes::from(body)),
            )
            .await?;
        let text = response.text().await?;
        xml::parse_complete(&text)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn abort_multipart_upload(&self, key: &str, session_id: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            Some(key),
            &[("uploadId", session_id.to_string())],
            Vec::new(),
            Payload::Empty,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, body, options), fields(bucket = %self.bucket, length = body.len()))]
    async fn put_object(&self, key: &str, body: PartBody, options: &PutOptions) -> Result<String> {
        let response = self
            .request(Method::PUT, Some(key), &[], options.headers(), body_payload(body))
            .await?;
        Ok(etag_header(&response).unwrap_or_default())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn object_exists(&self, key: &str) -> Result<bool> {
        match self
            .request(Method::HEAD, Some(key), &[], Vec::new(), Payload::Empty)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_objects(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage> {
        let mut query = vec![("list-type", "2".to_string())];
        if let Some(prefix) = prefix {
            query.push(("prefix", prefix.to_string()));
        }
        if let Some(token) = continuation_token {
            query.push(("continuation-token", token.to_string()));
        }

        let response = self
            .request(Method::GET, None, &query, Vec::new(), Payload::Empty)
            .await?;
        let text = response.text().await?;
        xml::parse_list_objects(&text)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.request(Method::DELETE, Some(key), &[], Vec::new(), Payload::Empty)
            .await?;
        Ok(())
    }
}
