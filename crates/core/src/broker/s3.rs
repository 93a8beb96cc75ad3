//! S3-compatible object store broker.
//!
//! Talks to the bucket over plain HTTP with SigV4 request signing.
//! Credentials come from the conventional `AWS_*` environment variables;
//! `FLOODGATE_S3_ENDPOINT` overrides the endpoint for S3-compatible stores
//! and test servers (path-style addressing is always used).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

use super::{join_prefix, BrokerError, RetryPolicy, StorageBroker, StoreMode, SuccessFlag};
use crate::file::{FileCollection, RemoteFileMeta};

type HmacSha256 = Hmac<Sha256>;

const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub struct S3Broker {
    bucket: String,
    prefix: String,
    region: String,
    endpoint: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

struct Credentials {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

#[derive(Default)]
struct ListPage {
    objects: Vec<(String, RemoteFileMeta)>,
    truncated: bool,
    next_token: Option<String>,
}

impl S3Broker {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let region =
            std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let endpoint = std::env::var("FLOODGATE_S3_ENDPOINT")
            .unwrap_or_else(|_| format!("https://s3.{}.amazonaws.com", region));
        Self {
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            region,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    fn credentials() -> Result<Credentials, BrokerError> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| BrokerError::Credentials("AWS_ACCESS_KEY_ID"))?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| BrokerError::Credentials("AWS_SECRET_ACCESS_KEY"))?;
        Ok(Credentials {
            access_key,
            secret_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }

    fn key_for(&self, rel_path: &str) -> String {
        join_prefix(&self.prefix, rel_path)
    }

    /// Send one signed request. `query` must already be sorted by key.
    async fn signed_request(
        &self,
        method: reqwest::Method,
        key: &str,
        query: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response, BrokerError> {
        let creds = Self::credentials()?;
        let uri_path = format!(
            "/{}/{}",
            uri_encode(&self.bucket, false),
            uri_encode(key, false)
        );
        let uri_path = uri_path.trim_end_matches('/').to_string();
        let uri_path = if uri_path.is_empty() { "/".to_string() } else { uri_path };

        let payload_hash = if body.is_empty() {
            EMPTY_PAYLOAD_SHA256.to_string()
        } else {
            hex::encode(Sha256::digest(&body))
        };

        let host = self
            .endpoint
            .split("://")
            .nth(1)
            .unwrap_or(&self.endpoint)
            .to_string();
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(token) = &creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort();

        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
            .collect::<Vec<_>>()
            .join("&");
        let canonical_headers = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect::<String>();
        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, uri_path, canonical_query, canonical_headers, signed_headers, payload_hash
        );
        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let key_date = hmac_sha256(format!("AWS4{}", creds.secret_key).as_bytes(), date.as_bytes());
        let key_region = hmac_sha256(&key_date, self.region.as_bytes());
        let key_service = hmac_sha256(&key_region, b"s3");
        let key_signing = hmac_sha256(&key_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&key_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key, scope, signed_headers, signature
        );

        let url = if canonical_query.is_empty() {
            format!("{}{}", self.endpoint, uri_path)
        } else {
            format!("{}{}?{}", self.endpoint, uri_path, canonical_query)
        };

        let mut request = self.client.request(method, &url);
        for (k, v) in &headers {
            if k != "host" {
                request = request.header(k.as_str(), v.as_str());
            }
        }
        request
            .header("authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| BrokerError::Query(e.to_string()))
    }

    /// Send a signed request and convert throttling or server-side failure
    /// statuses into errors so the retry policy can see them.
    async fn send_checked(
        &self,
        method: reqwest::Method,
        key: &str,
        query: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response, BrokerError> {
        let response = self.signed_request(method, key, query, body).await?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(BrokerError::Query(format!("retryable status {}", status)));
        }
        Ok(response)
    }

    async fn list_page(
        &self,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ListPage, BrokerError> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), prefix.to_string()),
        ];
        if let Some(token) = token {
            query.push(("continuation-token".to_string(), token.to_string()));
        }
        query.sort();

        let response = self
            .retry
            .run("s3 list", is_transient, || {
                self.send_checked(reqwest::Method::GET, "", &query, Vec::new())
            })
            .await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::Query(e.to_string()))?;
        if !status.is_success() {
            return Err(BrokerError::Query(format!("list returned {}: {}", status, body)));
        }
        parse_list_response(&body)
    }
}

#[async_trait]
impl StorageBroker for S3Broker {
    fn name(&self) -> &str {
        "s3"
    }

    async fn upload(
        &self,
        files: &FileCollection,
        mode: StoreMode,
        flag: SuccessFlag,
    ) -> Result<(), BrokerError> {
        for file in files {
            let rel_path = mode.dest_of(file)?;
            let src = file
                .require_src_path()
                .map_err(|_| BrokerError::NoSourcePath(file.name().to_string()))?;
            let body = tokio::fs::read(src).await?;
            let key = self.key_for(&rel_path);

            let response = self
                .retry
                .run("s3 put", is_transient, || {
                    self.send_checked(reqwest::Method::PUT, &key, &[], body.clone())
                })
                .await
                .map_err(|e| BrokerError::UploadFailed {
                    dest_path: rel_path.clone(),
                    reason: e.to_string(),
                })?;
            if !response.status().is_success() {
                return Err(BrokerError::UploadFailed {
                    dest_path: rel_path,
                    reason: format!("PUT returned {}", response.status()),
                });
            }
            debug!("uploaded '{}' -> 's3://{}/{}'", file.name(), self.bucket, key);
            flag.apply(file);
        }
        Ok(())
    }

    async fn delete(
        &self,
        files: &FileCollection,
        mode: StoreMode,
        flag: SuccessFlag,
    ) -> Result<(), BrokerError> {
        for file in files {
            let rel_path = mode.dest_of(file)?;
            let key = self.key_for(&rel_path);

            let response = self
                .retry
                .run("s3 delete", is_transient, || {
                    self.send_checked(reqwest::Method::DELETE, &key, &[], Vec::new())
                })
                .await
                .map_err(|e| BrokerError::DeleteFailed {
                    dest_path: rel_path.clone(),
                    reason: e.to_string(),
                })?;
            // DELETE of an absent key returns 204 as well, which keeps
            // compensation idempotent for free.
            if !response.status().is_success() {
                return Err(BrokerError::DeleteFailed {
                    dest_path: rel_path,
                    reason: format!("DELETE returned {}", response.status()),
                });
            }
            debug!("deleted 's3://{}/{}'", self.bucket, key);
            flag.apply(file);
        }
        Ok(())
    }

    async fn query(&self, prefix: &str) -> Result<BTreeMap<String, RemoteFileMeta>, BrokerError> {
        let full_prefix = self.key_for(prefix);
        let mut found = BTreeMap::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(&full_prefix, token.as_deref()).await?;
            for (key, meta) in page.objects {
                found.insert(key, meta);
            }
            if !page.truncated {
                break;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(found)
    }

    async fn exists(&self, dest_path: &str) -> Result<bool, BrokerError> {
        let key = self.key_for(dest_path);
        let page = self.list_page(&key, None).await?;
        Ok(page.objects.iter().any(|(k, _)| k == &key))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 3986 percent-encoding as SigV4 requires it. Path encoding keeps `/`
/// separators, query encoding does not.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn is_transient(error: &BrokerError) -> bool {
    match error {
        BrokerError::Query(reason) => {
            // Connection-level reqwest failures and throttling/server-side
            // statuses are worth retrying; everything else is permanent.
            reason.contains("error sending request")
                || reason.contains("operation timed out")
                || reason.contains("connection closed")
                || reason.contains("retryable status")
        }
        _ => false,
    }
}

fn parse_list_response(xml: &str) -> Result<ListPage, BrokerError> {
    let mut reader = Reader::from_str(xml);
    let mut page = ListPage::default();
    let mut current_tag: Vec<u8> = Vec::new();
    let mut in_contents = false;
    let mut key: Option<String> = None;
    let mut size = 0u64;
    let mut last_modified: Option<DateTime<Utc>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"Contents" => {
                    in_contents = true;
                    key = None;
                    size = 0;
                    last_modified = None;
                }
                other => current_tag = other.to_vec(),
            },
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| BrokerError::Query(format!("list response parse: {}", e)))?
                    .to_string();
                match current_tag.as_slice() {
                    b"Key" if in_contents => key = Some(text),
                    b"Size" if in_contents => size = text.parse().unwrap_or(0),
                    b"LastModified" if in_contents => {
                        last_modified = DateTime::parse_from_rfc3339(&text)
                            .ok()
                            .map(|d| d.with_timezone(&Utc));
                    }
                    b"IsTruncated" => page.truncated = text == "true",
                    b"NextContinuationToken" => page.next_token = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"Contents" => {
                if let Some(key) = key.take() {
                    page.objects.push((key, RemoteFileMeta { last_modified, size }));
                }
                in_contents = false;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BrokerError::Query(format!("list response parse: {}", e)));
            }
            _ => {}
        }
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_encoding_matches_sigv4_rules() {
        assert_eq!(uri_encode("a/b c.nc", false), "a/b%20c.nc");
        assert_eq!(uri_encode("a/b c.nc", true), "a%2Fb%20c.nc");
        assert_eq!(uri_encode("safe-._~chars", true), "safe-._~chars");
    }

    #[test]
    fn parse_list_response_extracts_objects_and_pagination() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>token123</NextContinuationToken>
  <Contents>
    <Key>prefix/a.nc</Key>
    <LastModified>2026-01-15T10:30:00.000Z</LastModified>
    <Size>1024</Size>
  </Contents>
  <Contents>
    <Key>prefix/b.nc</Key>
    <LastModified>2026-01-16T11:00:00.000Z</LastModified>
    <Size>2048</Size>
  </Contents>
</ListBucketResult>"#;
        let page = parse_list_response(xml).unwrap();
        assert!(page.truncated);
        assert_eq!(page.next_token.as_deref(), Some("token123"));
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0].0, "prefix/a.nc");
        assert_eq!(page.objects[0].1.size, 1024);
        assert!(page.objects[1].1.last_modified.is_some());
    }

    #[test]
    fn parse_list_response_empty_bucket() {
        let xml = r#"<?xml version="1.0"?>
<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let page = parse_list_response(xml).unwrap();
        assert!(!page.truncated);
        assert!(page.objects.is_empty());
    }

    #[test]
    fn signing_key_derivation_is_deterministic() {
        // Known-answer test from the SigV4 reference suite.
        let secret = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";
        let key_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), b"20150830");
        let key_region = hmac_sha256(&key_date, b"us-east-1");
        let key_service = hmac_sha256(&key_region, b"iam");
        let key_signing = hmac_sha256(&key_service, b"aws4_request");
        assert_eq!(
            hex::encode(key_signing),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }
}
