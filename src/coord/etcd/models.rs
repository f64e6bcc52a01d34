//! Request and response bodies of the etcd v3 JSON gateway.
//!
//! The gateway carries keys and values as base64 and 64-bit integers as strings.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use super::error::{EtcdError, EtcdResult};
use crate::coord::Entry;

pub const LEASE_GRANT: &str = "/v3/lease/grant";
pub const LEASE_KEEPALIVE: &str = "/v3/lease/keepalive";
pub const LEASE_REVOKE: &str = "/v3/lease/revoke";
pub const KV_RANGE: &str = "/v3/kv/range";
pub const KV_TXN: &str = "/v3/kv/txn";
pub const WATCH: &str = "/v3/watch";

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(field: &'static str, text: &str) -> EtcdResult<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|source| EtcdError::InvalidPayload { field, source })
}

/// Smallest key strictly greater than every key starting with `prefix`.
pub fn prefix_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    // An all-0xff prefix covers the rest of the keyspace.
    vec![0]
}

#[serde_as]
#[derive(Debug, Serialize)]
pub struct LeaseGrantRequest {
    #[serde(rename = "TTL")]
    #[serde_as(as = "DisplayFromStr")]
    pub ttl: i64,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub struct LeaseGrantResponse {
    #[serde(rename = "ID")]
    #[serde_as(as = "DisplayFromStr")]
    pub id: i64,
}

#[serde_as]
#[derive(Debug, Serialize)]
pub struct LeaseIdRequest {
    #[serde(rename = "ID")]
    #[serde_as(as = "DisplayFromStr")]
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct LeaseKeepAliveEnvelope {
    pub result: Option<LeaseKeepAliveResponse>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub struct LeaseKeepAliveResponse {
    /// Absent once the lease is gone.
    #[serde(rename = "TTL")]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub ttl: Option<i64>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
pub struct ResponseHeader {
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub revision: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RangeRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
}

impl RangeRequest {
    pub fn key(path: &str) -> Self {
        Self {
            key: encode(path.as_bytes()),
            range_end: None,
        }
    }

    pub fn prefix(prefix: &str) -> Self {
        Self {
            key: encode(prefix.as_bytes()),
            range_end: Some(encode(&prefix_end(prefix))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RangeResponse {
    #[serde(default)]
    pub header: ResponseHeader,
    #[serde(default)]
    pub kvs: Vec<KeyValue>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub create_revision: Option<i64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub mod_revision: Option<i64>,
}

impl KeyValue {
    pub fn path(&self) -> EtcdResult<String> {
        let raw = decode("key", &self.key)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    pub fn into_entry(self) -> EtcdResult<Entry> {
        Ok(Entry {
            data: decode("value", &self.value)?,
            version: self.mod_revision.unwrap_or_default() as u64,
            created: self.create_revision.unwrap_or_default() as u64,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignore_lease: bool,
}

impl PutRequest {
    /// Put that keeps whatever lease the key already carries.
    pub fn keep_lease(path: &str, data: &[u8]) -> Self {
        Self {
            key: encode(path.as_bytes()),
            value: encode(data),
            lease: None,
            ignore_lease: true,
        }
    }

    pub fn with_lease(path: &str, data: &[u8], lease: Option<i64>) -> Self {
        Self {
            key: encode(path.as_bytes()),
            value: encode(data),
            lease: lease.map(|id| id.to_string()),
            ignore_lease: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteRangeRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOp {
    RequestPut(PutRequest),
    RequestDeleteRange(DeleteRangeRequest),
}

#[derive(Debug, Serialize)]
pub struct Compare {
    pub key: String,
    pub result: &'static str,
    pub target: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_revision: Option<String>,
}

impl Compare {
    /// Holds while no key exists at `path`.
    pub fn absent(path: &str) -> Self {
        Self {
            key: encode(path.as_bytes()),
            result: "EQUAL",
            target: "CREATE",
            create_revision: Some("0".into()),
            mod_revision: None,
        }
    }

    /// Holds while a key exists at `path`.
    pub fn present(path: &str) -> Self {
        Self {
            key: encode(path.as_bytes()),
            result: "GREATER",
            target: "CREATE",
            create_revision: Some("0".into()),
            mod_revision: None,
        }
    }

    /// Holds while the key at `path` was last modified at `revision`.
    pub fn modified_at(path: &str, revision: u64) -> Self {
        Self {
            key: encode(path.as_bytes()),
            result: "EQUAL",
            target: "MOD",
            create_revision: None,
            mod_revision: Some(revision.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TxnRequest {
    pub compare: Vec<Compare>,
    pub success: Vec<RequestOp>,
    pub failure: Vec<RequestOp>,
}

impl TxnRequest {
    pub fn guarded(compare: Compare, success: Vec<RequestOp>) -> Self {
        Self {
            compare: vec![compare],
            success,
            failure: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TxnResponse {
    #[serde(default)]
    pub header: ResponseHeader,
    #[serde(default)]
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchRequest {
    pub create_request: WatchCreateRequest,
}

#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct WatchCreateRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
    #[serde_as(as = "DisplayFromStr")]
    pub start_revision: i64,
}

impl WatchRequest {
    pub fn from_range(range: RangeRequest, start_revision: i64) -> Self {
        Self {
            create_request: WatchCreateRequest {
                key: range.key,
                range_end: range.range_end,
                start_revision,
            },
        }
    }

    /// Move the start past `revision` so a re-created watch skips what was delivered.
    pub fn resume_after(&mut self, revision: i64) {
        self.create_request.start_revision =
            self.create_request.start_revision.max(revision + 1);
    }

    /// Restart from `revision` after the server compacted the history we asked for.
    pub fn restart_at(&mut self, revision: i64) {
        self.create_request.start_revision = revision;
    }
}

#[derive(Debug, Deserialize)]
pub struct WatchEnvelope {
    pub result: Option<WatchResponse>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
pub struct WatchResponse {
    #[serde(default)]
    pub events: Vec<WatchEvent>,
    #[serde(default)]
    pub canceled: bool,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub compact_revision: Option<i64>,
}

impl WatchResponse {
    /// Highest revision carried by the events of this response.
    pub fn last_revision(&self) -> Option<i64> {
        self.events
            .iter()
            .filter_map(|event| event.kv.mod_revision)
            .max()
    }
}

#[derive(Debug, Deserialize)]
pub struct WatchEvent {
    /// `DELETE` for deletions; omitted for puts.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub kv: KeyValue,
}

impl WatchEvent {
    pub fn is_delete(&self) -> bool {
        self.kind.as_deref() == Some("DELETE")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_bumps_last_byte() {
        assert_eq!(prefix_end("/connect4/players/"), b"/connect4/players0".to_vec());
        assert_eq!(prefix_end("a\u{7f}"), b"a\x80".to_vec());
    }

    #[test]
    fn put_frames_use_gateway_encoding() {
        let txn = TxnRequest::guarded(
            Compare::absent("/k"),
            vec![RequestOp::RequestPut(PutRequest::with_lease("/k", b"v", Some(42)))],
        );
        let json = serde_json::to_value(&txn).unwrap();

        assert_eq!(json["compare"][0]["target"], "CREATE");
        assert_eq!(json["compare"][0]["create_revision"], "0");
        assert_eq!(json["success"][0]["request_put"]["key"], encode(b"/k"));
        assert_eq!(json["success"][0]["request_put"]["lease"], "42");
        assert!(json["success"][0]["request_put"].get("ignore_lease").is_none());
    }

    #[test]
    fn watch_frames_decode_puts_and_deletes() {
        let frame = format!(
            r#"{{"result":{{"header":{{"revision":"9"}},"events":[
                {{"kv":{{"key":"{key}","value":"{value}","create_revision":"3","mod_revision":"9"}}}},
                {{"type":"DELETE","kv":{{"key":"{key}","mod_revision":"10"}}}}
            ]}}}}"#,
            key = encode(b"/connect4/turn"),
            value = encode(b"player2"),
        );
        let envelope: WatchEnvelope = serde_json::from_str(&frame).unwrap();
        let mut events = envelope.result.unwrap().events.into_iter();

        let put = events.next().unwrap();
        assert!(!put.is_delete());
        assert_eq!(put.kv.path().unwrap(), "/connect4/turn");
        let entry = put.kv.into_entry().unwrap();
        assert_eq!(entry.data, b"player2".to_vec());
        assert_eq!((entry.created, entry.version), (3, 9));

        assert!(events.next().unwrap().is_delete());
    }

    #[test]
    fn resumed_watch_starts_after_last_delivered_event() {
        let frame = format!(
            r#"{{"result":{{"events":[
                {{"kv":{{"key":"{key}","mod_revision":"12"}}}},
                {{"type":"DELETE","kv":{{"key":"{key}","mod_revision":"14"}}}}
            ]}}}}"#,
            key = encode(b"/connect4/winner"),
        );
        let response = serde_json::from_str::<WatchEnvelope>(&frame)
            .unwrap()
            .result
            .unwrap();
        let mut request = WatchRequest::from_range(RangeRequest::key("/connect4/winner"), 5);

        request.resume_after(response.last_revision().unwrap());
        assert_eq!(request.create_request.start_revision, 15);

        request.resume_after(3);
        assert_eq!(request.create_request.start_revision, 15);
    }

    #[test]
    fn compacted_watch_reports_restart_revision() {
        let response = serde_json::from_str::<WatchEnvelope>(
            r#"{"result":{"canceled":true,"compact_revision":"40"}}"#,
        )
        .unwrap()
        .result
        .unwrap();
        assert!(response.canceled);
        assert_eq!(response.last_revision(), None);

        let mut request = WatchRequest::from_range(RangeRequest::key("/connect4/turn"), 7);
        request.restart_at(response.compact_revision.unwrap());
        assert_eq!(request.create_request.start_revision, 40);
    }

    #[test]
    fn keepalive_without_ttl_means_expired() {
        let envelope: LeaseKeepAliveEnvelope =
            serde_json::from_str(r#"{"result":{"ID":"7"}}"#).unwrap();
        assert_eq!(envelope.result.unwrap().ttl, None);
    }
}
