//! Wire messages for the batched open-stream round trip.
//!
//! Hand-written `prost` messages: the transport client is an external
//! collaborator, so only the serialized request/response bytes cross the
//! seam — no service codegen is involved. One request per worker lists every
//! file the caller needs from it; the response carries one status and one
//! stream token per entry, in submission order.

use bytes::Bytes;
use prost::Message;
use rsf_common::{Result, RsfError};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenStreamEntry {
    /// File the partition's data was registered under on this worker.
    #[prost(string, tag = "1")]
    pub file_name: ::prost::alloc::string::String,
    /// First visible mapper index, inclusive.
    #[prost(uint32, tag = "2")]
    pub start_map_index: u32,
    /// Last visible mapper index, exclusive.
    #[prost(uint32, tag = "3")]
    pub end_map_index: u32,
    /// Serve via a file-local read when the data is co-located with the caller.
    #[prost(bool, tag = "4")]
    pub prefer_local_read: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenStreamBatchRequest {
    #[prost(string, tag = "1")]
    pub shuffle_key: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub entries: ::prost::alloc::vec::Vec<OpenStreamEntry>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenStreamBatchResponse {
    /// One [`OpenStatus`] per submitted entry, in submission order.
    #[prost(enumeration = "OpenStatus", repeated, tag = "1")]
    pub statuses: ::prost::alloc::vec::Vec<i32>,
    /// One server-issued stream token per submitted entry; only meaningful
    /// where the matching status is `Success`.
    #[prost(uint64, repeated, tag = "2")]
    pub tokens: ::prost::alloc::vec::Vec<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum OpenStatus {
    Unspecified = 0,
    Success = 1,
    FileNotFound = 2,
    WorkerBusy = 3,
}

/// Opaque server-issued handle for one successfully opened location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamToken(pub u64);

impl OpenStreamBatchRequest {
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        Self::decode(payload)
            .map_err(|e| RsfError::Internal(format!("open stream request decode failed: {e}")))
    }
}

impl OpenStreamBatchResponse {
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        Self::decode(payload)
            .map_err(|e| RsfError::Internal(format!("open stream response decode failed: {e}")))
    }

    /// Per-entry tokens in submission order; `None` where the worker did not
    /// report success. A response whose arrays do not line up with the
    /// submitted entry count fails the whole batch.
    pub fn success_tokens(&self, submitted: usize) -> Result<Vec<Option<StreamToken>>> {
        if self.statuses.len() != submitted || self.tokens.len() != submitted {
            return Err(RsfError::Internal(format!(
                "open stream response shape mismatch: {} statuses / {} tokens for {} entries",
                self.statuses.len(),
                self.tokens.len(),
                submitted
            )));
        }
        Ok(self
            .statuses
            .iter()
            .zip(self.tokens.iter())
            .map(|(status, token)| {
                matches!(OpenStatus::try_from(*status), Ok(OpenStatus::Success))
                    .then_some(StreamToken(*token))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{OpenStatus, OpenStreamBatchRequest, OpenStreamBatchResponse, OpenStreamEntry};

    fn request() -> OpenStreamBatchRequest {
        OpenStreamBatchRequest {
            shuffle_key: "42-7".to_string(),
            entries: vec![
                OpenStreamEntry {
                    file_name: "part-0.data".to_string(),
                    start_map_index: 0,
                    end_map_index: u32::MAX,
                    prefer_local_read: false,
                },
                OpenStreamEntry {
                    file_name: "part-1.data".to_string(),
                    start_map_index: 2,
                    end_map_index: 5,
                    prefer_local_read: true,
                },
            ],
        }
    }

    #[test]
    fn request_survives_the_wire() {
        let req = request();
        let decoded =
            OpenStreamBatchRequest::from_bytes(req.to_bytes().as_ref()).expect("decode request");
        assert_eq!(decoded, req);
    }

    #[test]
    fn non_success_statuses_yield_absent_tokens() {
        let resp = OpenStreamBatchResponse {
            statuses: vec![
                OpenStatus::Success as i32,
                OpenStatus::FileNotFound as i32,
                OpenStatus::Success as i32,
            ],
            tokens: vec![11, 0, 13],
        };
        let tokens = resp.success_tokens(3).expect("aligned response");
        assert_eq!(tokens[0].map(|t| t.0), Some(11));
        assert_eq!(tokens[1], None);
        assert_eq!(tokens[2].map(|t| t.0), Some(13));
    }

    #[test]
    fn misaligned_response_fails_the_batch() {
        let resp = OpenStreamBatchResponse {
            statuses: vec![OpenStatus::Success as i32],
            tokens: vec![11, 12],
        };
        assert!(resp.success_tokens(2).is_err());
    }

    #[test]
    fn unknown_status_values_are_not_success() {
        let resp = OpenStreamBatchResponse {
            statuses: vec![99],
            tokens: vec![5],
        };
        let tokens = resp.success_tokens(1).expect("aligned response");
        assert_eq!(tokens[0], None);
    }
}
