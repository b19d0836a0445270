//! Multipart receiver.
//!
//! Pulls a payload from the device chunk by chunk with RDEMultipartReceive.
//! The receiver holds only the current handle and running totals; chunk
//! content goes straight to a [`ReceiveSink`].

use crate::error::EngineError;
use crate::session::Outgoing;
use rde_protocol::{
    MultipartReceiveRequest, MultipartReceiveResponse, ProtocolError, RdeResponse,
    TransferOperation,
};
use std::fmt;

/// Consumer of received chunks.
pub trait ReceiveSink {
    /// Takes one chunk; `is_final` marks the chunk that ends the transfer.
    fn on_data(&mut self, chunk: &[u8], is_final: bool) -> Result<(), EngineError>;

    fn on_complete(&mut self, _total: usize) {}

    fn on_failure(&mut self, _error: &EngineError) {}
}

/// Progress of a transfer in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    InProgress,
    Complete,
    Failed,
}

/// Result of feeding one response to a transfer.
#[derive(Debug)]
pub enum Progress {
    Continue(Outgoing),
    Complete,
}

pub struct MultipartReceiver {
    eid: u8,
    operation_id: u16,
    handle: u32,
    max_chunk: usize,
    received: usize,
    chunks: usize,
    hasher: crc32fast::Hasher,
    state: TransferState,
}

impl fmt::Debug for MultipartReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartReceiver")
            .field("eid", &self.eid)
            .field("operation_id", &self.operation_id)
            .field("handle", &self.handle)
            .field("received", &self.received)
            .field("state", &self.state)
            .finish()
    }
}

impl MultipartReceiver {
    pub fn new(eid: u8, handle: u32, operation_id: u16, max_chunk: usize) -> Self {
        Self {
            eid,
            operation_id,
            handle,
            max_chunk,
            received: 0,
            chunks: 0,
            hasher: crc32fast::Hasher::new(),
            state: TransferState::Idle,
        }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Builds the first receive request.
    pub fn start(&mut self) -> Result<Outgoing, EngineError> {
        if self.state != TransferState::Idle {
            return Err(EngineError::Transfer("receiver already started".to_string()));
        }
        if self.handle == 0 {
            self.state = TransferState::Failed;
            return Err(EngineError::Transfer("zero transfer handle".to_string()));
        }
        self.state = TransferState::InProgress;
        self.request(TransferOperation::FirstPart)
    }

    /// Feeds one response body. Any failure is reported to the sink and ends
    /// the transfer.
    pub fn on_response(
        &mut self,
        body: &[u8],
        sink: &mut dyn ReceiveSink,
    ) -> Result<Progress, EngineError> {
        match self.advance(body, sink) {
            Ok(progress) => Ok(progress),
            Err(e) => {
                self.state = TransferState::Failed;
                tracing::warn!(
                    "EID {}: multipart receive on handle {:#x} failed: {}",
                    self.eid,
                    self.handle,
                    e
                );
                sink.on_failure(&e);
                Err(e)
            }
        }
    }

    fn advance(
        &mut self,
        body: &[u8],
        sink: &mut dyn ReceiveSink,
    ) -> Result<Progress, EngineError> {
        if self.state != TransferState::InProgress {
            return Err(EngineError::Transfer(
                "response without a transfer in progress".to_string(),
            ));
        }

        let response = MultipartReceiveResponse::decode_body(body)?;
        if response.data.len() > self.max_chunk {
            return Err(ProtocolError::PayloadTooLarge {
                size: response.data.len(),
                max: self.max_chunk,
            }
            .into());
        }

        let is_final = response.transfer_flag.is_end();
        self.hasher.update(&response.data);
        self.received += response.data.len();
        self.chunks += 1;
        tracing::debug!(
            "EID {}: received chunk {} ({:?}, {} bytes, next handle {:#x})",
            self.eid,
            self.chunks,
            response.transfer_flag,
            response.data.len(),
            response.next_data_transfer_handle
        );

        sink.on_data(&response.data, is_final)?;

        if is_final {
            let actual = self.hasher.clone().finalize();
            if let Some(expected) = response.checksum {
                if expected != actual {
                    tracing::warn!(
                        "EID {}: multipart checksum mismatch on handle {:#x}: device {:#010x}, computed {:#010x}",
                        self.eid,
                        self.handle,
                        expected,
                        actual
                    );
                }
            }
            self.state = TransferState::Complete;
            sink.on_complete(self.received);
            return Ok(Progress::Complete);
        }

        if response.next_data_transfer_handle == 0 {
            return Err(EngineError::Transfer(
                "device returned a zero handle before the final chunk".to_string(),
            ));
        }
        self.handle = response.next_data_transfer_handle;
        Ok(Progress::Continue(self.request(TransferOperation::NextPart)?))
    }

    fn request(&self, transfer_operation: TransferOperation) -> Result<Outgoing, EngineError> {
        Outgoing::request(&MultipartReceiveRequest {
            data_transfer_handle: self.handle,
            operation_id: self.operation_id,
            transfer_operation,
        })
    }
}

/// Sink that collects chunks into a buffer.
#[derive(Debug, Default)]
pub struct BufferSink {
    pub data: Vec<u8>,
    pub completed: bool,
    pub failed: bool,
}

impl ReceiveSink for BufferSink {
    fn on_data(&mut self, chunk: &[u8], _is_final: bool) -> Result<(), EngineError> {
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    fn on_complete(&mut self, _total: usize) {
        self.completed = true;
    }

    fn on_failure(&mut self, _error: &EngineError) {
        self.failed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};
    use rde_protocol::{transfer_checksum, CompletionCode, TransferFlag};

    fn chunk(flag: TransferFlag, next: u32, data: &[u8], checksum: Option<u32>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        MultipartReceiveResponse {
            transfer_flag: flag,
            next_data_transfer_handle: next,
            data: Bytes::copy_from_slice(data),
            checksum,
        }
        .encode_body(&mut buf)
        .unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_three_chunk_reassembly() {
        let payload = b"hello, multipart world";
        let crc = transfer_checksum(payload);
        let mut receiver = MultipartReceiver::new(8, 0x100, 7, 1024);
        let mut sink = BufferSink::default();

        let first = receiver.start().unwrap();
        assert_eq!(first.body[..4], 0x100u32.to_le_bytes());
        assert_eq!(first.body[6], TransferOperation::FirstPart.as_u8());

        let next = match receiver
            .on_response(&chunk(TransferFlag::Start, 0x101, &payload[..5], None), &mut sink)
            .unwrap()
        {
            Progress::Continue(out) => out,
            Progress::Complete => panic!("unexpected completion"),
        };
        assert_eq!(next.body[..4], 0x101u32.to_le_bytes());
        assert_eq!(next.body[6], TransferOperation::NextPart.as_u8());

        receiver
            .on_response(&chunk(TransferFlag::Middle, 0x102, &payload[5..12], None), &mut sink)
            .unwrap();
        let done = receiver
            .on_response(&chunk(TransferFlag::End, 0, &payload[12..], Some(crc)), &mut sink)
            .unwrap();

        assert!(matches!(done, Progress::Complete));
        assert_eq!(sink.data, payload);
        assert!(sink.completed);
        assert_eq!(receiver.received(), payload.len());
        assert_eq!(receiver.state(), TransferState::Complete);
    }

    #[test]
    fn test_single_chunk_with_bad_checksum_still_completes() {
        let mut receiver = MultipartReceiver::new(8, 1, 0, 1024);
        let mut sink = BufferSink::default();
        receiver.start().unwrap();
        let done = receiver
            .on_response(&chunk(TransferFlag::StartAndEnd, 0, b"abc", Some(0)), &mut sink)
            .unwrap();
        assert!(matches!(done, Progress::Complete));
        assert_eq!(sink.data, b"abc");
    }

    #[test]
    fn test_oversized_chunk_fails() {
        let mut receiver = MultipartReceiver::new(8, 1, 0, 4);
        let mut sink = BufferSink::default();
        receiver.start().unwrap();
        let err = receiver
            .on_response(&chunk(TransferFlag::Start, 2, b"too long", None), &mut sink)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::PayloadTooLarge { .. })
        ));
        assert!(sink.failed);
        assert!(sink.data.is_empty());
        assert_eq!(receiver.state(), TransferState::Failed);
    }

    #[test]
    fn test_completion_code_failure() {
        let mut receiver = MultipartReceiver::new(8, 1, 0, 1024);
        let mut sink = BufferSink::default();
        receiver.start().unwrap();
        let err = receiver
            .on_response(&[CompletionCode::ErrorInvalidData.as_u8()], &mut sink)
            .unwrap_err();
        assert_eq!(
            err.completion_code(),
            Some(CompletionCode::ErrorInvalidData)
        );
        assert!(sink.failed);

        // No further progress after a failure.
        assert!(receiver
            .on_response(&chunk(TransferFlag::End, 0, b"x", Some(0)), &mut sink)
            .is_err());
    }

    #[test]
    fn test_zero_next_handle_mid_transfer_fails() {
        let mut receiver = MultipartReceiver::new(8, 1, 0, 1024);
        let mut sink = BufferSink::default();
        receiver.start().unwrap();
        assert!(matches!(
            receiver.on_response(&chunk(TransferFlag::Start, 0, b"abc", None), &mut sink),
            Err(EngineError::Transfer(_))
        ));
    }

    #[test]
    fn test_zero_start_handle_rejected() {
        let mut receiver = MultipartReceiver::new(8, 0, 0, 1024);
        assert!(receiver.start().is_err());
    }
}
