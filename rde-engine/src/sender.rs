//! Multipart sender.
//!
//! Pushes a request payload to the device with RDEMultipartSend. Bytes leave
//! the pending buffer only once the device acknowledged the chunk carrying
//! them. The MC picks the handles: each chunk advertises the next handle,
//! and the last one advertises 0.

use crate::error::EngineError;
use crate::receiver::{Progress, TransferState};
use crate::session::Outgoing;
use bytes::{Buf, Bytes};
use rde_protocol::{
    transfer_checksum, MultipartSendRequest, MultipartSendResponse, RdeResponse, TransferFlag,
    TransferOperation,
};

/// Observer of send progress.
pub trait SendSink {
    fn on_chunk_acked(&mut self, _sent: usize, _remaining: usize) {}

    fn on_complete(&mut self, _total: usize) {}

    fn on_failure(&mut self, _error: &EngineError) {}
}

/// Sink for callers that only care about the returned result.
#[derive(Debug, Default)]
pub struct NullSendSink;

impl SendSink for NullSendSink {}

#[derive(Debug)]
pub struct MultipartSender {
    eid: u8,
    operation_id: u16,
    handle: u32,
    next_handle: u32,
    pending: Bytes,
    max_chunk: usize,
    checksum: u32,
    total: usize,
    first: bool,
    in_flight: usize,
    state: TransferState,
}

impl MultipartSender {
    pub fn new(
        eid: u8,
        handle: u32,
        operation_id: u16,
        payload: Bytes,
        max_chunk: usize,
    ) -> Result<Self, EngineError> {
        if handle == 0 {
            return Err(EngineError::Transfer("zero transfer handle".to_string()));
        }
        if max_chunk == 0 {
            return Err(EngineError::Transfer("zero chunk size".to_string()));
        }
        if payload.is_empty() {
            return Err(EngineError::Transfer("nothing to send".to_string()));
        }

        Ok(Self {
            eid,
            operation_id,
            handle,
            next_handle: 0,
            checksum: transfer_checksum(&payload),
            total: payload.len(),
            pending: payload,
            max_chunk,
            first: true,
            in_flight: 0,
            state: TransferState::Idle,
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Builds the first chunk.
    pub fn start(&mut self) -> Result<Outgoing, EngineError> {
        if self.state != TransferState::Idle {
            return Err(EngineError::Transfer("sender already started".to_string()));
        }
        self.state = TransferState::InProgress;
        self.chunk()
    }

    /// Feeds the acknowledgement of the chunk in flight.
    pub fn on_response(
        &mut self,
        body: &[u8],
        sink: &mut dyn SendSink,
    ) -> Result<Progress, EngineError> {
        match self.advance(body, sink) {
            Ok(progress) => Ok(progress),
            Err(e) => {
                self.state = TransferState::Failed;
                tracing::warn!(
                    "EID {}: multipart send on handle {:#x} failed: {}",
                    self.eid,
                    self.handle,
                    e
                );
                sink.on_failure(&e);
                Err(e)
            }
        }
    }

    fn advance(&mut self, body: &[u8], sink: &mut dyn SendSink) -> Result<Progress, EngineError> {
        if self.state != TransferState::InProgress {
            return Err(EngineError::Transfer(
                "acknowledgement without a transfer in progress".to_string(),
            ));
        }

        let response = MultipartSendResponse::decode_body(body)?;
        if response.transfer_operation == TransferOperation::Abort {
            return Err(EngineError::Transfer("device aborted the transfer".to_string()));
        }

        let sent = self.in_flight;
        self.pending.advance(sent);
        self.in_flight = 0;
        self.first = false;
        sink.on_chunk_acked(sent, self.pending.len());

        if self.pending.is_empty() {
            self.state = TransferState::Complete;
            tracing::debug!(
                "EID {}: multipart send of {} bytes complete",
                self.eid,
                self.total
            );
            sink.on_complete(self.total);
            return Ok(Progress::Complete);
        }

        if response.transfer_operation == TransferOperation::Complete {
            return Err(EngineError::Transfer(format!(
                "device completed the transfer with {} bytes unsent",
                self.pending.len()
            )));
        }

        self.handle = self.next_handle;
        Ok(Progress::Continue(self.chunk()?))
    }

    fn chunk(&mut self) -> Result<Outgoing, EngineError> {
        let size = self.pending.len().min(self.max_chunk);
        let last = size == self.pending.len();
        let flag = TransferFlag::for_chunk(self.first, last);
        self.next_handle = if last {
            0
        } else {
            self.handle.wrapping_add(1).max(1)
        };
        self.in_flight = size;

        tracing::debug!(
            "EID {}: sending chunk {:?} on handle {:#x} ({} of {} bytes left)",
            self.eid,
            flag,
            self.handle,
            self.pending.len(),
            self.total
        );

        Outgoing::request(&MultipartSendRequest {
            data_transfer_handle: self.handle,
            operation_id: self.operation_id,
            transfer_flag: flag,
            next_data_transfer_handle: self.next_handle,
            data: self.pending.slice(..size),
            checksum: last.then_some(self.checksum),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rde_protocol::{CompletionCode, Reader};

    #[derive(Default)]
    struct RecordingSink {
        acked: Vec<(usize, usize)>,
        completed: Option<usize>,
        failed: bool,
    }

    impl SendSink for RecordingSink {
        fn on_chunk_acked(&mut self, sent: usize, remaining: usize) {
            self.acked.push((sent, remaining));
        }

        fn on_complete(&mut self, total: usize) {
            self.completed = Some(total);
        }

        fn on_failure(&mut self, _error: &EngineError) {
            self.failed = true;
        }
    }

    struct SentChunk {
        handle: u32,
        flag: TransferFlag,
        next: u32,
        data: Vec<u8>,
        checksum: Option<u32>,
    }

    fn parse(out: &Outgoing) -> SentChunk {
        let mut reader = Reader::new(&out.body);
        let handle = reader.u32().unwrap();
        let _operation_id = reader.u16().unwrap();
        let flag = TransferFlag::from_u8(reader.u8().unwrap()).unwrap();
        let next = reader.u32().unwrap();
        let mut length = reader.u32().unwrap() as usize;
        if flag.is_end() {
            length -= 4;
        }
        let data = reader.take(length).unwrap().to_vec();
        let checksum = flag.is_end().then(|| reader.u32().unwrap());
        SentChunk {
            handle,
            flag,
            next,
            data,
            checksum,
        }
    }

    fn ack(op: TransferOperation) -> Vec<u8> {
        vec![CompletionCode::Success.as_u8(), op.as_u8()]
    }

    #[test]
    fn test_flags_and_handles_across_chunks() {
        let payload = Bytes::from_static(b"0123456789");
        let mut sender = MultipartSender::new(3, 50, 9, payload.clone(), 4).unwrap();
        let mut sink = RecordingSink::default();

        let first = parse(&sender.start().unwrap());
        assert_eq!(first.flag, TransferFlag::Start);
        assert_eq!(first.handle, 50);
        assert_eq!(first.next, 51);
        assert_eq!(first.data, b"0123");

        let second = match sender
            .on_response(&ack(TransferOperation::NextPart), &mut sink)
            .unwrap()
        {
            Progress::Continue(out) => parse(&out),
            Progress::Complete => panic!("unexpected completion"),
        };
        assert_eq!(second.flag, TransferFlag::Middle);
        assert_eq!(second.handle, 51);
        assert_eq!(second.data, b"4567");
        assert_eq!(sender.remaining(), 6);

        let third = match sender
            .on_response(&ack(TransferOperation::NextPart), &mut sink)
            .unwrap()
        {
            Progress::Continue(out) => parse(&out),
            Progress::Complete => panic!("unexpected completion"),
        };
        assert_eq!(third.flag, TransferFlag::End);
        assert_eq!(third.next, 0);
        assert_eq!(third.data, b"89");
        assert_eq!(third.checksum, Some(transfer_checksum(&payload)));
        assert!(first.checksum.is_none() && second.checksum.is_none());

        let done = sender
            .on_response(&ack(TransferOperation::Complete), &mut sink)
            .unwrap();
        assert!(matches!(done, Progress::Complete));
        assert_eq!(sink.acked, vec![(4, 6), (4, 2), (2, 0)]);
        assert_eq!(sink.completed, Some(10));
        assert_eq!(sender.state(), TransferState::Complete);
    }

    #[test]
    fn test_single_chunk_uses_start_and_end() {
        let mut sender = MultipartSender::new(3, 1, 0, Bytes::from_static(b"abc"), 64).unwrap();
        let only = parse(&sender.start().unwrap());
        assert_eq!(only.flag, TransferFlag::StartAndEnd);
        assert_eq!(only.next, 0);
        assert!(only.checksum.is_some());
    }

    #[test]
    fn test_abort_fails_without_consuming() {
        let mut sender = MultipartSender::new(3, 1, 0, Bytes::from_static(b"abcdef"), 4).unwrap();
        let mut sink = RecordingSink::default();
        sender.start().unwrap();
        assert!(sender
            .on_response(&ack(TransferOperation::Abort), &mut sink)
            .is_err());
        assert!(sink.failed);
        assert_eq!(sender.remaining(), 6);
        assert_eq!(sender.state(), TransferState::Failed);
    }

    #[test]
    fn test_premature_complete_fails() {
        let mut sender = MultipartSender::new(3, 1, 0, Bytes::from_static(b"abcdef"), 4).unwrap();
        let mut sink = NullSendSink;
        sender.start().unwrap();
        assert!(matches!(
            sender.on_response(&ack(TransferOperation::Complete), &mut sink),
            Err(EngineError::Transfer(_))
        ));
    }

    #[test]
    fn test_invalid_construction() {
        assert!(MultipartSender::new(3, 0, 0, Bytes::from_static(b"a"), 4).is_err());
        assert!(MultipartSender::new(3, 1, 0, Bytes::new(), 4).is_err());
        assert!(MultipartSender::new(3, 1, 0, Bytes::from_static(b"a"), 0).is_err());
    }
}
