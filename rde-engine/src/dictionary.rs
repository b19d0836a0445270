//! Dictionary session: GetSchemaDictionary followed by a multipart receive
//! that streams the dictionary into the device's store.

use crate::error::EngineError;
use crate::receiver::{MultipartReceiver, Progress, ReceiveSink};
use crate::session::{Outgoing, SessionContext, SessionOutput, Step};
use crate::state::OpState;
use rde_protocol::{GetSchemaDictionaryRequest, GetSchemaDictionaryResponse, RdeResponse};
use rde_storage::{DictionaryKey, DictionaryStore};

/// Dictionary transfers are not bound to an operation.
const NO_OPERATION: u16 = 0;

#[derive(Debug)]
enum Phase {
    Request,
    Receiving(MultipartReceiver),
}

#[derive(Debug)]
pub struct DictionarySession {
    key: DictionaryKey,
    state: OpState,
    phase: Phase,
}

impl DictionarySession {
    pub fn new(resource_id: u32, schema_class: u8) -> Self {
        Self {
            key: DictionaryKey::new(resource_id, schema_class),
            state: OpState::Idle,
            phase: Phase::Request,
        }
    }

    pub fn key(&self) -> DictionaryKey {
        self.key
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    pub fn set_state(&mut self, state: OpState) {
        self.state = state;
    }

    pub fn start(&mut self, ctx: &mut SessionContext<'_>) -> Result<Step, EngineError> {
        if self.state != OpState::Idle {
            return Err(EngineError::SessionAborted(self.state));
        }

        // Chunks are appended, so a leftover partial download must go first.
        if ctx
            .store
            .get(self.key.resource_id, self.key.schema_class)
            .is_some_and(|d| !d.is_complete())
        {
            ctx.store.reset(self.key.resource_id, self.key.schema_class)?;
        }

        tracing::info!(
            "GetSchemaDictionary request: EID={}, dictionary {}",
            ctx.eid,
            self.key
        );
        let out = Outgoing::request(&GetSchemaDictionaryRequest {
            resource_id: self.key.resource_id,
            schema_class: self.key.schema_class,
        })?;
        self.state = OpState::Waiting;
        Ok(Step::Send(out))
    }

    pub fn on_response(
        &mut self,
        ctx: &mut SessionContext<'_>,
        body: &[u8],
    ) -> Result<Step, EngineError> {
        if self.state.is_abandoned() {
            tracing::info!(
                "Late dictionary response from EID {} ignored ({})",
                ctx.eid,
                self.state
            );
            return Ok(Step::Discarded);
        }
        if self.state != OpState::Waiting {
            return Err(EngineError::SessionAborted(self.state));
        }

        match &mut self.phase {
            Phase::Request => {
                let response = GetSchemaDictionaryResponse::decode_body(body)?;
                tracing::debug!(
                    "EID {}: dictionary {} format {} on handle {:#x}",
                    ctx.eid,
                    self.key,
                    response.dictionary_format,
                    response.transfer_handle
                );
                let mut receiver = MultipartReceiver::new(
                    ctx.eid,
                    response.transfer_handle,
                    NO_OPERATION,
                    ctx.transfer.max_receive_buffer,
                );
                let out = receiver.start()?;
                self.phase = Phase::Receiving(receiver);
                Ok(Step::Send(out))
            }
            Phase::Receiving(receiver) => {
                let mut sink = StoreSink {
                    store: &mut *ctx.store,
                    key: self.key,
                };
                match receiver.on_response(body, &mut sink)? {
                    Progress::Continue(out) => Ok(Step::Send(out)),
                    Progress::Complete => {
                        self.state = OpState::Completed;
                        Ok(Step::Done(SessionOutput::Dictionary(self.key)))
                    }
                }
            }
        }
    }
}

/// Streams received chunks into the dictionary store.
struct StoreSink<'a> {
    store: &'a mut DictionaryStore,
    key: DictionaryKey,
}

impl ReceiveSink for StoreSink<'_> {
    fn on_data(&mut self, chunk: &[u8], is_final: bool) -> Result<(), EngineError> {
        // An End chunk may carry only the transfer checksum.
        let result = match (chunk.is_empty(), is_final) {
            (true, false) => return Ok(()),
            (true, true) => self
                .store
                .complete(self.key.resource_id, self.key.schema_class),
            // The receiver already stripped the transfer checksum.
            (false, _) => self.store.add_chunk(
                self.key.resource_id,
                self.key.schema_class,
                chunk,
                false,
                is_final,
            ),
        };
        match result {
            Err(e)
                if is_final
                    && self
                        .store
                        .contains_complete(self.key.resource_id, self.key.schema_class) =>
            {
                tracing::warn!(
                    "Dictionary {} kept in memory only, save failed: {}",
                    self.key,
                    e
                );
                Ok(())
            }
            other => other.map_err(EngineError::from),
        }
    }

    fn on_failure(&mut self, error: &EngineError) {
        tracing::warn!("Dictionary {} download failed: {}", self.key, error);
        if let Err(e) = self.store.reset(self.key.resource_id, self.key.schema_class) {
            tracing::warn!("Failed to discard partial dictionary {}: {}", self.key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{completion, encoded, Fixture};
    use bytes::Bytes;
    use rde_protocol::{
        schema_class, transfer_checksum, CompletionCode, MultipartReceiveResponse, RdeCommand,
        TransferFlag,
    };

    fn dictionary_response(handle: u32) -> Vec<u8> {
        let mut body = vec![CompletionCode::Success.as_u8(), 0x00];
        body.extend_from_slice(&handle.to_le_bytes());
        body
    }

    fn chunk(flag: TransferFlag, next: u32, data: &[u8], checksum: Option<u32>) -> Vec<u8> {
        encoded(|buf| {
            MultipartReceiveResponse {
                transfer_flag: flag,
                next_data_transfer_handle: next,
                data: Bytes::copy_from_slice(data),
                checksum,
            }
            .encode_body(buf)
        })
    }

    fn sent(step: Step) -> Outgoing {
        match step {
            Step::Send(out) => out,
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_download_lands_in_store() {
        let mut fixture = Fixture::new();
        let mut session = DictionarySession::new(2, schema_class::MAJOR);

        let request = sent(session.start(&mut fixture.ctx()).unwrap());
        assert_eq!(request.command, RdeCommand::GetSchemaDictionary);
        assert_eq!(&request.body[..], &[2, 0, 0, 0, schema_class::MAJOR]);

        let first = sent(
            session
                .on_response(&mut fixture.ctx(), &dictionary_response(0x40))
                .unwrap(),
        );
        assert_eq!(first.command, RdeCommand::MultipartReceive);

        let dictionary = b"dictionary-bytes";
        let crc = transfer_checksum(dictionary);
        sent(
            session
                .on_response(
                    &mut fixture.ctx(),
                    &chunk(TransferFlag::Start, 0x41, &dictionary[..10], None),
                )
                .unwrap(),
        );
        let done = session
            .on_response(
                &mut fixture.ctx(),
                &chunk(TransferFlag::End, 0, &dictionary[10..], Some(crc)),
            )
            .unwrap();

        assert!(matches!(
            done,
            Step::Done(SessionOutput::Dictionary(key)) if key == DictionaryKey::new(2, 0)
        ));
        let stored = fixture.store.get_complete(2, schema_class::MAJOR).unwrap();
        assert_eq!(stored.data(), dictionary);
        assert!(stored.path().exists());
    }

    #[test]
    fn test_checksum_only_end_chunk_completes() {
        let mut fixture = Fixture::new();
        let mut session = DictionarySession::new(2, schema_class::MAJOR);
        session.start(&mut fixture.ctx()).unwrap();
        session
            .on_response(&mut fixture.ctx(), &dictionary_response(0x40))
            .unwrap();

        let dictionary = b"dictionary-bytes";
        sent(
            session
                .on_response(
                    &mut fixture.ctx(),
                    &chunk(TransferFlag::Start, 0x41, dictionary, None),
                )
                .unwrap(),
        );
        let done = session
            .on_response(
                &mut fixture.ctx(),
                &chunk(
                    TransferFlag::End,
                    0,
                    &[],
                    Some(transfer_checksum(dictionary)),
                ),
            )
            .unwrap();

        assert!(matches!(done, Step::Done(SessionOutput::Dictionary(_))));
        let stored = fixture.store.get_complete(2, schema_class::MAJOR).unwrap();
        assert_eq!(stored.data(), dictionary);
        assert!(stored.path().exists());
    }

    #[test]
    fn test_zero_handle_fails() {
        let mut fixture = Fixture::new();
        let mut session = DictionarySession::new(2, schema_class::MAJOR);
        session.start(&mut fixture.ctx()).unwrap();
        assert!(matches!(
            session.on_response(&mut fixture.ctx(), &dictionary_response(0)),
            Err(EngineError::Transfer(_))
        ));
    }

    #[test]
    fn test_failure_discards_partial_dictionary() {
        let mut fixture = Fixture::new();
        let mut session = DictionarySession::new(2, schema_class::MAJOR);
        session.start(&mut fixture.ctx()).unwrap();
        session
            .on_response(&mut fixture.ctx(), &dictionary_response(5))
            .unwrap();
        session
            .on_response(
                &mut fixture.ctx(),
                &chunk(TransferFlag::Start, 6, b"partial", None),
            )
            .unwrap();
        assert!(fixture.store.get(2, schema_class::MAJOR).is_some());

        assert!(session
            .on_response(
                &mut fixture.ctx(),
                &completion(CompletionCode::ErrorInvalidData)
            )
            .is_err());
        assert!(fixture.store.get(2, schema_class::MAJOR).is_none());
    }

    #[test]
    fn test_start_discards_stale_partial() {
        let mut fixture = Fixture::new();
        fixture
            .store
            .add_chunk(2, schema_class::MAJOR, b"stale", false, false)
            .unwrap();
        let mut session = DictionarySession::new(2, schema_class::MAJOR);
        session.start(&mut fixture.ctx()).unwrap();
        assert!(fixture.store.get(2, schema_class::MAJOR).is_none());
    }

    #[test]
    fn test_cancelled_session_discards_response() {
        let mut fixture = Fixture::new();
        let mut session = DictionarySession::new(2, schema_class::MAJOR);
        session.start(&mut fixture.ctx()).unwrap();
        session.set_state(OpState::Cancelled);
        assert!(matches!(
            session
                .on_response(&mut fixture.ctx(), &dictionary_response(5))
                .unwrap(),
            Step::Discarded
        ));
    }
}
