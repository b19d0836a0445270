//! Operation session: one Redfish operation against one resource.
//!
//! ```text
//! Init ──► [Sending] ──► [Receiving] ──► Completing ──► Done
//! ```
//!
//! `Sending` only runs when the encoded request does not fit in the
//! OperationInit message, `Receiving` only when the device returns a result
//! transfer handle. OperationComplete is always sent once the payload has
//! been exchanged, and the result is decoded only after it succeeds.

use crate::error::EngineError;
use crate::receiver::{MultipartReceiver, Progress, ReceiveSink};
use crate::sender::{MultipartSender, NullSendSink};
use crate::session::{Outgoing, SessionContext, SessionOutput, Step};
use crate::state::OpState;
use bytes::Bytes;
use rde_core::{tree_from_json_str, BejDictionaries, MetadataField};
use rde_protocol::{
    OperationCompleteRequest, OperationCompleteResponse, OperationFlags, OperationInitRequest,
    OperationInitResponse, OperationType, ProtocolError, RdeResponse, CHECKSUM_SIZE,
    MULTIPART_SEND_FIXED_SIZE, OPERATION_INIT_FIXED_SIZE,
};
use serde::{Deserialize, Serialize};

/// Handle the MC advertises for the first MultipartSend chunk.
const SEND_HANDLE: u32 = 1;

/// Status reported to callers for a completed operation.
pub const STATUS_OK: u16 = 200;

/// A caller's request for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub uri: String,
    pub operation: OperationType,
    /// JSON document for operations that carry a request body.
    pub payload: Option<String>,
}

impl OperationRequest {
    pub fn read(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            operation: OperationType::Read,
            payload: None,
        }
    }

    pub fn update(uri: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            operation: OperationType::Update,
            payload: Some(payload.into()),
        }
    }
}

/// Outcome of a completed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Decoded response body; empty when the device returned no payload.
    pub json: String,
    pub etag: String,
    pub status: u16,
}

#[derive(Debug)]
enum Phase {
    Init,
    Sending(MultipartSender),
    Receiving(MultipartReceiver),
    Completing,
}

#[derive(Debug)]
pub struct OperationSession {
    request: OperationRequest,
    operation_id: u16,
    resource_id: u32,
    schema_class: u8,
    state: OpState,
    phase: Phase,
    /// Request bytes that did not fit in OperationInit.
    remainder: Option<Bytes>,
    /// Data bytes per MultipartSend message.
    send_chunk: usize,
    result_handle: u32,
    response: Vec<u8>,
    etag: String,
}

fn needs_dictionaries(operation: OperationType) -> bool {
    !matches!(operation, OperationType::Delete | OperationType::Head)
}

impl OperationSession {
    pub fn new(request: OperationRequest, operation_id: u16) -> Self {
        Self {
            request,
            operation_id,
            resource_id: 0,
            schema_class: 0,
            state: OpState::Idle,
            phase: Phase::Init,
            remainder: None,
            send_chunk: 0,
            result_handle: 0,
            response: Vec::new(),
            etag: String::new(),
        }
    }

    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    pub fn operation_id(&self) -> u16 {
        self.operation_id
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    pub fn set_state(&mut self, state: OpState) {
        self.state = state;
    }

    /// Resolves the resource, encodes the request body and builds
    /// OperationInit. Nothing is sent unless every precondition holds.
    pub fn start(&mut self, ctx: &mut SessionContext<'_>) -> Result<Step, EngineError> {
        if self.state != OpState::Idle {
            return Err(EngineError::SessionAborted(self.state));
        }

        let operation = self.request.operation;
        let resource = ctx.registry.get_by_uri(&self.request.uri)?;
        self.resource_id = resource.resource_id;
        self.schema_class = resource.schema_class;

        if needs_dictionaries(operation) {
            self.dictionaries(ctx)?;
        }

        let payload = if operation.carries_request_payload() {
            self.encode_payload(ctx)?
        } else {
            if self.request.payload.is_some() {
                tracing::warn!(
                    "EID {}: ignoring request body for {} {}",
                    ctx.eid,
                    operation,
                    self.request.uri
                );
            }
            Bytes::new()
        };

        let mut flags = OperationFlags::new();
        let mut send_handle = 0;
        let mut inline = payload.clone();
        if !payload.is_empty() {
            flags = flags.with_request_payload();
            let max_chunk = ctx.metadata.device_max_transfer_chunk_size()? as usize;
            if OPERATION_INIT_FIXED_SIZE + payload.len() > max_chunk {
                // Every MultipartSend message, checksum included, must fit
                // in the negotiated chunk size.
                let send_chunk = max_chunk
                    .checked_sub(MULTIPART_SEND_FIXED_SIZE + CHECKSUM_SIZE)
                    .filter(|n| *n > 0)
                    .ok_or_else(|| {
                        EngineError::Transfer(format!(
                            "device chunk size {} too small for a multipart request",
                            max_chunk
                        ))
                    })?;
                let first = max_chunk - OPERATION_INIT_FIXED_SIZE;
                inline = payload.slice(..first);
                self.remainder = Some(payload.slice(first..));
                self.send_chunk = send_chunk;
                send_handle = SEND_HANDLE;
                tracing::debug!(
                    "EID {}: request of {} bytes exceeds chunk size {}, {} bytes inline",
                    ctx.eid,
                    payload.len(),
                    max_chunk,
                    first
                );
            }
        }

        tracing::info!(
            "OperationInit request: EID={}, {} {} (resource {}, operation id {})",
            ctx.eid,
            operation,
            self.request.uri,
            self.resource_id,
            self.operation_id
        );
        let out = Outgoing::request(&OperationInitRequest {
            resource_id: self.resource_id,
            operation_id: self.operation_id,
            operation_type: operation,
            operation_flags: flags,
            send_data_transfer_handle: send_handle,
            operation_locator: Bytes::new(),
            request_payload: inline,
        })?;
        self.state = OpState::Waiting;
        self.phase = Phase::Init;
        Ok(Step::Send(out))
    }

    pub fn on_response(
        &mut self,
        ctx: &mut SessionContext<'_>,
        body: &[u8],
    ) -> Result<Step, EngineError> {
        if self.state.is_abandoned() {
            tracing::info!(
                "Late operation response from EID {} ignored (operation id {}, {})",
                ctx.eid,
                self.operation_id,
                self.state
            );
            return Ok(Step::Discarded);
        }
        if self.state != OpState::Waiting {
            return Err(EngineError::SessionAborted(self.state));
        }

        match &mut self.phase {
            Phase::Init => self.on_init(ctx, body),
            Phase::Sending(sender) => match sender.on_response(body, &mut NullSendSink)? {
                Progress::Continue(out) => Ok(Step::Send(out)),
                Progress::Complete => self.collect_result(ctx),
            },
            Phase::Receiving(receiver) => {
                let mut sink = ResponseSink {
                    buf: &mut self.response,
                    max: ctx.transfer.max_receive_buffer,
                };
                match receiver.on_response(body, &mut sink)? {
                    Progress::Continue(out) => Ok(Step::Send(out)),
                    Progress::Complete => self.complete(),
                }
            }
            Phase::Completing => self.on_complete(ctx, body),
        }
    }

    fn on_init(&mut self, ctx: &mut SessionContext<'_>, body: &[u8]) -> Result<Step, EngineError> {
        let response = OperationInitResponse::decode_body(body)?;
        tracing::info!(
            "OperationInit response: EID={}, status={:?}, result handle={:#x}, payload={} bytes",
            ctx.eid,
            response.operation_status,
            response.result_transfer_handle,
            response.response_payload.len()
        );
        if response.operation_status.is_failure() {
            return Err(EngineError::OperationStatus(response.operation_status));
        }

        self.etag = response.etag.value;
        self.result_handle = response.result_transfer_handle;
        if self.result_handle == 0 {
            self.append(&response.response_payload, ctx.transfer.max_receive_buffer)?;
        }

        if let Some(remainder) = self.remainder.take() {
            let mut sender = MultipartSender::new(
                ctx.eid,
                SEND_HANDLE,
                self.operation_id,
                remainder,
                self.send_chunk,
            )?;
            let out = sender.start()?;
            self.phase = Phase::Sending(sender);
            return Ok(Step::Send(out));
        }
        self.collect_result(ctx)
    }

    /// Pulls the result if the device staged one, otherwise completes.
    fn collect_result(&mut self, ctx: &mut SessionContext<'_>) -> Result<Step, EngineError> {
        if self.result_handle == 0 {
            return self.complete();
        }
        let mut receiver = MultipartReceiver::new(
            ctx.eid,
            self.result_handle,
            self.operation_id,
            ctx.transfer.max_receive_buffer,
        );
        let out = receiver.start()?;
        self.phase = Phase::Receiving(receiver);
        Ok(Step::Send(out))
    }

    fn complete(&mut self) -> Result<Step, EngineError> {
        self.phase = Phase::Completing;
        Ok(Step::Send(Outgoing::request(&OperationCompleteRequest {
            resource_id: self.resource_id,
            operation_id: self.operation_id,
        })?))
    }

    fn on_complete(&mut self, ctx: &mut SessionContext<'_>, body: &[u8]) -> Result<Step, EngineError> {
        OperationCompleteResponse::decode_body(body)?;
        tracing::info!(
            "OperationComplete: EID={}, operation id {} done",
            ctx.eid,
            self.operation_id
        );

        let response = std::mem::take(&mut self.response);
        let json = if response.is_empty() {
            String::new()
        } else {
            let (schema, annotation) = self.dictionaries(ctx)?;
            ctx.codec.decode(&response, &BejDictionaries { schema, annotation })?
        };

        if !self.etag.is_empty() {
            ctx.metadata.set(MetadataField::Etag(self.etag.clone()));
        }
        self.state = OpState::Completed;
        Ok(Step::Done(SessionOutput::Operation(OperationResult {
            json,
            etag: std::mem::take(&mut self.etag),
            status: STATUS_OK,
        })))
    }

    fn encode_payload(&self, ctx: &SessionContext<'_>) -> Result<Bytes, EngineError> {
        let text = match self.request.payload.as_deref() {
            Some(text) => text,
            None if self.request.operation == OperationType::Action => return Ok(Bytes::new()),
            None => {
                return Err(EngineError::InvalidRequest(format!(
                    "{} requires a JSON payload",
                    self.request.operation
                )))
            }
        };

        let tree = tree_from_json_str(text)?;
        let (schema, annotation) = self.dictionaries(ctx)?;
        let encoded = ctx.codec.encode(
            &tree,
            &BejDictionaries { schema, annotation },
            self.schema_class,
        )?;
        tracing::debug!(
            "EID {}: encoded request ({} bytes): {}",
            ctx.eid,
            encoded.len(),
            hex::encode(&encoded)
        );
        Ok(Bytes::from(encoded))
    }

    fn dictionaries<'c>(
        &self,
        ctx: &'c SessionContext<'_>,
    ) -> Result<(&'c [u8], &'c [u8]), EngineError> {
        let schema = ctx
            .store
            .get_complete(self.resource_id, self.schema_class)
            .ok_or(EngineError::DictionaryMissing {
                resource_id: self.resource_id,
                schema_class: self.schema_class,
            })?;
        let annotation = ctx
            .store
            .annotation()
            .ok_or(EngineError::AnnotationDictionaryMissing)?;
        Ok((schema.data(), annotation.data()))
    }

    fn append(&mut self, data: &[u8], max: usize) -> Result<(), EngineError> {
        ResponseSink {
            buf: &mut self.response,
            max,
        }
        .on_data(data, true)
    }
}

/// Accumulates the response payload up to a fixed bound.
struct ResponseSink<'a> {
    buf: &'a mut Vec<u8>,
    max: usize,
}

impl ReceiveSink for ResponseSink<'_> {
    fn on_data(&mut self, chunk: &[u8], _is_final: bool) -> Result<(), EngineError> {
        let size = self.buf.len() + chunk.len();
        if size > self.max {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: self.max,
            }
            .into());
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    fn on_failure(&mut self, _error: &EngineError) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{completion, encoded, Fixture};
    use rde_protocol::{
        transfer_checksum, CompletionCode, MultipartReceiveResponse, OperationStatus, RdeCommand,
        Reader, TransferFlag, TransferOperation, VarString,
    };

    const CHASSIS: &str = "/redfish/v1/Chassis";

    fn ready_fixture() -> Fixture {
        let mut fixture = Fixture::new();
        fixture
            .store
            .add_chunk(2, 0, b"schema-dictionary", false, true)
            .unwrap();
        fixture
            .store
            .add_chunk(0, 0, b"annotation-dictionary", false, true)
            .unwrap();
        fixture
            .metadata
            .set(MetadataField::DeviceMaxTransferChunkSize(1024));
        fixture
    }

    fn sent(step: Step) -> Outgoing {
        match step {
            Step::Send(out) => out,
            other => panic!("unexpected step {:?}", other),
        }
    }

    fn init_response(status: OperationStatus, result_handle: u32, payload: &[u8]) -> Vec<u8> {
        encoded(|buf| {
            OperationInitResponse {
                operation_status: status,
                completion_percentage: 100,
                completion_time_seconds: 0,
                operation_execution_flags: 0,
                result_transfer_handle: result_handle,
                permission_flags: 0,
                etag: VarString::utf8("W/\"42\""),
                response_payload: Bytes::copy_from_slice(payload),
            }
            .encode_body(buf)
        })
    }

    fn success() -> Vec<u8> {
        completion(CompletionCode::Success)
    }

    fn finish(session: &mut OperationSession, fixture: &mut Fixture) -> OperationResult {
        match session.on_response(&mut fixture.ctx(), &success()).unwrap() {
            Step::Done(SessionOutput::Operation(result)) => result,
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_read_with_inline_payload() {
        let mut fixture = ready_fixture();
        let mut session = OperationSession::new(OperationRequest::read(CHASSIS), 7);

        let init = sent(session.start(&mut fixture.ctx()).unwrap());
        assert_eq!(init.command, RdeCommand::OperationInit);
        let mut reader = Reader::new(&init.body);
        assert_eq!(reader.u32().unwrap(), 2);
        assert_eq!(reader.u16().unwrap(), 7);
        assert_eq!(reader.u8().unwrap(), OperationType::Read.as_u8());
        assert_eq!(init.body.len(), OPERATION_INIT_FIXED_SIZE);

        let complete = sent(
            session
                .on_response(
                    &mut fixture.ctx(),
                    &init_response(OperationStatus::Completed, 0, br#"{"Name":"c0"}"#),
                )
                .unwrap(),
        );
        assert_eq!(complete.command, RdeCommand::OperationComplete);
        assert_eq!(&complete.body[..], &[2, 0, 0, 0, 7, 0]);

        let result = finish(&mut session, &mut fixture);
        assert_eq!(result.json, r#"{"Name":"c0"}"#);
        assert_eq!(result.etag, "W/\"42\"");
        assert_eq!(result.status, STATUS_OK);
        assert_eq!(session.state(), OpState::Completed);
        assert_eq!(fixture.metadata.etag(), Some("W/\"42\""));
    }

    #[test]
    fn test_read_with_multipart_result() {
        let mut fixture = ready_fixture();
        let mut session = OperationSession::new(OperationRequest::read(CHASSIS), 3);
        session.start(&mut fixture.ctx()).unwrap();

        let receive = sent(
            session
                .on_response(
                    &mut fixture.ctx(),
                    &init_response(OperationStatus::HaveResults, 0x77, b""),
                )
                .unwrap(),
        );
        assert_eq!(receive.command, RdeCommand::MultipartReceive);
        assert_eq!(receive.body[..4], 0x77u32.to_le_bytes());

        let body = br#"{"Id":"1"}"#;
        let chunk = encoded(|buf| {
            MultipartReceiveResponse {
                transfer_flag: TransferFlag::StartAndEnd,
                next_data_transfer_handle: 0,
                data: Bytes::copy_from_slice(body),
                checksum: Some(transfer_checksum(body)),
            }
            .encode_body(buf)
        });
        let complete = sent(session.on_response(&mut fixture.ctx(), &chunk).unwrap());
        assert_eq!(complete.command, RdeCommand::OperationComplete);

        assert_eq!(finish(&mut session, &mut fixture).json, r#"{"Id":"1"}"#);
    }

    #[test]
    fn test_update_switches_to_multipart() {
        let mut fixture = ready_fixture();
        fixture
            .metadata
            .set(MetadataField::DeviceMaxTransferChunkSize(32));
        let payload = r##"{"@odata.type":"#Chassis.v1_0_0.Chassis","AssetTag":"rack-12-slot-4"}"##;
        let mut session = OperationSession::new(OperationRequest::update(CHASSIS, payload), 9);

        let init = sent(session.start(&mut fixture.ctx()).unwrap());
        let mut reader = Reader::new(&init.body);
        reader.skip(7).unwrap();
        let flags = OperationFlags::from_bits(reader.u8().unwrap());
        assert!(flags.has_request_payload());
        assert_eq!(reader.u32().unwrap(), SEND_HANDLE);
        assert_eq!(reader.u8().unwrap(), 0);
        let inline_len = reader.u32().unwrap() as usize;
        assert_eq!(inline_len, 32 - OPERATION_INIT_FIXED_SIZE);
        let mut request_bytes = reader.take(inline_len).unwrap().to_vec();

        let mut next = sent(
            session
                .on_response(
                    &mut fixture.ctx(),
                    &init_response(OperationStatus::Running, 0, b""),
                )
                .unwrap(),
        );
        let mut flags_seen = Vec::new();
        while next.command == RdeCommand::MultipartSend {
            assert!(next.body.len() <= 32, "{} byte MultipartSend", next.body.len());
            let mut reader = Reader::new(&next.body);
            reader.skip(6).unwrap();
            let flag = TransferFlag::from_u8(reader.u8().unwrap()).unwrap();
            reader.skip(4).unwrap();
            let mut length = reader.u32().unwrap() as usize;
            if flag.is_end() {
                length -= 4;
            }
            request_bytes.extend_from_slice(reader.take(length).unwrap());
            flags_seen.push(flag);

            let ack = if flag.is_end() {
                TransferOperation::Complete
            } else {
                TransferOperation::NextPart
            };
            next = sent(
                session
                    .on_response(
                        &mut fixture.ctx(),
                        &[CompletionCode::Success.as_u8(), ack.as_u8()],
                    )
                    .unwrap(),
            );
        }

        assert_eq!(flags_seen.first(), Some(&TransferFlag::Start));
        assert_eq!(flags_seen.last(), Some(&TransferFlag::End));
        assert_eq!(next.command, RdeCommand::OperationComplete);

        let sent_json: serde_json::Value = serde_json::from_slice(&request_bytes).unwrap();
        assert_eq!(sent_json["AssetTag"], "rack-12-slot-4");

        let result = finish(&mut session, &mut fixture);
        assert!(result.json.is_empty());
        assert_eq!(result.status, STATUS_OK);
    }

    #[test]
    fn test_update_rejects_chunk_size_without_room_for_data() {
        let mut fixture = ready_fixture();
        fixture.metadata.set(MetadataField::DeviceMaxTransferChunkSize(
            (MULTIPART_SEND_FIXED_SIZE + CHECKSUM_SIZE) as u32,
        ));
        let mut session = OperationSession::new(
            OperationRequest::update(CHASSIS, r#"{"AssetTag":"rack-12-slot-4"}"#),
            2,
        );
        assert!(matches!(
            session.start(&mut fixture.ctx()),
            Err(EngineError::Transfer(_))
        ));
        assert_eq!(session.state(), OpState::Idle);
    }

    #[test]
    fn test_small_update_rides_in_init() {
        let mut fixture = ready_fixture();
        let mut session =
            OperationSession::new(OperationRequest::update(CHASSIS, r#"{"AssetTag":"a"}"#), 1);
        let init = sent(session.start(&mut fixture.ctx()).unwrap());
        let mut reader = Reader::new(&init.body);
        reader.skip(8).unwrap();
        assert_eq!(reader.u32().unwrap(), 0);

        let complete = sent(
            session
                .on_response(
                    &mut fixture.ctx(),
                    &init_response(OperationStatus::Completed, 0, b""),
                )
                .unwrap(),
        );
        assert_eq!(complete.command, RdeCommand::OperationComplete);
    }

    #[test]
    fn test_preconditions_fail_closed() {
        let mut fixture = Fixture::new();
        fixture
            .metadata
            .set(MetadataField::DeviceMaxTransferChunkSize(1024));

        let mut missing = OperationSession::new(OperationRequest::read(CHASSIS), 1);
        assert!(matches!(
            missing.start(&mut fixture.ctx()),
            Err(EngineError::DictionaryMissing {
                resource_id: 2,
                schema_class: 0
            })
        ));

        let mut fixture = ready_fixture();
        let mut unknown = OperationSession::new(OperationRequest::read("/redfish/v1/Nope"), 1);
        let err = unknown.start(&mut fixture.ctx()).unwrap_err();
        assert!(matches!(err, EngineError::Core(ref e) if e.is_not_found()));

        let mut bad_json = OperationSession::new(OperationRequest::update(CHASSIS, "{oops"), 1);
        assert!(bad_json.start(&mut fixture.ctx()).is_err());

        let mut no_body = OperationSession::new(
            OperationRequest {
                uri: CHASSIS.to_string(),
                operation: OperationType::Replace,
                payload: None,
            },
            1,
        );
        assert!(matches!(
            no_body.start(&mut fixture.ctx()),
            Err(EngineError::InvalidRequest(_))
        ));
        assert_eq!(no_body.state(), OpState::Idle);
    }

    #[test]
    fn test_delete_needs_no_dictionaries() {
        let mut fixture = Fixture::new();
        let mut session = OperationSession::new(
            OperationRequest {
                uri: CHASSIS.to_string(),
                operation: OperationType::Delete,
                payload: None,
            },
            4,
        );
        let init = sent(session.start(&mut fixture.ctx()).unwrap());
        assert_eq!(init.body[6], OperationType::Delete.as_u8());
    }

    #[test]
    fn test_failed_operation_status() {
        let mut fixture = ready_fixture();
        let mut session = OperationSession::new(OperationRequest::read(CHASSIS), 1);
        session.start(&mut fixture.ctx()).unwrap();
        assert!(matches!(
            session.on_response(
                &mut fixture.ctx(),
                &init_response(OperationStatus::Failed, 0, b"")
            ),
            Err(EngineError::OperationStatus(OperationStatus::Failed))
        ));
    }

    #[test]
    fn test_undecodable_result_fails() {
        let mut fixture = ready_fixture();
        let mut session = OperationSession::new(OperationRequest::read(CHASSIS), 1);
        session.start(&mut fixture.ctx()).unwrap();
        session
            .on_response(
                &mut fixture.ctx(),
                &init_response(OperationStatus::Completed, 0, &[0xff, 0xfe]),
            )
            .unwrap();
        assert!(matches!(
            session.on_response(&mut fixture.ctx(), &success()),
            Err(EngineError::Core(rde_core::CoreError::Decode(_)))
        ));
    }

    #[test]
    fn test_late_response_after_timeout() {
        let mut fixture = ready_fixture();
        let mut session = OperationSession::new(OperationRequest::read(CHASSIS), 1);
        session.start(&mut fixture.ctx()).unwrap();
        session.set_state(OpState::TimedOut);
        let step = session
            .on_response(
                &mut fixture.ctx(),
                &init_response(OperationStatus::Completed, 0, b"{}"),
            )
            .unwrap();
        assert!(matches!(step, Step::Discarded));
        assert_eq!(session.state(), OpState::TimedOut);
        assert!(fixture.metadata.etag().is_none());
    }
}
