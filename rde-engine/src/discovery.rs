//! Discovery session: NegotiateRedfishParameters, then
//! NegotiateMediumParameters.

use crate::error::EngineError;
use crate::session::{Outgoing, SessionContext, SessionOutput, Step};
use crate::state::OpState;
use rde_core::MetadataField;
use rde_protocol::{
    NegotiateMediumParametersRequest, NegotiateMediumParametersResponse,
    NegotiateRedfishParametersRequest, NegotiateRedfishParametersResponse, RdeResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Redfish,
    Medium,
}

#[derive(Debug)]
pub struct DiscoverySession {
    state: OpState,
    phase: Phase,
}

impl Default for DiscoverySession {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoverySession {
    pub fn new() -> Self {
        Self {
            state: OpState::Idle,
            phase: Phase::Redfish,
        }
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    pub fn set_state(&mut self, state: OpState) {
        self.state = state;
    }

    /// Builds the NegotiateRedfishParameters request from the MC metadata.
    pub fn start(&mut self, ctx: &mut SessionContext<'_>) -> Result<Step, EngineError> {
        if self.state != OpState::Idle {
            return Err(EngineError::SessionAborted(self.state));
        }

        let request = NegotiateRedfishParametersRequest {
            mc_concurrency_support: ctx.metadata.mc_concurrency_support(),
            mc_feature_support: ctx.metadata.mc_feature_support(),
        };
        tracing::info!(
            "NegotiateRedfishParameters request: EID={}, concurrency={}, features={:#06x}",
            ctx.eid,
            request.mc_concurrency_support,
            request.mc_feature_support.bits()
        );

        let out = Outgoing::request(&request)?;
        self.state = OpState::Waiting;
        self.phase = Phase::Redfish;
        Ok(Step::Send(out))
    }

    pub fn on_response(
        &mut self,
        ctx: &mut SessionContext<'_>,
        body: &[u8],
    ) -> Result<Step, EngineError> {
        if self.state.is_abandoned() {
            tracing::info!(
                "Late discovery response from EID {} ignored ({})",
                ctx.eid,
                self.state
            );
            return Ok(Step::Discarded);
        }
        if self.state != OpState::Waiting {
            return Err(EngineError::SessionAborted(self.state));
        }

        match self.phase {
            Phase::Redfish => self.on_redfish(ctx, body),
            Phase::Medium => self.on_medium(ctx, body),
        }
    }

    fn on_redfish(&mut self, ctx: &mut SessionContext<'_>, body: &[u8]) -> Result<Step, EngineError> {
        let response = NegotiateRedfishParametersResponse::decode_body(body)?;
        tracing::info!(
            "NegotiateRedfishParameters response: EID={}, signature={:#010x}, provider={}, concurrency={}, features={:#06x}, capabilities={:#04x}",
            ctx.eid,
            response.device_configuration_signature,
            response.device_provider_name.value,
            response.device_concurrency_support,
            response.device_feature_support.bits(),
            response.device_capabilities.bits()
        );

        let metadata = &mut *ctx.metadata;
        metadata.set(MetadataField::DeviceConcurrencySupport(
            response.device_concurrency_support,
        ));
        metadata.set(MetadataField::DeviceCapabilities(response.device_capabilities));
        metadata.set(MetadataField::DeviceFeatureSupport(
            response.device_feature_support,
        ));
        metadata.set(MetadataField::DeviceConfigurationSignature(
            response.device_configuration_signature,
        ));
        metadata.set(MetadataField::DeviceProviderName(
            response.device_provider_name.value,
        ));

        let request = NegotiateMediumParametersRequest {
            mc_max_transfer_chunk_size: metadata.mc_max_transfer_chunk_size(),
        };
        self.phase = Phase::Medium;
        Ok(Step::Send(Outgoing::request(&request)?))
    }

    fn on_medium(&mut self, ctx: &mut SessionContext<'_>, body: &[u8]) -> Result<Step, EngineError> {
        let response = NegotiateMediumParametersResponse::decode_body(body)?;
        tracing::info!(
            "NegotiateMediumParameters response: EID={}, device max chunk={}",
            ctx.eid,
            response.device_max_transfer_chunk_size
        );
        ctx.metadata.set(MetadataField::DeviceMaxTransferChunkSize(
            response.device_max_transfer_chunk_size,
        ));

        self.state = OpState::Completed;
        Ok(Step::Done(SessionOutput::Negotiated))
    }
}
