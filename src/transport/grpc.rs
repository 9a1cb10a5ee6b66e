//! gRPC transport (§4.G gRPC variant).
//!
//! No `.proto`-generated client exists for an arbitrary user service,
//! so calls are dispatched dynamically against a compiled
//! `FileDescriptorSet` via `prost-reflect`, the same way tools like
//! `grpcurl` resolve a service/method pair at runtime. There is no
//! teacher precedent for this (the teacher only speaks HTTP/JSON) —
//! grounded instead in `estuary-flow`'s `proto-grpc` crate for the
//! exact `tonic`/`prost` version pins, and in the standard
//! descriptor-pool dynamic-dispatch pattern the wider ecosystem uses
//! for reflection-based gRPC clients.

use super::{PreparedRequest, Response, Transport};
use crate::errors::RunnerError;
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::Channel;
use tonic::Status;

/// The `.kest`/`.flow.md` grpc step shape, carried through
/// [`PreparedRequest::body`] since the transport trait has no
/// protocol-specific fields.
#[derive(Debug, Deserialize)]
struct GrpcPayload {
    descriptor_set_path: String,
    service: String,
    method: String,
    #[serde(default)]
    message: Value,
}

pub struct GrpcTransport;

impl GrpcTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GrpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn load_pool(path: &str) -> Result<DescriptorPool, RunnerError> {
    let bytes = std::fs::read(path).map_err(|e| RunnerError::GrpcConfigError {
        reason: format!("could not read descriptor set '{}': {}", path, e),
    })?;
    DescriptorPool::decode(Bytes::from(bytes).as_ref()).map_err(|e| RunnerError::GrpcConfigError {
        reason: format!("invalid descriptor set '{}': {}", path, e),
    })
}

#[async_trait]
impl Transport for GrpcTransport {
    #[tracing::instrument(name = "grpc_request", skip_all, fields(grpc.url = %request.url))]
    async fn send(&self, request: &PreparedRequest) -> Result<Response, RunnerError> {
        let payload: GrpcPayload = serde_json::from_value(
            request.body.clone().unwrap_or(Value::Null),
        )
        .map_err(|e| RunnerError::GrpcConfigError {
            reason: format!(
                "gRPC step body must provide descriptor_set_path, service, method, message: {}",
                e
            ),
        })?;

        let pool = load_pool(&payload.descriptor_set_path)?;
        let service = pool
            .get_service_by_name(&payload.service)
            .ok_or_else(|| RunnerError::GrpcConfigError {
                reason: format!("unknown service '{}'", payload.service),
            })?;
        let method = service
            .methods()
            .find(|m| m.name() == payload.method)
            .ok_or_else(|| RunnerError::GrpcConfigError {
                reason: format!("unknown method '{}' on service '{}'", payload.method, payload.service),
            })?;

        let request_desc = method.input();
        let response_desc = method.output();

        let dynamic_request = DynamicMessage::deserialize(request_desc.clone(), &payload.message)
            .map_err(|e| RunnerError::GrpcConfigError {
                reason: format!("request message does not match '{}': {}", request_desc.full_name(), e),
            })?;

        let endpoint = request
            .url
            .trim_start_matches("grpc://")
            .trim_start_matches("grpcs://");
        let channel = Channel::from_shared(format!("http://{}", endpoint))
            .map_err(|e| RunnerError::GrpcConfigError {
                reason: format!("invalid gRPC endpoint '{}': {}", endpoint, e),
            })?
            .timeout(Duration::from_millis(request.timeout_ms))
            .connect()
            .await
            .map_err(|e| RunnerError::ProtocolError {
                url: request.url.clone(),
                reason: format!("failed to connect: {}", e),
            })?;

        let mut client = Grpc::new(channel);
        client
            .ready()
            .await
            .map_err(|e| RunnerError::ProtocolError {
                url: request.url.clone(),
                reason: format!("transport not ready: {}", e),
            })?;

        let codec = DynamicCodec::new(request_desc, response_desc);
        let path = tonic::codegen::http::uri::PathAndQuery::try_from(format!(
            "/{}/{}",
            payload.service, payload.method
        ))
        .map_err(|e| RunnerError::GrpcConfigError {
            reason: format!("invalid method path: {}", e),
        })?;

        let start = Instant::now();
        let result = client
            .unary(tonic::Request::new(dynamic_request), path, codec)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let message = response.into_inner();
                let body = serde_json::to_value(&message).unwrap_or(Value::Null);
                Ok(Response {
                    status: 0,
                    duration_ms,
                    body,
                    headers: HashMap::new(),
                })
            }
            Err(status) => Err(RunnerError::ProtocolError {
                url: request.url.clone(),
                reason: format!("{:?}: {}", status.code(), status.message()),
            }),
        }
    }
}

#[derive(Clone, Default)]
struct DynamicCodec {
    descriptors: Option<(MessageDescriptor, MessageDescriptor)>,
}

impl DynamicCodec {
    fn new(request: MessageDescriptor, response: MessageDescriptor) -> Self {
        Self {
            descriptors: Some((request, response)),
        }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        let (_, response) = self
            .descriptors
            .clone()
            .expect("codec must be constructed with DynamicCodec::new before use");
        DynamicDecoder { descriptor: response }
    }
}

#[derive(Clone)]
struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("gRPC encode failed: {}", e)))
    }
}

#[derive(Clone)]
struct DynamicDecoder {
    descriptor: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Status> {
        if !src.has_remaining() {
            return Ok(None);
        }
        let msg = DynamicMessage::decode(self.descriptor.clone(), src)
            .map_err(|e| Status::internal(format!("gRPC decode failed: {}", e)))?;
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_payload_rejects_missing_required_fields() {
        let raw = serde_json::json!({"service": "pkg.Svc"});
        let parsed: Result<GrpcPayload, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn grpc_payload_parses_full_shape() {
        let raw = serde_json::json!({
            "descriptor_set_path": "descriptors.bin",
            "service": "pkg.Greeter",
            "method": "SayHello",
            "message": {"name": "world"}
        });
        let parsed: GrpcPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.service, "pkg.Greeter");
        assert_eq!(parsed.method, "SayHello");
    }
}
