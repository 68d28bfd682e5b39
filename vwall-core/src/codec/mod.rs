//! Command codecs.
//!
//! The only place that knows wire formats. Sessions and the dispatcher see
//! [`CommandKind`] in and [`Reply`] out; transports see
//! [`WireRequest`] / [`WireResponse`].

pub mod http;
pub mod mdc;

use bytes::Bytes;

use crate::endpoint::{DisplayEndpoint, ProtocolKind};
use crate::error::WallError;
use crate::message::{CommandKind, Reply};

pub use http::{HttpCodec, HttpMethod, HttpRequest, HttpResponse};
pub use mdc::{ChecksumScope, MdcCodec, MdcConfig, MdcFrame, MdcFramer};

/// What a transport puts on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireRequest {
    /// One complete MDC frame.
    Frame(Bytes),
    Http(HttpRequest),
}

/// What a transport got back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireResponse {
    Frame(Bytes),
    Http(HttpResponse),
}

/// Codec selected by the endpoint's protocol kind.
///
/// Serial and TCP share the MDC codec; only the transport differs.
#[derive(Debug, Clone)]
pub enum ProtocolCodec {
    Mdc(MdcCodec),
    Http(HttpCodec),
}

impl ProtocolCodec {
    pub fn for_endpoint(endpoint: &DisplayEndpoint, mdc: &MdcConfig) -> Self {
        match endpoint.protocol {
            ProtocolKind::BinaryTcp | ProtocolKind::Serial => {
                Self::Mdc(MdcCodec::new(endpoint.mdc_id, mdc.clone()))
            }
            ProtocolKind::Http => Self::Http(HttpCodec),
        }
    }

    pub fn encode(&self, kind: &CommandKind) -> Result<WireRequest, WallError> {
        match self {
            Self::Mdc(codec) => codec.encode(kind).map(WireRequest::Frame),
            Self::Http(codec) => codec.encode(kind).map(WireRequest::Http),
        }
    }

    pub fn decode(&self, kind: &CommandKind, response: &WireResponse) -> Result<Reply, WallError> {
        match (self, response) {
            (Self::Mdc(codec), WireResponse::Frame(bytes)) => codec.decode(kind, bytes),
            (Self::Http(codec), WireResponse::Http(resp)) => codec.decode(kind, resp),
            _ => Err(WallError::MalformedResponse(
                "transport returned a response for another protocol".into(),
            )),
        }
    }
}
