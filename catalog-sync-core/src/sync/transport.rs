//! The transport seam.

use std::future::Future;

use super::error::TransportError;
use crate::envelope::TransportEnvelope;
use crate::wire::CanonicalTree;

/// Submits an envelope and resolves exactly once.
///
/// Implemented for [`HttpTransport`](super::HttpTransport) and for any
/// `Fn(TransportEnvelope) -> impl Future` closure.
pub trait Transport {
    fn submit(
        &self,
        envelope: TransportEnvelope,
    ) -> impl Future<Output = Result<CanonicalTree, TransportError>> + Send;
}

impl<F, Fut> Transport for F
where
    F: Fn(TransportEnvelope) -> Fut,
    Fut: Future<Output = Result<CanonicalTree, TransportError>> + Send,
{
    fn submit(
        &self,
        envelope: TransportEnvelope,
    ) -> impl Future<Output = Result<CanonicalTree, TransportError>> + Send {
        self(envelope)
    }
}
