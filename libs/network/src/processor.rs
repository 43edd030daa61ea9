//! Upstream processor contract
//!
//! The session hands every unit it reads to a [`Processor`]. Decoding,
//! deduplication, retransmission and routing all live behind this trait.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Consumer of received transport data
#[async_trait]
pub trait Processor: Send + Sync {
    /// Handle one datagram or one stream frame; an error ends the session
    async fn process(&self, data: &[u8]) -> Result<()>;
}

#[async_trait]
impl<P: Processor + ?Sized> Processor for Arc<P> {
    async fn process(&self, data: &[u8]) -> Result<()> {
        (**self).process(data).await
    }
}
