//! Built-in transport backends

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::MemoryTransport;

use crate::config::{TransportConfig, TransportKind};
use crate::error::Result;
use crate::transport::{Transport, TransportFactory};
use std::sync::Arc;

/// Builds the built-in backends
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        match config.kind {
            TransportKind::Memory => Ok(Arc::new(MemoryTransport::new(config.url.clone()))),
            TransportKind::Http => Ok(Arc::new(HttpTransport::new(config)?)),
        }
    }
}
