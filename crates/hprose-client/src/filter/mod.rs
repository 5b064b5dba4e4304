//! Byte-level hooks around the transport.
//!
//! Outgoing requests pass through the filters in the order they were added;
//! incoming responses pass through them in reverse order.

pub mod jsonrpc;

use std::sync::{Arc, PoisonError, RwLock};

use hprose_common::Result;

use crate::context::Context;

pub use jsonrpc::JsonRpcFilter;

pub trait Filter: Send + Sync {
    fn outgoing(&self, request: Vec<u8>, _ctx: &Context) -> Result<Vec<u8>> {
        Ok(request)
    }

    fn incoming(&self, response: Vec<u8>, _ctx: &Context) -> Result<Vec<u8>> {
        Ok(response)
    }
}

#[derive(Default)]
pub struct FilterChain {
    filters: RwLock<Vec<Arc<dyn Filter>>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, filter: Arc<dyn Filter>) {
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(filter);
    }

    /// Removes `filter` if present; returns whether it was.
    pub fn remove(&self, filter: &Arc<dyn Filter>) -> bool {
        let mut filters = self.filters.write().unwrap_or_else(PoisonError::into_inner);
        let before = filters.len();
        filters.retain(|f| !Arc::ptr_eq(f, filter));
        filters.len() != before
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn Filter>> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn outgoing(&self, request: Vec<u8>, ctx: &Context) -> Result<Vec<u8>> {
        self.snapshot()
            .iter()
            .try_fold(request, |bytes, filter| filter.outgoing(bytes, ctx))
    }

    pub fn incoming(&self, response: Vec<u8>, ctx: &Context) -> Result<Vec<u8>> {
        self.snapshot()
            .iter()
            .rev()
            .try_fold(response, |bytes, filter| filter.incoming(bytes, ctx))
    }
}
