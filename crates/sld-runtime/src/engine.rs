//! Instance registry and signal delivery.
//!
//! Each live order instance owns an unbounded inbox; the registry maps its
//! handle to the sending side. Signals for one handle are delivered in send
//! order. Starting a handle that is already registered fails, which is what
//! makes recovery and double-submits harmless.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use sld_schemas::{ExecutionHandle, PriceEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum OrderSignal {
    Price(PriceEvent),
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("instance already running: {0}")]
    AlreadyStarted(ExecutionHandle),

    #[error("no running instance for handle {0}")]
    UnknownHandle(ExecutionHandle),

    /// Registered, but the instance has stopped reading its inbox.
    #[error("instance {0} is no longer listening")]
    InstanceGone(ExecutionHandle),
}

type Inboxes = HashMap<ExecutionHandle, mpsc::UnboundedSender<OrderSignal>>;

#[derive(Clone, Default)]
pub struct InstanceEngine {
    inboxes: Arc<RwLock<Inboxes>>,
}

impl InstanceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `handle` and return the inbox the new instance reads from.
    pub async fn register(
        &self,
        handle: &ExecutionHandle,
    ) -> Result<mpsc::UnboundedReceiver<OrderSignal>, EngineError> {
        let mut inboxes = self.inboxes.write().await;
        if let Some(existing) = inboxes.get(handle) {
            if !existing.is_closed() {
                return Err(EngineError::AlreadyStarted(handle.clone()));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inboxes.insert(handle.clone(), tx);
        Ok(rx)
    }

    /// Forget `handle` once its instance has dropped the inbox. A handle that
    /// has since been registered again is left alone.
    pub async fn release(&self, handle: &ExecutionHandle) {
        let mut inboxes = self.inboxes.write().await;
        if inboxes.get(handle).is_some_and(|tx| tx.is_closed()) {
            inboxes.remove(handle);
        }
    }

    /// Queue `signal` for `handle` without waiting for it to be handled.
    pub async fn signal(
        &self,
        handle: &ExecutionHandle,
        signal: OrderSignal,
    ) -> Result<(), EngineError> {
        let sent = {
            let inboxes = self.inboxes.read().await;
            let tx = inboxes
                .get(handle)
                .ok_or_else(|| EngineError::UnknownHandle(handle.clone()))?;
            tx.send(signal).is_ok()
        };
        if !sent {
            self.release(handle).await;
            return Err(EngineError::InstanceGone(handle.clone()));
        }
        Ok(())
    }

    pub async fn is_running(&self, handle: &ExecutionHandle) -> bool {
        self.inboxes
            .read()
            .await
            .get(handle)
            .is_some_and(|tx| !tx.is_closed())
    }

    pub async fn running(&self) -> usize {
        self.inboxes
            .read()
            .await
            .values()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}
