//! Process-wide client lifecycle.
//!
//! Hosts that want one shared client use `initialize` / `instance` /
//! `shutdown`. The preferred pattern remains passing a [`Nuvex`] handle
//! explicitly; this module is the thin adapter for code bases that cannot.

use std::sync::Arc;

use nuvex_core::{EngineError, NuvexConfig, NuvexResult};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::client::Nuvex;

static INSTANCE: Lazy<RwLock<Option<Arc<Nuvex>>>> = Lazy::new(|| RwLock::new(None));

/// Build, connect and install the process-wide client. Fails when one is
/// already installed.
///
/// Concurrent callers race to install: the loser's freshly connected client
/// is torn down again and `AlreadyInitialized` is returned.
pub async fn initialize(config: NuvexConfig) -> NuvexResult<Arc<Nuvex>> {
    if INSTANCE.read().is_some() {
        return Err(EngineError::AlreadyInitialized.into());
    }

    let client = Arc::new(Nuvex::new(config)?);
    client.connect().await?;

    {
        let mut slot = INSTANCE.write();
        if slot.is_some() {
            drop(slot);
            client.disconnect().await;
            return Err(EngineError::AlreadyInitialized.into());
        }
        *slot = Some(Arc::clone(&client));
    }

    tracing::info!("nuvex client initialized");
    Ok(client)
}

/// The installed client. Fails when `initialize` has not run.
pub fn instance() -> NuvexResult<Arc<Nuvex>> {
    INSTANCE
        .read()
        .clone()
        .ok_or_else(|| EngineError::NotInitialized.into())
}

pub fn is_initialized() -> bool {
    INSTANCE.read().is_some()
}

/// Disconnect and remove the installed client.
pub async fn shutdown() -> NuvexResult<()> {
    let client = INSTANCE
        .write()
        .take()
        .ok_or(EngineError::NotInitialized)?;
    client.disconnect().await;
    tracing::info!("nuvex client shut down");
    Ok(())
}
