// src/companion/local.rs

//! A companion implementation backed by a local child process reached over TCP.
//!
//! The TCP stream is split with `into_split()` so the gateway sees the same
//! reader/writer/readiness shape a remote execution unit would hand out.

use super::{
    ChannelReader, ChannelWriter, CompanionAddr, CompanionChannel, CompanionProcess,
    CompanionProvider,
};
use crate::config::NamespaceConfig;
use crate::core::GateError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How to launch the companion executable.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// A companion process spawned and supervised by this gateway.
///
/// Without a `LaunchSpec` the process is assumed to be managed externally and
/// `is_running` always reports true.
pub struct LocalCompanion {
    name: String,
    launch: Option<LaunchSpec>,
    child: Mutex<Option<Child>>,
}

impl LocalCompanion {
    pub fn new(name: impl Into<String>, launch: Option<LaunchSpec>) -> Self {
        Self {
            name: name.into(),
            launch,
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CompanionProcess for LocalCompanion {
    async fn is_running(&self) -> bool {
        if self.launch.is_none() {
            return true;
        }
        let mut child = self.child.lock().await;
        match child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                warn!("Companion '{}' exited with {}", self.name, status);
                *child = None;
                false
            }
            Some(Err(e)) => {
                warn!("Could not poll companion '{}': {}", self.name, e);
                false
            }
            None => false,
        }
    }

    async fn start(&self) -> Result<(), GateError> {
        let Some(launch) = &self.launch else {
            return Ok(());
        };
        let mut child = self.child.lock().await;
        if let Some(existing) = child.as_mut()
            && matches!(existing.try_wait(), Ok(None))
        {
            debug!("Companion '{}' already running", self.name);
            return Ok(());
        }

        info!(
            "Starting companion '{}': {} {}",
            self.name,
            launch.program,
            launch.args.join(" ")
        );
        let spawned = Command::new(&launch.program)
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GateError::Connectivity(format!("failed to start '{}': {e}", launch.program))
            })?;
        *child = Some(spawned);
        Ok(())
    }

    async fn stop(&self) -> Result<(), GateError> {
        let mut child = self.child.lock().await;
        if let Some(mut running) = child.take() {
            info!("Stopping companion '{}'", self.name);
            running.kill().await?;
        }
        Ok(())
    }

    async fn connect(&self, addr: &CompanionAddr) -> Result<Box<dyn CompanionChannel>, GateError> {
        Ok(Box::new(TcpChannel::new(addr.to_string())))
    }
}

/// A TCP connection whose readiness signal is the connect itself completing.
pub struct TcpChannel {
    addr: String,
    halves: Option<(OwnedReadHalf, OwnedWriteHalf)>,
}

impl TcpChannel {
    pub fn new(addr: String) -> Self {
        Self { addr, halves: None }
    }
}

#[async_trait]
impl CompanionChannel for TcpChannel {
    async fn opened(&mut self) -> Result<(), GateError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| GateError::Connectivity(format!("connect to {} failed: {e}", self.addr)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay on {} failed: {}", self.addr, e);
        }
        self.halves = Some(stream.into_split());
        Ok(())
    }

    fn take_halves(&mut self) -> Option<(ChannelReader, ChannelWriter)> {
        self.halves
            .take()
            .map(|(r, w)| (Box::new(r) as ChannelReader, Box::new(w) as ChannelWriter))
    }

    async fn close(&mut self) -> Result<(), GateError> {
        self.halves = None;
        Ok(())
    }
}

/// Hands out one `LocalCompanion` per namespace.
///
/// Every shard of a namespace shares the same process, since they all target the same
/// fixed address.
pub struct LocalProvider {
    namespaces: BTreeMap<String, NamespaceConfig>,
    companions: DashMap<String, Arc<LocalCompanion>>,
}

impl LocalProvider {
    pub fn new(namespaces: BTreeMap<String, NamespaceConfig>) -> Self {
        Self {
            namespaces,
            companions: DashMap::new(),
        }
    }

    /// Stops every companion this provider launched.
    pub async fn stop_all(&self) {
        let companions: Vec<Arc<LocalCompanion>> =
            self.companions.iter().map(|c| c.value().clone()).collect();
        for companion in companions {
            if let Err(e) = companion.stop().await {
                warn!("Failed to stop companion '{}': {}", companion.name, e);
            }
        }
    }
}

impl CompanionProvider for LocalProvider {
    fn companion_for(&self, namespace: &str, _shard_key: &str) -> Arc<dyn CompanionProcess> {
        let companion = self
            .companions
            .entry(namespace.to_string())
            .or_insert_with(|| {
                let launch = self.namespaces.get(namespace).and_then(|ns| {
                    ns.command.clone().map(|program| LaunchSpec {
                        program,
                        args: ns.args.clone(),
                    })
                });
                Arc::new(LocalCompanion::new(namespace, launch))
            })
            .clone();
        companion
    }
}
