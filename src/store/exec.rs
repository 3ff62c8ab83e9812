//! Command bridge to the Rook ceph toolbox pod.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{AttachParams, ListParams};
use kube::{Api, Client, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};

/// Label selector of the toolbox deployment pods.
pub const TOOLBOX_SELECTOR: &str = "app=rook-ceph-tools";

/// Runs `ceph`/`radosgw-admin` commands against the managed cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CephCli: Send + Sync {
    /// Run a shell command and return its stdout.
    async fn run(&self, command: &str) -> Result<String>;
}

/// Run a command and parse its stdout as JSON.
pub async fn run_json<T>(cli: &dyn CephCli, command: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    let output = cli.run(command).await?;
    serde_json::from_str(&output).map_err(|e| Error::Exec {
        command: command.to_string(),
        reason: format!("failed to parse output: {e}"),
    })
}

/// [`CephCli`] that execs into a running toolbox pod.
pub struct ToolboxCli {
    pods: Api<Pod>,
    timeout: Duration,
}

impl ToolboxCli {
    pub fn new(client: Client, rook_namespace: &str, timeout: Duration) -> Self {
        Self {
            pods: Api::namespaced(client, rook_namespace),
            timeout,
        }
    }

    async fn toolbox_pod(&self, command: &str) -> Result<String> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(TOOLBOX_SELECTOR))
            .await?;
        pods.items
            .iter()
            .find(|p| {
                p.metadata.deletion_timestamp.is_none()
                    && p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
            })
            .map(|p| p.name_any())
            .ok_or_else(|| Error::Exec {
                command: command.to_string(),
                reason: "no running ceph toolbox pod found".to_string(),
            })
    }

    async fn exec(&self, pod: &str, command: &str) -> Result<String> {
        let params = AttachParams::default().stdout(true).stderr(true);
        let mut attached = self
            .pods
            .exec(pod, vec!["sh", "-c", command], &params)
            .await?;

        let mut stdout = String::new();
        if let Some(mut reader) = attached.stdout() {
            reader
                .read_to_string(&mut stdout)
                .await
                .map_err(|e| exec_error(command, e))?;
        }
        let mut stderr = String::new();
        if let Some(mut reader) = attached.stderr() {
            reader
                .read_to_string(&mut stderr)
                .await
                .map_err(|e| exec_error(command, e))?;
        }

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached.join().await.map_err(|e| exec_error(command, e))?;

        let success = status
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .is_none_or(|s| s == "Success");
        if !success {
            let reason = if stderr.trim().is_empty() {
                status
                    .and_then(|s| s.message)
                    .unwrap_or_else(|| "non-zero exit".to_string())
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::Exec {
                command: command.to_string(),
                reason,
            });
        }
        Ok(stdout)
    }
}

fn exec_error(command: &str, err: impl std::fmt::Display) -> Error {
    Error::Exec {
        command: command.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl CephCli for ToolboxCli {
    async fn run(&self, command: &str) -> Result<String> {
        debug!(command = %command, "Running ceph toolbox command");
        let pod = self.toolbox_pod(command).await?;
        tokio::time::timeout(self.timeout, self.exec(&pod, command))
            .await
            .map_err(|_| Error::Exec {
                command: command.to_string(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            })?
    }
}

/// [`CephCli`] replaying canned output per exact command line.
#[derive(Default)]
pub struct ScriptedCli {
    outputs: Mutex<HashMap<String, std::result::Result<String, String>>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedCli {
    /// Answer `command` with `output` from now on.
    pub fn respond(&self, command: &str, output: &str) {
        self.lock_outputs()
            .insert(command.to_string(), Ok(output.to_string()));
    }

    /// Fail `command` with `reason` from now on.
    pub fn fail(&self, command: &str, reason: &str) {
        self.lock_outputs()
            .insert(command.to_string(), Err(reason.to_string()));
    }

    /// Commands run so far, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn lock_outputs(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, std::result::Result<String, String>>> {
        self.outputs.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl CephCli for ScriptedCli {
    async fn run(&self, command: &str) -> Result<String> {
        self.commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(command.to_string());
        match self.lock_outputs().get(command) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(reason)) => Err(exec_error(command, reason)),
            None => Err(exec_error(command, "no scripted output")),
        }
    }
}
