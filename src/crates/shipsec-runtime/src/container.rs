//! Container runner: one isolated named volume per invocation.
//!
//! The runner materializes a named volume
//! (`tenant-{tenantId}-run-{runId}-{ts}`), stages the node's inputs into
//! it as files under `inputs/`, launches the component's image with the
//! volume mounted at `/workspace` (read-only unless the definition asks
//! for a writable workspace), and consumes stdout as the result. Volume
//! removal is guaranteed on every exit path by [`InvocationGuard`].
//!
//! Named volumes rather than host bind mounts keep the runner working
//! inside nested Docker (DinD) environments, where host paths do not
//! line up between the daemon and the engine. Input staging also avoids
//! bind mounts: a never-started staging container with the volume
//! mounted read-write receives a tar archive through the Docker copy
//! API, then the task container is created with the declared mount mode.
//!
//! Large outputs and screenshots go through the artifacts capability;
//! stdout carries either a delimited result envelope
//! (`---RESULT_START---…---RESULT_END---`) or the result string itself.

use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Map as JsonMap, Value};

use shipsec_core::component::ContainerSpec;
use shipsec_core::error::{ErrorKind, NodeError};

use crate::capability::{Capabilities, LogLevel};
use crate::invoke::{InvocationRequest, Outcome};

/// Start marker of the stdout result envelope.
pub const RESULT_START: &str = "---RESULT_START---";
/// End marker of the stdout result envelope.
pub const RESULT_END: &str = "---RESULT_END---";

/// Mount point of the invocation volume inside the container.
const WORKSPACE: &str = "/workspace";

/// Default wall-clock budget when the definition declares none.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Runner executing container components through the Docker API.
#[derive(Clone)]
pub struct ContainerRunner {
    docker: Docker,
}

impl ContainerRunner {
    /// Connect to the local Docker daemon.
    pub fn connect() -> Result<Self, NodeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| NodeError::configuration(format!("docker daemon unavailable: {}", e)))?;
        Ok(Self { docker })
    }

    /// Wrap an existing Docker handle (used by tests).
    pub fn with_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Execute one container invocation.
    pub async fn invoke(
        &self,
        spec: &ContainerSpec,
        request: &InvocationRequest,
        caps: &Capabilities,
    ) -> Result<Outcome, NodeError> {
        let volume = volume_name(&request.tenant_id, &request.run_id);
        let mut guard = InvocationGuard::new(self.docker.clone(), volume.clone());

        self.docker
            .create_volume(CreateVolumeOptions {
                name: volume.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| NodeError::transient(format!("create volume: {}", e)))?;

        self.stage_inputs(spec, request, &volume, &mut guard).await?;

        let task_name = format!("{}-task", volume);
        guard.track_container(task_name.clone());
        self.create_task_container(spec, request, &volume, &task_name)
            .await?;

        self.docker
            .start_container::<String>(&task_name, None)
            .await
            .map_err(|e| NodeError::transient(format!("start container: {}", e)))?;
        caps.log(
            LogLevel::Info,
            format!("container {} started for image {}", task_name, spec.image),
        );

        let timeout = spec
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let exit = self
            .wait_for_exit(&task_name, timeout, request)
            .await;
        let exit_code = match exit {
            Ok(code) => code,
            Err(err) => {
                guard.cleanup().await;
                return Err(err);
            }
        };

        let (stdout, stderr) = self.collect_logs(&task_name).await;
        guard.cleanup().await;

        if exit_code != 0 {
            caps.log(
                LogLevel::Error,
                format!("container exited with code {}", exit_code),
            );
            return Err(classify_exit(exit_code, &stderr));
        }

        Ok(Outcome::Success {
            outputs: parse_stdout(&stdout, spec.result_envelope)?,
        })
    }

    /// Stage inputs into the volume through a never-started staging
    /// container with a read-write mount.
    async fn stage_inputs(
        &self,
        spec: &ContainerSpec,
        request: &InvocationRequest,
        volume: &str,
        guard: &mut InvocationGuard,
    ) -> Result<(), NodeError> {
        let staging_name = format!("{}-stage", volume);
        guard.track_container(staging_name.clone());

        let config = Config::<String> {
            image: Some(spec.image.clone()),
            entrypoint: Some(vec!["true".to_string()]),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}", volume, WORKSPACE)]),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: staging_name.clone(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(|e| NodeError::transient(format!("create staging container: {}", e)))?;

        let archive = build_input_archive(&request.inputs)?;
        self.docker
            .upload_to_container(
                &staging_name,
                Some(UploadToContainerOptions {
                    path: WORKSPACE.to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(|e| NodeError::transient(format!("stage inputs: {}", e)))?;

        self.docker
            .remove_container(
                &staging_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .ok();
        guard.untrack_container(&staging_name);
        Ok(())
    }

    async fn create_task_container(
        &self,
        spec: &ContainerSpec,
        request: &InvocationRequest,
        volume: &str,
        task_name: &str,
    ) -> Result<(), NodeError> {
        let mount = if spec.writable_workspace {
            format!("{}:{}", volume, WORKSPACE)
        } else {
            format!("{}:{}:ro", volume, WORKSPACE)
        };

        let mut env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let payload = serde_json::to_string(&request.inputs)
            .map_err(|e| NodeError::internal(format!("serialize input payload: {}", e)))?;
        env.push(format!("SHIPSEC_INPUT={}", payload));
        env.push(format!("SHIPSEC_RUN_ID={}", request.run_id));
        env.push(format!("SHIPSEC_NODE_ID={}", request.node_id));

        let config = Config::<String> {
            image: Some(spec.image.clone()),
            entrypoint: spec.entrypoint.clone(),
            cmd: spec.command.clone(),
            env: Some(env),
            working_dir: Some(WORKSPACE.to_string()),
            host_config: Some(HostConfig {
                binds: Some(vec![mount]),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: task_name.to_string(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(|e| NodeError::transient(format!("create container: {}", e)))?;
        Ok(())
    }

    /// Wait for the container to exit, killing it on timeout or
    /// cancellation.
    async fn wait_for_exit(
        &self,
        task_name: &str,
        timeout: Duration,
        request: &InvocationRequest,
    ) -> Result<i64, NodeError> {
        let mut wait = self
            .docker
            .wait_container(task_name, None::<WaitContainerOptions<String>>);

        tokio::select! {
            next = wait.next() => match next {
                Some(Ok(body)) => Ok(body.status_code),
                Some(Err(e)) => Err(NodeError::transient(format!("wait container: {}", e))),
                None => Err(NodeError::transient("container wait stream ended early")),
            },
            _ = tokio::time::sleep(timeout) => {
                self.kill(task_name).await;
                Err(NodeError::new(
                    ErrorKind::TimedOut,
                    format!("container exceeded {}s budget", timeout.as_secs()),
                ))
            }
            _ = request.cancel.cancelled() => {
                self.kill(task_name).await;
                Err(request.cancel.cancellation_error())
            }
        }
    }

    async fn kill(&self, task_name: &str) {
        self.docker
            .kill_container(task_name, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .ok();
    }

    async fn collect_logs(&self, task_name: &str) -> (String, String) {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut logs = self.docker.logs::<String>(
            task_name,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(Ok(output)) = logs.next().await {
            match output {
                LogOutput::StdOut { message } => {
                    stdout.push_str(&String::from_utf8_lossy(&message))
                }
                LogOutput::StdErr { message } => {
                    stderr.push_str(&String::from_utf8_lossy(&message))
                }
                _ => {}
            }
        }
        (stdout, stderr)
    }
}

/// Removes the invocation's containers and volume on every exit path.
///
/// The happy path calls [`cleanup`](Self::cleanup) explicitly; early
/// returns rely on `Drop`, which schedules the same removal on the
/// runtime without blocking.
struct InvocationGuard {
    docker: Docker,
    volume: String,
    containers: Vec<String>,
    cleaned: bool,
}

impl InvocationGuard {
    fn new(docker: Docker, volume: String) -> Self {
        Self {
            docker,
            volume,
            containers: Vec::new(),
            cleaned: false,
        }
    }

    fn track_container(&mut self, name: String) {
        self.containers.push(name);
    }

    fn untrack_container(&mut self, name: &str) {
        self.containers.retain(|c| c != name);
    }

    async fn cleanup(&mut self) {
        remove_all(&self.docker, &self.containers, &self.volume).await;
        self.cleaned = true;
    }
}

impl Drop for InvocationGuard {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        let docker = self.docker.clone();
        let containers = std::mem::take(&mut self.containers);
        let volume = self.volume.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                remove_all(&docker, &containers, &volume).await;
            });
        }
    }
}

async fn remove_all(docker: &Docker, containers: &[String], volume: &str) {
    for container in containers {
        docker
            .remove_container(
                container,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .ok();
    }
    docker
        .remove_volume(volume, Some(RemoveVolumeOptions { force: true }))
        .await
        .ok();
}

/// Per-invocation volume name: `tenant-{tenantId}-run-{runId}-{ts}`.
pub fn volume_name(tenant_id: &str, run_id: &str) -> String {
    format!(
        "tenant-{}-run-{}-{}",
        tenant_id,
        run_id,
        Utc::now().timestamp_millis()
    )
}

/// Build the tar archive staged into the volume: one file per input port
/// under `inputs/`.
fn build_input_archive(inputs: &JsonMap<String, Value>) -> Result<Vec<u8>, NodeError> {
    let mut builder = tar::Builder::new(Vec::new());
    for (port, value) in inputs {
        let content = match value {
            Value::String(s) => s.clone().into_bytes(),
            other => serde_json::to_vec_pretty(other)
                .map_err(|e| NodeError::internal(format!("serialize input '{}': {}", port, e)))?,
        };
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, format!("inputs/{}", port), content.as_slice())
            .map_err(|e| NodeError::internal(format!("archive input '{}': {}", port, e)))?;
    }
    builder
        .into_inner()
        .map_err(|e| NodeError::internal(format!("finalize input archive: {}", e)))
}

/// Interpret the container's stdout as node outputs.
pub fn parse_stdout(stdout: &str, envelope: bool) -> Result<JsonMap<String, Value>, NodeError> {
    if !envelope {
        let mut outputs = JsonMap::new();
        outputs.insert("result".to_string(), Value::String(stdout.trim().to_string()));
        return Ok(outputs);
    }

    let inner = stdout
        .split(RESULT_START)
        .nth(1)
        .and_then(|rest| rest.split(RESULT_END).next())
        .ok_or_else(|| {
            NodeError::new(ErrorKind::Container, "stdout carries no result envelope")
        })?
        .trim();

    match serde_json::from_str::<Value>(inner) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => {
            let mut outputs = JsonMap::new();
            outputs.insert("result".to_string(), other);
            Ok(outputs)
        }
        Err(_) => {
            let mut outputs = JsonMap::new();
            outputs.insert("result".to_string(), Value::String(inner.to_string()));
            Ok(outputs)
        }
    }
}

/// Classify a non-zero exit into the taxonomy by exit code and stderr
/// heuristic.
pub fn classify_exit(exit_code: i64, stderr: &str) -> NodeError {
    let lowered = stderr.to_ascii_lowercase();
    let transient_hint = lowered.contains("timeout")
        || lowered.contains("timed out")
        || lowered.contains("connection refused")
        || lowered.contains("connection reset")
        || lowered.contains("temporarily unavailable")
        || lowered.contains("too many requests");

    let summary = stderr.lines().rev().find(|l| !l.trim().is_empty());
    let message = match summary {
        Some(line) => format!("container exited with code {}: {}", exit_code, line.trim()),
        None => format!("container exited with code {}", exit_code),
    };

    // 137 is SIGKILL: the OOM killer or the daemon, both worth retrying.
    if exit_code == 137 || transient_hint {
        NodeError::transient(message)
    } else {
        NodeError::new(ErrorKind::Container, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_volume_name_shape() {
        let name = volume_name("acme", "run-42");
        assert!(name.starts_with("tenant-acme-run-run-42-"));
        // Trailing component is a millisecond timestamp.
        let ts = name.rsplit('-').next().unwrap();
        assert!(ts.parse::<i64>().is_ok());
    }

    #[test]
    fn test_parse_stdout_without_envelope() {
        let outputs = parse_stdout("  scan finished\n", false).unwrap();
        assert_eq!(outputs["result"], "scan finished");
    }

    #[test]
    fn test_parse_stdout_envelope_object() {
        let stdout = format!(
            "tool noise\n{}\n{{\"hosts\": [\"a\", \"b\"], \"open\": 2}}\n{}\ntrailing",
            RESULT_START, RESULT_END
        );
        let outputs = parse_stdout(&stdout, true).unwrap();
        assert_eq!(outputs["hosts"], json!(["a", "b"]));
        assert_eq!(outputs["open"], 2);
    }

    #[test]
    fn test_parse_stdout_envelope_scalar_and_plain_text() {
        let stdout = format!("{}\n\"ok\"\n{}", RESULT_START, RESULT_END);
        assert_eq!(parse_stdout(&stdout, true).unwrap()["result"], "ok");

        let stdout = format!("{}\nnot json at all\n{}", RESULT_START, RESULT_END);
        assert_eq!(
            parse_stdout(&stdout, true).unwrap()["result"],
            "not json at all"
        );
    }

    #[test]
    fn test_parse_stdout_missing_envelope_is_container_error() {
        let err = parse_stdout("no markers here", true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Container);
    }

    #[test]
    fn test_classify_exit_heuristics() {
        assert_eq!(
            classify_exit(1, "error: connection refused").kind,
            ErrorKind::Transient
        );
        assert_eq!(classify_exit(137, "").kind, ErrorKind::Transient);
        assert_eq!(
            classify_exit(2, "invalid flag --bogus").kind,
            ErrorKind::Container
        );
        assert!(classify_exit(2, "a\nlast line\n")
            .message
            .contains("last line"));
    }

    #[test]
    fn test_build_input_archive_layout() {
        let mut inputs = JsonMap::new();
        inputs.insert("target".to_string(), json!("example.com"));
        inputs.insert("options".to_string(), json!({"ports": [80, 443]}));

        let bytes = build_input_archive(&inputs).unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut paths: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["inputs/options", "inputs/target"]);
    }
}
