//! Build agent command protocol.
//!
//! The clustered backend has no local build tooling. Instead it drives a
//! privileged helper pod (the build agent) by running commands in it and
//! reading their standard output.
//!
//! The exec stream carries no usable exit status, so completion is detected
//! heuristically: a command is considered finished when its output stream
//! closes or stays silent for one poll interval. Each read is raced against
//! the poll timer and the pending read is dropped when the timer wins. A hard
//! per-command deadline bounds commands that never go quiet.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use podcall_common::{ArtifactRef, KubernetesConfig, OrchestratorError, RegistryConfig};

use crate::cache_key::CacheKey;
use crate::cluster::ClusterApi;
use crate::registry::ImageCoordinates;

/// Size of the read buffer for command output.
const READ_BUF_SIZE: usize = 8 * 1024;

/// Working directory for transferred build contexts inside the agent.
const REMOTE_WORKDIR: &str = "/tmp/podcall";

/// How a command was considered finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// No output arrived within one poll interval.
    Idle,
    /// The output stream closed.
    Closed,
}

/// Output collected from one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Everything the command wrote to standard output.
    pub output: String,
    /// How completion was detected.
    pub completion: Completion,
}

/// Read `reader` until it closes or stays idle for `poll`.
///
/// # Errors
///
/// Returns a build error if the stream fails or if output keeps arriving
/// past `deadline`.
pub async fn drain_until_idle<R>(
    mut reader: R,
    poll: Duration,
    deadline: Duration,
) -> Result<CommandOutput, OrchestratorError>
where
    R: AsyncRead + Unpin,
{
    let started = Instant::now();
    let mut buf = vec![0_u8; READ_BUF_SIZE];
    let mut output = Vec::new();

    loop {
        if started.elapsed() >= deadline {
            return Err(OrchestratorError::build(format!(
                "Command still producing output after {}s",
                deadline.as_secs()
            )));
        }

        let completion = match tokio::time::timeout(poll, reader.read(&mut buf)).await {
            Err(_) => Completion::Idle,
            Ok(Ok(0)) => Completion::Closed,
            Ok(Ok(n)) => {
                output.extend_from_slice(&buf[..n]);
                continue;
            }
            Ok(Err(e)) => {
                return Err(OrchestratorError::build(format!(
                    "Failed to read command output: {e}"
                )));
            }
        };

        return Ok(CommandOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            completion,
        });
    }
}

/// A running build agent pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildAgent {
    /// Pod name.
    pub pod: String,
    /// Container running the image builder.
    pub container: String,
}

/// Drives a [`BuildAgent`] through artifact transfer, build, login and push.
pub struct BuildAgentProtocol {
    cluster: Arc<dyn ClusterApi>,
    poll_interval: Duration,
    command_timeout: Duration,
    chunk_bytes: usize,
}

impl BuildAgentProtocol {
    /// Create a protocol driver using the cluster configuration's timings.
    pub fn new(cluster: Arc<dyn ClusterApi>, config: &KubernetesConfig) -> Self {
        Self {
            cluster,
            poll_interval: config.idle_poll(),
            command_timeout: config.command_timeout(),
            chunk_bytes: config.transfer_chunk_bytes.max(1),
        }
    }

    /// Run `argv` in the agent and wait for it to finish.
    ///
    /// The remote session is aborted as soon as the command is considered
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns a build error if the command cannot be started or its output
    /// cannot be read.
    pub async fn run(
        &self,
        agent: &BuildAgent,
        argv: Vec<String>,
    ) -> Result<CommandOutput, OrchestratorError> {
        let program = argv.first().cloned().unwrap_or_default();
        let mut session = self
            .cluster
            .exec(&agent.pod, &agent.container, argv)
            .await
            .map_err(|e| OrchestratorError::build(format!("Failed to exec {program}: {e}")))?;

        let result =
            drain_until_idle(session.stdout(), self.poll_interval, self.command_timeout).await;
        drop(session);

        let output = result?;
        debug!(
            pod = %agent.pod,
            program = %program,
            completion = ?output.completion,
            bytes = output.output.len(),
            "Agent command finished"
        );
        Ok(output)
    }

    /// Copy the artifact into the agent and unpack it.
    ///
    /// The archive travels as base64 text appended in chunks, then is decoded
    /// and extracted remotely. Returns the remote build context directory.
    ///
    /// # Errors
    ///
    /// Returns a build error if the artifact cannot be read or a transfer
    /// command fails.
    #[instrument(skip(self, agent, artifact), fields(pod = %agent.pod, artifact = %artifact.path.display()))]
    pub async fn transfer_artifact(
        &self,
        agent: &BuildAgent,
        artifact: &ArtifactRef,
    ) -> Result<String, OrchestratorError> {
        let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
            OrchestratorError::build(format!(
                "Failed to read artifact {}: {e}",
                artifact.path.display()
            ))
        })?;
        let encoded = STANDARD.encode(&bytes);

        let id = uuid::Uuid::new_v4().simple().to_string();
        let dir = format!("{REMOTE_WORKDIR}/{}", &id[..8]);
        let payload = format!("{dir}/context.b64");
        let archive = format!("{dir}/context.tar");
        let context = format!("{dir}/context");

        self.run(agent, argv(&["mkdir", "-p", &context])).await?;

        let chunks = encoded.as_bytes().chunks(self.chunk_bytes);
        let total = chunks.len();
        for chunk in chunks {
            let chunk = String::from_utf8_lossy(chunk);
            self.run(agent, shell(&format!("printf '%s' '{chunk}' >> {payload}")))
                .await?;
        }

        self.run(
            agent,
            shell(&format!(
                "base64 -d {payload} > {archive} && tar -xf {archive} -C {context}"
            )),
        )
        .await?;

        info!(bytes = bytes.len(), chunks = total, context = %context, "Artifact transferred");
        Ok(context)
    }

    /// Build the image from `context_dir`, tagged `:latest` and `:<cache_key>`.
    ///
    /// # Errors
    ///
    /// Returns a build error if the command fails.
    #[instrument(skip(self, agent, image), fields(pod = %agent.pod, image = %image.repository()))]
    pub async fn build(
        &self,
        agent: &BuildAgent,
        context_dir: &str,
        image: &ImageCoordinates,
        cache_key: &CacheKey,
    ) -> Result<(), OrchestratorError> {
        let latest = image.reference("latest");
        let keyed = image.reference(cache_key.as_str());
        self.run(
            agent,
            argv(&["docker", "build", "-t", &latest, "-t", &keyed, context_dir]),
        )
        .await?;
        info!(cache_key = %cache_key, "Image built");
        Ok(())
    }

    /// Log the agent's image builder into the registry.
    ///
    /// # Errors
    ///
    /// Returns a build error if no credentials are configured or the command
    /// fails.
    pub async fn login(
        &self,
        agent: &BuildAgent,
        registry: &RegistryConfig,
    ) -> Result<(), OrchestratorError> {
        let (Some(username), Some(password)) =
            (registry.username.as_deref(), registry.password.as_deref())
        else {
            return Err(OrchestratorError::build(
                "Registry login required but no credentials are configured",
            ));
        };

        let mut command = argv(&["docker", "login", "-u", username, "-p", password]);
        if let Some(host) = &registry.host {
            command.push(host.clone());
        }
        self.run(agent, command).await?;
        debug!(pod = %agent.pod, "Registry login done");
        Ok(())
    }

    /// Push every tag of the image.
    ///
    /// # Errors
    ///
    /// Returns a build error if the command fails.
    #[instrument(skip(self, agent, image), fields(pod = %agent.pod, image = %image.repository()))]
    pub async fn push(
        &self,
        agent: &BuildAgent,
        image: &ImageCoordinates,
    ) -> Result<(), OrchestratorError> {
        self.run(
            agent,
            argv(&["docker", "push", "--all-tags", &image.repository()]),
        )
        .await?;
        info!("Image pushed");
        Ok(())
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| (*p).to_string()).collect()
}

fn shell(script: &str) -> Vec<String> {
    argv(&["sh", "-c", script])
}
