//! Container runtime: start, port discovery, purge.

use crate::config::Dialect;
use crate::error::RuntimeError;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::{debug, info};
use uuid::Uuid;

/// Label attached to every container started by this crate.
pub const MANAGED_LABEL: &str = "testdb.managed=true";

/// What to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, unique per start
    pub name: String,
    /// Image repository
    pub image: String,
    /// Image tag
    pub tag: String,
    /// `KEY=value` environment entries
    pub env: Vec<String>,
    /// Arguments passed to the entrypoint
    pub cmd: Vec<String>,
    /// Container ports to publish on random host ports, `port/proto` form
    pub ports: Vec<String>,
    /// `key=value` labels
    pub labels: Vec<String>,
}

impl ContainerSpec {
    /// Spec for a dialect's database server, with a fresh unique name.
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            name: format!("testdb-{}-{}", dialect.name(), Uuid::new_v4().simple()),
            image: dialect.image().to_string(),
            tag: dialect.tag().to_string(),
            env: dialect.container_env().iter().map(|s| s.to_string()).collect(),
            cmd: dialect.container_cmd().iter().map(|s| s.to_string()).collect(),
            ports: vec![dialect.container_port().to_string()],
            labels: vec![MANAGED_LABEL.to_string()],
        }
    }

    /// `image:tag` reference.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Operations the provisioning helpers need from a container runtime.
///
/// Implementations must be shareable across the threads used by
/// [`crate::parallel`].
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime is reachable.
    fn ping(&self) -> Result<(), RuntimeError>;

    /// Start a detached container and return its id.
    fn run(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Host port published for `container_port` (`5432/tcp`).
    fn host_port(&self, container: &str, container_port: &str) -> Result<u16, RuntimeError>;

    /// Force-remove a container together with its anonymous volumes.
    fn purge(&self, container: &str) -> Result<(), RuntimeError>;
}

/// [`ContainerRuntime`] backed by the `docker` command line client.
///
/// The CLI honours `DOCKER_HOST` and the active docker context.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    /// Use `docker` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific docker-compatible binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Create a handle and check that the daemon answers.
    pub fn connect() -> Result<Self, RuntimeError> {
        let cli = Self::new();
        cli.ping()?;
        Ok(cli)
    }

    fn cmd<I, S>(&self, args: I) -> Result<Output, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let output = Command::new(&self.binary).args(&args).output();
        output.map_err(|source| RuntimeError::Spawn {
            command: self.describe(&args),
            source,
        })
    }

    fn describe<S: AsRef<OsStr>>(&self, args: &[S]) -> String {
        let mut parts = vec![self.binary.display().to_string()];
        if let Some(sub) = args.first() {
            parts.push(sub.as_ref().to_string_lossy().into_owned());
        }
        parts.join(" ")
    }
}

impl ContainerRuntime for DockerCli {
    fn ping(&self) -> Result<(), RuntimeError> {
        let output = self
            .cmd(["info", "--format", "{{.ServerVersion}}"])
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(RuntimeError::Unavailable(stderr_of(&output)));
        }
        Ok(())
    }

    fn run(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        info!("Starting container {} from {}", spec.name, spec.image_ref());

        let output = self.cmd(docker_run_args(spec))?;
        if !output.status.success() {
            return Err(RuntimeError::StartFailed {
                image: spec.image_ref(),
                stderr: stderr_of(&output),
            });
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::StartFailed {
                image: spec.image_ref(),
                stderr: "docker run printed no container id".to_string(),
            });
        }

        debug!("Container {} started with id {}", spec.name, id);
        Ok(id)
    }

    fn host_port(&self, container: &str, container_port: &str) -> Result<u16, RuntimeError> {
        let output = self.cmd(["port", container, container_port])?;
        let not_found = || RuntimeError::PortNotFound {
            container: container.to_string(),
            container_port: container_port.to_string(),
        };

        if !output.status.success() {
            return Err(not_found());
        }
        parse_port_output(&String::from_utf8_lossy(&output.stdout)).ok_or_else(not_found)
    }

    fn purge(&self, container: &str) -> Result<(), RuntimeError> {
        info!("Purging container {}", container);

        let output = self.cmd(["rm", "--force", "--volumes", container])?;
        if !output.status.success() {
            return Err(RuntimeError::PurgeFailed {
                container: container.to_string(),
                stderr: stderr_of(&output),
            });
        }
        Ok(())
    }
}

/// Arguments for `docker run` that start `spec` detached.
pub fn docker_run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--detach".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for label in &spec.labels {
        args.push("--label".to_string());
        args.push(label.clone());
    }
    for port in &spec.ports {
        args.push("--publish".to_string());
        args.push(port.clone());
    }
    for env in &spec.env {
        args.push("--env".to_string());
        args.push(env.clone());
    }
    args.push(spec.image_ref());
    args.extend(spec.cmd.iter().cloned());
    args
}

/// Parse `docker port` output (`0.0.0.0:49153` / `[::]:49153`, one per line).
fn parse_port_output(stdout: &str) -> Option<u16> {
    stdout
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse().ok())
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
