//! CLI-based Docker runtime and registry clients.
//!
//! These clients drive the `docker` binary:
//!
//! - `docker container inspect` / `create` / `start` / `stop` / `rm`
//! - `docker image inspect` / `pull`
//! - `docker login --password-stdin`
//!
//! # Declared options
//!
//! `docker inspect` reports resolved values (image defaults merged in), which
//! would never compare equal to a declaration. The declared options are
//! therefore recorded as a JSON label at create time and read back on inspect.
//! Containers without the label fall back to the options Docker reports.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use converge_types::{
    ContainerId, ContainerSpec, ContainerStatus, ConvergeError, PortMapping, Result,
    RuntimeOptions, RuntimeState,
};
use host_interface::{ContainerRuntime, RegistryClient, RegistryCredentials};

/// Label holding the JSON-encoded declared [`RuntimeOptions`].
pub const OPTIONS_LABEL: &str = "io.converge.options";
/// Label marking containers created by this client.
pub const MANAGED_LABEL: &str = "io.converge.managed";

/// Errors specific to Docker CLI operations.
#[derive(Debug, thiserror::Error)]
pub enum DockerCliError {
    #[error("Docker binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Docker daemon unreachable: {0}")]
    DaemonUnreachable(String),

    #[error("Docker command failed: {command} - {message}")]
    CommandFailed { command: String, message: String },

    #[error("Invalid docker output: {0}")]
    InvalidOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<DockerCliError> for ConvergeError {
    fn from(err: DockerCliError) -> Self {
        match err {
            DockerCliError::BinaryNotFound(_)
            | DockerCliError::DaemonUnreachable(_)
            | DockerCliError::Io(_)
            | DockerCliError::Timeout(_) => ConvergeError::Transport(err.to_string()),
            other => ConvergeError::RuntimeError(other.to_string()),
        }
    }
}

/// Configuration for the Docker CLI clients.
#[derive(Debug, Clone)]
pub struct DockerCliConfig {
    /// Path to docker binary (default: "docker")
    pub docker_binary: PathBuf,
    /// Timeout for short commands (default: 60s)
    pub command_timeout: Duration,
    /// Timeout for image pulls (default: 15m)
    pub pull_timeout: Duration,
    /// Grace period before SIGKILL on stop (default: 10s)
    pub stop_timeout: Duration,
}

impl Default for DockerCliConfig {
    fn default() -> Self {
        Self {
            docker_binary: PathBuf::from("docker"),
            command_timeout: Duration::from_secs(60),
            pull_timeout: Duration::from_secs(900),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Execute a docker command with a timeout.
async fn exec_docker(
    config: &DockerCliConfig,
    args: &[String],
    timeout: Duration,
) -> std::result::Result<Output, DockerCliError> {
    let cmd_str = format!("docker {}", args.first().map(String::as_str).unwrap_or(""));
    debug!("Executing: docker {}", args.join(" "));

    let child = Command::new(&config.docker_binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| DockerCliError::Timeout(cmd_str))?
        .map_err(|e| spawn_error(config, e))
}

fn spawn_error(config: &DockerCliConfig, err: std::io::Error) -> DockerCliError {
    if err.kind() == std::io::ErrorKind::NotFound {
        DockerCliError::BinaryNotFound(format!("{:?}", config.docker_binary))
    } else {
        DockerCliError::Io(err)
    }
}

/// Classify a failed docker command by its stderr.
fn command_error(command: &str, output: &Output) -> DockerCliError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if is_daemon_unreachable(&stderr) {
        DockerCliError::DaemonUnreachable(stderr)
    } else {
        DockerCliError::CommandFailed {
            command: command.to_string(),
            message: stderr,
        }
    }
}

fn is_daemon_unreachable(stderr: &str) -> bool {
    stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("Is the docker daemon running")
        || stderr.contains("error during connect")
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

// ==================== Inspect output ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectOutput {
    id: String,
    name: String,
    config: InspectConfig,
    state: InspectState,
    #[serde(default)]
    host_config: InspectHostConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectHostConfig {
    network_mode: Option<String>,
    binds: Option<Vec<String>>,
    privileged: bool,
    cap_add: Option<Vec<String>>,
    port_bindings: Option<HashMap<String, Option<Vec<PortBinding>>>>,
    pid_mode: Option<String>,
    ipc_mode: Option<String>,
    init: Option<bool>,
    sysctls: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    #[serde(default)]
    host_port: Option<String>,
}

impl InspectOutput {
    fn into_runtime_state(self) -> RuntimeState {
        let declared = self
            .config
            .labels
            .as_ref()
            .and_then(|labels| labels.get(OPTIONS_LABEL))
            .and_then(|raw| match serde_json::from_str::<RuntimeOptions>(raw) {
                Ok(options) => Some(options),
                Err(e) => {
                    warn!("Ignoring unreadable {} label: {}", OPTIONS_LABEL, e);
                    None
                }
            });

        let options = match declared {
            Some(options) => options,
            None => reported_options(&self.config, &self.host_config),
        };

        RuntimeState {
            name: self.name.trim_start_matches('/').to_string(),
            id: self.id,
            image: self.config.image,
            options,
            status: ContainerStatus::from_runtime(&self.state.status),
        }
    }
}

/// Options as reported by Docker, for containers created outside this client.
fn reported_options(config: &InspectConfig, host: &InspectHostConfig) -> RuntimeOptions {
    let env: BTreeMap<String, String> = config
        .env
        .iter()
        .flatten()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let ports: BTreeSet<PortMapping> = host
        .port_bindings
        .iter()
        .flatten()
        .filter_map(|(key, bindings)| {
            let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            let container_port = port.parse::<u16>().ok()?;
            let host_port = bindings
                .iter()
                .flatten()
                .filter_map(|b| b.host_port.as_deref())
                .find_map(|p| p.parse::<u16>().ok());
            Some(PortMapping {
                container_port,
                host_port,
                protocol: protocol.to_string(),
            })
        })
        .collect();

    RuntimeOptions {
        command: config.cmd.clone(),
        env,
        network_mode: host.network_mode.clone().filter(|m| m != "default"),
        ports,
        volumes: host.binds.iter().flatten().cloned().collect(),
        capabilities: host.cap_add.iter().flatten().cloned().collect(),
        privileged: host.privileged,
        user: config.user.clone().filter(|u| !u.is_empty()),
        pid_mode: host.pid_mode.clone().filter(|m| !m.is_empty()),
        ipc_mode: host.ipc_mode.clone().filter(|m| !m.is_empty() && m != "private"),
        init: host.init,
        sysctls: host
            .sysctls
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        ..RuntimeOptions::default()
    }
}

/// Parse `docker container inspect` output for a single container.
pub fn parse_inspect(stdout: &[u8]) -> std::result::Result<Option<RuntimeState>, DockerCliError> {
    let mut entries: Vec<InspectOutput> = serde_json::from_slice(stdout)?;
    if entries.len() > 1 {
        return Err(DockerCliError::InvalidOutput(format!(
            "expected one container, got {}",
            entries.len()
        )));
    }
    Ok(entries.pop().map(InspectOutput::into_runtime_state))
}

/// Build the `docker create` argument list for a spec.
pub fn build_create_args(spec: &ContainerSpec) -> Result<Vec<String>> {
    let options = &spec.options;
    let encoded = serde_json::to_string(options)
        .map_err(|e| ConvergeError::InternalError(format!("encoding options: {}", e)))?;

    let mut args: Vec<String> = vec![
        "create".into(),
        "--name".into(),
        spec.name.clone(),
        "--label".into(),
        format!("{}=true", MANAGED_LABEL),
        "--label".into(),
        format!("{}={}", OPTIONS_LABEL, encoded),
    ];

    let mut push = |flag: &str, value: String| {
        args.push(flag.to_string());
        args.push(value);
    };

    for (key, value) in &options.env {
        push("--env", format!("{}={}", key, value));
    }
    if let Some(mode) = &options.network_mode {
        push("--network", mode.clone());
    }
    for port in &options.ports {
        let target = format!("{}/{}", port.container_port, port.protocol);
        match port.host_port {
            Some(host) => push("--publish", format!("{}:{}", host, target)),
            None => push("--publish", target),
        }
    }
    for volume in &options.volumes {
        push("--volume", volume.clone());
    }
    for cap in &options.capabilities {
        push("--cap-add", cap.clone());
    }
    if let Some(policy) = options.restart_policy {
        push("--restart", policy.as_str().to_string());
    }
    if let Some(size) = &options.shm_size {
        push("--shm-size", size.clone());
    }
    for (key, value) in &options.sysctls {
        push("--sysctl", format!("{}={}", key, value));
    }
    for (name, limit) in &options.ulimits {
        push("--ulimit", format!("{}={}:{}", name, limit.soft, limit.hard));
    }
    if let Some(user) = &options.user {
        push("--user", user.clone());
    }
    if let Some(mode) = &options.pid_mode {
        push("--pid", mode.clone());
    }
    if let Some(mode) = &options.ipc_mode {
        push("--ipc", mode.clone());
    }

    if options.privileged {
        args.push("--privileged".into());
    }
    if options.init == Some(true) {
        args.push("--init".into());
    }

    args.push(spec.effective_image()?);
    if let Some(command) = &options.command {
        args.extend(command.iter().cloned());
    }
    Ok(args)
}

/// Container runtime backed by the `docker` CLI.
#[derive(Debug, Clone, Default)]
pub struct DockerCliRuntime {
    config: DockerCliConfig,
}

impl DockerCliRuntime {
    pub fn new(config: DockerCliConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        command: &str,
        args: Vec<String>,
        timeout: Duration,
    ) -> std::result::Result<Output, DockerCliError> {
        let output = exec_docker(&self.config, &args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(command_error(command, &output))
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeState>> {
        let args = vec![
            "container".to_string(),
            "inspect".to_string(),
            name.to_string(),
        ];
        let output = exec_docker(&self.config, &args, self.config.command_timeout).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) && !is_daemon_unreachable(&stderr) {
                debug!("Container {} not present", name);
                return Ok(None);
            }
            return Err(command_error("container inspect", &output).into());
        }

        Ok(parse_inspect(&output.stdout)?)
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        let args = vec!["image".to_string(), "inspect".to_string(), image.to_string()];
        let output = exec_docker(&self.config, &args, self.config.command_timeout).await?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_ascii_lowercase();
        if stderr.contains("no such image") || stderr.contains("no such object") {
            Ok(false)
        } else {
            Err(command_error("image inspect", &output).into())
        }
    }

    async fn pull(&self, image: &str) -> Result<()> {
        info!("Pulling image {}", image);
        self.run(
            "pull",
            vec!["pull".to_string(), image.to_string()],
            self.config.pull_timeout,
        )
        .await?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let args = build_create_args(spec)?;
        let output = self.run("create", args, self.config.command_timeout).await?;

        let id = String::from_utf8_lossy(&output.stdout)
            .lines()
            .last()
            .map(|line| line.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DockerCliError::InvalidOutput("create returned no id".to_string()))?;

        debug!("Container {} created as {}", spec.name, id);
        Ok(id)
    }

    async fn start(&self, container_id: &ContainerId) -> Result<()> {
        self.run(
            "start",
            vec!["start".to_string(), container_id.clone()],
            self.config.command_timeout,
        )
        .await?;
        Ok(())
    }

    async fn stop(&self, container_id: &ContainerId) -> Result<()> {
        let grace = self.config.stop_timeout.as_secs();
        self.run(
            "stop",
            vec![
                "stop".to_string(),
                "--time".to_string(),
                grace.to_string(),
                container_id.clone(),
            ],
            self.config.command_timeout + self.config.stop_timeout,
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, container_id: &ContainerId) -> Result<()> {
        let args = vec!["rm".to_string(), container_id.clone()];
        let output = exec_docker(&self.config, &args, self.config.command_timeout).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Already gone is as good as removed
            if !is_not_found(&stderr) || is_daemon_unreachable(&stderr) {
                return Err(command_error("rm", &output).into());
            }
        }
        Ok(())
    }
}

/// Registry client performing `docker login`.
#[derive(Debug, Clone, Default)]
pub struct DockerCliRegistry {
    config: DockerCliConfig,
}

impl DockerCliRegistry {
    pub fn new(config: DockerCliConfig) -> Self {
        Self { config }
    }

    async fn login_inner(
        &self,
        credentials: &RegistryCredentials,
    ) -> std::result::Result<(), DockerCliError> {
        let mut command = Command::new(&self.config.docker_binary);
        command.arg("login");
        if let Some(address) = &credentials.address {
            command.arg(address);
        }
        command
            .arg("--username")
            .arg(&credentials.username)
            .arg("--password-stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| spawn_error(&self.config, e))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(credentials.password.expose_secret().as_bytes())
                .await?;
            // Dropping stdin closes it so docker stops reading
        }

        let output = tokio::time::timeout(self.config.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| DockerCliError::Timeout("docker login".to_string()))??;

        if output.status.success() {
            Ok(())
        } else {
            Err(command_error("login", &output))
        }
    }
}

#[async_trait]
impl RegistryClient for DockerCliRegistry {
    async fn login(&self, credentials: &RegistryCredentials) -> Result<()> {
        let registry = credentials.address.as_deref().unwrap_or("default registry");
        info!(registry, username = %credentials.username, "Logging in to registry");

        self.login_inner(credentials).await.map_err(|e| match e {
            DockerCliError::CommandFailed { message, .. } => ConvergeError::RegistryError(message),
            other => other.into(),
        })
    }
}
