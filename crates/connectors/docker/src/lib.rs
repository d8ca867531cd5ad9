//! Docker connector.
//!
//! Shells out to the `docker` CLI rather than speaking the Engine API
//! directly, passing `-H` for non-default daemons. Stderr is pattern
//! matched into stable error codes so callers can distinguish a missing
//! container from an unreachable daemon.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

/// How to reach the daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonConfig {
    LocalSocket { socket_path: String },
    Tcp { host: String },
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::LocalSocket {
            socket_path: "/var/run/docker.sock".to_string(),
        }
    }
}

impl DaemonConfig {
    fn cli_args(&self) -> Vec<String> {
        match self {
            Self::LocalSocket { socket_path } => {
                vec!["-H".to_string(), format!("unix://{socket_path}")]
            }
            Self::Tcp { host } => vec!["-H".to_string(), host.clone()],
        }
    }
}

/// Classify a docker CLI failure from its stderr.
pub fn map_docker_error(stderr: &str) -> (String, &'static str, &'static str) {
    if stderr.contains("permission denied") {
        return (
            "Docker daemon access denied".to_string(),
            "PERMISSION_DENIED",
            "Check socket permissions or add user to docker group.",
        );
    }
    if stderr.contains("Cannot connect to the Docker daemon") {
        return (
            "Cannot connect to Docker daemon".to_string(),
            "DAEMON_UNREACHABLE",
            "Verify docker is running and the configured host/socket is reachable.",
        );
    }
    if stderr.contains("No such container") {
        return (
            "Container not found".to_string(),
            "CONTAINER_NOT_FOUND",
            "Verify the container ID or name exists.",
        );
    }
    if stderr.contains("No such image") {
        return (
            "Image not found".to_string(),
            "IMAGE_MISSING",
            "Try pulling the image first using docker_pull_image.",
        );
    }
    let message = stderr.trim();
    (
        if message.is_empty() {
            "Docker command failed".to_string()
        } else {
            message.to_string()
        },
        "DOCKER_ERROR",
        "",
    )
}

fn docker_error(stderr: &str) -> ToolResult {
    let (message, code, details) = map_docker_error(stderr);
    ToolResult::error(
        json!({ "error": { "message": message, "code": code, "details": details } }).to_string(),
    )
}

struct CliOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

/// Parse `--format '{{json .}}'` output: one JSON object per line.
fn parse_json_lines(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

enum Op {
    Health,
    Configure,
    ListContainers,
    RunContainer,
    StopContainer,
    RemoveContainer,
    Exec,
    ListImages,
    PullImage,
    BuildImage,
    RemoveImage,
    GetLogs,
    InspectContainer,
    ListNetworks,
    CreateNetwork,
    RemoveNetwork,
    ListVolumes,
    CreateVolume,
    RemoveVolume,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "docker_health" => Some(Self::Health),
            "docker_configure" => Some(Self::Configure),
            "docker_list_containers" => Some(Self::ListContainers),
            "docker_run_container" => Some(Self::RunContainer),
            "docker_stop_container" => Some(Self::StopContainer),
            "docker_remove_container" => Some(Self::RemoveContainer),
            "docker_exec" => Some(Self::Exec),
            "docker_list_images" => Some(Self::ListImages),
            "docker_pull_image" => Some(Self::PullImage),
            "docker_build_image" => Some(Self::BuildImage),
            "docker_remove_image" => Some(Self::RemoveImage),
            "docker_get_logs" => Some(Self::GetLogs),
            "docker_inspect_container" => Some(Self::InspectContainer),
            "docker_list_networks" => Some(Self::ListNetworks),
            "docker_create_network" => Some(Self::CreateNetwork),
            "docker_remove_network" => Some(Self::RemoveNetwork),
            "docker_list_volumes" => Some(Self::ListVolumes),
            "docker_create_volume" => Some(Self::CreateVolume),
            "docker_remove_volume" => Some(Self::RemoveVolume),
            _ => None,
        }
    }
}

pub struct DockerConnector {
    session: SessionState<DaemonConfig>,
}

impl DockerConnector {
    pub fn new(initial: DaemonConfig) -> Self {
        Self {
            session: SessionState::new(Some(initial)),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let daemon = match env_var("DOCKER_HOST") {
            Some(host) if host.starts_with("tcp://") => DaemonConfig::Tcp {
                host: host.trim_start_matches("tcp://").to_string(),
            },
            Some(host) => DaemonConfig::LocalSocket {
                socket_path: host.trim_start_matches("unix://").to_string(),
            },
            None => DaemonConfig::default(),
        };
        Self::new(daemon)
    }

    async fn run_docker(&self, args: &[String]) -> Result<CliOutput> {
        let daemon_args = self
            .session
            .snapshot()
            .map(|d| d.cli_args())
            .unwrap_or_default();
        debug!(?daemon_args, ?args, "running docker");

        let output = Command::new("docker")
            .args(&daemon_args)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Subprocess(format!("failed to spawn docker: {e}")))?;
        Ok(CliOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn validate_daemon(&self) -> Result<String> {
        let out = self
            .run_docker(&[
                "version".to_string(),
                "--format".to_string(),
                "{{.Server.Version}}".to_string(),
            ])
            .await?;
        if out.code != 0 {
            return Err(Error::Http(if out.stderr.trim().is_empty() {
                "Docker version check failed".to_string()
            } else {
                out.stderr.trim().to_string()
            }));
        }
        Ok(out.stdout.trim().to_string())
    }

    async fn simple(&self, args: Vec<String>, shape: impl FnOnce(CliOutput) -> Value) -> ToolResult {
        match self.run_docker(&args).await {
            Ok(out) if out.code == 0 => ToolResult::json(&shape(out)),
            Ok(out) => docker_error(&out.stderr),
            Err(e) => ToolResult::error(
                json!({ "error": { "message": e.to_string(), "code": "DOCKER_ERROR" } }).to_string(),
            ),
        }
    }

    async fn configure(&self, arguments: Value) -> ToolResult {
        #[derive(Deserialize)]
        struct Params {
            daemon: DaemonConfig,
        }
        let params: Params = match parse_args(arguments) {
            Ok(params) => params,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let previous = self.session.snapshot();
        self.session.replace(params.daemon);
        match self.validate_daemon().await {
            Ok(version) => ToolResult::json(&json!({ "ok": true, "serverVersion": version })),
            Err(e) => {
                // Roll back to the prior daemon on failed verification.
                match previous {
                    Some(prev) => self.session.replace((*prev).clone()),
                    None => self.session.clear(),
                }
                warn!(error = %e, "docker daemon verification failed");
                ToolResult::error(
                    json!({
                        "error": {
                            "message": "Failed to connect to Docker daemon",
                            "code": "DAEMON_UNREACHABLE",
                            "details": e.to_string(),
                        }
                    })
                    .to_string(),
                )
            }
        }
    }

    async fn run_container(&self, arguments: Value) -> ToolResult {
        #[derive(Deserialize)]
        struct Mount {
            r#type: String,
            source: String,
            target: String,
        }
        #[derive(Deserialize)]
        struct Params {
            image: String,
            name: Option<String>,
            env: Option<serde_json::Map<String, Value>>,
            command: Option<Vec<String>>,
            detach: Option<bool>,
            mounts: Option<Vec<Mount>>,
        }
        let params: Params = match parse_args(arguments) {
            Ok(params) => params,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let mut args = vec!["run".to_string()];
        if params.detach != Some(false) {
            args.push("-d".to_string());
        }
        if let Some(name) = &params.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        if let Some(env) = &params.env {
            for (key, value) in env {
                args.push("-e".to_string());
                args.push(format!("{key}={}", value.as_str().unwrap_or_default()));
            }
        }
        if let Some(mounts) = &params.mounts {
            for mount in mounts {
                let ok = match mount.r#type.as_str() {
                    "bind" => mount.source.starts_with('/'),
                    "volume" => true,
                    _ => false,
                };
                if ok {
                    args.push("--mount".to_string());
                    args.push(format!(
                        "type={},source={},target={}",
                        mount.r#type, mount.source, mount.target
                    ));
                }
            }
        }
        args.push(params.image.clone());
        if let Some(command) = &params.command {
            args.extend(command.iter().cloned());
        }

        match self.run_docker(&args).await {
            Ok(out) if out.code == 0 => {
                ToolResult::json(&json!({ "containerId": out.stdout.trim() }))
            }
            Ok(out)
                if out.stderr.contains("pull access denied")
                    || out.stderr.contains("not found") =>
            {
                // Image missing locally: pull once, then retry the run.
                match self.run_docker(&["pull".to_string(), params.image.clone()]).await {
                    Ok(pull) if pull.code == 0 => match self.run_docker(&args).await {
                        Ok(retry) if retry.code == 0 => {
                            ToolResult::json(&json!({ "containerId": retry.stdout.trim() }))
                        }
                        Ok(retry) => docker_error(&retry.stderr),
                        Err(e) => ToolResult::error(e.to_string()),
                    },
                    Ok(pull) => docker_error(if pull.stderr.is_empty() {
                        &out.stderr
                    } else {
                        &pull.stderr
                    }),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
            Ok(out) => docker_error(&out.stderr),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[async_trait]
impl Connector for DockerConnector {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let empty = json!({ "type": "object", "properties": {}, "additionalProperties": false });
        let container_id = json!({
            "type": "object",
            "properties": { "container_id": { "type": "string" } },
            "required": ["container_id"],
            "additionalProperties": false
        });
        vec![
            ToolDefinition::new("docker_health", "Health check for Docker MCP server.", empty.clone()),
            ToolDefinition::new(
                "docker_configure",
                "Configure Docker daemon connectivity.",
                json!({
                    "type": "object",
                    "properties": {
                        "daemon": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["local_socket", "tcp"] },
                                "socket_path": { "type": "string" },
                                "host": { "type": "string" }
                            },
                            "required": ["type"]
                        }
                    },
                    "required": ["daemon"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new("docker_list_containers", "List running and stopped containers.", empty.clone()),
            ToolDefinition::new(
                "docker_run_container",
                "Run a container with given parameters.",
                json!({
                    "type": "object",
                    "properties": {
                        "image": { "type": "string" },
                        "name": { "type": "string" },
                        "env": { "type": "object" },
                        "command": { "type": "array", "items": { "type": "string" } },
                        "detach": { "type": "boolean", "default": true },
                        "mounts": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "type": { "type": "string", "enum": ["bind", "volume"] },
                                    "source": { "type": "string" },
                                    "target": { "type": "string" }
                                },
                                "required": ["type", "source", "target"]
                            }
                        }
                    },
                    "required": ["image"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new("docker_stop_container", "Stop a container.", container_id.clone()),
            ToolDefinition::new(
                "docker_remove_container",
                "Remove a container.",
                json!({
                    "type": "object",
                    "properties": {
                        "container_id": { "type": "string" },
                        "force": { "type": "boolean", "default": false }
                    },
                    "required": ["container_id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "docker_exec",
                "Exec a command in a running container.",
                json!({
                    "type": "object",
                    "properties": {
                        "container_id": { "type": "string" },
                        "command": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["container_id", "command"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new("docker_list_images", "List local images.", empty.clone()),
            ToolDefinition::new(
                "docker_pull_image",
                "Pull an image.",
                json!({
                    "type": "object",
                    "properties": { "image": { "type": "string" } },
                    "required": ["image"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "docker_build_image",
                "Build an image from context.",
                json!({
                    "type": "object",
                    "properties": {
                        "context_path": { "type": "string" },
                        "dockerfile_path": { "type": "string" },
                        "tags": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["context_path"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "docker_remove_image",
                "Remove an image.",
                json!({
                    "type": "object",
                    "properties": {
                        "image": { "type": "string" },
                        "force": { "type": "boolean", "default": false }
                    },
                    "required": ["image"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "docker_get_logs",
                "Get container logs (stdout+stderr).",
                json!({
                    "type": "object",
                    "properties": {
                        "container_id": { "type": "string" },
                        "tail": { "type": "number", "description": "Number of lines from the end" }
                    },
                    "required": ["container_id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new("docker_inspect_container", "Inspect a container.", container_id.clone()),
            ToolDefinition::new("docker_list_networks", "List Docker networks.", empty.clone()),
            ToolDefinition::new(
                "docker_create_network",
                "Create a Docker network.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "driver": { "type": "string", "default": "bridge" }
                    },
                    "required": ["name"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "docker_remove_network",
                "Remove a Docker network.",
                json!({
                    "type": "object",
                    "properties": { "name": { "type": "string" } },
                    "required": ["name"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new("docker_list_volumes", "List Docker volumes.", empty.clone()),
            ToolDefinition::new(
                "docker_create_volume",
                "Create a Docker volume.",
                json!({
                    "type": "object",
                    "properties": { "name": { "type": "string" } },
                    "required": ["name"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "docker_remove_volume",
                "Remove a Docker volume.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "force": { "type": "boolean", "default": false }
                    },
                    "required": ["name"],
                    "additionalProperties": false
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };

        #[derive(Deserialize)]
        struct IdParams {
            container_id: String,
            #[serde(default)]
            force: Option<bool>,
            #[serde(default)]
            tail: Option<u64>,
            #[serde(default)]
            command: Option<Vec<String>>,
        }
        #[derive(Deserialize)]
        struct NameParams {
            name: String,
            #[serde(default)]
            driver: Option<String>,
            #[serde(default)]
            force: Option<bool>,
        }

        macro_rules! params {
            ($ty:ty, $args:expr) => {
                match parse_args::<$ty>($args) {
                    Ok(params) => params,
                    Err(e) => return ToolResult::error(e.to_string()),
                }
            };
        }

        match op {
            Op::Health => ToolResult::json(&json!({ "ok": true })),
            Op::Configure => self.configure(arguments).await,
            Op::RunContainer => self.run_container(arguments).await,
            Op::ListContainers => {
                self.simple(
                    vec!["ps".into(), "-a".into(), "--format".into(), "{{json .}}".into()],
                    |out| json!({ "containers": parse_json_lines(&out.stdout) }),
                )
                .await
            }
            Op::StopContainer => {
                let p = params!(IdParams, arguments);
                self.simple(vec!["stop".into(), p.container_id], |out| {
                    json!({ "ok": true, "message": out.stdout.trim() })
                })
                .await
            }
            Op::RemoveContainer => {
                let p = params!(IdParams, arguments);
                let mut args = vec!["rm".to_string()];
                if p.force == Some(true) {
                    args.push("-f".to_string());
                }
                args.push(p.container_id);
                self.simple(args, |out| json!({ "ok": true, "message": out.stdout.trim() }))
                    .await
            }
            Op::Exec => {
                let p = params!(IdParams, arguments);
                let Some(command) = p.command else {
                    return ToolResult::error("Invalid request: command is required".to_string());
                };
                let mut args = vec!["exec".to_string(), p.container_id];
                args.extend(command);
                self.simple(args, |out| {
                    json!({ "ok": true, "exitCode": out.code, "output": out.stdout })
                })
                .await
            }
            Op::ListImages => {
                self.simple(
                    vec!["images".into(), "--format".into(), "{{json .}}".into()],
                    |out| json!({ "images": parse_json_lines(&out.stdout) }),
                )
                .await
            }
            Op::PullImage => {
                #[derive(Deserialize)]
                struct P {
                    image: String,
                }
                let p = params!(P, arguments);
                self.simple(vec!["pull".into(), p.image], |out| {
                    json!({ "ok": true, "output": out.stdout })
                })
                .await
            }
            Op::BuildImage => {
                #[derive(Deserialize)]
                struct P {
                    context_path: String,
                    dockerfile_path: Option<String>,
                    tags: Option<Vec<String>>,
                }
                let p = params!(P, arguments);
                let mut args = vec!["build".to_string(), p.context_path];
                if let Some(dockerfile) = p.dockerfile_path {
                    args.push("-f".to_string());
                    args.push(dockerfile);
                }
                for tag in p.tags.unwrap_or_default() {
                    args.push("-t".to_string());
                    args.push(tag);
                }
                self.simple(args, |out| json!({ "ok": true, "output": out.stdout }))
                    .await
            }
            Op::RemoveImage => {
                #[derive(Deserialize)]
                struct P {
                    image: String,
                    force: Option<bool>,
                }
                let p = params!(P, arguments);
                let mut args = vec!["rmi".to_string()];
                if p.force == Some(true) {
                    args.push("-f".to_string());
                }
                args.push(p.image);
                self.simple(args, |out| json!({ "ok": true, "output": out.stdout }))
                    .await
            }
            Op::GetLogs => {
                let p = params!(IdParams, arguments);
                let mut args = vec!["logs".to_string()];
                if let Some(tail) = p.tail {
                    args.push("--tail".to_string());
                    args.push(tail.to_string());
                }
                args.push(p.container_id);
                self.simple(args, |out| json!({ "logs": out.stdout })).await
            }
            Op::InspectContainer => {
                let p = params!(IdParams, arguments);
                self.simple(vec!["inspect".into(), p.container_id], |out| {
                    let inspect = serde_json::from_str::<Value>(&out.stdout)
                        .unwrap_or(Value::String(out.stdout));
                    json!({ "inspect": inspect })
                })
                .await
            }
            Op::ListNetworks => {
                self.simple(
                    vec!["network".into(), "ls".into(), "--format".into(), "{{json .}}".into()],
                    |out| json!({ "networks": parse_json_lines(&out.stdout) }),
                )
                .await
            }
            Op::CreateNetwork => {
                let p = params!(NameParams, arguments);
                self.simple(
                    vec![
                        "network".into(),
                        "create".into(),
                        "--driver".into(),
                        p.driver.unwrap_or_else(|| "bridge".to_string()),
                        p.name,
                    ],
                    |out| json!({ "networkId": out.stdout.trim() }),
                )
                .await
            }
            Op::RemoveNetwork => {
                let p = params!(NameParams, arguments);
                self.simple(vec!["network".into(), "rm".into(), p.name], |out| {
                    json!({ "ok": true, "message": out.stdout.trim() })
                })
                .await
            }
            Op::ListVolumes => {
                self.simple(
                    vec!["volume".into(), "ls".into(), "--format".into(), "{{json .}}".into()],
                    |out| json!({ "volumes": parse_json_lines(&out.stdout) }),
                )
                .await
            }
            Op::CreateVolume => {
                let p = params!(NameParams, arguments);
                self.simple(vec!["volume".into(), "create".into(), p.name], |out| {
                    json!({ "volumeName": out.stdout.trim() })
                })
                .await
            }
            Op::RemoveVolume => {
                let p = params!(NameParams, arguments);
                let mut args = vec!["volume".to_string(), "rm".to_string()];
                if p.force == Some(true) {
                    args.push("-f".to_string());
                }
                args.push(p.name);
                self.simple(args, |out| json!({ "ok": true, "message": out.stdout.trim() }))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_classification() {
        let (msg, code, _) = map_docker_error("Got permission denied while trying to connect");
        assert_eq!(code, "PERMISSION_DENIED");
        assert_eq!(msg, "Docker daemon access denied");

        let (_, code, _) =
            map_docker_error("Cannot connect to the Docker daemon at unix:///var/run/docker.sock");
        assert_eq!(code, "DAEMON_UNREACHABLE");

        let (_, code, _) = map_docker_error("Error: No such container: web");
        assert_eq!(code, "CONTAINER_NOT_FOUND");

        let (_, code, hint) = map_docker_error("Error: No such image: ghost:latest");
        assert_eq!(code, "IMAGE_MISSING");
        assert!(hint.contains("docker_pull_image"));

        let (msg, code, _) = map_docker_error("something exploded");
        assert_eq!(code, "DOCKER_ERROR");
        assert_eq!(msg, "something exploded");
    }

    #[test]
    fn test_parse_json_lines() {
        let stdout = "{\"ID\":\"abc\"}\n\n{\"ID\":\"def\"}\nnot json\n";
        let parsed = parse_json_lines(stdout);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["ID"], "abc");
    }

    #[test]
    fn test_daemon_cli_args() {
        let socket = DaemonConfig::LocalSocket {
            socket_path: "/var/run/docker.sock".to_string(),
        };
        assert_eq!(socket.cli_args(), vec!["-H", "unix:///var/run/docker.sock"]);

        let tcp = DaemonConfig::Tcp {
            host: "10.0.0.5:2375".to_string(),
        };
        assert_eq!(tcp.cli_args(), vec!["-H", "10.0.0.5:2375"]);
    }

    #[tokio::test]
    async fn test_health_is_static() {
        let connector = DockerConnector::new(DaemonConfig::default());
        let result = connector.call("docker_health", Value::Null).await;
        assert!(!result.failed());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let connector = DockerConnector::new(DaemonConfig::default());
        let result = connector.call("docker_fly_container", Value::Null).await;
        assert!(result.failed());
    }
}
