//! Tool-backed task invoker
//!
//! Maps each `uses:` kind to a command line for an external tool and turns
//! the tool's side files (image metadata, SARIF reports) into outputs and
//! findings.

use crate::core::findings::parse_sarif;
use crate::core::workflow::WorkflowDefinition;
use crate::error::DefinitionError;
use crate::task::process::{CommandLine, ProcessInvoker, Scratch};
use crate::task::{TaskError, TaskInvocation, TaskInvoker, TaskOutcome};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Endpoint LocalStack listens on
const LOCALSTACK_ENDPOINT: &str = "http://localhost:4566";

/// The tool kinds a stage can use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Arbitrary shell command (`run` input)
    Command,
    ContainerBuild,
    Scan,
    Policy,
    IacPlan,
    Deploy,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::Command,
        ToolKind::ContainerBuild,
        ToolKind::Scan,
        ToolKind::Policy,
        ToolKind::IacPlan,
        ToolKind::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Command => "command",
            ToolKind::ContainerBuild => "container-build",
            ToolKind::Scan => "scan",
            ToolKind::Policy => "policy",
            ToolKind::IacPlan => "iac-plan",
            ToolKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown task kind '{}'", s))
    }
}

/// Executable names for each tool
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub shell: String,
    pub docker: String,
    pub trivy: String,
    pub conftest: String,
    pub terraform: String,
    pub helm: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            docker: "docker".to_string(),
            trivy: "trivy".to_string(),
            conftest: "conftest".to_string(),
            terraform: "terraform".to_string(),
            helm: "helm".to_string(),
        }
    }
}

/// Files a command line asks the tool to write
#[derive(Debug, Default)]
struct SideFiles {
    sarif: Option<PathBuf>,
    image_metadata: Option<PathBuf>,
}

/// [`TaskInvoker`] that runs real CI/CD tools as subprocesses
#[derive(Debug, Clone, Default)]
pub struct ToolInvoker {
    paths: ToolPaths,
    process: ProcessInvoker,
}

impl ToolInvoker {
    pub fn new(paths: ToolPaths) -> Self {
        Self {
            paths,
            process: ProcessInvoker::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.process = self.process.with_working_dir(dir);
        self
    }

    /// Reject stages whose `uses:` names no known tool
    pub fn check(&self, definition: &WorkflowDefinition) -> Result<(), DefinitionError> {
        for stage in definition.stages() {
            if stage.task.as_str().parse::<ToolKind>().is_err() {
                return Err(DefinitionError::UnknownTask {
                    stage: stage.id.clone(),
                    kind: stage.task.to_string(),
                });
            }
        }
        Ok(())
    }

    fn command_line(
        &self,
        kind: ToolKind,
        invocation: &TaskInvocation,
        scratch: &Scratch,
    ) -> Result<(CommandLine, SideFiles), TaskError> {
        let mut side = SideFiles::default();
        let required = |name: &str| {
            invocation
                .input(name)
                .ok_or_else(|| TaskError::Config(format!("{} requires input '{}'", kind, name)))
        };

        let command_line = match kind {
            ToolKind::Command => CommandLine::new(&self.paths.shell).arg("-c").arg(required("run")?),

            ToolKind::ContainerBuild => {
                let image = required("image")?;
                let metadata = scratch.path("image-metadata.json");
                let mut build = vec![
                    "buildx".to_string(),
                    "build".to_string(),
                    "--file".to_string(),
                    invocation.input("dockerfile").unwrap_or("Dockerfile").to_string(),
                    "--tag".to_string(),
                    image.to_string(),
                    "--metadata-file".to_string(),
                    metadata.display().to_string(),
                ];
                if let Some(platforms) = invocation.input("platforms") {
                    build.extend(["--platform".to_string(), platforms.to_string()]);
                }
                if invocation.flag("push") {
                    build.push("--push".to_string());
                }
                build.push(invocation.input("context").unwrap_or(".").to_string());
                side.image_metadata = Some(metadata);

                match invocation.input("registry_secret").filter(|_| invocation.flag("push")) {
                    Some(secret) => self.login_then_build(invocation, secret, image, build)?,
                    None => CommandLine::new(&self.paths.docker).args(build),
                }
            }

            ToolKind::Scan => {
                let sarif = scratch.path("scan.sarif");
                let mut cmd = CommandLine::new(&self.paths.trivy).args([
                    "fs",
                    "--format",
                    "sarif",
                    "--output",
                ]);
                cmd = cmd.arg(sarif.display().to_string());
                if let Some(scanners) = invocation.input("scanners") {
                    cmd = cmd.arg("--scanners").arg(scanners);
                }
                side.sarif = Some(sarif);
                cmd.arg(invocation.input("scan_path").unwrap_or("."))
            }

            ToolKind::Policy => CommandLine::new(&self.paths.conftest)
                .arg("test")
                .arg("--policy")
                .arg(invocation.input("policy").unwrap_or("policy"))
                .arg(invocation.input("scan_path").unwrap_or(".")),

            ToolKind::IacPlan => {
                let dir = invocation.input("working_directory").unwrap_or(".");
                let mut cmd = CommandLine::new(&self.paths.shell)
                    .arg("-c")
                    .arg(r#""$0" init -input=false && "$0" plan -input=false -out=tfplan"#)
                    .arg(&self.paths.terraform)
                    .current_dir(dir)
                    .env("TF_IN_AUTOMATION", "1");
                if let Some(version) = invocation.input("terraform_version") {
                    cmd = cmd.env("TFENV_TERRAFORM_VERSION", version);
                }
                if invocation.flag("localstack") {
                    cmd = cmd
                        .env("AWS_ENDPOINT_URL", LOCALSTACK_ENDPOINT)
                        .env("AWS_ACCESS_KEY_ID", "test")
                        .env("AWS_SECRET_ACCESS_KEY", "test")
                        .env("AWS_REGION", invocation.input("aws_region").unwrap_or("us-east-1"));
                }
                cmd
            }

            ToolKind::Deploy => {
                let mut cmd = CommandLine::new(&self.paths.helm).args([
                    "upgrade",
                    "--install",
                    required("release")?,
                    required("chart")?,
                    "--namespace",
                    invocation.input("namespace").unwrap_or("default"),
                    "--create-namespace",
                ]);
                if let Some(values) = invocation.input("values") {
                    cmd = cmd.arg("--values").arg(values);
                }
                if let Some(sets) = invocation.input("set") {
                    for set in sets.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        cmd = cmd.arg("--set").arg(set);
                    }
                }
                if invocation.input("wait").map_or(true, |_| invocation.flag("wait")) {
                    cmd = cmd.arg("--wait");
                }
                cmd
            }
        };

        if side.sarif.is_none() {
            side.sarif = invocation.input("findings_file").map(PathBuf::from);
        }
        Ok((command_line, side))
    }

    /// `docker login` with a declared secret, then the build, in one shell
    fn login_then_build(
        &self,
        invocation: &TaskInvocation,
        secret: &str,
        image: &str,
        build: Vec<String>,
    ) -> Result<CommandLine, TaskError> {
        invocation.secrets.get(secret)?;
        if !secret.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(TaskError::Config(format!("invalid secret name '{}'", secret)));
        }

        let registry = invocation
            .input("registry")
            .map(str::to_string)
            .unwrap_or_else(|| registry_of(image));
        let script = format!(
            r#"printf '%s' "${secret}" | "$0" login "$REGISTRY" --username "$REGISTRY_USER" --password-stdin && exec "$0" "$@""#,
            secret = secret
        );

        Ok(CommandLine::new(&self.paths.shell)
            .arg("-c")
            .arg(script)
            .arg(&self.paths.docker)
            .args(build)
            .env("REGISTRY", registry)
            .env(
                "REGISTRY_USER",
                invocation.input("registry_user").unwrap_or("stagerun"),
            ))
    }

    async fn collect_side_files(
        &self,
        invocation: &TaskInvocation,
        side: &SideFiles,
        mut outcome: TaskOutcome,
    ) -> TaskOutcome {
        if let Some(metadata) = &side.image_metadata {
            if let Some(digest) = read_image_digest(metadata).await {
                let image = invocation.input("image").unwrap_or_default();
                outcome = outcome
                    .with_output("digest", digest.clone())
                    .with_output("image", image)
                    .with_artifact("image", format!("{}@{}", image, digest));
            }
        }

        if let Some(sarif) = &side.sarif {
            match tokio::fs::read_to_string(sarif).await {
                Ok(content) => match parse_sarif(&content) {
                    Ok(findings) => {
                        debug!("Stage {}: {} findings", invocation.stage_id, findings.len());
                        outcome = outcome
                            .with_artifact("sarif", format!("file://{}", sarif.display()))
                            .with_findings(findings);
                    }
                    Err(e) => warn!("Stage {}: unreadable SARIF report: {}", invocation.stage_id, e),
                },
                Err(e) => debug!("Stage {}: no SARIF report at {}: {}", invocation.stage_id, sarif.display(), e),
            }
        }

        outcome
    }
}

/// Registry host of an image reference, `docker.io` when there is none
fn registry_of(image: &str) -> String {
    match image.split_once('/') {
        Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => {
            host.to_string()
        }
        _ => "docker.io".to_string(),
    }
}

async fn read_image_digest(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let metadata: serde_json::Value = serde_json::from_str(&content).ok()?;
    metadata
        .get("containerimage.digest")
        .and_then(|d| d.as_str())
        .map(str::to_string)
}

#[async_trait]
impl TaskInvoker for ToolInvoker {
    async fn invoke(&self, invocation: TaskInvocation) -> Result<TaskOutcome, TaskError> {
        let kind: ToolKind = invocation.task.as_str().parse().map_err(TaskError::Config)?;
        let scratch = Scratch::create().await?;
        let (command_line, side) = self.command_line(kind, &invocation, &scratch)?;

        info!(
            "Stage {} running {} (attempt {})",
            invocation.stage_id, kind, invocation.attempt
        );
        let outcome = self.process.run(&command_line, &invocation, &scratch).await?;
        Ok(self.collect_side_files(&invocation, &side, outcome).await)
    }
}
