//! Capability loaders
//!
//! The registry only sees [`CapabilityLoader`]. [`ProcessLoader`] runs every
//! compiled unit as a child process speaking the capsule-sdk line protocol
//! over stdin/stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use capsule_sdk::{Descriptor, FunctionSchema, InitContext, Request, Response};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::{Capability, CapabilityContext, LoadError};

/// Turns files on disk into capabilities
#[async_trait]
pub trait CapabilityLoader: Send + Sync {
    /// List candidate units in `dir`
    fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>, LoadError>;

    /// Load and validate one unit; the result is not yet initialized
    async fn load(&self, path: &Path) -> Result<Box<dyn Capability>, LoadError>;
}

/// Loads executables as out-of-process capabilities
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    describe_timeout: Duration,
}

impl ProcessLoader {
    pub fn new(describe_timeout: Duration) -> Self {
        Self { describe_timeout }
    }
}

impl Default for ProcessLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl CapabilityLoader for ProcessLoader {
    fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|source| LoadError::DirectoryUnreadable {
                path: dir.to_path_buf(),
                source,
            })?;
            debug!(dir = %dir.display(), "Created empty plugin directory");
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(dir).map_err(|source| LoadError::DirectoryUnreadable {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut units: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_unit(p))
            .collect();
        units.sort();

        debug!(dir = %dir.display(), units = units.len(), "Discovered capability units");
        Ok(units)
    }

    #[instrument(skip(self), fields(unit = %path.display()))]
    async fn load(&self, path: &Path) -> Result<Box<dyn Capability>, LoadError> {
        let mut channel = UnitChannel::spawn(path).map_err(|source| LoadError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;

        let describe = timeout(self.describe_timeout, channel.request(&Request::Describe));
        let response = match describe.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(LoadError::Protocol {
                    path: path.to_path_buf(),
                    message: format!("{:#}", e),
                })
            }
            Err(_) => {
                return Err(LoadError::Timeout {
                    what: format!("describe of {}", path.display()),
                    limit: self.describe_timeout,
                })
            }
        };

        let value = response.into_result().map_err(|message| LoadError::Protocol {
            path: path.to_path_buf(),
            message,
        })?;

        let descriptor: Descriptor =
            serde_json::from_value(value).map_err(|e| LoadError::InvalidDescriptor {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        descriptor
            .validate()
            .map_err(|reason| LoadError::InvalidDescriptor {
                path: path.to_path_buf(),
                reason,
            })?;

        debug!(capability = %descriptor.id, "Unit described itself");

        Ok(Box::new(ProcessCapability {
            descriptor,
            path: path.to_path_buf(),
            context: None,
            channel: Mutex::new(channel),
        }))
    }
}

/// Regular, visible, executable files
fn is_unit(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    if hidden {
        return false;
    }

    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => is_executable(path, &meta),
        _ => false,
    }
}

#[cfg(unix)]
fn is_executable(_path: &Path, meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(path: &Path, _meta: &std::fs::Metadata) -> bool {
    path.extension().map_or(false, |e| e == "exe")
}

/// Request/response pipe to a running unit
///
/// A request whose reply was never read leaves the channel desynced: the
/// late reply would be taken as the answer to the next request.
struct UnitChannel {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    // Held so the process lives as long as the channel
    _child: Child,
    in_flight: bool,
}

impl UnitChannel {
    fn spawn(path: &Path) -> std::io::Result<Self> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("unit stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("unit stdout not captured"))?;

        Ok(Self {
            stdin,
            stdout: BufReader::new(stdout),
            _child: child,
            in_flight: false,
        })
    }

    /// A previous request was cancelled or failed before its reply was read
    fn is_desynced(&self) -> bool {
        self.in_flight
    }

    async fn request(&mut self, request: &Request) -> Result<Response> {
        if self.in_flight {
            bail!("unit channel is out of sync");
        }

        let json = serde_json::to_string(request)?;
        // Cleared only once the matching reply line has been read
        self.in_flight = true;
        self.stdin.write_all(json.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        let mut line = String::new();
        self.stdout
            .read_line(&mut line)
            .await
            .context("Failed to read from unit")?;

        if line.is_empty() {
            bail!("unit closed its output");
        }
        self.in_flight = false;

        serde_json::from_str(&line).context("Failed to parse response from unit")
    }
}

/// A capability backed by a child process
pub struct ProcessCapability {
    descriptor: Descriptor,
    path: PathBuf,
    /// Kept from `init` to bring up a replacement process
    context: Option<InitContext>,
    channel: Mutex<UnitChannel>,
}

impl ProcessCapability {
    /// Start a fresh process for this unit and initialize it again
    async fn respawn(&self) -> Result<UnitChannel> {
        let mut channel = UnitChannel::spawn(&self.path)
            .with_context(|| format!("Failed to restart unit {}", self.path.display()))?;

        if let Some(context) = &self.context {
            let request = Request::Init {
                context: context.clone(),
            };
            channel
                .request(&request)
                .await?
                .into_result()
                .map_err(|e| anyhow!(e))?;
        }
        Ok(channel)
    }
}

#[async_trait]
impl Capability for ProcessCapability {
    async fn init(&mut self, ctx: &CapabilityContext) -> Result<()> {
        let context = InitContext {
            model: ctx.client.model().to_string(),
            data_dir: ctx.data_dir().display().to_string(),
        };

        let response = self
            .channel
            .get_mut()
            .request(&Request::Init {
                context: context.clone(),
            })
            .await?;

        response.into_result().map_err(|e| anyhow!(e))?;
        self.context = Some(context);
        Ok(())
    }

    fn id(&self) -> &str {
        &self.descriptor.id
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn function_schema(&self) -> FunctionSchema {
        self.descriptor.schema.clone()
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let request = Request::Execute {
            arguments: arguments.to_string(),
        };
        let mut channel = self.channel.lock().await;
        if channel.is_desynced() {
            warn!(
                capability = %self.descriptor.id,
                "Restarting unit after an interrupted request"
            );
            // Dropping the old channel kills its process
            *channel = self.respawn().await?;
        }

        let response = channel
            .request(&request)
            .await
            .with_context(|| format!("unit {} failed", self.path.display()))?;

        match response.into_result().map_err(|e| anyhow!(e))? {
            Value::String(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}
