//! Agent configuration.

use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use labrun_core::WorkerId;
use reqwest::Url;

use crate::error::AgentError;

/// Deployment mode. Selects plaintext or encrypted transport for both the
/// session and artifact downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Local development: `ws://` and `http://`.
    #[default]
    Dev,
    /// Production: `wss://` and `https://`.
    Prod,
}

impl Mode {
    fn session_scheme(self) -> &'static str {
        match self {
            Self::Dev => "ws",
            Self::Prod => "wss",
        }
    }

    fn download_scheme(self) -> &'static str {
        match self {
            Self::Dev => "http",
            Self::Prod => "https",
        }
    }
}

impl FromStr for Mode {
    type Err = Infallible;

    /// Only `prod` enables TLS; any other value is a development deployment.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("prod") {
            Ok(Self::Prod)
        } else {
            Ok(Self::Dev)
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Prod => write!(f, "prod"),
        }
    }
}

/// Agent configuration, read once at startup from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "labrun-agent")]
#[command(about = "Runs test artifacts assigned by the labrun control plane", long_about = None)]
#[command(version)]
pub struct Config {
    /// Worker identity used in the session path
    #[arg(long, env = "USER_EMAIL")]
    pub worker_identity: String,

    /// Control plane host, optionally with a port
    #[arg(long, env = "LTI_HOST")]
    pub host: String,

    /// Directory downloaded artifacts are written to
    #[arg(long, env = "TESTS_DIR", default_value_os_t = std::env::temp_dir())]
    pub scratch_dir: PathBuf,

    /// Deployment mode; `prod` selects wss/https
    #[arg(long = "env", env = "ENV", default_value = "dev")]
    pub mode: Mode,

    /// Keepalive ping interval in seconds
    #[arg(
        long,
        env = "PING_INTERVAL_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub ping_interval_secs: u64,

    /// How long shutdown waits for the loops to stop, in seconds
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Shut down when the control plane drops the session instead of
    /// waiting for a signal
    #[arg(long, env = "EXIT_ON_DISCONNECT")]
    pub exit_on_disconnect: bool,
}

impl Config {
    /// Worker identity as a typed id.
    pub fn worker_id(&self) -> WorkerId {
        WorkerId::new(self.worker_identity.clone())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// `{ws|wss}://{host}/ws/server/{worker_identity}`
    pub fn session_url(&self) -> Result<Url, AgentError> {
        let mut url = self.base_url(self.mode.session_scheme())?;
        url.path_segments_mut()
            .map_err(|_| AgentError::Config(format!("host '{}' cannot carry a path", self.host)))?
            .extend(["ws", "server", self.worker_identity.as_str()]);
        Ok(url)
    }

    /// `{http|https}://{host}/` - artifact downloads are resolved against it.
    pub fn download_base_url(&self) -> Result<Url, AgentError> {
        self.base_url(self.mode.download_scheme())
    }

    fn base_url(&self, scheme: &str) -> Result<Url, AgentError> {
        if self.host.is_empty() {
            return Err(AgentError::Config("control plane host is empty".to_string()));
        }
        let url = Url::parse(&format!("{}://{}/", scheme, self.host))
            .map_err(|e| AgentError::Config(format!("invalid host '{}': {}", self.host, e)))?;
        if url.path() != "/" {
            return Err(AgentError::Config(format!(
                "host '{}' must not contain a path",
                self.host
            )));
        }
        Ok(url)
    }
}
