//! Process configuration: environment variables and CLI flags share one
//! set of `clap` fields instead of the reflection-based `GetEnv[T]` helper
//! the original tool used, since `clap`'s `env` attribute already covers
//! the override-precedence rule spec.md §6 asks for (flag beats env beats
//! default).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_PORT: u16 = 69;
pub const DEFAULT_NUM_TRIES: u32 = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
pub const DEFAULT_LOG_LEVEL: &str = "debug";

/// `tftpd` — the server binary's CLI surface (spec.md §6).
#[derive(Debug, Parser)]
#[command(name = "tftpd", about = "A lock-step TFTP (RFC 1350) server")]
pub struct ServerConfig {
    /// UDP port to listen on.
    #[arg(long, env = "TFTP_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory served to clients. Created with mode 0750 if missing.
    #[arg(long, env = "TFTP_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Log level passed straight through to `env_logger`.
    #[arg(long, env = "TFTP_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Seconds to wait for a peer datagram before retrying.
    #[arg(long, env = "TFTP_READ_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub read_timeout_secs: u64,

    /// Seconds to wait for a write deadline before giving up on a send.
    #[arg(long, env = "TFTP_WRITE_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub write_timeout_secs: u64,

    /// Number of retransmission attempts per block before aborting a session.
    #[arg(long, env = "TFTP_NUM_TRIES", default_value_t = DEFAULT_NUM_TRIES)]
    pub num_tries: u32,

    /// Disable the TUI dashboard and log plainly to stderr instead.
    #[arg(long)]
    pub no_tui: bool,
}

impl ServerConfig {
    /// Resolve the directory to serve, defaulting to `~/tftp` and creating
    /// it (mode 0750 on unix) if it doesn't already exist (spec.md §6).
    pub fn resolve_base_dir(&self) -> anyhow::Result<PathBuf> {
        let dir = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => {
                let home = std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow::anyhow!("HOME is not set and --base-dir was not given"))?;
                home.join("tftp")
            }
        };
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o750);
                std::fs::set_permissions(&dir, perms)?;
            }
        }
        Ok(dir.canonicalize()?)
    }

    pub fn session_options(&self) -> crate::engine::SessionOptions {
        crate::engine::SessionOptions {
            retries: self.num_tries,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            trace: false,
        }
    }
}

/// `tftp` — the interactive client binary's CLI surface (spec.md §6).
#[derive(Debug, Parser)]
#[command(name = "tftp", about = "An interactive TFTP (RFC 1350) client")]
pub struct ClientConfig {
    /// Host to connect to at startup. Omit to start disconnected.
    pub host: Option<String>,

    /// Port to connect to at startup.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log level passed straight through to `env_logger`.
    #[arg(long, env = "TFTP_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Seconds to wait for a peer datagram before retrying.
    #[arg(long, env = "TFTP_READ_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub read_timeout_secs: u64,

    /// Seconds to wait for a write deadline before giving up on a send.
    #[arg(long, env = "TFTP_WRITE_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub write_timeout_secs: u64,

    /// Number of retransmission attempts per block before aborting a transfer.
    #[arg(long, env = "TFTP_NUM_TRIES", default_value_t = DEFAULT_NUM_TRIES)]
    pub num_tries: u32,

    /// Print every block number and byte count as transfers progress.
    #[arg(long)]
    pub trace: bool,
}

impl ClientConfig {
    pub fn session_options(&self) -> crate::engine::SessionOptions {
        crate::engine::SessionOptions {
            retries: self.num_tries,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            trace: self.trace,
        }
    }
}
