//! Startup configuration (spec.md §6 "Environment"), assembled once from environment
//! variables into an immutable snapshot, mirroring the teacher's `Conf`/`ConfHandle`
//! split minus the parts this system doesn't have (TLS termination, plugins, …).

use std::env;

use anyhow::Context as _;
use camino::Utf8PathBuf;

const DEFAULT_MEDIA_ROOT: &str = "/opt";
const DEFAULT_ALLOWED_PORTS: &str = "443";
const DEFAULT_DATA_DIR: &str = "/var/lib/abyss-gateway";
const DEFAULT_LOG_DIR: &str = "/var/log/abyss-gateway";

pub const TUNNEL_PORT: u16 = 4096;

#[derive(Debug, Clone)]
pub struct Conf {
    pub media_root: Utf8PathBuf,
    pub allowed_ports: Vec<u16>,
    pub debug_mode: bool,
    pub data_dir: Utf8PathBuf,
    pub log_dir: Utf8PathBuf,
}

impl Conf {
    pub fn from_env() -> anyhow::Result<Self> {
        let media_root = env_path("MEDIA_ROOT", DEFAULT_MEDIA_ROOT)?;
        let data_dir = env_path("ABYSS_DATA_DIR", DEFAULT_DATA_DIR)?;
        let log_dir = env_path("ABYSS_LOG_DIR", DEFAULT_LOG_DIR)?;

        let allowed_ports = env::var("ALLOWED_PORTS")
            .unwrap_or_else(|_| DEFAULT_ALLOWED_PORTS.to_owned())
            .split_whitespace()
            .map(|port| port.parse::<u16>().with_context(|| format!("invalid port in ALLOWED_PORTS: {port}")))
            .collect::<anyhow::Result<Vec<u16>>>()?;

        let debug_mode = env::var("DEBUG_MODE").is_ok_and(|value| value.eq_ignore_ascii_case("Debug"));

        Ok(Self { media_root, allowed_ports, debug_mode, data_dir, log_dir })
    }

    pub fn libsql_path(&self) -> Utf8PathBuf {
        self.data_dir.join("abyss.db")
    }

    pub fn admin_socket_path(&self) -> Utf8PathBuf {
        self.data_dir.join("abyss-ctl.sock")
    }
}

fn env_path(var: &str, default: &str) -> anyhow::Result<Utf8PathBuf> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_owned());
    Utf8PathBuf::from_path_buf(raw.into()).map_err(|path| anyhow::anyhow!("{var} is not valid UTF-8: {path:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_ports_defaults_to_443() {
        // SAFETY: test runs single-threaded via `#[test]`'s default harness isolation per-process;
        // no other test in this crate reads ALLOWED_PORTS concurrently.
        unsafe {
            env::remove_var("ALLOWED_PORTS");
        }
        let conf = Conf::from_env().expect("from_env");
        assert_eq!(conf.allowed_ports, vec![443]);
    }
}
