//! Command line configuration for both server roles.
//!
//! Flags are `--name value` pairs; unknown flags are ignored.

use crate::net::parse_ip_net;
use crate::storage::types::ReplicationType;

use anyhow::{Context, Result, bail};
use ipnet::IpNet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MASTER_PORT: u16 = 9333;
pub const DEFAULT_VOLUME_PORT: u16 = 8080;
pub const DEFAULT_VOLUME_SIZE_LIMIT: u64 = 32 * 1024 * 1024 * 1024;
pub const DEFAULT_PULSE: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_VOLUMES: usize = 7;

fn parse_pulse(value: &str) -> Result<Duration> {
    let seconds: u64 = value.parse().context("--pulse-seconds")?;
    if seconds == 0 {
        bail!("--pulse-seconds must be at least 1");
    }
    Ok(Duration::from_secs(seconds))
}

fn parse_size_limit(value: &str) -> Result<u64> {
    let mb: u64 = value.parse().context("--volume-size-limit-mb")?;
    mb.checked_mul(1024 * 1024)
        .with_context(|| format!("--volume-size-limit-mb {} is too large", mb))
}

/// Comma separated addresses or CIDR blocks. A bare address is a single host.
pub fn parse_whitelist(value: &str) -> Result<Vec<IpNet>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            parse_ip_net(entry).with_context(|| format!("--whitelist entry {}", entry))
        })
        .collect()
}

/// Walks `--flag value` pairs, handing each to `apply`.
fn parse_flags(
    args: &[String],
    mut apply: impl FnMut(&str, &str) -> Result<bool>,
) -> Result<()> {
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if !flag.starts_with("--") {
            i += 1;
            continue;
        }
        let value = args
            .get(i + 1)
            .with_context(|| format!("{} needs a value", flag))?;
        if apply(flag, value)? {
            i += 2;
        } else {
            tracing::warn!("Ignoring unknown flag {}", flag);
            i += 1;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind_addr: SocketAddr,
    pub volume_size_limit: u64,
    pub pulse: Duration,
    pub default_replication: ReplicationType,
    /// IP range -> data center / rack map.
    pub topology_file: Option<PathBuf>,
    /// Where the key sequencer persists its high-water mark. In memory
    /// when unset.
    pub sequence_file: Option<PathBuf>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_MASTER_PORT)),
            volume_size_limit: DEFAULT_VOLUME_SIZE_LIMIT,
            pulse: DEFAULT_PULSE,
            default_replication: ReplicationType::default(),
            topology_file: None,
            sequence_file: None,
        }
    }
}

impl MasterConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();
        parse_flags(args, |flag, value| {
            match flag {
                "--bind" => config.bind_addr = value.parse().context("--bind")?,
                "--port" => config.bind_addr.set_port(value.parse().context("--port")?),
                "--volume-size-limit-mb" => config.volume_size_limit = parse_size_limit(value)?,
                "--pulse-seconds" => config.pulse = parse_pulse(value)?,
                "--default-replication" => {
                    config.default_replication = value.parse().context("--default-replication")?
                }
                "--topology" => config.topology_file = Some(PathBuf::from(value)),
                "--sequence-file" => config.sequence_file = Some(PathBuf::from(value)),
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct VolumeServerConfig {
    /// Address announced to the master and to peers.
    pub ip: String,
    /// Address the HTTP listener binds to.
    pub bind_ip: String,
    pub port: u16,
    /// Address handed to clients; `ip:port` when unset.
    pub public_url: Option<String>,
    pub master: String,
    pub max_volume_count: usize,
    pub data_center: String,
    pub rack: String,
    pub pulse: Duration,
    /// Clients allowed to write and delete. Everyone when empty.
    pub whitelist: Vec<IpNet>,
}

impl Default for VolumeServerConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            bind_ip: "0.0.0.0".to_string(),
            port: DEFAULT_VOLUME_PORT,
            public_url: None,
            master: format!("127.0.0.1:{}", DEFAULT_MASTER_PORT),
            max_volume_count: DEFAULT_MAX_VOLUMES,
            data_center: String::new(),
            rack: String::new(),
            pulse: DEFAULT_PULSE,
            whitelist: Vec::new(),
        }
    }
}

impl VolumeServerConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();
        parse_flags(args, |flag, value| {
            match flag {
                "--ip" => config.ip = value.to_string(),
                "--bind-ip" => config.bind_ip = value.to_string(),
                "--port" => config.port = value.parse().context("--port")?,
                "--public-url" => config.public_url = Some(value.to_string()),
                "--master" => config.master = value.to_string(),
                "--max" => config.max_volume_count = value.parse().context("--max")?,
                "--data-center" => config.data_center = value.to_string(),
                "--rack" => config.rack = value.to_string(),
                "--pulse-seconds" => config.pulse = parse_pulse(value)?,
                "--whitelist" => config.whitelist = parse_whitelist(value)?,
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(config)
    }
}
