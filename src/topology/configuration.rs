//! Physical Placement Configuration
//!
//! Maps volume server addresses to a (data center, rack) pair. Servers that
//! are not listed keep the location they announced themselves.
//!
//! ```json
//! {"dataCenters":[{"name":"dc1","racks":[{"name":"r1","ips":["10.0.0.0/24","10.1.0.5"]}]}]}
//! ```

use crate::error::{Error, Result};

use crate::net::parse_ip_net;

use ipnet::IpNet;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

pub const DEFAULT_DATA_CENTER: &str = "DefaultDataCenter";
pub const DEFAULT_RACK: &str = "DefaultRack";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopologyFile {
    data_centers: Vec<DataCenterEntry>,
}

#[derive(Debug, Deserialize)]
struct DataCenterEntry {
    name: String,
    #[serde(default)]
    racks: Vec<RackEntry>,
}

#[derive(Debug, Deserialize)]
struct RackEntry {
    name: String,
    #[serde(default)]
    ips: Vec<String>,
}

#[derive(Debug, Clone)]
struct Placement {
    range: IpNet,
    data_center: String,
    rack: String,
}

#[derive(Debug, Clone, Default)]
pub struct Configuration {
    placements: Vec<Placement>,
}

impl Configuration {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let file: TopologyFile =
            serde_json::from_slice(bytes).map_err(|e| Error::Config(e.to_string()))?;

        let mut placements = Vec::new();
        for dc in file.data_centers {
            for rack in dc.racks {
                for ip in &rack.ips {
                    placements.push(Placement {
                        range: parse_ip_net(ip).ok_or_else(|| {
                            Error::Config(format!("bad address or range {:?}", ip))
                        })?,
                        data_center: dc.name.clone(),
                        rack: rack.name.clone(),
                    });
                }
            }
        }
        // most specific range wins
        placements.sort_by(|a, b| b.range.prefix_len().cmp(&a.range.prefix_len()));

        Ok(Self { placements })
    }

    /// Reads the configuration file. A missing file is not an error: the
    /// master then trusts the locations servers announce.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_json(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No topology configuration at {}, using defaults", path.display());
                Ok(None)
            }
            Err(e) => Err(Error::Config(format!("{}: {}", path.display(), e))),
        }
    }

    fn find(&self, ip: &str) -> Option<&Placement> {
        let ip: IpAddr = ip.parse().ok()?;
        self.placements.iter().find(|p| p.range.contains(&ip))
    }
}

/// Resolves the (data center, rack) for a server at `ip`.
///
/// Configured ranges take precedence over the server's own hints; empty
/// hints fall back to the default names.
pub fn locate(
    configuration: Option<&Configuration>,
    ip: &str,
    data_center_hint: &str,
    rack_hint: &str,
) -> (String, String) {
    if let Some(placement) = configuration.and_then(|c| c.find(ip)) {
        return (placement.data_center.clone(), placement.rack.clone());
    }

    let data_center = if data_center_hint.is_empty() {
        DEFAULT_DATA_CENTER
    } else {
        data_center_hint
    };
    let rack = if rack_hint.is_empty() {
        DEFAULT_RACK
    } else {
        rack_hint
    };
    (data_center.to_string(), rack.to_string())
}
