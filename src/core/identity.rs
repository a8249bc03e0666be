//! Device identity derivation
//!
//! The hostname is a pure function of the hardware address of the first
//! physical interface, ordered by kernel interface index. Virtual interfaces
//! (bridges, bonds, container veths) have no `device` entry in sysfs and are
//! never considered. Without a usable address, a random suffix is used and
//! the fallback is logged.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, UdpSocket};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Loopback alias address rewritten in the hosts table
pub const LOOPBACK_ALIAS_ADDR: &str = "127.0.1.1";

/// Identity of the device being provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub hostname: String,
    pub mac: Option<String>,
    pub ip: Option<IpAddr>,
}

impl DeviceIdentity {
    /// Whether the hostname came from hardware rather than the random fallback
    pub fn is_deterministic(&self) -> bool {
        self.mac.is_some()
    }
}

/// Derives the device hostname from network hardware
#[derive(Debug, Clone)]
pub struct IdentityDeriver {
    net_class_dir: PathBuf,
    prefix: String,
}

impl IdentityDeriver {
    pub fn new(net_class_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            net_class_dir: net_class_dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Derive the full identity: hostname, hardware address and local address
    pub fn derive(&self) -> DeviceIdentity {
        let mac = self
            .first_hardware_address()
            .filter(|m| hostname_from_mac(&self.prefix, m).is_some());
        let hostname = self.hostname_for(mac.as_deref());
        DeviceIdentity {
            hostname,
            mac,
            ip: local_ip(),
        }
    }

    /// Derive only the hostname
    pub fn derive_hostname(&self) -> String {
        self.hostname_for(self.first_hardware_address().as_deref())
    }

    fn hostname_for(&self, mac: Option<&str>) -> String {
        match mac.and_then(|m| hostname_from_mac(&self.prefix, m)) {
            Some(hostname) => hostname,
            None => {
                let hostname = random_hostname(&self.prefix);
                warn!(
                    "No usable hardware address found, using random hostname {}",
                    hostname
                );
                hostname
            }
        }
    }

    /// Hardware address of the first physical interface with a non-zero
    /// address, interfaces taken in `ifindex` order
    pub fn first_hardware_address(&self) -> Option<String> {
        let entries = match std::fs::read_dir(&self.net_class_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(
                    "Cannot list interfaces in {}: {}",
                    self.net_class_dir.display(),
                    e
                );
                return None;
            }
        };

        let mut interfaces: Vec<(u32, String)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "lo")
            .filter(|name| {
                let physical = self.net_class_dir.join(name).join("device").exists();
                if !physical {
                    debug!("Skipping virtual interface {}", name);
                }
                physical
            })
            .map(|name| (read_ifindex(&self.net_class_dir.join(&name)), name))
            .collect();
        interfaces.sort();

        interfaces.iter().find_map(|(_, name)| {
            let address = read_address(&self.net_class_dir.join(name).join("address"))?;
            debug!("Interface {} has hardware address {}", name, address);
            Some(address)
        })
    }
}

/// Kernel interface index; unreadable indexes sort last
fn read_ifindex(interface_dir: &Path) -> u32 {
    std::fs::read_to_string(interface_dir.join("ifindex"))
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(u32::MAX)
}

fn read_address(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let address = raw.trim().to_string();
    let hex: String = address.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if hex.len() < 6 || hex.chars().all(|c| c == '0') {
        return None;
    }
    Some(address)
}

/// Deterministic hostname: last three octets of the hardware address,
/// upper-cased, joined to the prefix
pub fn hostname_from_mac(prefix: &str, mac: &str) -> Option<String> {
    let hex: String = mac.chars().filter(|c| !matches!(c, ':' | '-' | '.')).collect();
    if hex.len() < 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let suffix = hex[hex.len() - 6..].to_ascii_uppercase();
    Some(format!("{}-{}", prefix, suffix))
}

/// Random hostname with the same shape as the deterministic one
pub fn random_hostname(prefix: &str) -> String {
    let bytes = Uuid::new_v4();
    let suffix: String = bytes.as_bytes()[..3]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect();
    format!("{}-{}", prefix, suffix)
}

/// Local address used for outbound traffic, if any route exists.
/// Connecting a UDP socket sends nothing.
fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Point the loopback alias at `hostname`: replace an existing alias line,
/// otherwise append one
pub fn set_loopback_alias(hosts: &str, hostname: &str) -> String {
    let alias_line = format!("{}\t{}", LOOPBACK_ALIAS_ADDR, hostname);

    let mut replaced = false;
    let mut lines: Vec<String> = Vec::new();
    for line in hosts.lines() {
        if line.split_whitespace().next() == Some(LOOPBACK_ALIAS_ADDR) {
            if !replaced {
                lines.push(alias_line.clone());
                replaced = true;
            }
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(alias_line);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
