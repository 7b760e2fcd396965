//! Supported tunnel protocols.

use serde::{Deserialize, Serialize};

/// A VPN protocol backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "vpn_protocol", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VpnProtocol {
    /// OpenVPN; sessions identified by username.
    OpenVpn,
    /// WireGuard; sessions identified by peer public key.
    WireGuard,
}

impl VpnProtocol {
    /// Return the protocol as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenVpn => "openvpn",
            Self::WireGuard => "wireguard",
        }
    }

    /// Whether presence in a snapshot alone means the session is live.
    ///
    /// WireGuard peers are listed whether or not they are connected, so
    /// their liveness flag decides.
    pub fn presence_is_liveness(&self) -> bool {
        matches!(self, Self::OpenVpn)
    }
}

impl std::fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VpnProtocol {
    type Err = vpnhub_core::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openvpn" => Ok(Self::OpenVpn),
            "wireguard" => Ok(Self::WireGuard),
            _ => Err(vpnhub_core::AppError::validation(format!(
                "Invalid VPN protocol: '{s}'"
            ))),
        }
    }
}
