use ipnet::IpNet;

const WARP_PREFIXES: &[&str] = &[
    "162.159.192.0/24",
    "162.159.195.0/24",
    "188.114.96.0/24",
    "188.114.97.0/24",
    "188.114.98.0/24",
    "188.114.99.0/24",
    "2606:4700:d0::/64",
    "2606:4700:d1::/64",
];

/// UDP ports on which WARP edges answer a handshake initiation.
pub const WARP_PORTS: &[u16] = &[
    500, 854, 859, 864, 878, 880, 890, 891, 894, 903, 908, 928, 934, 939, 942, 943, 945, 946, 955,
    968, 987, 988, 1002, 1010, 1014, 1018, 1070, 1074, 1180, 1387, 1701, 1843, 2371, 2408, 2506,
    3138, 3476, 3581, 3854, 4177, 4198, 4233, 4500, 5279, 5956, 7103, 7152, 7156, 7281, 7559, 8319,
    8742, 8854, 8886,
];

pub const DEFAULT_HANDSHAKE_PORT: u16 = 2408;
pub const DEFAULT_TCP_PING_PORT: u16 = 443;

/// The WARP edge ranges scanned when nothing else is configured.
pub fn warp_prefixes() -> Vec<IpNet> {
    WARP_PREFIXES
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}

pub fn warp_ports() -> Vec<u16> {
    WARP_PORTS.to_vec()
}
