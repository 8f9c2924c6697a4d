//! Device-control requests understood by the TAP-Windows driver.
//!
//! Every request is a single exchange of an input and an output buffer against an open device.
//! The driver validates payload lengths strictly, so every payload built here has an exact size.

use std::{
    io,
    net::{IpAddr, Ipv4Addr},
};

use ip_network::Ipv4Network;

use crate::{Error, Result, error::format_mac};

/// `FILE_DEVICE_UNKNOWN`, the device type used by the TAP-Windows driver.
pub const FILE_DEVICE_UNKNOWN: u32 = 0x0000_0022;
/// `METHOD_BUFFERED`.
pub const METHOD_BUFFERED: u32 = 0;
/// `FILE_ANY_ACCESS`.
pub const FILE_ANY_ACCESS: u32 = 0;

pub const TAP_WIN_IOCTL_GET_MAC: u32 = tap_control_code(1, METHOD_BUFFERED);
pub const TAP_WIN_IOCTL_GET_VERSION: u32 = tap_control_code(2, METHOD_BUFFERED);
pub const TAP_WIN_IOCTL_GET_MTU: u32 = tap_control_code(3, METHOD_BUFFERED);
pub const TAP_WIN_IOCTL_GET_INFO: u32 = tap_control_code(4, METHOD_BUFFERED);
pub const TAP_WIN_IOCTL_CONFIG_POINT_TO_POINT: u32 = tap_control_code(5, METHOD_BUFFERED);
pub const TAP_WIN_IOCTL_SET_MEDIA_STATUS: u32 = tap_control_code(6, METHOD_BUFFERED);
pub const TAP_WIN_IOCTL_CONFIG_DHCP_MASQ: u32 = tap_control_code(7, METHOD_BUFFERED);
pub const TAP_WIN_IOCTL_GET_LOG_LINE: u32 = tap_control_code(8, METHOD_BUFFERED);
pub const TAP_WIN_IOCTL_CONFIG_DHCP_SET_OPT: u32 = tap_control_code(9, METHOD_BUFFERED);
pub const TAP_WIN_IOCTL_CONFIG_TUN: u32 = tap_control_code(10, METHOD_BUFFERED);

/// DHCP option code for "Domain Name Server".
const DHCP_OPTION_DNS: u8 = 6;

/// Lease time handed out by the emulated DHCP server: one year in seconds.
const DHCP_LEASE_SECS: u32 = 365 * 24 * 60 * 60;

/// Size of the scratch buffer for requests whose reply we don't inspect.
const REPLY_BUFFER_SIZE: usize = 16 * 1024;

/// Equivalent of the `CTL_CODE` macro from the Windows DDK.
pub const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

pub const fn tap_control_code(request: u32, method: u32) -> u32 {
    ctl_code(FILE_DEVICE_UNKNOWN, request, method, FILE_ANY_ACCESS)
}

/// A device that accepts device-control requests.
pub trait DeviceControl {
    /// Sends `code` with `input` to the device and returns how many bytes of `output` it filled.
    fn control(&self, code: u32, input: &[u8], output: &mut [u8]) -> io::Result<usize>;
}

impl<D> DeviceControl for &D
where
    D: DeviceControl + ?Sized,
{
    fn control(&self, code: u32, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        (**self).control(code, input, output)
    }
}

/// The addresses the driver needs to emulate a routed interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    /// The interface's own address, i.e. the host part of the CIDR.
    pub local: Ipv4Addr,
    /// The address of the network.
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// Parses `a.b.c.d/n` into the local address, network address and netmask.
pub fn parse_cidr(cidr: &str) -> Result<Ipv4Cidr> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| Error::validation(format!("Network '{cidr}' is not in CIDR notation")))?;

    let addr = addr
        .parse::<IpAddr>()
        .map_err(|e| Error::validation(format!("Failed to parse network '{cidr}': {e}")))?;
    let IpAddr::V4(local) = addr else {
        return Err(Error::validation(format!(
            "Network '{cidr}' is not an IPv4 network"
        )));
    };

    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::validation(format!(
            "Network '{cidr}' has an invalid prefix length"
        )));
    }
    let prefix = prefix.parse::<u8>().map_err(|e| {
        Error::validation(format!(
            "Network '{cidr}' has an invalid prefix length: {e}"
        ))
    })?;

    let network = Ipv4Network::new_truncate(local, prefix)
        .map_err(|e| Error::validation(format!("Network '{cidr}' is invalid: {e}")))?;

    Ok(Ipv4Cidr {
        local,
        network: network.network_address(),
        netmask: network.full_netmask(),
    })
}

/// Payload of [`TAP_WIN_IOCTL_CONFIG_TUN`]: local address, network address and netmask.
pub fn tun_payload(cidr: &Ipv4Cidr) -> [u8; 12] {
    let mut payload = [0u8; 12];
    payload[0..4].copy_from_slice(&cidr.local.octets());
    payload[4..8].copy_from_slice(&cidr.network.octets());
    payload[8..12].copy_from_slice(&cidr.netmask.octets());

    payload
}

/// Payload of [`TAP_WIN_IOCTL_CONFIG_DHCP_MASQ`]: local address, netmask, DHCP server and lease time.
///
/// Without a server, its address is zero-filled.
pub fn dhcp_payload(cidr: &Ipv4Cidr, server: Option<Ipv4Addr>) -> [u8; 16] {
    let mut payload = [0u8; 16];
    payload[0..4].copy_from_slice(&cidr.local.octets());
    payload[4..8].copy_from_slice(&cidr.netmask.octets());
    if let Some(server) = server {
        payload[8..12].copy_from_slice(&server.octets());
    }
    payload[12..16].copy_from_slice(&DHCP_LEASE_SECS.to_le_bytes());

    payload
}

/// Interprets the configured DHCP server address.
///
/// Anything that isn't an IP address counts as "no server".
/// An IPv6 address is rejected because the driver only emulates IPv4 DHCP.
pub fn parse_dhcp_server(server: &str) -> Result<Option<Ipv4Addr>> {
    match server.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(Some(ip)),
        Ok(IpAddr::V6(_)) => Err(Error::validation(format!(
            "DHCP server '{server}' is not an IPv4 address"
        ))),
        Err(_) => Ok(None),
    }
}

/// Payload of [`TAP_WIN_IOCTL_CONFIG_DHCP_SET_OPT`] carrying the DNS servers option.
///
/// Returns `None` if no primary DNS server is configured.
/// A malformed primary server is an error whereas a malformed secondary one is dropped.
pub fn dns_payload(dns1: &str, dns2: &str) -> Result<Option<Vec<u8>>> {
    if dns1.is_empty() {
        return Ok(None);
    }

    let Ok(IpAddr::V4(primary)) = dns1.parse::<IpAddr>() else {
        return Err(Error::validation(format!(
            "DNS server '{dns1}' is not a valid IPv4 address"
        )));
    };

    let mut payload = vec![DHCP_OPTION_DNS, 4];
    payload.extend_from_slice(&primary.octets());

    match dns2.parse::<IpAddr>() {
        Ok(IpAddr::V4(secondary)) => {
            payload[1] += 4;
            payload.extend_from_slice(&secondary.octets());
        }
        Ok(IpAddr::V6(_)) | Err(_) => {
            if !dns2.is_empty() {
                tracing::debug!(%dns2, "Ignoring secondary DNS server that isn't an IPv4 address");
            }
        }
    }

    Ok(Some(payload))
}

/// Queries the hardware address of the adapter.
pub fn query_mac(device: &impl DeviceControl) -> Result<[u8; 6]> {
    let mut mac = [0u8; 6];

    let len = device
        .control(TAP_WIN_IOCTL_GET_MAC, &[0u8; 6], &mut mac)
        .map_err(Error::io("Failed to query MAC address"))?;

    if len < mac.len() {
        return Err(Error::validation(format!(
            "Driver returned a {len}-byte MAC address: {}",
            format_mac(&mac[..len])
        )));
    }

    Ok(mac)
}

/// Connects or disconnects the virtual cable of the adapter.
pub fn set_media_status(device: &impl DeviceControl, connected: bool) -> Result<()> {
    let status = u32::from(connected).to_le_bytes();

    control(device, TAP_WIN_IOCTL_SET_MEDIA_STATUS, &status)
        .map_err(Error::io("Failed to set media status"))?;

    tracing::debug!(%connected, "Set media status");

    Ok(())
}

/// Puts the driver into TUN mode, emulating the given network.
pub fn configure_tun(device: &impl DeviceControl, network: &str) -> Result<()> {
    let cidr = parse_cidr(network)?;

    control(device, TAP_WIN_IOCTL_CONFIG_TUN, &tun_payload(&cidr))
        .map_err(Error::io("Failed to configure TUN mode"))?;

    tracing::debug!(
        local = %cidr.local,
        network = %cidr.network,
        netmask = %cidr.netmask,
        "Configured TUN mode"
    );

    Ok(())
}

/// Lets the driver answer DHCP requests, handing out the local address of `network`.
pub fn configure_dhcp(device: &impl DeviceControl, network: &str, server: &str) -> Result<()> {
    let cidr = parse_cidr(network)?;
    let server = parse_dhcp_server(server)?;

    control(
        device,
        TAP_WIN_IOCTL_CONFIG_DHCP_MASQ,
        &dhcp_payload(&cidr, server),
    )
    .map_err(Error::io("Failed to configure DHCP"))?;

    tracing::debug!(local = %cidr.local, ?server, "Configured DHCP");

    Ok(())
}

/// Adds the DNS servers option to the emulated DHCP server's replies.
pub fn configure_dhcp_dns(device: &impl DeviceControl, dns1: &str, dns2: &str) -> Result<()> {
    let Some(payload) = dns_payload(dns1, dns2)? else {
        return Ok(());
    };

    control(device, TAP_WIN_IOCTL_CONFIG_DHCP_SET_OPT, &payload)
        .map_err(Error::io("Failed to configure DHCP DNS servers"))?;

    tracing::debug!(%dns1, %dns2, "Configured DHCP DNS servers");

    Ok(())
}

/// Version of the TAP-Windows driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverVersion {
    pub major: u32,
    pub minor: u32,
    pub debug: bool,
}

impl std::fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;

        if self.debug {
            write!(f, " (debug)")?;
        }

        Ok(())
    }
}

pub fn query_version(device: &impl DeviceControl) -> Result<DriverVersion> {
    let mut reply = [0u8; 12];

    let len = device
        .control(TAP_WIN_IOCTL_GET_VERSION, &[], &mut reply)
        .map_err(Error::io("Failed to query driver version"))?;

    if len < reply.len() {
        return Err(Error::validation(format!(
            "Driver returned a {len}-byte version"
        )));
    }

    Ok(DriverVersion {
        major: u32_at(&reply, 0),
        minor: u32_at(&reply, 4),
        debug: u32_at(&reply, 8) != 0,
    })
}

pub fn query_mtu(device: &impl DeviceControl) -> Result<u32> {
    let mut reply = [0u8; 4];

    let len = device
        .control(TAP_WIN_IOCTL_GET_MTU, &[], &mut reply)
        .map_err(Error::io("Failed to query MTU"))?;

    if len < reply.len() {
        return Err(Error::validation(format!("Driver returned a {len}-byte MTU")));
    }

    Ok(u32::from_le_bytes(reply))
}

fn control(device: &impl DeviceControl, code: u32, input: &[u8]) -> io::Result<()> {
    let mut reply = vec![0u8; REPLY_BUFFER_SIZE];

    device.control(code, input, &mut reply)?;

    Ok(())
}

fn u32_at(buf: &[u8; 12], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}
