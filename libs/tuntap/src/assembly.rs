//! Turns an opened TAP-Windows device into a configured, named interface.

use std::io;

use logging::err_with_src;

use crate::{
    DeviceType, Error, Result,
    control::{self, DeviceControl},
    error::format_mac,
    overlapped::{OverlappedDevice, OverlappedFile},
    params::PlatformParams,
};

/// A network interface as listed by the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInterface {
    pub name: String,
    pub hardware_addr: Vec<u8>,
}

/// Configures `device` according to `device_type` and `params` and finds the name the OS gave it.
///
/// `list_interfaces` is only called once the media status is connected.
/// On error, `device` is dropped and thereby closed.
pub fn assemble<D, L>(
    device: D,
    device_type: DeviceType,
    params: &PlatformParams,
    list_interfaces: L,
) -> Result<(OverlappedFile<D>, String)>
where
    D: DeviceControl + OverlappedDevice,
    L: FnOnce() -> io::Result<Vec<SystemInterface>>,
{
    let mac = control::query_mac(&device)?;
    log_driver_info(&device);

    let file =
        OverlappedFile::new(device).map_err(Error::io("Failed to create completion events"))?;

    if device_type == DeviceType::Tun {
        control::configure_tun(file.device(), &params.network)?;

        if params.dhcp {
            control::configure_dhcp(file.device(), &params.network, &params.dhcp_server)?;
            control::configure_dhcp_dns(file.device(), &params.dns1, &params.dns2)?;
        }
    }

    control::set_media_status(file.device(), true)?;

    let interfaces =
        list_interfaces().map_err(Error::io("Failed to list network interfaces"))?;
    let name = find_by_mac(&interfaces, &mac).ok_or(Error::NameNotFound { mac })?;

    tracing::debug!(%name, mac = %format_mac(&mac), %device_type, "Interface is up");

    Ok((file, name))
}

/// Logs the driver version and MTU; failing to query either is not fatal.
fn log_driver_info(device: &impl DeviceControl) {
    match control::query_version(device) {
        Ok(version) => tracing::debug!(%version, "TAP-Windows driver"),
        Err(e) => tracing::debug!("Failed to query driver version: {}", err_with_src(&e)),
    }
    match control::query_mtu(device) {
        Ok(mtu) => tracing::debug!(%mtu, "TAP-Windows driver"),
        Err(e) => tracing::debug!("Failed to query MTU: {}", err_with_src(&e)),
    }
}

fn find_by_mac(interfaces: &[SystemInterface], mac: &[u8; 6]) -> Option<String> {
    interfaces
        .iter()
        .find(|i| i.hardware_addr.get(..6) == Some(mac.as_slice()))
        .map(|i| i.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{control::*, testing::FakeTap};
    use test_case::test_case;

    const MAC: [u8; 6] = [0x00, 0xff, 0xaa, 0xbb, 0xcc, 0xdd];

    fn interfaces() -> io::Result<Vec<SystemInterface>> {
        Ok(vec![
            SystemInterface {
                name: "Ethernet".to_owned(),
                hardware_addr: vec![0x10, 0x20, 0x30, 0x40, 0x50, 0x60],
            },
            SystemInterface {
                name: "Loopback".to_owned(),
                hardware_addr: vec![],
            },
            SystemInterface {
                name: "Ethernet 3".to_owned(),
                hardware_addr: MAC.to_vec(),
            },
        ])
    }

    fn dhcp_params() -> PlatformParams {
        PlatformParams::default().base_on(PlatformParams {
            network: "10.8.0.2/24".to_owned(),
            dhcp: true,
            dhcp_server: "10.8.0.1".to_owned(),
            dns1: "1.1.1.1".to_owned(),
            ..PlatformParams::empty()
        })
    }

    #[test]
    fn tun_with_dhcp_configures_in_order() {
        let _guard = logging::test("debug");
        let tap = FakeTap::new(MAC);
        let handle = tap.handle();

        let (_file, name) =
            assemble(tap, DeviceType::Tun, &dhcp_params(), interfaces).unwrap();

        assert_eq!(name, "Ethernet 3");
        assert_eq!(
            handle.codes(),
            vec![
                TAP_WIN_IOCTL_GET_MAC,
                TAP_WIN_IOCTL_GET_VERSION,
                TAP_WIN_IOCTL_GET_MTU,
                TAP_WIN_IOCTL_CONFIG_TUN,
                TAP_WIN_IOCTL_CONFIG_DHCP_MASQ,
                TAP_WIN_IOCTL_CONFIG_DHCP_SET_OPT,
                TAP_WIN_IOCTL_SET_MEDIA_STATUS,
            ]
        );
    }

    #[test]
    fn tun_without_dhcp_skips_dhcp_requests() {
        let tap = FakeTap::new(MAC);
        let handle = tap.handle();

        assemble(tap, DeviceType::Tun, &PlatformParams::default(), interfaces).unwrap();

        assert_eq!(
            handle.codes(),
            vec![
                TAP_WIN_IOCTL_GET_MAC,
                TAP_WIN_IOCTL_GET_VERSION,
                TAP_WIN_IOCTL_GET_MTU,
                TAP_WIN_IOCTL_CONFIG_TUN,
                TAP_WIN_IOCTL_SET_MEDIA_STATUS,
            ]
        );
    }

    #[test]
    fn tap_is_only_connected() {
        let tap = FakeTap::new(MAC);
        let handle = tap.handle();

        assemble(tap, DeviceType::Tap, &dhcp_params(), interfaces).unwrap();

        assert_eq!(
            handle.codes(),
            vec![
                TAP_WIN_IOCTL_GET_MAC,
                TAP_WIN_IOCTL_GET_VERSION,
                TAP_WIN_IOCTL_GET_MTU,
                TAP_WIN_IOCTL_SET_MEDIA_STATUS,
            ]
        );
    }

    #[test_case(TAP_WIN_IOCTL_GET_VERSION ; "version")]
    #[test_case(TAP_WIN_IOCTL_GET_MTU ; "mtu")]
    fn failed_driver_info_query_is_not_fatal(code: u32) {
        let _guard = logging::test("debug");
        let tap = FakeTap::new(MAC).failing_on(code);
        let handle = tap.handle();

        let (_file, name) =
            assemble(tap, DeviceType::Tap, &PlatformParams::default(), interfaces).unwrap();

        assert_eq!(name, "Ethernet 3");
        assert_eq!(handle.codes().first(), Some(&TAP_WIN_IOCTL_GET_MAC));
        assert_eq!(handle.codes().last(), Some(&TAP_WIN_IOCTL_SET_MEDIA_STATUS));
    }

    #[test]
    fn matches_only_first_six_bytes_of_hardware_address() {
        let list = || {
            Ok(vec![SystemInterface {
                name: "Ethernet 4".to_owned(),
                hardware_addr: [MAC.as_slice(), &[0, 0]].concat(),
            }])
        };

        let (_file, name) = assemble(
            FakeTap::new(MAC),
            DeviceType::Tap,
            &PlatformParams::default(),
            list,
        )
        .unwrap();

        assert_eq!(name, "Ethernet 4");
    }

    #[test]
    fn unknown_mac_closes_device() {
        let tap = FakeTap::new([0x02, 0, 0, 0, 0, 1]);
        let handle = tap.handle();

        let error = assemble(tap, DeviceType::Tap, &PlatformParams::default(), interfaces)
            .unwrap_err();

        assert!(matches!(error, Error::NameNotFound { mac } if mac == [0x02, 0, 0, 0, 0, 1]));
        assert!(handle.is_dropped());
    }

    #[test]
    fn failed_configuration_closes_device_before_connecting() {
        let tap = FakeTap::new(MAC).failing_on(TAP_WIN_IOCTL_CONFIG_TUN);
        let handle = tap.handle();

        let error = assemble(tap, DeviceType::Tun, &PlatformParams::default(), interfaces)
            .unwrap_err();

        assert!(matches!(error, Error::Io { .. }));
        assert!(handle.is_dropped());
        assert!(!handle.codes().contains(&TAP_WIN_IOCTL_SET_MEDIA_STATUS));
    }

    #[test]
    fn invalid_dns_aborts_setup() {
        let params = PlatformParams {
            dns1: "dns.google".to_owned(),
            ..dhcp_params()
        };

        let error =
            assemble(FakeTap::new(MAC), DeviceType::Tun, &params, interfaces).unwrap_err();

        assert!(matches!(error, Error::Validation(_)));
    }

    #[test]
    fn failed_mac_query_aborts_before_any_other_request() {
        let tap = FakeTap::new(MAC).failing_on(TAP_WIN_IOCTL_GET_MAC);
        let handle = tap.handle();

        let error = assemble(tap, DeviceType::Tap, &PlatformParams::default(), || {
            panic!("Must not list interfaces")
        })
        .unwrap_err();

        assert!(matches!(error, Error::Io { .. }));
        assert_eq!(handle.codes(), vec![TAP_WIN_IOCTL_GET_MAC]);
    }

    #[test]
    fn assembled_device_is_readable() {
        let tap = FakeTap::new(MAC);
        let handle = tap.handle();
        handle.push_inbound(vec![0xff; 14]);

        let (file, _) =
            assemble(tap, DeviceType::Tap, &PlatformParams::default(), interfaces).unwrap();

        let mut buf = [0u8; 1500];
        assert_eq!(file.read(&mut buf).unwrap(), 14);
    }
}
