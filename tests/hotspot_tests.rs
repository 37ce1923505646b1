mod common;

use common::*;
use loop_wifi::{ConnectionState, WifiError};

const ORIGINAL_HOSTAPD: &[u8] = b"# site hostapd\ninterface=wlan0\nssid=Workshop\n";
const ORIGINAL_DNSMASQ: &[u8] = b"# site dnsmasq\nno-resolv\nserver=1.1.1.1\n";

const HOSTAPD_BACKUP: &str = "/etc/hostapd/hostapd.conf.backup";
const HOSTAPD_WORKING: &str = "/etc/hostapd/loop-hostapd.conf";
const DNSMASQ_BACKUP: &str = "/etc/dnsmasq.conf.backup";
const DNSMASQ_WORKING: &str = "/etc/loop-dnsmasq.conf";

fn with_originals() -> Harness {
    let h = harness();
    h.fs.add_file(HOSTAPD_CONF, ORIGINAL_HOSTAPD);
    h.fs.add_file(DNSMASQ_CONF, ORIGINAL_DNSMASQ);
    h
}

#[test]
fn start_then_stop_restores_files_exactly() {
    let h = with_originals();
    daemons_up(&h.runner);

    let info = h.manager.start_hotspot("LOOP-Setup", "loopsetup1", 6).unwrap();
    assert_eq!(info.state(), ConnectionState::HotspotActive);
    assert_eq!(info.ssid(), Some("LOOP-Setup"));
    assert_eq!(info.ip_address(), None);

    let live = h.fs.text(HOSTAPD_CONF).unwrap();
    assert!(live.contains("\nssid=LOOP-Setup\n"));
    assert!(live.contains("\nwpa_passphrase=loopsetup1\n"));
    assert_eq!(h.fs.text(HOSTAPD_WORKING).unwrap(), live);
    let dnsmasq = h.fs.text(DNSMASQ_CONF).unwrap();
    assert!(dnsmasq.contains("dhcp-range=192.168.24.10,192.168.24.100,255.255.255.0,12h"));
    assert_eq!(h.fs.contents(HOSTAPD_BACKUP).unwrap(), ORIGINAL_HOSTAPD);
    assert_eq!(h.fs.contents(DNSMASQ_BACKUP).unwrap(), ORIGINAL_DNSMASQ);

    let calls = h.runner.calls();
    assert!(calls.contains(&"ip addr add 192.168.24.1/24 dev wlan0".to_string()));
    assert!(calls.contains(&"nmcli device set wlan0 managed no".to_string()));
    assert!(calls.contains(&"systemctl restart hostapd".to_string()));
    assert!(calls.contains(&"systemctl restart dnsmasq".to_string()));

    let info = h.manager.stop_hotspot().unwrap();
    assert_eq!(info.state(), ConnectionState::Disconnected);

    assert_eq!(h.fs.contents(HOSTAPD_CONF).unwrap(), ORIGINAL_HOSTAPD);
    assert_eq!(h.fs.contents(DNSMASQ_CONF).unwrap(), ORIGINAL_DNSMASQ);
    assert!(h.fs.contents(HOSTAPD_WORKING).is_none());
    assert!(h.fs.contents(DNSMASQ_WORKING).is_none());
    assert!(
        h.runner
            .calls()
            .contains(&"nmcli device set wlan0 managed yes".to_string())
    );
}

#[test]
fn backup_is_taken_only_once() {
    let h = with_originals();
    daemons_up(&h.runner);

    h.manager.start_hotspot("LOOP-Setup", "loopsetup1", 6).unwrap();
    h.manager.start_hotspot("LOOP-Setup-2", "loopsetup2", 11).unwrap();

    assert_eq!(h.fs.contents(HOSTAPD_BACKUP).unwrap(), ORIGINAL_HOSTAPD);
    assert!(h.fs.text(HOSTAPD_CONF).unwrap().contains("\nssid=LOOP-Setup-2\n"));

    h.manager.stop_hotspot().unwrap();
    assert_eq!(h.fs.contents(HOSTAPD_CONF).unwrap(), ORIGINAL_HOSTAPD);
}

#[test]
fn missing_original_restores_to_empty_file() {
    let h = harness();
    h.fs.add_file(HOSTAPD_CONF, ORIGINAL_HOSTAPD);
    daemons_up(&h.runner);

    h.manager.start_hotspot("LOOP-Setup", "loopsetup1", 6).unwrap();
    assert_eq!(h.fs.contents(DNSMASQ_BACKUP).unwrap(), b"");

    h.manager.stop_hotspot().unwrap();
    assert_eq!(h.fs.contents(DNSMASQ_CONF).unwrap(), b"");
    assert_eq!(h.fs.contents(HOSTAPD_CONF).unwrap(), ORIGINAL_HOSTAPD);
}

#[test]
fn daemon_failure_rolls_back() {
    let h = with_originals();
    h.runner.on(&["systemctl", "is-active", "hostapd"], ok("active\n"));
    h.runner.on(&["systemctl", "is-active", "dnsmasq"], fail(3, "failed"));

    let err = h.manager.start_hotspot("LOOP-Setup", "loopsetup1", 6).unwrap_err();
    match &err {
        WifiError::Hotspot(message) => assert!(message.contains("dnsmasq"), "{message}"),
        other => panic!("expected Hotspot error, got {other:?}"),
    }

    assert_eq!(h.fs.contents(HOSTAPD_CONF).unwrap(), ORIGINAL_HOSTAPD);
    assert_eq!(h.fs.contents(DNSMASQ_CONF).unwrap(), ORIGINAL_DNSMASQ);
    assert!(h.fs.contents(HOSTAPD_WORKING).is_none());
    assert_eq!(h.runner.count(&["systemctl", "stop", "hostapd"]), 1);
    assert_eq!(h.runner.count(&["systemctl", "stop", "dnsmasq"]), 1);

    let status = h.manager.get_status();
    assert_eq!(status.state(), ConnectionState::Failed);
    assert_eq!(status.ssid(), Some("LOOP-Setup"));
    assert!(h.manager.operation_in_progress().is_none());
}

#[test]
fn failed_address_setup_rolls_back() {
    let h = with_originals();
    h.runner.on(
        &["ip", "addr", "add"],
        fail(2, "RTNETLINK answers: Operation not permitted"),
    );

    let err = h.manager.start_hotspot("LOOP-Setup", "loopsetup1", 6).unwrap_err();
    assert!(matches!(err, WifiError::Command { .. }), "{err:?}");
    assert_eq!(h.runner.count(&["systemctl", "restart"]), 0);
    assert_eq!(h.fs.contents(HOSTAPD_CONF).unwrap(), ORIGINAL_HOSTAPD);
    assert_eq!(h.fs.contents(DNSMASQ_CONF).unwrap(), ORIGINAL_DNSMASQ);
}

#[test]
fn stop_without_start_is_harmless() {
    let h = with_originals();

    let info = h.manager.stop_hotspot().unwrap();
    assert_eq!(info.state(), ConnectionState::Disconnected);
    assert_eq!(h.fs.contents(HOSTAPD_CONF).unwrap(), ORIGINAL_HOSTAPD);
    assert!(h.fs.contents(HOSTAPD_BACKUP).is_none());
}

#[test]
fn status_counts_associated_stations() {
    let h = with_originals();
    daemons_up(&h.runner);
    h.runner.on(
        &["iw", "dev", "wlan0", "station", "dump"],
        ok("Station 3c:22:fb:00:00:01 (on wlan0)\n\tinactive time:\t120 ms\n\
            Station 3c:22:fb:00:00:02 (on wlan0)\n\tinactive time:\t80 ms\n"),
    );

    h.manager.start_hotspot("LOOP-Setup", "loopsetup1", 6).unwrap();
    let status = h.manager.hotspot_status();
    assert!(status.active);
    assert_eq!(status.client_count, 2);

    // A refresh keeps the hotspot snapshot while the daemons run.
    let info = h.manager.refresh_status().unwrap();
    assert_eq!(info.state(), ConnectionState::HotspotActive);
    assert_eq!(h.runner.count(DEVICE_SHOW), 0);
}

#[test]
fn status_reports_inactive_without_daemons() {
    let h = harness();
    h.runner.on(IS_ACTIVE, ok("inactive\n"));

    let status = h.manager.hotspot_status();
    assert!(!status.active);
    assert_eq!(status.client_count, 0);
}
