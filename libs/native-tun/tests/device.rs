#![cfg(target_os = "linux")]
#![allow(clippy::unwrap_used)]

use std::process::Command;
use std::time::Duration;

use native_tun::{Event, Framing, NativeTun};

const MTU: u32 = 1280;

fn link_up(name: &str) {
    let status = Command::new("ip")
        .args(["link", "set", "dev", name, "up"])
        .status()
        .unwrap();

    assert!(status.success());
}

#[test]
#[ignore = "Needs admin / sudo"]
fn create_reports_requested_name() {
    let _guard = logging::test("debug");

    let tun = NativeTun::create("ntun-name", MTU).unwrap();

    assert_eq!(tun.name().unwrap(), "ntun-name");
    assert_eq!(tun.framing(), Framing::PacketInfo);
    assert!(tun.index().is_some_and(|i| i > 0));

    tun.close().unwrap();
}

#[test]
#[ignore = "Needs admin / sudo"]
fn set_mtu_is_reported_by_mtu() {
    let tun = NativeTun::create("ntun-mtu", MTU).unwrap();
    assert_eq!(tun.mtu().unwrap(), MTU);

    tun.set_mtu(1400).unwrap();

    assert_eq!(tun.mtu().unwrap(), 1400);
    tun.close().unwrap();
}

#[test]
#[ignore = "Needs admin / sudo"]
fn too_long_name_is_rejected() {
    let error = NativeTun::create("this-name-is-too-long", MTU).unwrap_err();

    assert!(matches!(error, native_tun::Error::DeviceCreate(_)));
}

#[test]
#[ignore = "Needs admin / sudo"]
fn close_closes_event_queue() {
    let tun = NativeTun::create("ntun-close", MTU).unwrap();
    let events = tun.events();

    tun.close().unwrap();

    assert!(events.is_disconnected());
}

#[test]
#[ignore = "Needs admin / sudo"]
fn repeated_create_and_drop_cleans_up() {
    logging::test_global("debug"); // `NativeTun` uses threads and we want to see the logs of all threads.

    for _ in 0..20 {
        let _tun = NativeTun::create("ntun-again", MTU).unwrap(); // Fails with `EBUSY` if the previous device is still open.
    }
}

#[tokio::test]
#[ignore = "Needs admin / sudo"]
async fn bringing_link_up_emits_up() {
    let tun = NativeTun::create("ntun-up", MTU).unwrap();
    let events = tun.events();
    assert!(!tun.is_up().unwrap());

    link_up("ntun-up");
    assert!(tun.is_up().unwrap());

    let up = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if events.recv_async().await.unwrap() == Event::Up {
                break;
            }
        }
    })
    .await;

    assert!(up.is_ok(), "no `Up` event within 5s");
    tun.close().unwrap();
}
