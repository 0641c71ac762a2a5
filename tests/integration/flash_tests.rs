//! Flashing through the bootloader client against a simulated device.

use std::fs;
use std::path::PathBuf;

use crazylink::bootloader::cloader::Cloader;
use crazylink::bootloader::manifest::{FirmwareDetails, Manifest};
use crazylink::bootloader::{
    BOOTLOADER_CONNECTIONS, Bootloader, FlashEngine, FlashEvent, FlashTarget,
    PROTOCOL_VERSION_CF2, Target, TargetType,
};
use crazylink::cancel::CancelToken;
use crazylink::config::LinkConfig;
use crazylink::crtp::codec::{decode, encode};
use crazylink::error::{FlashError, ManifestError};
use crazylink::link::CrtpLink;
use crazylink::radio::{ConnectionData, Datarate};
use crazylink::Error;

use crate::mock_radio::{ScriptedTransport, TransportProbe, ack};
use crate::mock_vehicle::{
    PortCall, RecordingPort, SimBootloader, SimTarget, Vehicle, VehicleLink, WriteRecord,
};

const STM32: u8 = 0xFF;
const NRF51: u8 = 0xFE;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("crazylink-it-{}-{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn fast_config() -> LinkConfig {
    LinkConfig {
        bootloader_reply_timeout_ms: 5,
        bootloader_retries: 3,
        ..LinkConfig::default()
    }
}

fn session(sim: SimBootloader) -> Bootloader<VehicleLink<SimBootloader>> {
    let mut bootloader = Bootloader::new(Cloader::new(VehicleLink::new(sim), &fast_config()));
    bootloader.start().unwrap();
    bootloader
}

fn sim_device(link: Bootloader<VehicleLink<SimBootloader>>) -> SimBootloader {
    link.into_cloader().into_link().vehicle
}

fn small_stm32() -> SimTarget {
    SimTarget::new(STM32, 128, 1, 64, 10)
}

// ── Page arithmetic ───────────────────────────────────────────

fn target(page_size: u16, buffer_pages: u16, flash_pages: u16, start_page: u16) -> Target {
    Target {
        kind: TargetType::Stm32,
        page_size,
        buffer_pages,
        flash_pages,
        start_page,
        cpu_id: [0; 12],
        protocol_version: 0,
    }
}

#[test]
fn two_page_image_commits_each_page() {
    let job = FlashTarget::new(target(128, 1, 64, 10), image(132), "fw");
    let mut port = RecordingPort::default();
    let mut events: Vec<FlashEvent> = Vec::new();
    FlashEngine::new()
        .flash(&job, &mut port, &mut events, &CancelToken::new(), 1, 1)
        .unwrap();

    assert_eq!(
        port.calls,
        vec![
            PortCall::Upload {
                target_id: STM32,
                page: 0,
                address: 0,
                len: 128
            },
            PortCall::Write {
                target_id: STM32,
                buffer_page: 0,
                flash_page: 10,
                count: 1
            },
            PortCall::Upload {
                target_id: STM32,
                page: 0,
                address: 0,
                len: 4
            },
            PortCall::Write {
                target_id: STM32,
                buffer_page: 0,
                flash_page: 11,
                count: 1
            },
        ]
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, FlashEvent::Progress { .. }))
            .count(),
        2
    );
}

#[test]
fn two_page_image_lands_in_device_flash() {
    let mut bootloader = session(SimBootloader::new(0, vec![small_stm32()]));
    let stm32 = *bootloader.target(TargetType::Stm32).unwrap();
    assert_eq!(stm32.page_size, 128);
    assert_eq!(stm32.start_page, 10);
    assert_eq!(stm32.cpu_id, [0x42; 12]);

    let fw = image(132);
    let job = FlashTarget::new(stm32, fw.clone(), "fw");
    let mut events: Vec<FlashEvent> = Vec::new();
    bootloader
        .flash_target(&job, &mut events, &CancelToken::new())
        .unwrap();

    let sim = sim_device(bootloader);
    assert_eq!(
        sim.writes,
        vec![
            WriteRecord {
                id: STM32,
                buffer_page: 0,
                flash_page: 10,
                count: 1
            },
            WriteRecord {
                id: STM32,
                buffer_page: 0,
                flash_page: 11,
                count: 1
            },
        ]
    );
    // 128 bytes in 24-byte slices, then the 4-byte tail.
    assert_eq!(sim.load_packets, 6 + 1);
    assert_eq!(sim.target(STM32).flash_from(10, fw.len()), fw.as_slice());
    assert!(matches!(events.last(), Some(FlashEvent::Completed { .. })));
}

#[test]
fn buffered_batches_land_in_order() {
    let mut bootloader = session(SimBootloader::new(0, vec![SimTarget::new(STM32, 64, 4, 64, 8)]));
    let stm32 = *bootloader.target(TargetType::Stm32).unwrap();
    let fw = image(64 * 9 + 10);
    let job = FlashTarget::new(stm32, fw.clone(), "fw");
    bootloader
        .flash_target(&job, &mut Vec::<FlashEvent>::new(), &CancelToken::new())
        .unwrap();

    let sim = sim_device(bootloader);
    let commits: Vec<(u16, u16)> = sim.writes.iter().map(|w| (w.flash_page, w.count)).collect();
    assert_eq!(commits, vec![(8, 4), (12, 4), (16, 2)]);
    assert_eq!(sim.target(STM32).flash_from(8, fw.len()), fw.as_slice());
}

// ── Sessions ──────────────────────────────────────────────────

fn dual_mcu() -> SimBootloader {
    SimBootloader::new(
        PROTOCOL_VERSION_CF2,
        vec![
            SimTarget::new(STM32, 128, 2, 64, 16),
            SimTarget::new(NRF51, 64, 1, 32, 8),
        ],
    )
}

#[test]
fn dual_mcu_start_reports_both_targets() {
    let bootloader = session(dual_mcu());
    assert_eq!(bootloader.protocol_version(), Some(PROTOCOL_VERSION_CF2));
    assert_eq!(bootloader.targets().len(), 2);
    assert_eq!(bootloader.target(TargetType::Nrf51).unwrap().page_size, 64);
}

#[test]
fn archive_flashes_every_target_in_turn() -> anyhow::Result<()> {
    let dir = scratch_dir("archive");
    let stm32_fw = image(300);
    let nrf51_fw = image(100);
    fs::write(dir.join("cf2.bin"), &stm32_fw)?;
    fs::write(dir.join("nrf.bin"), &nrf51_fw)?;
    let mut manifest = Manifest {
        version: 1,
        ..Manifest::default()
    };
    for (file, target) in [("cf2.bin", "stm32"), ("nrf.bin", "nrf51")] {
        manifest.files.insert(
            file.into(),
            FirmwareDetails {
                platform: "cf2".into(),
                target: target.into(),
                kind: "fw".into(),
            },
        );
    }
    manifest.write(&dir.join("manifest.json")).map_err(Error::from)?;

    let mut bootloader = session(dual_mcu());
    let mut events: Vec<FlashEvent> = Vec::new();
    bootloader.flash(&dir, &[], &mut events, &CancelToken::new())?;

    let started: Vec<(TargetType, usize, usize)> = events
        .iter()
        .filter_map(|e| match e {
            FlashEvent::Started {
                target,
                current,
                total,
                ..
            } => Some((*target, *current, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(
        started,
        vec![(TargetType::Stm32, 1, 2), (TargetType::Nrf51, 2, 2)]
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, FlashEvent::Completed { .. }))
            .count(),
        2
    );

    let sim = sim_device(bootloader);
    assert_eq!(sim.target(STM32).flash_from(16, stm32_fw.len()), stm32_fw.as_slice());
    assert_eq!(sim.target(NRF51).flash_from(8, nrf51_fw.len()), nrf51_fw.as_slice());
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn archive_filter_selects_one_target() -> anyhow::Result<()> {
    let dir = scratch_dir("filter");
    fs::write(dir.join("cf2.bin"), image(40))?;
    fs::write(dir.join("nrf.bin"), image(40))?;
    fs::write(
        dir.join("manifest.json"),
        r#"{"files": {
            "cf2.bin": {"target": "stm32", "type": "fw"},
            "nrf.bin": {"target": "nrf51", "type": "fw"}
        }}"#,
    )?;

    let mut bootloader = session(dual_mcu());
    bootloader.flash(&dir, &["nrf51"], &mut Vec::<FlashEvent>::new(), &CancelToken::new())?;
    let sim = sim_device(bootloader);
    assert!(sim.writes.iter().all(|w| w.id == NRF51));
    assert!(!sim.writes.is_empty());
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn raw_image_without_target_name_is_rejected_before_sending() {
    let dir = scratch_dir("raw");
    let path = dir.join("fw.bin");
    fs::write(&path, image(64)).unwrap();

    let mut bootloader = session(SimBootloader::new(0, vec![small_stm32()]));
    let sent_after_start = bootloader.cloader().link().sent.len();
    let result = bootloader.flash(&path, &[], &mut Vec::<FlashEvent>::new(), &CancelToken::new());

    assert!(matches!(result, Err(Error::Manifest(ManifestError::Usage(_)))));
    assert_eq!(bootloader.cloader().link().sent.len(), sent_after_start);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn raw_image_for_absent_target_is_rejected() {
    let dir = scratch_dir("absent");
    let path = dir.join("fw.bin");
    fs::write(&path, image(64)).unwrap();

    // Single-MCU bootloader: no nRF51 to flash.
    let mut bootloader = session(SimBootloader::new(0, vec![small_stm32()]));
    let result = bootloader.flash(&path, &["nrf51"], &mut Vec::<FlashEvent>::new(), &CancelToken::new());
    assert_eq!(
        result,
        Err(Error::Flash(FlashError::UnknownTarget("nrf51".into())))
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn write_error_aborts_job() {
    let mut sim = SimBootloader::new(0, vec![small_stm32()]);
    sim.fail_write = Some(2);
    let mut bootloader = session(sim);
    let stm32 = *bootloader.target(TargetType::Stm32).unwrap();
    let job = FlashTarget::new(stm32, image(500), "fw");
    let mut events: Vec<FlashEvent> = Vec::new();

    let result = bootloader.flash_target(&job, &mut events, &CancelToken::new());
    assert_eq!(
        result,
        Err(Error::Flash(FlashError::WriteFailed {
            code: 2,
            detail: "flash erase failed"
        }))
    );
    assert!(matches!(events.last(), Some(FlashEvent::Failed { .. })));
    assert_eq!(sim_device(bootloader).writes.len(), 1);
}

#[test]
fn image_past_end_of_flash_is_refused_by_device() {
    // A job aimed beyond the writable area: the device rejects the commit.
    let mut bootloader = session(SimBootloader::new(0, vec![small_stm32()]));
    let mut stm32 = *bootloader.target(TargetType::Stm32).unwrap();
    stm32.flash_pages = 80;
    let job = FlashTarget {
        start_page: 70,
        ..FlashTarget::new(stm32, image(128), "fw")
    };
    let result = bootloader.flash_target(&job, &mut Vec::<FlashEvent>::new(), &CancelToken::new());
    assert!(matches!(
        result,
        Err(Error::Flash(FlashError::WriteFailed { code: 1, .. }))
    ));
}

#[test]
fn silent_device_reports_no_reply() {
    let sim = SimBootloader::new(0, Vec::new());
    let mut bootloader = Bootloader::new(Cloader::new(VehicleLink::new(sim), &fast_config()));
    assert_eq!(
        bootloader.start(),
        Err(Error::Flash(FlashError::NoReply(0x10)))
    );
    let sent = bootloader.into_cloader().into_link().sent.len();
    assert_eq!(sent, fast_config().bootloader_retries as usize);
}

// ── Reset and CF1 config ──────────────────────────────────────

#[test]
fn dual_mcu_resets_through_nrf51() {
    let mut bootloader = session(dual_mcu());
    bootloader.reset_to_firmware().unwrap();
    assert_eq!(sim_device(bootloader).reset, Some(NRF51));
}

#[test]
fn single_mcu_resets_stm32() {
    let mut bootloader = session(SimBootloader::new(0, vec![small_stm32()]));
    bootloader.reset_to_firmware().unwrap();
    let sim = sim_device(bootloader);
    assert_eq!(sim.reset, Some(STM32));
}

#[test]
fn cf1_config_round_trip() {
    let mut bootloader = session(SimBootloader::new(0, vec![small_stm32()]));
    let config = [0x30, 0x00, 0x50, 0x02, 0xE7, 0xE7, 0xE7, 0xE7, 0xE7];
    bootloader
        .write_cf1_config(&config, &mut Vec::<FlashEvent>::new(), &CancelToken::new())
        .unwrap();

    let block = bootloader.read_cf1_config().unwrap();
    assert_eq!(block.len(), 128);
    assert_eq!(&block[..config.len()], &config);

    let sim = sim_device(bootloader);
    assert_eq!(sim.writes.last().unwrap().flash_page, 63);
}

// ── Discovery ─────────────────────────────────────────────────

/// A radio whose bootloader answers each request on the ack that carried it.
fn bootloader_radio(mut sim: SimBootloader) -> (ScriptedTransport, TransportProbe) {
    ScriptedTransport::new(move |frame| {
        // The idle probe decodes as an empty link-control packet.
        let reply = decode(frame)
            .ok()
            .filter(|request| !request.payload().is_empty())
            .and_then(|request| sim.handle(&request).into_iter().next())
            .map(|packet| encode(&packet).to_vec());
        Ok(Some(ack(reply)))
    })
}

fn dual_mcu_radio() -> SimBootloader {
    SimBootloader::new(
        PROTOCOL_VERSION_CF2,
        vec![small_stm32(), SimTarget::new(NRF51, 128, 1, 32, 8)],
    )
}

#[test]
fn cold_booted_bootloader_found_and_opened() {
    let (transport, probe) = bootloader_radio(dual_mcu_radio());
    let transport = transport.with_scan_result(Datarate::Mbps2, vec![0]);
    // Replies come back through the pump thread.
    let config = LinkConfig {
        bootloader_reply_timeout_ms: 200,
        ..fast_config()
    };
    let mut link = CrtpLink::with_config(transport, config);

    let found = Bootloader::scan(&mut link, &CancelToken::new())
        .unwrap()
        .expect("bootloader on channel 0");
    assert_eq!(
        found,
        ConnectionData {
            channel: 0,
            datarate: Datarate::Mbps2
        }
    );

    let bootloader = Bootloader::open(link, found).unwrap();
    assert_eq!(bootloader.protocol_version(), Some(PROTOCOL_VERSION_CF2));
    assert_eq!(bootloader.targets().len(), 2);
    assert_eq!(bootloader.target(TargetType::Nrf51).unwrap().start_page, 8);
    assert_eq!(probe.configs().last().unwrap().channel, 0);
}

#[test]
fn warm_boot_channel_is_tried_first() {
    let (transport, _probe) = ScriptedTransport::always_ack();
    let transport = transport.with_scan_result(Datarate::Mbps2, vec![0, 110]);
    let mut link = CrtpLink::with_config(transport, fast_config());
    let found = Bootloader::scan(&mut link, &CancelToken::new()).unwrap();
    assert_eq!(found, Some(BOOTLOADER_CONNECTIONS[0]));
    assert_eq!(BOOTLOADER_CONNECTIONS[0].channel, 110);
}

#[test]
fn scan_without_bootloader_gives_up() {
    let (transport, probe) = ScriptedTransport::always_ack();
    // A vehicle in firmware mode on another channel is not a bootloader.
    let transport = transport.with_scan_result(Datarate::Mbps2, vec![80]);
    let config = LinkConfig {
        bootloader_scan_timeout_ms: 0,
        ..fast_config()
    };
    let mut link = CrtpLink::with_config(transport, config);
    assert_eq!(Bootloader::scan(&mut link, &CancelToken::new()), Ok(None));
    assert_eq!(probe.exchanges(), 0);
}

#[test]
fn cancelled_scan_stops() {
    let (transport, _probe) = ScriptedTransport::always_ack();
    let mut link = CrtpLink::new(transport);
    let cancel = CancelToken::new();
    cancel.cancel();
    assert_eq!(Bootloader::scan(&mut link, &cancel), Err(Error::Cancelled));
}
