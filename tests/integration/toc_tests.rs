//! TOC download against a simulated vehicle.

use std::time::Duration;

use crazylink::cancel::CancelToken;
use crazylink::config::LinkConfig;
use crazylink::crtp::codec::{decode, encode};
use crazylink::crtp::Packet;
use crazylink::link::{CrtpLink, Link};
use crazylink::radio::Datarate;
use crazylink::toc::fetcher::{FetchState, TocFetcher};
use crazylink::toc::{Access, VariableType};

use crate::mock_radio::{ScriptedTransport, ack};
use crate::mock_vehicle::{TocVehicle, Vehicle, VehicleLink, element_bytes};

const PARAM_PORT: u8 = 2;
const LOG_PORT: u8 = 5;

fn param_catalog() -> Vec<Vec<u8>> {
    vec![
        element_bytes(0, 0x08 | 0x40, "imu_tests", "MPU6050"),
        element_bytes(1, 0x06, "pid_rate", "roll_kp"),
        element_bytes(2, 0x09, "ring", "effect"),
        element_bytes(3, 0x02 | 0x40, "system", "taskDump"),
    ]
}

#[test]
fn param_toc_fetched_in_order() {
    let mut link = VehicleLink::new(TocVehicle::new(PARAM_PORT, param_catalog(), 0xCAFE_F00D));
    let mut fetcher = TocFetcher::new(PARAM_PORT);
    let toc = fetcher
        .fetch(&mut link, &CancelToken::new(), &LinkConfig::default())
        .unwrap()
        .clone();

    assert_eq!(toc.len(), 4);
    assert_eq!(toc.crc(), 0xCAFE_F00D);
    let mpu = toc.element_by_complete_name("imu_tests.MPU6050").unwrap();
    assert_eq!(mpu.ident, 0);
    assert_eq!(mpu.var_type, VariableType::Uint8);
    assert_eq!(mpu.access, Access::ReadOnly);
    let kp = toc.element_by_name("pid_rate", "roll_kp").unwrap();
    assert_eq!(kp.var_type, VariableType::Float);
    assert_eq!(kp.access, Access::ReadWrite);

    assert_eq!(link.vehicle.info_requests, 1);
    assert_eq!(link.vehicle.element_requests, vec![0, 1, 2, 3]);
    assert_eq!(fetcher.state(), FetchState::Finished { crc: 0xCAFE_F00D });
}

#[test]
fn finished_fetch_ignores_late_replies() {
    let mut link = VehicleLink::new(TocVehicle::new(PARAM_PORT, param_catalog(), 1));
    let mut fetcher = TocFetcher::new(PARAM_PORT);
    fetcher
        .fetch(&mut link, &CancelToken::new(), &LinkConfig::default())
        .unwrap();
    let sent = link.sent.len();

    let mut late = vec![0u8];
    late.extend_from_slice(&element_bytes(1, 0x06, "late", "reply"));
    fetcher
        .handle_packet(&Packet::new(PARAM_PORT, 0, &late).unwrap(), &mut link)
        .unwrap();

    assert_eq!(link.sent.len(), sent);
    assert!(fetcher.is_finished());
    assert!(fetcher.toc().element_by_name("late", "reply").is_none());

    // `start` is a no-op once finished.
    fetcher.start(&mut link).unwrap();
    assert_eq!(link.sent.len(), sent);
}

#[test]
fn wrong_index_triggers_single_rerequest() {
    let mut link = VehicleLink::new(TocVehicle::new(PARAM_PORT, param_catalog(), 7));
    let mut fetcher = TocFetcher::new(PARAM_PORT);
    fetcher.start(&mut link).unwrap();

    // Feed the info reply by hand; the fetcher then asks for element 0.
    let info = link.receive_packet(Duration::ZERO).unwrap();
    fetcher.handle_packet(&info, &mut link).unwrap();
    let _ = link.receive_packet(Duration::ZERO);
    let before = fetcher.state();
    assert_eq!(
        before,
        FetchState::GetTocElement {
            requested_index: 0,
            item_count: 4,
            crc: 7
        }
    );
    let sent = link.sent.len();

    let mut stray = vec![0u8];
    stray.extend_from_slice(&element_bytes(2, 0x09, "ring", "effect"));
    fetcher
        .handle_packet(&Packet::new(PARAM_PORT, 0, &stray).unwrap(), &mut link)
        .unwrap();

    assert_eq!(link.sent.len(), sent + 1);
    assert_eq!(link.sent.last().unwrap().payload(), &[0, 0]);
    assert_eq!(fetcher.state(), before);
    assert!(fetcher.toc().is_empty());
}

#[test]
fn misdelivered_element_recovers() {
    let vehicle = TocVehicle::new(PARAM_PORT, param_catalog(), 3).misdeliver_once(2);
    let mut link = VehicleLink::new(vehicle);
    let mut fetcher = TocFetcher::new(PARAM_PORT);
    let toc = fetcher
        .fetch(&mut link, &CancelToken::new(), &LinkConfig::default())
        .unwrap();

    assert_eq!(toc.len(), 4);
    assert_eq!(link.vehicle.element_requests, vec![0, 1, 2, 2, 3]);
}

#[test]
fn console_traffic_survives_param_fetch() {
    let mut link = VehicleLink::new(TocVehicle::new(PARAM_PORT, param_catalog(), 5));
    let console = Packet::new(0, 0, b"console").unwrap();
    let log_block = Packet::new(LOG_PORT, 2, &[1, 2, 3]).unwrap();
    link.push_inbound(console.clone());
    link.push_inbound(log_block.clone());

    let mut fetcher = TocFetcher::new(PARAM_PORT);
    let toc = fetcher
        .fetch(&mut link, &CancelToken::new(), &LinkConfig::default())
        .unwrap();
    assert_eq!(toc.len(), 4);

    assert_eq!(link.receive_packet(Duration::ZERO), Some(console));
    assert_eq!(link.receive_packet(Duration::ZERO), Some(log_block));
    assert_eq!(link.receive_packet(Duration::ZERO), None);
}

#[test]
fn empty_toc_finishes_after_info() {
    let mut link = VehicleLink::new(TocVehicle::new(PARAM_PORT, Vec::new(), 0x1234));
    let mut fetcher = TocFetcher::new(PARAM_PORT);
    let toc = fetcher
        .fetch(&mut link, &CancelToken::new(), &LinkConfig::default())
        .unwrap();
    assert!(toc.is_empty());
    assert_eq!(toc.crc(), 0x1234);
    assert!(link.vehicle.element_requests.is_empty());
}

#[test]
fn log_toc_uses_log_type_codes() {
    let catalog = vec![
        element_bytes(0, 7, "stabilizer", "roll"),
        element_bytes(1, 2, "pm", "vbatMV"),
        element_bytes(2, 1, "radio", "rssi"),
    ];
    let mut link = VehicleLink::new(TocVehicle::new(LOG_PORT, catalog, 9));
    let mut fetcher = TocFetcher::new(LOG_PORT);
    let toc = fetcher
        .fetch(&mut link, &CancelToken::new(), &LinkConfig::default())
        .unwrap();

    let types: Vec<VariableType> = toc.iter().map(|e| e.var_type).collect();
    assert_eq!(
        types,
        vec![VariableType::Float, VariableType::Uint16, VariableType::Uint8]
    );
    assert!(toc.iter().all(|e| e.access == Access::ReadOnly));
}

#[test]
fn cancelled_fetch_stops() {
    let mut link = VehicleLink::new(TocVehicle::new(PARAM_PORT, param_catalog(), 0));
    let mut fetcher = TocFetcher::new(PARAM_PORT);
    let cancel = CancelToken::new();
    cancel.cancel();
    assert_eq!(
        fetcher
            .fetch(&mut link, &cancel, &LinkConfig::default())
            .map(|_| ()),
        Err(crazylink::Error::Cancelled)
    );
}

#[test]
fn toc_fetch_over_radio_link() {
    // The vehicle answers each TOC request on the ack of the frame that
    // carried it.
    let mut vehicle = TocVehicle::new(PARAM_PORT, param_catalog(), 0xAB);
    let (transport, _probe) = ScriptedTransport::new(move |frame| {
        let reply = decode(frame)
            .ok()
            .and_then(|request| vehicle.handle(&request).into_iter().next())
            .map(|packet| encode(&packet).to_vec());
        Ok(Some(ack(reply)))
    });
    let mut link = CrtpLink::new(transport);
    link.connect(80, Datarate::Mbps2).unwrap();

    let mut fetcher = TocFetcher::new(PARAM_PORT);
    let toc = fetcher
        .fetch(&mut link, &CancelToken::new(), &LinkConfig::default())
        .unwrap();
    assert_eq!(toc.len(), 4);
    assert_eq!(toc.crc(), 0xAB);
    assert!(toc.element_by_complete_name("system.taskDump").is_some());
}
