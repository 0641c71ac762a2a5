//! Mock radio adapters for integration tests.
//!
//! - [`SimulatedDongle`]: a `UsbInterface` that behaves like a Crazyradio
//!   with vehicles listening on a fixed set of channels.
//! - [`ScriptedTransport`]: a `RadioTransport` whose every exchange is
//!   answered by a test-supplied responder, with a shared log of frames.
//! - [`RecordingLinkSink`]: collects link events from the pump thread.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crazylink::crtp::NULL_PACKET;
use crazylink::error::TransportError;
use crazylink::link::{LinkEvent, LinkEventSink};
use crazylink::radio::crazyradio::{SCAN_CHANNELS, SET_DATA_RATE, SET_RADIO_CHANNEL};
use crazylink::radio::{Ack, Datarate, RadioConfig, RadioTransport, UsbInterface};

/// Poll `cond` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

// ── SimulatedDongle ───────────────────────────────────────────

pub struct SimulatedDongle {
    listening: BTreeSet<(u8, u8)>,
    channel: u8,
    datarate: u8,
    fw_scan: bool,
    scan_range: (u8, u8),
    pub released: Arc<AtomicBool>,
    pub bulk_out: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[allow(dead_code)]
impl SimulatedDongle {
    /// Vehicles answer on `channels` at `datarate` only.
    pub fn new(channels: &[u8], datarate: Datarate) -> Self {
        Self {
            listening: channels.iter().map(|&c| (c, datarate.code())).collect(),
            channel: 2,
            datarate: Datarate::Mbps2.code(),
            fw_scan: false,
            scan_range: (0, 0),
            released: Arc::new(AtomicBool::new(false)),
            bulk_out: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_fw_scan(mut self) -> Self {
        self.fw_scan = true;
        self
    }

    fn vehicle_present(&self, channel: u8) -> bool {
        self.listening.contains(&(channel, self.datarate))
    }
}

impl UsbInterface for SimulatedDongle {
    fn control_out(
        &mut self,
        _request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        _data: &[u8],
    ) -> Result<(), TransportError> {
        match request {
            SET_RADIO_CHANNEL => self.channel = value as u8,
            SET_DATA_RATE => self.datarate = value as u8,
            SCAN_CHANNELS => self.scan_range = (value as u8, index as u8),
            _ => {}
        }
        Ok(())
    }

    fn control_in(
        &mut self,
        _request_type: u8,
        request: u8,
        _value: u16,
        _index: u16,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        if request != SCAN_CHANNELS {
            return Ok(0);
        }
        let (start, end) = self.scan_range;
        let mut n = 0;
        for ch in start..=end {
            if self.vehicle_present(ch) && n < buf.len() {
                buf[n] = ch;
                n += 1;
            }
        }
        Ok(n)
    }

    fn bulk_exchange(&mut self, out: &[u8], input: &mut [u8]) -> Result<usize, TransportError> {
        self.bulk_out.lock().unwrap().push(out.to_vec());
        if self.vehicle_present(self.channel) {
            input[0] = 0x01;
        } else {
            // Dongle gave up: zero status byte.
            input[0] = 0x00;
        }
        Ok(1)
    }

    fn is_connected(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    fn firmware_version(&self) -> f32 {
        0.53
    }

    fn serial_number(&self) -> String {
        "E7E7E7E7E7".into()
    }

    fn supports_fw_scan(&self) -> bool {
        self.fw_scan
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::Release);
    }
}

// ── ScriptedTransport ─────────────────────────────────────────

pub type Responder = Box<dyn FnMut(&[u8]) -> Result<Option<Ack>, TransportError> + Send>;

#[derive(Default)]
pub struct TransportLog {
    pub frames: Vec<Vec<u8>>,
    pub configs: Vec<RadioConfig>,
    pub closed: bool,
}

/// Shared view of a [`ScriptedTransport`] that stays with the test.
#[derive(Clone, Default)]
pub struct TransportProbe {
    log: Arc<Mutex<TransportLog>>,
}

#[allow(dead_code)]
impl TransportProbe {
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().frames.clone()
    }

    /// Frames other than the idle probe.
    pub fn data_frames(&self) -> Vec<Vec<u8>> {
        self.frames()
            .into_iter()
            .filter(|f| f.as_slice() != NULL_PACKET.as_slice())
            .collect()
    }

    pub fn exchanges(&self) -> usize {
        self.log.lock().unwrap().frames.len()
    }

    pub fn configs(&self) -> Vec<RadioConfig> {
        self.log.lock().unwrap().configs.clone()
    }

    pub fn closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }
}

pub struct ScriptedTransport {
    log: Arc<Mutex<TransportLog>>,
    responder: Responder,
    scan_results: Vec<(Datarate, Vec<u8>)>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new(
        responder: impl FnMut(&[u8]) -> Result<Option<Ack>, TransportError> + Send + 'static,
    ) -> (Self, TransportProbe) {
        let probe = TransportProbe::default();
        let transport = Self {
            log: probe.log.clone(),
            responder: Box::new(responder),
            scan_results: Vec::new(),
        };
        (transport, probe)
    }

    /// Acks everything with an empty payload.
    pub fn always_ack() -> (Self, TransportProbe) {
        Self::new(|_| Ok(Some(ack(None))))
    }

    pub fn with_scan_result(mut self, datarate: Datarate, channels: Vec<u8>) -> Self {
        self.scan_results.push((datarate, channels));
        self
    }
}

/// A positive ack, optionally carrying a payload.
pub fn ack(payload: Option<Vec<u8>>) -> Ack {
    Ack {
        acknowledged: true,
        power_detected: true,
        retry_count: 0,
        payload,
    }
}

pub fn nack() -> Ack {
    Ack {
        acknowledged: false,
        power_detected: false,
        retry_count: 10,
        payload: None,
    }
}

impl RadioTransport for ScriptedTransport {
    fn configure(&mut self, config: &RadioConfig) -> Result<(), crazylink::Error> {
        config.validate()?;
        self.log.lock().unwrap().configs.push(*config);
        Ok(())
    }

    fn exchange(&mut self, frame: &[u8]) -> Result<Option<Ack>, TransportError> {
        self.log.lock().unwrap().frames.push(frame.to_vec());
        (self.responder)(frame)
    }

    fn scan_channels(
        &mut self,
        channels: core::ops::RangeInclusive<u8>,
        datarate: Datarate,
    ) -> Result<Vec<u8>, crazylink::Error> {
        Ok(self
            .scan_results
            .iter()
            .filter(|(dr, _)| *dr == datarate)
            .flat_map(|(_, chs)| chs.iter().copied())
            .filter(|ch| channels.contains(ch))
            .collect())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

// ── Link event recorder ───────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingLinkSink {
    events: Arc<Mutex<Vec<LinkEvent>>>,
}

#[allow(dead_code)]
impl RecordingLinkSink {
    pub fn events(&self) -> Vec<LinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&LinkEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl LinkEventSink for RecordingLinkSink {
    fn emit(&mut self, event: &LinkEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
