//! Sequential TOC download: info first, then one element at a time.
//!
//! ```text
//!  Idle ──start──▶ GetTocInfo ──info(n>0)──▶ GetTocElement{0} ─▶ … ─▶ Finished
//!                      │  ▲                      │  ▲
//!                      └──┘ noise: resend info   └──┘ wrong index: re-request
//!                      └──────────── info(n=0) ───────────────────▶ Finished
//! ```
//!
//! Only channel 0 of the fetcher's port is ever looked at. The fetcher
//! keeps exactly one request outstanding; a reply for any index other than
//! the one requested triggers a re-request of the same index and nothing
//! else. `Finished` is terminal; a fetch that stalled or was cancelled
//! starts over from the info request.

use std::time::Instant;

use core::time::Duration;
use log::{debug, info, warn};

use super::{CMD_TOC_ELEMENT, CMD_TOC_INFO, Toc, TocElement, TocKind};
use crate::cancel::CancelToken;
use crate::config::LinkConfig;
use crate::crtp::Packet;
use crate::error::TocError;
use crate::link::Link;

/// Channel that carries TOC traffic on every port.
pub const TOC_CHANNEL: u8 = 0;

/// Longest single wait on the link, so cancellation is seen promptly.
const RECEIVE_SLICE: Duration = Duration::from_millis(50);

/// Fetcher state. Each variant carries only the data valid in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    GetTocInfo,
    GetTocElement {
        requested_index: u8,
        item_count: u8,
        crc: u32,
    },
    Finished {
        crc: u32,
    },
}

pub struct TocFetcher {
    port: u8,
    kind: TocKind,
    state: FetchState,
    toc: Toc,
    last_request: Option<Instant>,
    resends: u32,
}

impl TocFetcher {
    pub fn new(port: u8) -> Self {
        Self {
            port,
            kind: TocKind::for_port(port),
            state: FetchState::Idle,
            toc: Toc::new(),
            last_request: None,
            resends: 0,
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, FetchState::Finished { .. })
    }

    /// Elements accepted so far; complete once [`is_finished`](Self::is_finished).
    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    pub fn into_toc(self) -> Toc {
        self.toc
    }

    fn request(&mut self, link: &mut impl Link, payload: &[u8]) -> crate::Result<()> {
        let packet = Packet::new(self.port, TOC_CHANNEL, payload)?;
        link.send_packet(packet)?;
        self.last_request = Some(Instant::now());
        Ok(())
    }

    fn request_info(&mut self, link: &mut impl Link) -> crate::Result<()> {
        debug!("TOC[{}]: requesting info", self.port);
        self.request(link, &[CMD_TOC_INFO])
    }

    fn request_element(&mut self, link: &mut impl Link, index: u8) -> crate::Result<()> {
        debug!("TOC[{}]: requesting element {}", self.port, index);
        self.request(link, &[CMD_TOC_ELEMENT, index])
    }

    /// `→ GetTocInfo`, from any state but `Finished`.
    ///
    /// A download left unfinished is discarded and restarted.
    pub fn start(&mut self, link: &mut impl Link) -> crate::Result<()> {
        match self.state {
            FetchState::Finished { .. } => {
                debug!("TOC[{}]: already fetched, start ignored", self.port);
                return Ok(());
            }
            FetchState::Idle => {}
            state => warn!("TOC[{}]: restarting fetch left in {:?}", self.port, state),
        }
        self.toc.clear();
        self.resends = 0;
        self.state = FetchState::GetTocInfo;
        self.request_info(link)
    }

    /// Feed one inbound packet. Packets for other ports or channels are
    /// ignored; so is everything once the fetch has finished.
    pub fn handle_packet(&mut self, packet: &Packet, link: &mut impl Link) -> crate::Result<()> {
        if packet.port() != self.port || packet.channel() != TOC_CHANNEL {
            return Ok(());
        }
        let payload = packet.payload();

        match self.state {
            FetchState::Idle | FetchState::Finished { .. } => Ok(()),

            FetchState::GetTocInfo => match payload {
                [CMD_TOC_INFO, count, c0, c1, c2, c3, ..] => {
                    let item_count = *count;
                    let crc = u32::from_le_bytes([*c0, *c1, *c2, *c3]);
                    self.toc.set_crc(crc);
                    self.resends = 0;
                    info!(
                        "TOC[{}]: {} element(s), crc {:#010x}",
                        self.port, item_count, crc
                    );
                    if item_count == 0 {
                        self.finish(crc);
                        return Ok(());
                    }
                    self.state = FetchState::GetTocElement {
                        requested_index: 0,
                        item_count,
                        crc,
                    };
                    self.request_element(link, 0)
                }
                _ => {
                    debug!("TOC[{}]: unexpected reply while awaiting info", self.port);
                    self.request_info(link)
                }
            },

            FetchState::GetTocElement {
                requested_index,
                item_count,
                crc,
            } => {
                let [CMD_TOC_ELEMENT, index, ..] = payload else {
                    debug!("TOC[{}]: non-element reply ignored", self.port);
                    return Ok(());
                };
                if *index != requested_index {
                    warn!(
                        "TOC[{}]: got element {} while waiting for {}, re-requesting",
                        self.port, index, requested_index
                    );
                    return self.request_element(link, requested_index);
                }

                match TocElement::decode(self.kind, &payload[1..]) {
                    Ok(element) => {
                        debug!("TOC[{}]: {} = {}", self.port, index, element.complete_name());
                        self.toc.add_element(element);
                    }
                    Err(e) => {
                        warn!("TOC[{}]: element {} undecodable ({}), re-requesting", self.port, index, e);
                        return self.request_element(link, requested_index);
                    }
                }

                self.resends = 0;
                if u16::from(requested_index) + 1 < u16::from(item_count) {
                    let next = requested_index + 1;
                    self.state = FetchState::GetTocElement {
                        requested_index: next,
                        item_count,
                        crc,
                    };
                    self.request_element(link, next)
                } else {
                    self.finish(crc);
                    Ok(())
                }
            }
        }
    }

    fn finish(&mut self, crc: u32) {
        self.state = FetchState::Finished { crc };
        self.last_request = None;
        info!("TOC[{}]: fetch finished ({} element(s))", self.port, self.toc.len());
    }

    /// Re-send whatever request is outstanding.
    fn resend_pending(&mut self, link: &mut impl Link) -> crate::Result<()> {
        match self.state {
            FetchState::GetTocInfo => self.request_info(link),
            FetchState::GetTocElement {
                requested_index, ..
            } => self.request_element(link, requested_index),
            FetchState::Idle | FetchState::Finished { .. } => Ok(()),
        }
    }

    /// Run a complete fetch on `link`, blocking until `Finished`.
    ///
    /// Without `toc_resend_ms` the fetch waits indefinitely for each reply,
    /// relying on the link's own retransmission. With it, the pending
    /// request is re-sent after that long without a reply, at most
    /// `toc_max_resends` times in a row before [`TocError::Stalled`].
    /// Traffic for other ports or channels is left on the link.
    pub fn fetch(
        &mut self,
        link: &mut impl Link,
        cancel: &CancelToken,
        config: &LinkConfig,
    ) -> crate::Result<&Toc> {
        let resend_after = config.toc_resend_ms.map(Duration::from_millis);
        self.start(link)?;

        while !self.is_finished() {
            cancel.check()?;
            let slice = resend_after.map_or(RECEIVE_SLICE, |d| d.min(RECEIVE_SLICE));
            if let Some(packet) = link.receive_on(self.port, TOC_CHANNEL, slice) {
                self.handle_packet(&packet, link)?;
                continue;
            }

            let Some(resend_after) = resend_after else {
                continue;
            };
            let overdue = self
                .last_request
                .is_some_and(|sent| sent.elapsed() >= resend_after);
            if overdue {
                if self.resends >= config.toc_max_resends {
                    warn!("TOC[{}]: no reply after {} resend(s)", self.port, self.resends);
                    return Err(TocError::Stalled.into());
                }
                self.resends += 1;
                self.resend_pending(link)?;
            }
        }
        Ok(&self.toc)
    }
}
