//! Page-buffered flashing.
//!
//! The image is cut into `page_size` chunks. Each chunk is staged into the
//! next free device buffer page; once all `buffer_pages` are staged they
//! are committed to flash in one `WRITE_FLASH`, and any partial batch left
//! at the end gets a final commit.
//!
//! For chunk `i` (0-based) with `n` chunks staged in the current batch the
//! batch lands at `start_page + i - (n - 1)`, so the batch containing the
//! last chunk ends exactly at `start_page + (len - 1) / page_size`.

use log::{error, info};

use super::events::{FlashEvent, FlashEventSink};
use super::{BootloaderPort, FlashTarget};
use crate::cancel::CancelToken;
use crate::error::{ConfigError, FlashError};

/// Number of `page_size` chunks needed for `len` bytes.
pub fn chunk_count(len: usize, page_size: usize) -> usize {
    len.div_ceil(page_size)
}

/// The image cut into `page_size` chunks; only the last may be short.
pub fn chunks(image: &[u8], page_size: usize) -> core::slice::Chunks<'_, u8> {
    image.chunks(page_size)
}

fn flash_page(page: usize) -> crate::Result<u16> {
    u16::try_from(page).map_err(|_| ConfigError::Invalid("flash page beyond u16 range").into())
}

#[derive(Debug, Default)]
pub struct FlashEngine;

impl FlashEngine {
    pub fn new() -> Self {
        Self
    }

    /// Flash one job. `current`/`total` position it within a multi-file run.
    ///
    /// Fails with [`FlashError::InsufficientSpace`] before touching `port`
    /// when the image does not fit. Any failed commit aborts the job; the
    /// target may then be partially written.
    pub fn flash(
        &self,
        job: &FlashTarget,
        port: &mut impl BootloaderPort,
        sink: &mut dyn FlashEventSink,
        cancel: &CancelToken,
        current: usize,
        total: usize,
    ) -> crate::Result<()> {
        let target = &job.target;
        let result = self.flash_inner(job, port, sink, cancel, current, total);
        match &result {
            Ok(()) => {
                info!("flashing {} ({}) done", target.kind.name(), job.descriptor);
                sink.emit(&FlashEvent::Completed {
                    target: target.kind,
                    descriptor: job.descriptor.clone(),
                });
            }
            Err(e) => {
                error!("flashing {} ({}) failed: {}", target.kind.name(), job.descriptor, e);
                sink.emit(&FlashEvent::Failed {
                    target: target.kind,
                    message: e.to_string(),
                });
            }
        }
        result
    }

    fn flash_inner(
        &self,
        job: &FlashTarget,
        port: &mut impl BootloaderPort,
        sink: &mut dyn FlashEventSink,
        cancel: &CancelToken,
        current: usize,
        total: usize,
    ) -> crate::Result<()> {
        let target = &job.target;
        let image = job.image.as_slice();
        if target.page_size == 0 || target.buffer_pages == 0 {
            return Err(ConfigError::Invalid("target reports an empty page buffer").into());
        }
        let page_size = usize::from(target.page_size);
        let start_page = usize::from(job.start_page);

        let capacity = target.capacity_from(job.start_page);
        if image.len() > capacity {
            return Err(FlashError::InsufficientSpace {
                image_len: image.len(),
                capacity,
            }
            .into());
        }

        let pages = chunk_count(image.len(), page_size);
        info!(
            "flashing to {} ({}): {} bytes, {} page(s) [{}/{}]",
            target.kind.name(),
            job.descriptor,
            image.len(),
            pages,
            current,
            total
        );
        sink.emit(&FlashEvent::Started {
            target: target.kind,
            descriptor: job.descriptor.clone(),
            image_len: image.len(),
            pages,
            current,
            total,
        });

        let mut buffer_counter: u16 = 0;
        for (i, chunk) in chunks(image, page_size).enumerate() {
            cancel.check()?;
            port.upload_buffer(target.id(), buffer_counter, 0, chunk)?;
            buffer_counter += 1;

            if buffer_counter == target.buffer_pages {
                sink.emit(&FlashEvent::Progress { page: i + 1, pages });
                let first = start_page + i - usize::from(buffer_counter - 1);
                port.write_flash(target.id(), 0, flash_page(first)?, buffer_counter)?;
                buffer_counter = 0;
            }
        }

        if buffer_counter > 0 {
            cancel.check()?;
            sink.emit(&FlashEvent::Progress { page: pages, pages });
            let last = start_page + (image.len() - 1) / page_size;
            let first = last - usize::from(buffer_counter - 1);
            port.write_flash(target.id(), 0, flash_page(first)?, buffer_counter)?;
        }
        Ok(())
    }
}
