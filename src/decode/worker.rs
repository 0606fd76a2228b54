//! Background decode service.
//!
//! One dedicated thread pulls decode jobs off an mpsc channel so channel
//! inflation never blocks the render/interaction thread.  Responses are
//! matched against a pending-request arena and stamped with the document
//! epoch at submit time; results for a document that was replaced in the
//! meantime are dropped on receipt.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use crate::error::DecodeError;
use crate::log_warn;

use super::{Compression, assemble_rgba, decode_channel, normalize_samples};

/// One channel of a decode job: id, compression tag, compressed bytes.
pub struct ChannelJob {
    pub id: i16,
    pub compression_tag: u16,
    pub bytes: Vec<u8>,
}

struct DecodeJob {
    request_id: u64,
    epoch: u64,
    layer_index: usize,
    width: u32,
    height: u32,
    depth: u16,
    large_format: bool,
    channels: Vec<ChannelJob>,
}

/// A finished decode, already filtered for staleness.
pub struct CompletedDecode {
    pub layer_index: usize,
    pub width: u32,
    pub height: u32,
    /// Straight-alpha RGBA on success.
    pub result: Result<Vec<u8>, DecodeError>,
}

struct DecodeResponse {
    request_id: u64,
    epoch: u64,
    done: CompletedDecode,
}

/// Handle to the decode thread.  Owned by the engine; dropping it shuts the
/// thread down.
pub struct DecodeService {
    tx: Option<Sender<DecodeJob>>,
    rx: Receiver<DecodeResponse>,
    handle: Option<JoinHandle<()>>,
    next_request_id: u64,
    pending: HashSet<u64>,
    epoch: u64,
}

impl DecodeService {
    pub fn new() -> Self {
        let (tx, job_rx) = mpsc::channel::<DecodeJob>();
        let (resp_tx, rx) = mpsc::channel::<DecodeResponse>();

        let handle = std::thread::spawn(move || {
            // Channel close is the shutdown signal.
            while let Ok(job) = job_rx.recv() {
                let done = run_job(&job);
                let resp = DecodeResponse {
                    request_id: job.request_id,
                    epoch: job.epoch,
                    done,
                };
                if resp_tx.send(resp).is_err() {
                    break;
                }
            }
        });

        Self {
            tx: Some(tx),
            rx,
            handle: Some(handle),
            next_request_id: 0,
            pending: HashSet::new(),
            epoch: 0,
        }
    }

    /// Invalidate all in-flight requests; called when the host swaps in a new
    /// document.  Their responses will still arrive but are discarded.
    pub fn bump_epoch(&mut self) {
        self.epoch += 1;
        self.pending.clear();
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queue a layer for decoding.  Returns the request id, or `WorkerGone`
    /// if the thread has already shut down.
    pub fn submit(
        &mut self,
        layer_index: usize,
        width: u32,
        height: u32,
        depth: u16,
        large_format: bool,
        channels: Vec<ChannelJob>,
    ) -> Result<u64, DecodeError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let job = DecodeJob {
            request_id,
            epoch: self.epoch,
            layer_index,
            width,
            height,
            depth,
            large_format,
            channels,
        };

        let tx = self.tx.as_ref().ok_or(DecodeError::WorkerGone)?;
        tx.send(job).map_err(|_| DecodeError::WorkerGone)?;
        self.pending.insert(request_id);
        Ok(request_id)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain every finished decode whose request is still current.
    pub fn poll(&mut self) -> Vec<CompletedDecode> {
        let mut out = Vec::new();
        while let Ok(resp) = self.rx.try_recv() {
            if resp.epoch != self.epoch || !self.pending.remove(&resp.request_id) {
                log_warn!(
                    "dropping stale decode response for layer {} (epoch {} != {})",
                    resp.done.layer_index,
                    resp.epoch,
                    self.epoch
                );
                continue;
            }
            out.push(resp.done);
        }
        out
    }
}

impl Default for DecodeService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DecodeService {
    fn drop(&mut self) {
        // Closing the job channel ends the thread's recv loop.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_job(job: &DecodeJob) -> CompletedDecode {
    let result = decode_layer(job);
    CompletedDecode {
        layer_index: job.layer_index,
        width: job.width,
        height: job.height,
        result,
    }
}

fn decode_layer(job: &DecodeJob) -> Result<Vec<u8>, DecodeError> {
    let mut planes = Vec::with_capacity(job.channels.len());
    for ch in &job.channels {
        let compression = Compression::from_tag(ch.compression_tag)?;
        let plane = decode_channel(
            &ch.bytes,
            job.width,
            job.height,
            job.depth,
            compression,
            job.large_format,
        )?;
        planes.push((ch.id, normalize_samples(&plane, job.depth)));
    }
    Ok(assemble_rgba(&planes, job.width, job.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red_green_job() -> Vec<ChannelJob> {
        vec![
            ChannelJob { id: 0, compression_tag: 0, bytes: vec![255, 0] },
            ChannelJob { id: 1, compression_tag: 0, bytes: vec![0, 255] },
            ChannelJob { id: 2, compression_tag: 0, bytes: vec![0, 0] },
        ]
    }

    fn wait_poll(svc: &mut DecodeService) -> Vec<CompletedDecode> {
        for _ in 0..200 {
            let done = svc.poll();
            if !done.is_empty() {
                return done;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        Vec::new()
    }

    #[test]
    fn decodes_on_background_thread() {
        let mut svc = DecodeService::new();
        svc.submit(3, 2, 1, 8, false, red_green_job()).unwrap();
        let done = wait_poll(&mut svc);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].layer_index, 3);
        let rgba = done[0].result.as_ref().unwrap();
        assert_eq!(&rgba[..4], &[255, 0, 0, 255]);
        assert_eq!(&rgba[4..], &[0, 255, 0, 255]);
    }

    #[test]
    fn stale_epoch_responses_are_dropped() {
        let mut svc = DecodeService::new();
        svc.submit(0, 2, 1, 8, false, red_green_job()).unwrap();
        svc.bump_epoch();
        // Give the worker time to finish the stale job, then submit a fresh
        // one; only the fresh result may come back.
        svc.submit(1, 2, 1, 8, false, red_green_job()).unwrap();
        let done = wait_poll(&mut svc);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].layer_index, 1);
        assert!(!svc.has_pending());
    }

    #[test]
    fn bad_channel_fails_the_layer_only() {
        let mut svc = DecodeService::new();
        let channels = vec![ChannelJob { id: 0, compression_tag: 9, bytes: vec![] }];
        svc.submit(5, 2, 1, 8, false, channels).unwrap();
        let done = wait_poll(&mut svc);
        assert_eq!(done.len(), 1);
        assert!(matches!(
            done[0].result,
            Err(DecodeError::UnknownCompression(9))
        ));
    }

    #[test]
    fn drop_joins_the_thread() {
        let svc = DecodeService::new();
        drop(svc); // must not hang
    }
}
