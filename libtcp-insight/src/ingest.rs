use crate::packet::RawSegment;
use crate::session::Session;
use crossbeam_channel::{unbounded, Sender};
use std::sync::Arc;
use std::thread;

enum Job {
    Segment(Box<RawSegment>),
    Exit,
}

/// Single-writer feed for a session.
///
/// Producers hand segments over from any thread; one worker applies them
/// in arrival order, which keeps per-connection status transitions causal
/// even when the capture source is multi-threaded. The worker polls the
/// session's capturing flag and stops within one packet of it being
/// cleared.
pub struct IngestQueue {
    tx: Sender<Job>,
    worker: Option<thread::JoinHandle<()>>,
}

impl IngestQueue {
    pub fn spawn(session: Arc<Session>) -> Self {
        let (tx, rx) = unbounded();
        let worker = thread::spawn(move || {
            for job in rx.iter() {
                match job {
                    Job::Exit => break,
                    Job::Segment(raw) => {
                        if !session.is_capturing() {
                            debug!("capture stopped, ingest worker exiting");
                            break;
                        }
                        // fatal per packet only: drop it and continue
                        if let Err(e) = session.handle_segment(*raw) {
                            debug!("segment dropped: {e}");
                        }
                    }
                }
            }
        });
        IngestQueue {
            tx,
            worker: Some(worker),
        }
    }

    /// Queue one segment. Never blocks the producer.
    pub fn send(&self, raw: RawSegment) {
        if self.tx.send(Job::Segment(Box::new(raw))).is_err() {
            warn!("ingest worker is gone, segment lost");
        }
    }

    /// Ask the worker to finish the queued work and wait for it.
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let _ = self.tx.send(Job::Exit);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IngestQueue {
    fn drop(&mut self) {
        self.finish();
    }
}
