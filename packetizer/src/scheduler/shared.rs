//! Scheduler shared between transport tasks

use super::packet::{CompletionReport, PacketReply};
use super::packetizer::Packetizer;
use crate::errors::{PacketizerError, Result};
use crate::stats::ProgressSnapshot;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable handle serializing access to one [`Packetizer`].
///
/// Every call holds the lock for one synchronous scheduler operation; the
/// lock is never held across an await point.
#[derive(Debug, Clone)]
pub struct SharedPacketizer {
    inner: Arc<Mutex<Packetizer>>,
}

impl SharedPacketizer {
    pub fn new(packetizer: Packetizer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(packetizer)),
        }
    }

    /// Lock the scheduler for a sequence of operations
    pub fn lock(&self) -> Result<MutexGuard<'_, Packetizer>> {
        self.inner
            .lock()
            .map_err(|_| PacketizerError::Internal("Failed to acquire packetizer lock".to_string()))
    }

    pub fn get_next_packet(
        &self,
        worker_id: &str,
        report: Option<CompletionReport>,
    ) -> Result<PacketReply> {
        self.lock()?.get_next_packet(worker_id, report)
    }

    pub fn mark_worker_dead(&self, worker_id: &str) -> Result<()> {
        self.lock()?.mark_worker_dead(worker_id)
    }

    pub fn stop(&self) -> Result<()> {
        self.lock()?.stop();
        Ok(())
    }

    pub fn is_finished(&self) -> Result<bool> {
        Ok(self.lock()?.is_finished())
    }

    pub fn progress_snapshot(&self) -> Result<ProgressSnapshot> {
        Ok(self.lock()?.progress_snapshot())
    }

    pub fn report_progress(&self) -> Result<ProgressSnapshot> {
        Ok(self.lock()?.report_progress())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacketizerConfig;
    use crate::dataset::{Element, ElementSpec};
    use crate::scheduler::WorkerSpec;

    fn create_test_shared() -> SharedPacketizer {
        let packetizer = Packetizer::new(
            PacketizerConfig {
                fixed_packet_size: Some(10),
                ..Default::default()
            },
            vec![Element::from_spec(
                ElementSpec::new("a", "a/0").with_entries(1000),
            )],
            (0..4)
                .map(|i| WorkerSpec::new(format!("w{}", i), Some("a")))
                .collect(),
        )
        .unwrap();
        SharedPacketizer::new(packetizer)
    }

    #[tokio::test]
    async fn test_concurrent_workers_cover_dataset() {
        let shared = create_test_shared();
        let mut handles = Vec::new();

        for i in 0..4 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("w{}", i);
                let mut processed = 0;
                let mut report = None;
                while let PacketReply::Packet(packet) =
                    shared.get_next_packet(&id, report).unwrap()
                {
                    processed += packet.num;
                    report = Some(CompletionReport::processed(packet.num));
                    tokio::task::yield_now().await;
                }
                processed
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 1000);
        assert!(shared.is_finished().unwrap());
        assert_eq!(shared.progress_snapshot().unwrap().processed, 1000);
    }

    #[test]
    fn test_stop_through_handle() {
        let shared = create_test_shared();
        shared.stop().unwrap();

        assert!(shared.is_finished().unwrap());
        assert!(shared.get_next_packet("w0", None).unwrap().is_no_more_work());
    }
}
