//! Simulated dataset and worker pool
//!
//! Stands in for a real transport: every worker is a tokio task calling the
//! shared scheduler directly and "processing" a packet by sleeping for the
//! time its throughput implies.

use crate::config::SimulationConfig;
use async_trait::async_trait;
use packetizer::{
    CompletionReport, DatasetDescription, Element, ElementSpec, PacketReply, PacketizerError,
    SharedPacketizer, WorkerSpec,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Bytes a simulated entry occupies on disk
const BYTES_PER_ENTRY: u64 = 128;

/// Host name of the `index`-th synthetic host
fn host_name(index: usize) -> String {
    format!("node-{:02}", index)
}

/// Synthetic dataset spread over `hosts x shards_per_host` shards.
///
/// Sizes are only written into the description when `known_sizes` is set;
/// otherwise they stay hidden in [`ShardSizes`].
pub fn synthetic_dataset(
    sim: &SimulationConfig,
    rng: &mut StdRng,
) -> (DatasetDescription, ShardSizes) {
    let mut dataset = DatasetDescription::new("synthetic", Vec::new());
    let mut sizes = HashMap::new();

    for h in 0..sim.hosts {
        for s in 0..sim.shards_per_host {
            let path = format!("/data/synthetic/{}/part-{:04}.bin", host_name(h), s);
            let entries = rng.gen_range(sim.min_entries..=sim.max_entries);
            sizes.insert(path.clone(), entries);

            let mut spec = ElementSpec::new(host_name(h), path);
            if sim.known_sizes {
                spec = spec.with_entries(entries);
            }
            dataset.shards.push(spec);
        }
    }

    (dataset, ShardSizes(Arc::new(sizes)))
}

/// True entry count of every shard, as the workers would find on disk
#[derive(Debug, Clone, Default)]
pub struct ShardSizes(Arc<HashMap<String, u64>>);

impl ShardSizes {
    /// Sizes for a dataset read from a file: published counts are taken as
    /// is, the others are drawn from the simulated range
    pub fn for_dataset(
        dataset: &DatasetDescription,
        sim: &SimulationConfig,
        rng: &mut StdRng,
    ) -> Self {
        let sizes = dataset
            .shards
            .iter()
            .map(|spec| {
                let entries = spec
                    .entries
                    .unwrap_or_else(|| rng.gen_range(sim.min_entries..=sim.max_entries));
                (spec.path.clone(), entries)
            })
            .collect();
        Self(Arc::new(sizes))
    }

    pub fn get(&self, path: &str) -> Option<u64> {
        self.0.get(path).copied()
    }
}

/// Workers on dataset hosts round-robin, then remote workers
pub fn worker_specs(sim: &SimulationConfig, dataset: &DatasetDescription) -> Vec<WorkerSpec> {
    let mut hosts: Vec<&str> = Vec::new();
    for host in dataset.shards.iter().filter_map(|s| s.host.as_deref()) {
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    }

    let local = (0..sim.workers).map(|i| {
        let host = (!hosts.is_empty()).then(|| hosts[i % hosts.len()]);
        WorkerSpec::new(format!("worker-{:02}", i), host)
    });
    let remote = (0..sim.remote_workers).map(|i| WorkerSpec::new(format!("remote-{:02}", i), None));

    local.chain(remote).collect()
}

/// Entry counter answering from the simulated shard sizes
pub struct SimulatedCounter {
    sizes: ShardSizes,
    latency: Duration,
    failure_rate: f64,
    rng: std::sync::Mutex<StdRng>,
}

impl SimulatedCounter {
    pub fn new(sizes: ShardSizes, sim: &SimulationConfig) -> Self {
        Self {
            sizes,
            latency: Duration::from_millis(sim.count_latency_ms),
            failure_rate: sim.count_failure_rate,
            rng: std::sync::Mutex::new(StdRng::seed_from_u64(sim.seed ^ 0x5eed)),
        }
    }

    fn should_fail(&self) -> packetizer::Result<bool> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| {
                PacketizerError::Internal("Failed to acquire counter rng lock".to_string())
            })?;
        Ok(rng.gen_bool(self.failure_rate))
    }
}

#[async_trait]
impl packetizer::ShardCounter for SimulatedCounter {
    async fn count_entries(&self, worker: &str, element: &Element) -> packetizer::Result<u64> {
        let fail = self.should_fail()?;
        tokio::time::sleep(self.latency).await;

        if fail {
            return Err(PacketizerError::ShardCount {
                path: element.path().to_string(),
                reason: format!("{} could not open the file", worker),
            });
        }

        self.sizes
            .get(element.path())
            .ok_or_else(|| PacketizerError::ShardCount {
                path: element.path().to_string(),
                reason: "no such file".to_string(),
            })
    }
}

/// What one simulated worker did
#[derive(Debug, Clone, Default)]
pub struct WorkerOutcome {
    pub id: String,
    pub packets: u64,
    pub processed: u64,
    pub retries: u64,
    pub died: bool,
}

/// Behaviour of one simulated worker
#[derive(Debug, Clone)]
pub struct WorkerProfile {
    pub entries_per_sec: f64,
    pub failure_rate: f64,
    pub speedup: f64,
    pub retry_backoff: Duration,
}

impl WorkerProfile {
    /// Profile with throughput drawn around the configured mean
    pub fn draw(sim: &SimulationConfig, rng: &mut StdRng) -> Self {
        let jitter = if sim.throughput_jitter > 0.0 {
            rng.gen_range(-sim.throughput_jitter..sim.throughput_jitter)
        } else {
            0.0
        };
        Self {
            entries_per_sec: sim.entries_per_sec * (1.0 + jitter),
            failure_rate: sim.failure_rate,
            speedup: sim.speedup,
            retry_backoff: Duration::from_millis(sim.retry_backoff_ms),
        }
    }
}

/// Request, process and report packets until the scheduler runs dry
pub async fn run_worker(
    id: String,
    shared: SharedPacketizer,
    sizes: ShardSizes,
    profile: WorkerProfile,
    seed: u64,
) -> WorkerOutcome {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut outcome = WorkerOutcome {
        id: id.clone(),
        ..Default::default()
    };
    let mut report = None;

    loop {
        let reply = match shared.get_next_packet(&id, report.take()) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(worker = %id, error = %e, "Request failed, worker leaving");
                break;
            }
        };

        let packet = match reply {
            PacketReply::Packet(packet) => packet,
            PacketReply::Retry => {
                outcome.retries += 1;
                tokio::time::sleep(profile.retry_backoff).await;
                continue;
            }
            PacketReply::NoMoreWork => break,
        };
        outcome.packets += 1;

        if rng.gen_bool(profile.failure_rate) {
            warn!(worker = %id, path = %packet.path, first = packet.first, "Worker crashed");
            if let Err(e) = shared.mark_worker_dead(&id) {
                warn!(worker = %id, error = %e, "Failed to report dead worker");
            }
            outcome.died = true;
            break;
        }

        let shard_size = sizes.get(&packet.path).unwrap_or(0);
        let processed = shard_size.saturating_sub(packet.first).min(packet.num);
        let proc_secs = processed as f64 / profile.entries_per_sec;

        let started = Instant::now();
        tokio::time::sleep(Duration::from_secs_f64(proc_secs / profile.speedup)).await;
        debug!(
            worker = %id,
            path = %packet.path,
            first = packet.first,
            processed,
            "Packet processed"
        );

        outcome.processed += processed;
        let mut next = CompletionReport::processed(processed)
            .with_proc_time(proc_secs)
            .with_bytes_read(processed * BYTES_PER_ENTRY);
        next.latency_secs = started.elapsed().as_secs_f64();
        next.proc_cpu_secs = proc_secs * 0.9;
        if packet.size_unknown {
            next = next.with_shard_total(shard_size);
        }
        report = Some(next);
    }

    info!(
        worker = %outcome.id,
        packets = outcome.packets,
        processed = outcome.processed,
        died = outcome.died,
        "Worker finished"
    );
    outcome
}
