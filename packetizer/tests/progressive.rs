//! Integration tests for progressive packet sizing
//!
//! Shard sizes are unknown up front. Workers receive probe packets and
//! report the shard size back, the way a worker opening the file would.

use packetizer::{
    CompletionReport, Element, ElementSpec, Packet, PacketReply, Packetizer, PacketizerConfig,
    SizeStrategy, WorkerSpec,
};
use std::collections::BTreeMap;

fn progressive() -> PacketizerConfig {
    PacketizerConfig {
        strategy: SizeStrategy::Progressive,
        ..Default::default()
    }
}

fn unsized_element(host: &str, path: &str) -> Element {
    Element::from_spec(ElementSpec::new(host, path))
}

/// Report a worker would send after processing `packet` of a shard with
/// `shard_size` entries
fn report_for(packet: &Packet, shard_size: u64) -> CompletionReport {
    let processed = shard_size.saturating_sub(packet.first).min(packet.num);
    let report = CompletionReport::processed(processed).with_proc_time(0.01);
    if packet.size_unknown {
        report.with_shard_total(shard_size)
    } else {
        report
    }
}

#[test]
fn test_retry_while_probe_outstanding() {
    let mut packetizer = Packetizer::new(
        progressive(),
        vec![unsized_element("a", "a/0")],
        vec![WorkerSpec::new("w0", Some("a")), WorkerSpec::new("w1", Some("a"))],
    )
    .unwrap();
    assert!(!packetizer.needs_validation());
    assert_eq!(packetizer.estimated_total(), None);

    let probe = packetizer.get_next_packet("w0", None).unwrap().into_packet().unwrap();
    assert!(probe.size_unknown);
    assert_eq!((probe.first, probe.num), (0, 100));

    assert_eq!(packetizer.get_next_packet("w1", None).unwrap(), PacketReply::Retry);

    let next = packetizer
        .get_next_packet("w0", Some(report_for(&probe, 250)))
        .unwrap()
        .into_packet()
        .unwrap();
    assert!(!next.size_unknown);
    assert_eq!(next.first, 100);
    assert_eq!(packetizer.estimated_total(), Some(250));
    // 250 / (20 * 2)
    assert_eq!(packetizer.base_packet_size(), 6);

    let joined = packetizer.get_next_packet("w1", None).unwrap().into_packet().unwrap();
    assert_eq!(joined.first, next.first + next.num);
}

#[test]
fn test_short_probe_reveals_size() {
    let mut packetizer = Packetizer::new(
        progressive(),
        vec![unsized_element("a", "a/0"), unsized_element("a", "a/1")],
        vec![WorkerSpec::new("w0", Some("a"))],
    )
    .unwrap();

    let probe = packetizer.get_next_packet("w0", None).unwrap().into_packet().unwrap();
    // the shard ended after 40 entries; no explicit total in the report
    let next = packetizer
        .get_next_packet("w0", Some(CompletionReport::processed(40)))
        .unwrap()
        .into_packet()
        .unwrap();

    assert_eq!(probe.path, "a/0");
    assert_eq!(packetizer.registry().element(0).unwrap().entries(), Some(40));
    assert_eq!(next.path, "a/1");
    assert!(next.size_unknown);
}

#[test]
fn test_uniform_shards_drain_with_stable_estimate() {
    let shard_size: u64 = 500;
    let elements = (0..20).map(|i| unsized_element("", &format!("part-{:04}", i))).collect();
    let workers: Vec<WorkerSpec> =
        (0..4).map(|i| WorkerSpec::new(format!("w{}", i), None)).collect();
    let mut packetizer = Packetizer::new(progressive(), elements, workers).unwrap();

    let ids: Vec<String> = (0..4).map(|i| format!("w{}", i)).collect();
    let mut outstanding: Vec<Option<Packet>> = vec![None; ids.len()];
    let mut finished = vec![false; ids.len()];
    let mut per_shard: BTreeMap<String, u64> = BTreeMap::new();
    let mut previous_estimate = 0;

    while finished.iter().any(|f| !f) {
        for (i, id) in ids.iter().enumerate() {
            if finished[i] {
                continue;
            }
            let report = outstanding[i].take().map(|p| {
                *per_shard.entry(p.path.clone()).or_default() +=
                    shard_size.saturating_sub(p.first).min(p.num);
                report_for(&p, shard_size)
            });
            match packetizer.get_next_packet(id, report).unwrap() {
                PacketReply::Packet(packet) => outstanding[i] = Some(packet),
                PacketReply::NoMoreWork => finished[i] = true,
                PacketReply::Retry => {}
            }

            if let Some(estimate) = packetizer.estimated_total() {
                assert!(estimate >= previous_estimate);
                assert_eq!(estimate, 20 * shard_size);
                previous_estimate = estimate;
            }
        }
    }

    assert_eq!(per_shard.len(), 20);
    assert!(per_shard.values().all(|&n| n == shard_size));
    assert_eq!(packetizer.progress_snapshot().processed, 20 * shard_size);
    // 10000 / (20 * 4)
    assert_eq!(packetizer.base_packet_size(), 125);
}

#[test]
fn test_dead_prober_releases_shard() {
    let mut packetizer = Packetizer::new(
        progressive(),
        vec![unsized_element("a", "a/0")],
        vec![WorkerSpec::new("w0", Some("a")), WorkerSpec::new("w1", Some("a"))],
    )
    .unwrap();

    let probe = packetizer.get_next_packet("w0", None).unwrap().into_packet().unwrap();
    assert_eq!(packetizer.get_next_packet("w1", None).unwrap(), PacketReply::Retry);

    packetizer.mark_worker_dead("w0").unwrap();
    let again = packetizer.get_next_packet("w1", None).unwrap().into_packet().unwrap();

    assert_eq!((again.first, again.num), (probe.first, probe.num));
    assert!(again.size_unknown);
}

#[test]
fn test_estimate_counts_scheduled_entries_only() {
    let shard_size: u64 = 500;
    let elements = (0..10)
        .map(|i| {
            Element::from_spec(ElementSpec::new("a", format!("a/{}", i)).with_range(100, None))
        })
        .collect();
    let mut packetizer =
        Packetizer::new(progressive(), elements, vec![WorkerSpec::new("w0", Some("a"))]).unwrap();

    let mut report = None;
    let mut estimates = Vec::new();
    while let PacketReply::Packet(packet) = packetizer.get_next_packet("w0", report).unwrap() {
        assert!(packet.first >= 100);
        report = Some(report_for(&packet, shard_size));
        if let Some(estimate) = packetizer.estimated_total() {
            estimates.push(estimate);
        }
    }

    assert!(!estimates.is_empty());
    assert!(estimates.iter().all(|&e| e == 10 * 400));
    assert_eq!(packetizer.progress_snapshot().processed, 10 * 400);
}
