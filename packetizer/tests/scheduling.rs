//! Integration tests for packet dispatch
//!
//! Workers are driven in-process, round-robin, reporting every packet as
//! fully processed unless a test says otherwise.

use async_trait::async_trait;
use packetizer::{
    CompletionReport, Element, ElementSpec, Packet, PacketReply, Packetizer, PacketizerConfig,
    PacketizerError, ShardCounter, WorkerSpec,
};
use std::collections::BTreeMap;

fn sized(host: &str, path: &str, entries: u64) -> Element {
    Element::from_spec(ElementSpec::new(host, path).with_entries(entries))
}

/// Hosts A {100, 50}, B {200}, C {30}
fn scenario_elements() -> Vec<Element> {
    vec![
        sized("A", "A/shard1", 100),
        sized("A", "A/shard2", 50),
        sized("B", "B/shard1", 200),
        sized("C", "C/shard1", 30),
    ]
}

fn fixed_config(size: u64, ceiling: usize) -> PacketizerConfig {
    PacketizerConfig {
        fixed_packet_size: Some(size),
        max_workers_per_host: ceiling,
        ..Default::default()
    }
}

/// Drive every worker round-robin until all answer `NoMoreWork`
fn drain(packetizer: &mut Packetizer, workers: &[&str]) -> Vec<(String, Packet)> {
    let mut issued = Vec::new();
    let mut outstanding: Vec<Option<Packet>> = vec![None; workers.len()];
    let mut finished = vec![false; workers.len()];

    while finished.iter().any(|f| !f) {
        for (i, worker) in workers.iter().enumerate() {
            if finished[i] {
                continue;
            }
            let report = outstanding[i]
                .take()
                .map(|p| CompletionReport::processed(p.num).with_proc_time(0.01));
            match packetizer.get_next_packet(worker, report).unwrap() {
                PacketReply::Packet(packet) => {
                    issued.push((worker.to_string(), packet.clone()));
                    outstanding[i] = Some(packet);
                }
                PacketReply::NoMoreWork => finished[i] = true,
                PacketReply::Retry => {}
            }
        }
    }

    issued
}

/// Ranges per shard path, in issue order
fn ranges_by_shard(issued: &[(String, Packet)]) -> BTreeMap<String, Vec<(u64, u64)>> {
    let mut ranges: BTreeMap<String, Vec<(u64, u64)>> = BTreeMap::new();
    for (_, packet) in issued {
        ranges
            .entry(packet.path.clone())
            .or_default()
            .push((packet.first, packet.num));
    }
    ranges
}

#[test]
fn test_scenario_locality_and_packet_count() {
    let mut packetizer = Packetizer::new(
        fixed_config(25, 1),
        scenario_elements(),
        vec![WorkerSpec::new("wa", Some("A")), WorkerSpec::new("wb", Some("B"))],
    )
    .unwrap();

    let issued = drain(&mut packetizer, &["wa", "wb"]);

    let (worker, first) = &issued[0];
    assert_eq!(worker, "wa");
    assert_eq!((first.path.as_str(), first.first, first.num), ("A/shard1", 0, 25));
    let (worker, second) = &issued[1];
    assert_eq!(worker, "wb");
    assert_eq!((second.path.as_str(), second.first, second.num), ("B/shard1", 0, 25));

    let total: u64 = issued.iter().map(|(_, p)| p.num).sum();
    assert_eq!(total, 380);
    assert!(issued.len() <= 16);
    assert_eq!(packetizer.progress_snapshot().processed, 380);
    assert!(packetizer.is_finished());
}

#[test]
fn test_monotonic_ranges_cover_each_shard() {
    let mut packetizer = Packetizer::new(
        fixed_config(25, 1),
        scenario_elements(),
        vec![WorkerSpec::new("wa", Some("A")), WorkerSpec::new("wb", Some("B"))],
    )
    .unwrap();

    let issued = drain(&mut packetizer, &["wa", "wb"]);
    let expected_ends = [("A/shard1", 100), ("A/shard2", 50), ("B/shard1", 200), ("C/shard1", 30)];

    let ranges = ranges_by_shard(&issued);
    for (path, end) in expected_ends {
        let shard = &ranges[path];
        assert_eq!(shard[0].0, 0);
        for pair in shard.windows(2) {
            assert_eq!(pair[0].0 + pair[0].1, pair[1].0, "gap or overlap in {}", path);
        }
        let last = shard.last().unwrap();
        assert_eq!(last.0 + last.1, end);
    }
}

#[test]
fn test_each_worker_starts_on_its_home_host() {
    let elements = (0..4)
        .flat_map(|h| (0..3).map(move |s| sized(&format!("h{}", h), &format!("h{}/{}", h, s), 90)))
        .collect();
    let workers: Vec<WorkerSpec> = (0..4)
        .map(|h| WorkerSpec::new(format!("w{}", h), Some(&format!("h{}", h))))
        .collect();
    let mut packetizer = Packetizer::new(fixed_config(30, 1), elements, workers).unwrap();

    for h in (0..4).rev() {
        let packet = packetizer
            .get_next_packet(&format!("w{}", h), None)
            .unwrap()
            .into_packet()
            .unwrap();
        assert_eq!(packet.host, Some(format!("h{}", h)));
    }
}

#[test]
fn test_ceiling_limits_visiting_workers() {
    let elements = (0..8).map(|s| sized("h0", &format!("h0/{}", s), 100)).collect();
    let workers: Vec<WorkerSpec> =
        (0..5).map(|i| WorkerSpec::new(format!("w{}", i), None)).collect();
    let mut packetizer = Packetizer::new(fixed_config(10, 2), elements, workers).unwrap();

    let mut replies = Vec::new();
    for i in 0..5 {
        replies.push(packetizer.get_next_packet(&format!("w{}", i), None).unwrap());
    }

    assert!(replies[0].packet().is_some());
    assert!(replies[1].packet().is_some());
    assert!(replies[2..].iter().all(|r| r.is_no_more_work()));
    assert_eq!(packetizer.registry().host(0).unwrap().active_workers(), 2);

    // the two pinned workers still drain the whole host; their first
    // requests without a report get the outstanding packets again
    let issued = drain(&mut packetizer, &["w0", "w1"]);
    assert_eq!(issued[0].1, *replies[0].packet().unwrap());
    let total: u64 = issued.iter().map(|(_, p)| p.num).sum();
    assert_eq!(total, 800);
}

#[test]
fn test_home_grant_ignores_ceiling() {
    let mut packetizer = Packetizer::new(
        fixed_config(10, 1),
        vec![sized("h0", "h0/0", 100), sized("h0", "h0/1", 100)],
        vec![
            WorkerSpec::new("visitor", None),
            WorkerSpec::new("local", Some("h0")),
        ],
    )
    .unwrap();

    let visitor = packetizer.get_next_packet("visitor", None).unwrap();
    let local = packetizer.get_next_packet("local", None).unwrap();

    assert_eq!(visitor.packet().unwrap().path, "h0/0");
    assert_eq!(local.packet().unwrap().path, "h0/1");
    assert_eq!(packetizer.registry().host(0).unwrap().active_workers(), 1);
}

#[test]
fn test_dead_worker_packet_processed_once_elsewhere() {
    let mut packetizer = Packetizer::new(
        fixed_config(25, 1),
        scenario_elements(),
        vec![WorkerSpec::new("wa", Some("A")), WorkerSpec::new("wb", Some("B"))],
    )
    .unwrap();

    let lost = packetizer.get_next_packet("wa", None).unwrap().into_packet().unwrap();
    packetizer.mark_worker_dead("wa").unwrap();
    assert_eq!(packetizer.progress_snapshot().returned_entries, lost.num);
    assert!(matches!(
        packetizer.get_next_packet("wa", None),
        Err(PacketizerError::WorkerDead(_))
    ));

    let issued = drain(&mut packetizer, &["wb"]);
    let reissued = issued
        .iter()
        .filter(|(_, p)| p.path == lost.path && p.first == lost.first)
        .count();
    assert_eq!(reissued, 1);

    let total: u64 = issued.iter().map(|(_, p)| p.num).sum();
    assert_eq!(total, 380);
    let snapshot = packetizer.progress_snapshot();
    assert_eq!(snapshot.processed, 380);
    assert_eq!(snapshot.returned_entries, 0);
    assert_eq!(snapshot.unissued_entries, Some(0));
}

#[test]
fn test_range_lost_after_others_exhausted_is_reported() {
    let mut packetizer = Packetizer::new(
        fixed_config(25, 1),
        scenario_elements(),
        vec![WorkerSpec::new("wa", Some("A")), WorkerSpec::new("wb", Some("B"))],
    )
    .unwrap();

    let lost = packetizer.get_next_packet("wa", None).unwrap().into_packet().unwrap();
    let issued = drain(&mut packetizer, &["wb"]);
    assert!(!packetizer.is_finished());

    packetizer.mark_worker_dead("wa").unwrap();

    assert!(packetizer.is_finished());
    let snapshot = packetizer.progress_snapshot();
    assert_eq!(snapshot.returned_entries, lost.num);
    assert_eq!(snapshot.unissued_entries, Some(lost.num));
    let drained: u64 = issued.iter().map(|(_, p)| p.num).sum();
    assert_eq!(snapshot.processed, drained);
    assert_eq!(drained + lost.num, 380);
}

#[test]
fn test_zero_workers_issue_nothing() {
    let packetizer =
        Packetizer::new(PacketizerConfig::default(), scenario_elements(), Vec::new()).unwrap();

    assert_eq!(packetizer.base_packet_size(), 1);
    assert!(packetizer.is_finished());
}

#[test]
fn test_same_request_order_same_assignments() {
    let workers = vec![
        WorkerSpec::new("a0", Some("A")),
        WorkerSpec::new("r0", None),
        WorkerSpec::new("r1", None),
        WorkerSpec::new("b0", Some("B")),
    ];
    let order = ["r0", "a0", "r1", "b0"];
    let run = || {
        let mut packetizer =
            Packetizer::new(fixed_config(15, 2), scenario_elements(), workers.clone()).unwrap();
        drain(&mut packetizer, &order)
            .into_iter()
            .map(|(worker, p)| (worker, p.path, p.first, p.num))
            .collect::<Vec<_>>()
    };

    let first = run();
    let second = run();

    assert!(!first.is_empty());
    assert_eq!(first, second);
    // equal load, so hosts are tried in insertion order
    assert_eq!((first[0].0.as_str(), first[0].1.as_str()), ("r0", "A/shard1"));
    assert_eq!((first[1].0.as_str(), first[1].1.as_str()), ("a0", "A/shard2"));
    assert_eq!((first[2].0.as_str(), first[2].1.as_str()), ("r1", "B/shard1"));
}

#[test]
fn test_invalid_elements_never_issued() {
    let mut packetizer = Packetizer::new(
        fixed_config(25, 4),
        vec![
            sized("A", "A/empty", 0),
            Element::from_spec(
                ElementSpec::new("A", "A/late")
                    .with_entries(10)
                    .with_range(20, None),
            ),
            Element::from_spec(
                ElementSpec::new("A", "A/clamped")
                    .with_entries(40)
                    .with_range(10, Some(100)),
            ),
        ],
        vec![WorkerSpec::new("w", Some("A"))],
    )
    .unwrap();
    assert!(packetizer.is_partially_invalid());

    let issued = drain(&mut packetizer, &["w"]);
    let paths: Vec<&str> = issued.iter().map(|(_, p)| p.path.as_str()).collect();
    assert_eq!(paths, vec!["A/clamped"]);
    assert_eq!((issued[0].1.first, issued[0].1.num), (10, 30));
}

/// Counter reporting every shard as 120 entries long
struct FixedCounter;

#[async_trait]
impl ShardCounter for FixedCounter {
    async fn count_entries(&self, _worker: &str, _element: &Element) -> packetizer::Result<u64> {
        Ok(120)
    }
}

#[tokio::test]
async fn test_validation_then_dispatch() {
    let elements = (0..6)
        .map(|i| Element::from_spec(ElementSpec::new(format!("h{}", i % 3), format!("s{}", i))))
        .collect();
    let workers = vec![
        WorkerSpec::new("w0", Some("h0")),
        WorkerSpec::new("w1", Some("h1")),
        WorkerSpec::new("w2", None),
    ];
    let mut packetizer = Packetizer::new(PacketizerConfig::default(), elements, workers).unwrap();

    assert!(matches!(
        packetizer.get_next_packet("w0", None),
        Err(PacketizerError::ValidationRequired)
    ));

    let summary = packetizer.validate(&FixedCounter).await.unwrap();
    assert_eq!(summary.counted, 6);
    // 720 / (20 * 3)
    assert_eq!(packetizer.base_packet_size(), 12);

    let issued = drain(&mut packetizer, &["w0", "w1", "w2"]);
    let total: u64 = issued.iter().map(|(_, p)| p.num).sum();
    assert_eq!(total, 720);
    assert!(issued.iter().all(|(_, p)| !p.size_unknown));
}
