//! Integration tests for disk-chain resolution.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;

use common::{
    memory_device, write_at, ChainBuilder, FaultInjectionDevice, HeldDevice, SEGMENT_BITS,
    SEGMENT_SIZE,
};
use oxitier::address::Address;
use oxitier::codec::{encode_key, RawBytes};
use oxitier::device::{Capacity, IoDispatcher, MemoryDevice, StorageDevice};
use oxitier::epoch::LightEpoch;
use oxitier::record::{encode_inline_record, encode_object_record, ObjectAddress, RecordInfo};
use oxitier::resolve::{PipelineConfig, ReadOutcome, ResolutionPipeline};
use oxitier::status::Status;

fn pipeline_on(device: Arc<dyn StorageDevice>) -> ResolutionPipeline<u64, u64> {
    ResolutionPipeline::new(
        Arc::new(LightEpoch::new()),
        device,
        None,
        PipelineConfig::default(),
    )
    .unwrap()
}

fn resolve_blocking<K, V>(
    pipeline: &ResolutionPipeline<K, V>,
    key: K,
    start: Address,
) -> (ReadOutcome<V>, u32)
where
    K: oxitier::codec::PersistKey,
    V: oxitier::codec::PersistValue,
{
    let (tx, rx) = unbounded();
    pipeline.resolve_with(key, start, 0, tx);
    let completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    (completion.outcome, completion.hops)
}

#[test]
fn test_absent_key_visits_every_record() {
    let device = Arc::new(FaultInjectionDevice::new(MemoryDevice::new(
        "log",
        SEGMENT_SIZE,
        Capacity::Unspecified,
    )));
    // Enough records that the chain crosses a segment boundary.
    let mut chain = ChainBuilder::new(64);
    for key in 0..150 {
        chain.push(device.as_ref(), key, key * 10);
    }
    assert!(chain.head().segment(SEGMENT_BITS) > 0);

    let pipeline = pipeline_on(device.clone());
    let (outcome, hops) = resolve_blocking(&pipeline, 999, chain.head());
    assert_eq!(outcome, ReadOutcome::NotFound);
    assert_eq!(hops, 149);

    // Every record is read once, newest first, and each read moves strictly backwards.
    let visited = device.read_addresses();
    let expected: Vec<Address> = chain.addresses().iter().rev().copied().collect();
    assert_eq!(visited, expected);
    assert!(visited.windows(2).all(|pair| pair[1] < pair[0]));

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.reads_issued, 150);
    assert_eq!(stats.not_found, 1);
    assert_eq!(pipeline.outstanding_reads(), 0);
}

#[test]
fn test_key_at_hop_k_takes_k_plus_one_reads() {
    let device = memory_device("log");
    let mut chain = ChainBuilder::new(64);
    for key in 0..8 {
        chain.push(device.as_ref(), key, key + 1000);
    }

    let pipeline = pipeline_on(device);
    // Key 5 sits two records behind the head.
    let (outcome, hops) = resolve_blocking(&pipeline, 5, chain.head());
    assert_eq!(
        outcome,
        ReadOutcome::Found {
            value: 1005,
            address: chain.addresses()[5],
        }
    );
    assert_eq!(hops, 2);
    assert_eq!(pipeline.stats().snapshot().reads_issued, 3);
}

#[test]
fn test_newest_record_wins() {
    let device = memory_device("log");
    let mut chain = ChainBuilder::new(64);
    chain.push(device.as_ref(), 1, 10);
    chain.push(device.as_ref(), 2, 20);
    chain.push(device.as_ref(), 1, 11);

    let pipeline = pipeline_on(device);
    let (outcome, hops) = resolve_blocking(&pipeline, 1, chain.head());
    assert_eq!(outcome.into_value(), Some(11));
    assert_eq!(hops, 0);
}

#[test]
fn test_tombstone_and_invalid_records() {
    let device = memory_device("log");
    let mut chain = ChainBuilder::new(64);
    chain.push(device.as_ref(), 1, 10);
    chain.push(device.as_ref(), 2, 20);
    let tomb = chain.push_with(
        device.as_ref(),
        RecordInfo::new(chain.head()).with_tombstone(true),
        2,
        0,
    );
    chain.push_with(
        device.as_ref(),
        RecordInfo::new(chain.head()).with_invalid(true),
        1,
        99,
    );

    let pipeline = pipeline_on(device);

    // The invalid head is skipped even though its key matches.
    let (outcome, _) = resolve_blocking(&pipeline, 1, chain.head());
    assert_eq!(outcome.into_value(), Some(10));

    let (outcome, hops) = resolve_blocking(&pipeline, 2, chain.head());
    assert_eq!(outcome, ReadOutcome::Tombstone { address: tomb });
    assert_eq!(outcome.status(), Status::NotFound);
    assert_eq!(hops, 1);
}

#[test]
fn test_chain_crosses_segments() {
    let device = memory_device("log");
    let mut chain = ChainBuilder::new(SEGMENT_SIZE - 40);
    for key in 0..4 {
        chain.push(device.as_ref(), key, key);
    }
    let segments: Vec<u64> = chain
        .addresses()
        .iter()
        .map(|a| a.segment(SEGMENT_BITS))
        .collect();
    assert!(segments.first() < segments.last());

    let pipeline = pipeline_on(device);
    let (outcome, hops) = resolve_blocking(&pipeline, 0, chain.head());
    assert_eq!(outcome.into_value(), Some(0));
    assert_eq!(hops, 3);
}

#[test]
fn test_object_payload_is_fetched() {
    let log = memory_device("log");
    let objects = memory_device("objects");

    let key = encode_key(&7u64).unwrap();
    let value = b"out-of-line value".to_vec();
    let object_address = Address::from_control(SEGMENT_SIZE + 128);
    let mut payload = key.clone();
    payload.extend_from_slice(&value);
    write_at(objects.as_ref(), object_address, &payload);

    let record_address = Address::from_control(64);
    let record = encode_object_record(
        RecordInfo::new(Address::INVALID),
        key.len(),
        value.len(),
        ObjectAddress {
            address: object_address,
            size: payload.len() as u64,
        },
    );
    write_at(log.as_ref(), record_address, &record);

    let pipeline = ResolutionPipeline::<u64, RawBytes>::new(
        Arc::new(LightEpoch::new()),
        log.clone(),
        Some(objects as Arc<dyn StorageDevice>),
        PipelineConfig::default(),
    )
    .unwrap();
    let (outcome, _) = resolve_blocking(&pipeline, 7, record_address);
    assert_eq!(
        outcome,
        ReadOutcome::Found {
            value: RawBytes::from(value),
            address: record_address,
        }
    );
    assert_eq!(pipeline.stats().snapshot().object_reads, 1);

    // Without an object log the same record cannot be resolved.
    let bare = ResolutionPipeline::<u64, RawBytes>::new(
        Arc::new(LightEpoch::new()),
        log,
        None,
        PipelineConfig::default(),
    )
    .unwrap();
    let (outcome, _) = resolve_blocking(&bare, 7, record_address);
    assert_eq!(outcome, ReadOutcome::Failed(Status::InvalidOperation));
}

#[test]
fn test_large_record_is_reread() {
    let device = memory_device("log");
    let value = vec![0xAB; 2000];
    let address = Address::from_control(64);
    write_at(
        device.as_ref(),
        address,
        &encode_inline_record(
            RecordInfo::new(Address::INVALID),
            &encode_key(&3u64).unwrap(),
            &value,
        ),
    );

    let pipeline = ResolutionPipeline::<u64, RawBytes>::new(
        Arc::new(LightEpoch::new()),
        device,
        None,
        PipelineConfig::default().with_read_size_hint(64),
    )
    .unwrap();
    let (outcome, hops) = resolve_blocking(&pipeline, 3, address);
    assert_eq!(outcome.into_value(), Some(RawBytes::from(value)));
    assert_eq!(hops, 0);

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.short_read_retries, 1);
    assert_eq!(stats.reads_issued, 2);
}

#[test]
fn test_persistently_short_read_is_corruption() {
    let faulty = FaultInjectionDevice::new(MemoryDevice::new(
        "log",
        SEGMENT_SIZE,
        Capacity::Unspecified,
    ));
    let address = Address::from_control(64);
    write_at(
        &faulty,
        address,
        &encode_inline_record(
            RecordInfo::new(Address::INVALID),
            &encode_key(&3u64).unwrap(),
            &[1u8; 1500],
        ),
    );
    faulty.inject_short_reads(600);

    let pipeline = ResolutionPipeline::<u64, RawBytes>::new(
        Arc::new(LightEpoch::new()),
        Arc::new(faulty),
        None,
        PipelineConfig::default(),
    )
    .unwrap();
    let (outcome, _) = resolve_blocking(&pipeline, 3, address);
    assert_eq!(outcome, ReadOutcome::Failed(Status::Corruption));
}

#[test]
fn test_read_error_fails_the_request() {
    let faulty = FaultInjectionDevice::new(MemoryDevice::new(
        "log",
        SEGMENT_SIZE,
        Capacity::Unspecified,
    ));
    let mut chain = ChainBuilder::new(64);
    for key in 0..4 {
        chain.push(&faulty, key, key);
    }
    faulty.inject_read_error_at(2);

    let faulty = Arc::new(faulty);
    let pipeline = pipeline_on(faulty.clone());
    let (outcome, hops) = resolve_blocking(&pipeline, 0, chain.head());
    assert_eq!(outcome, ReadOutcome::Failed(Status::IoError));
    assert_eq!(hops, 1);
    // No retries after the failure.
    assert_eq!(faulty.read_count(), 2);
    assert_eq!(pipeline.outstanding_reads(), 0);
}

#[test]
fn test_admission_never_exceeds_cap() {
    const CAP: usize = 4;
    const REQUESTS: u64 = 12;

    let inner = memory_device("log");
    let mut chain = ChainBuilder::new(64);
    for key in 0..3 {
        chain.push(inner.as_ref(), key, key);
    }
    let held = Arc::new(HeldDevice::new(inner));
    let pipeline = ResolutionPipeline::<u64, u64>::new(
        Arc::new(LightEpoch::new()),
        held.clone(),
        None,
        PipelineConfig::default().with_max_outstanding_reads(CAP),
    )
    .unwrap();

    let (tx, rx) = unbounded();
    let issuer = {
        let pipeline = pipeline.clone();
        let head = chain.head();
        thread::spawn(move || {
            for ctx in 0..REQUESTS {
                pipeline.resolve_with(ctx % 3, head, ctx, tx.clone());
            }
        })
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut delivered = Vec::new();
    while delivered.len() < REQUESTS as usize {
        assert!(Instant::now() < deadline, "requests stalled");
        assert!(pipeline.outstanding_reads() <= CAP);
        assert!(held.held() <= CAP);
        thread::sleep(Duration::from_millis(2));
        held.release_all();
        while let Ok(completion) = rx.try_recv() {
            delivered.push(completion);
        }
    }
    issuer.join().unwrap();

    delivered.sort_by_key(|c| c.ctx_id);
    for (ctx, completion) in delivered.iter().enumerate() {
        assert_eq!(completion.ctx_id, ctx as u64);
        assert_eq!(completion.outcome.value(), Some(&(ctx as u64 % 3)));
    }
    assert!(pipeline.stats().snapshot().admission_waits > 0);
    assert_eq!(pipeline.outstanding_reads(), 0);
}

#[test]
fn test_each_request_delivered_once_under_concurrency() {
    let device = memory_device("log");
    let mut chain = ChainBuilder::new(64);
    for key in 0..32 {
        chain.push(device.as_ref(), key, key * 2);
    }
    let pipeline = ResolutionPipeline::<u64, u64>::new(
        Arc::new(LightEpoch::new()),
        device,
        None,
        PipelineConfig::default().with_max_outstanding_reads(8),
    )
    .unwrap();

    let (tx, rx) = unbounded();
    let head = chain.head();
    let workers: Vec<_> = (0..4u64)
        .map(|t| {
            let pipeline = pipeline.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..50u64 {
                    let ctx = t * 1000 + i;
                    pipeline.resolve_with(ctx % 40, head, ctx, tx.clone());
                }
            })
        })
        .collect();
    drop(tx);
    for worker in workers {
        worker.join().unwrap();
    }

    let completions: Vec<_> = rx.iter().collect();
    assert_eq!(completions.len(), 200);
    let mut ids: Vec<u64> = completions.iter().map(|c| c.ctx_id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 200);
    for c in &completions {
        let key = c.ctx_id % 40;
        if key < 32 {
            assert_eq!(c.outcome.value(), Some(&(key * 2)));
        } else {
            assert_eq!(c.outcome, ReadOutcome::NotFound);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resolve_future_through_dispatcher() {
    let dispatcher = IoDispatcher::new(
        MemoryDevice::new("log", SEGMENT_SIZE, Capacity::Unspecified),
        2,
    )
    .unwrap();
    let mut chain = ChainBuilder::new(64);
    for key in 0..5 {
        chain.push(dispatcher.inner(), key, key + 500);
    }

    let pipeline = pipeline_on(Arc::new(dispatcher));
    assert_eq!(pipeline.resolve(1, chain.head()).await.into_value(), Some(501));
    assert_eq!(pipeline.resolve(77, chain.head()).await, ReadOutcome::NotFound);
    assert_eq!(
        pipeline.resolve(1, Address::INVALID).await,
        ReadOutcome::NotFound
    );
}
