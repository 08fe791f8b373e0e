//! # QC-08 dPoS Benchmarks
//!
//! Recovery is a fold over every block since genesis, so its cost
//! grows with chain length. Measured here:
//! - Full replay of chains of increasing length
//! - Single block application on top of a populated state
//! - State digest (run after every reorg and on shutdown)

use std::time::Duration;

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use qc_08_dpos::domain::{replay, ChainState};
use qc_08_dpos::ports::LedgerAdapter;
use qc_08_dpos::DposConfig;
use shared_types::Block;

use crate::harness::TestNetwork;

fn bench_config() -> DposConfig {
    let mut config = DposConfig::regtest();
    config.activation_delay = 2;
    config
}

/// Blocks of a chain with a full team that keeps rotating for `extra`
/// blocks after activation.
fn build_chain(extra: u64) -> Vec<Block> {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    runtime.block_on(async {
        let network = TestNetwork::new(4, bench_config());
        network.bring_up().await;
        for _ in 0..extra {
            network.clock.advance(1_000);
            network.ledger.mine_block(network.clock.now());
        }
        let height = network.ledger.height();
        let mut blocks = Vec::with_capacity(height as usize + 1);
        for h in 0..=height {
            blocks.push(network.ledger.block(h).await.expect("block on chain"));
        }
        blocks
    })
}

pub fn replay_from_genesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08/dpos/replay");
    group.measurement_time(Duration::from_secs(10));
    let config = bench_config();

    for length in [100u64, 1_000] {
        let blocks = build_chain(length);
        group.throughput(Throughput::Elements(blocks.len() as u64));
        group.bench_with_input(BenchmarkId::new("full_replay", length), &blocks, |b, blocks| {
            b.iter(|| black_box(replay(blocks.iter(), &config).expect("replay")))
        });
    }

    group.finish();
}

pub fn apply_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08/dpos/apply_block");
    let config = bench_config();
    let blocks = build_chain(200);
    let (last, prefix) = blocks.split_last().expect("non-empty chain");
    let state: ChainState = replay(prefix.iter(), &config).expect("replay");

    group.bench_function("rotate_team", |b| {
        b.iter(|| {
            let mut next = state.clone();
            black_box(next.apply_block(last, &config).expect("apply"))
        })
    });

    group.bench_function("state_digest", |b| {
        b.iter(|| black_box(state.digest().expect("digest")))
    });

    group.finish();
}

pub fn register_benchmarks(c: &mut Criterion) {
    replay_from_genesis(c);
    apply_block(c);
}
