//! # Quantum-Chain Masternode Benchmarks
//!
//! | Operation | When it runs |
//! |-----------|--------------|
//! | Full replay | `reindex`, startup without snapshot, shutdown check |
//! | Block application | every connected block |
//! | State digest | after every reorg |
//! | Signature recovery | every gossip message |

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use qc_08_dpos::adapters::{K256Signer, K256Verifier};
use qc_08_dpos::domain::HeartbeatMessage;
use qc_08_dpos::ports::{MasternodeSigner, SignatureVerifier};

// ============================================================================
// QC-08: Replay and block application
// ============================================================================

fn bench_replay(c: &mut Criterion) {
    qc_tests::benchmarks::qc_08_dpos::register_benchmarks(c);
}

// ============================================================================
// QC-08: Gossip signature recovery
// ============================================================================

fn bench_gossip_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08/dpos/gossip");
    let signer = K256Signer::from_seed(b"bench-operator").expect("seeded key");
    let hash = HeartbeatMessage::signing_hash(1_700_000_000_000);
    let auth = signer.sign(&hash).expect("sign");

    group.bench_function("heartbeat_sign", |b| {
        b.iter(|| black_box(signer.sign(&hash).expect("sign")))
    });
    group.bench_function("heartbeat_recover_signer", |b| {
        b.iter(|| black_box(K256Verifier.verify(&hash, &auth)))
    });

    group.finish();
}

criterion_group!(benches, bench_replay, bench_gossip_verification);
criterion_main!(benches);
