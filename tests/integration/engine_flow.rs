//! Full-graph engine flow.
//!
//! Wires the coordinator, tracker, observer, and engine exactly as
//! the binary does, over the mock chain, and drives the core loop by
//! hand: watcher events in, on-chain calls out.

use alloy::primitives::{Address, U256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lbf_rebalancer::chain::ChainClients;
use lbf_rebalancer::coordinator::deployment::DeploymentCoordinator;
use lbf_rebalancer::coordinator::network::{NetworkCoordinator, NetworkCoordinatorConfig};
use lbf_rebalancer::engine::discovery::{Discoverer, DiscoveryConfig};
use lbf_rebalancer::engine::executor::{Executor, ExecutorConfig};
use lbf_rebalancer::engine::scorer::{Scorer, ScorerConfig};
use lbf_rebalancer::engine::{Engine, EngineConfig, Event, InboxForwarder};
use lbf_rebalancer::observer::PoolObserver;
use lbf_rebalancer::registry::StaticNetworkRegistry;
use lbf_rebalancer::tracker::{BalanceTracker, BalanceTrackerConfig};
use lbf_rebalancer::types::{Deployments, NetworkMode, ParentPool};
use tokio::sync::mpsc;

use crate::mock_chain::{make_network, MockChainFactory, PoolCall};

const OPERATOR: Address = Address::repeat_byte(0xEE);

fn u(v: u64) -> U256 {
    U256::from(v)
}

fn make_deployments() -> Deployments {
    Deployments {
        pools: HashMap::from([("b".to_string(), Address::repeat_byte(0x11))]),
        parent_pool: ParentPool {
            network: "a".to_string(),
            address: Address::repeat_byte(0x10),
        },
        usdc: HashMap::from([
            ("a".to_string(), Address::repeat_byte(0x20)),
            ("b".to_string(), Address::repeat_byte(0x21)),
        ]),
        iou: HashMap::from([
            ("a".to_string(), Address::repeat_byte(0x30)),
            ("b".to_string(), Address::repeat_byte(0x31)),
        ]),
    }
}

struct Graph {
    factory: Arc<MockChainFactory>,
    coordinator: Arc<NetworkCoordinator>,
    engine: Engine,
    observer_rx: mpsc::Receiver<Event>,
}

/// Build the whole graph the way `main` does, with a short pool-watch
/// interval so observer events arrive quickly.
async fn build_graph() -> Graph {
    let factory = Arc::new(MockChainFactory::new());
    let clients = Arc::new(ChainClients::new(Box::new(factory.clone())));
    let deployments = Arc::new(DeploymentCoordinator::with_static(make_deployments()));

    let coordinator = Arc::new(NetworkCoordinator::new(
        Arc::new(StaticNetworkRegistry::new(vec![
            make_network("a", 1001),
            make_network("b", 1002),
        ])),
        deployments.clone(),
        NetworkCoordinatorConfig {
            mode: NetworkMode::Localhost,
            whitelist: vec![],
            blacklist: vec![],
        },
    ));

    let tracker = Arc::new(BalanceTracker::new(
        OPERATOR,
        clients.clone(),
        deployments.clone(),
        BalanceTrackerConfig {
            update_interval: Duration::from_millis(20),
            min_allowance_usdc: U256::ZERO,
            min_allowance_iou: U256::ZERO,
            approve_gas_limit: 100_000,
        },
    ));

    let (observer_tx, observer_rx) = mpsc::channel(64);
    let observer = Arc::new(PoolObserver::new(
        clients.clone(),
        deployments.clone(),
        Duration::from_millis(20),
        observer_tx,
    ));

    coordinator.register_listener(clients.clone()).await;
    coordinator.register_listener(tracker.clone()).await;
    coordinator.register_listener(observer.clone()).await;

    // The engine's own inbox is driven by hand in these tests.
    let (_engine_tx, engine_rx) = mpsc::channel(64);

    let engine = Engine::new(
        EngineConfig {
            network_update_interval: Duration::from_secs(300),
            rebalance_interval: Duration::from_secs(30),
        },
        coordinator.clone(),
        deployments,
        tracker.clone(),
        observer,
        Discoverer::new(DiscoveryConfig {
            deficit_threshold: u(10),
            surplus_threshold: u(10),
            net_total_allowance: u(10_000_000),
        }),
        Scorer::new(ScorerConfig { min_score: 0.0 }),
        Executor::new(
            clients,
            tracker,
            ExecutorConfig {
                gas_limit: 1_500_000,
                dry_run: false,
            },
        ),
        engine_rx,
    );

    Graph {
        factory,
        coordinator,
        engine,
        observer_rx,
    }
}

#[tokio::test]
async fn pool_watcher_event_drives_a_fill() {
    let mut g = build_graph().await;

    // Seed chain `a` before startup: a 1 USDC deficit the operator
    // can fill with 5 USDC on hand.
    {
        let chain = g.factory.chain("a");
        let mut chain = chain.lock().unwrap();
        chain.native = u(1);
        chain.pool_data = (u(1_000_000), U256::ZERO);
        chain.tokens.insert(Address::repeat_byte(0x20), u(5_000_000));
    }

    g.coordinator.start().await.unwrap();
    assert_eq!(g.coordinator.active_networks().len(), 2);

    // Give the token watchers one cycle to observe the USDC balance.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The pool watcher posts the reading; replay it into the engine.
    let event = tokio::time::timeout(Duration::from_secs(2), g.observer_rx.recv())
        .await
        .expect("pool watcher should post")
        .expect("inbox open");
    let mut saw_a = matches!(&event, Event::PoolUpdated { network, .. } if network == "a");
    g.engine.handle_event(event).await;
    // Depending on interleaving the first event may be `b`'s reading;
    // pump until `a`'s arrives.
    while !saw_a {
        let event = tokio::time::timeout(Duration::from_secs(2), g.observer_rx.recv())
            .await
            .expect("pool watcher should post")
            .expect("inbox open");
        saw_a = matches!(&event, Event::PoolUpdated { network, .. } if network == "a");
        g.engine.handle_event(event).await;
    }

    let calls = g.factory.chain("a").lock().unwrap().calls.clone();
    assert!(
        calls.contains(&PoolCall::FillDeficit {
            pool: Address::repeat_byte(0x10),
            amount: u(1_000_000),
        }),
        "expected a fill on chain a, got {calls:?}"
    );

    g.engine.shutdown();
}

#[tokio::test]
async fn networks_changed_prunes_pool_data() {
    let mut g = build_graph().await;
    g.coordinator.start().await.unwrap();

    g.engine
        .handle_event(Event::PoolUpdated {
            network: "a".into(),
            deficit: U256::ZERO,
            surplus: U256::ZERO,
        })
        .await;
    g.engine
        .handle_event(Event::PoolUpdated {
            network: "b".into(),
            deficit: U256::ZERO,
            surplus: U256::ZERO,
        })
        .await;
    assert!(g.engine.pool_data("a").is_some());
    assert!(g.engine.pool_data("b").is_some());

    g.engine
        .handle_event(Event::NetworksChanged(vec![make_network("a", 1001)]))
        .await;
    assert!(g.engine.pool_data("a").is_some());
    assert!(g.engine.pool_data("b").is_none());

    g.engine.shutdown();
}

#[tokio::test]
async fn sweep_without_data_is_a_noop() {
    let mut g = build_graph().await;
    g.coordinator.start().await.unwrap();

    let report = g.engine.sweep().await;
    assert_eq!(report.discovered, 0);
    assert_eq!(report.executed, 0);
    assert_eq!(report.total_redeemed, U256::ZERO);

    // Sweep numbering advances even when idle.
    let report = g.engine.sweep().await;
    assert_eq!(report.sweep_number, 2);

    g.engine.shutdown();
}

#[tokio::test]
async fn engine_shutdown_is_idempotent() {
    let mut g = build_graph().await;
    g.coordinator.start().await.unwrap();
    g.engine.shutdown();
    g.engine.shutdown();
}

#[tokio::test]
async fn inbox_forwarder_relays_network_changes() {
    let (tx, mut rx) = mpsc::channel(4);
    let forwarder = InboxForwarder::new(tx);

    use lbf_rebalancer::coordinator::network::NetworkUpdateListener;
    assert_eq!(forwarder.name(), "engine-inbox");
    forwarder
        .on_networks_updated(&[make_network("a", 1001)])
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        Event::NetworksChanged(networks) => {
            assert_eq!(networks.len(), 1);
            assert_eq!(networks[0].name, "a");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
