//! End-to-end tests on the in-memory substrate
//!
//! These exercise the full declare → materialize → route → probe → persist
//! cycle for the built-in scenarios without needing CAP_NET_ADMIN.

use netlab::substrate::sim::{SimEvent, SimSubstrate};
use netlab::{
    apply_route, apply_routes, materialize, run_campaign, FailMode, Lab, LabConfig, LabError,
    LinkFabric, MaterializationTarget, NodeId, NodeRegistry, Phase, Presets, ProbeConfig,
    ProbeSpec, Route, Scenario,
};
use std::sync::Arc;
use tempfile::tempdir;

/// Initialize logging for tests
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("netlab=debug")
        .with_test_writer()
        .try_init();
}

fn net(s: &str) -> ipnetwork::IpNetwork {
    s.parse().unwrap()
}

async fn bring_up(sim: &Arc<SimSubstrate>, scenario: &Scenario) -> netlab::LiveTopology {
    let (registry, fabric) = scenario.declare().unwrap();
    let mut live = materialize(sim.clone(), &registry, &fabric).await.unwrap();
    let report = apply_routes(&mut live, &scenario.routes).await.unwrap();
    assert!(report.is_clean(), "route failures: {:?}", report.failures);
    live
}

#[tokio::test]
async fn test_routed_scenario_reachability() {
    init_logging();
    let sim = Arc::new(SimSubstrate::new());
    let scenario = Presets::routed().unwrap();
    let mut live = bring_up(&sim, &scenario).await;

    let results = run_campaign(&mut live, &scenario.probes, &ProbeConfig::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 4);
    for result in &results {
        assert!(
            result.success(),
            "{} -> {} failed:\n{}",
            result.source(),
            result.destination(),
            result.output()
        );
    }
    // Two routers between h1 and h3
    assert!(results[0].output().contains("ttl=62"));

    live.stop().await;
    assert_eq!(sim.stack_count(), 0);
}

#[tokio::test]
async fn test_routed_scenario_needs_router_routes() {
    init_logging();
    let sim = Arc::new(SimSubstrate::new());
    let mut scenario = Presets::routed().unwrap();
    // Keep addresses and host defaults, drop the router subnet routes
    scenario
        .routes
        .retain(|r| !matches!(r, Route::Static { node, .. } if node.as_str().starts_with('r')));
    let mut live = bring_up(&sim, &scenario).await;

    let specs = [ProbeSpec::new("h1", "10.0.2.2"), ProbeSpec::new("h1", "10.0.0.3")];
    let results = run_campaign(&mut live, &specs, &ProbeConfig::default())
        .await
        .unwrap();
    assert!(!results[0].success());
    // The directly attached gateway still answers
    assert!(results[1].success());

    live.stop().await;
}

#[tokio::test]
async fn test_switched_scenario_standalone() {
    init_logging();
    let sim = Arc::new(SimSubstrate::new());
    let scenario = Presets::switched().unwrap();
    let mut live = bring_up(&sim, &scenario).await;

    let results = run_campaign(&mut live, &scenario.probes, &ProbeConfig::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success()));
    assert!(results[0].output().contains("ttl=64"));

    live.stop().await;
}

#[tokio::test]
async fn test_switched_scenario_secure_fails_until_standalone() {
    init_logging();
    let sim = Arc::new(SimSubstrate::new());
    let mut scenario = Presets::switched().unwrap();
    for node in &mut scenario.nodes {
        node.fail_mode = None;
    }
    let mut live = bring_up(&sim, &scenario).await;
    assert_eq!(live.node("s1").unwrap().fail_mode(), Some(FailMode::Secure));

    let probe = ProbeSpec::new("h1", "10.0.0.3");
    let before = netlab::run_probe(&live, &probe, &ProbeConfig::default())
        .await
        .unwrap();
    assert!(!before.success());
    assert!(before.output().contains("100% packet loss"));

    netlab::set_fail_mode(&mut live, "s1", FailMode::Standalone)
        .await
        .unwrap();
    netlab::set_fail_mode(&mut live, "s2", FailMode::Standalone)
        .await
        .unwrap();
    let after = netlab::run_probe(&live, &probe, &ProbeConfig::default())
        .await
        .unwrap();
    assert!(after.success(), "{}", after.output());

    live.stop().await;
}

#[tokio::test]
async fn test_campaign_keeps_order_and_count() {
    init_logging();
    let sim = Arc::new(SimSubstrate::new());
    let scenario = Presets::routed().unwrap();
    let mut live = bring_up(&sim, &scenario).await;

    let specs = vec![
        ProbeSpec::new("h3", "10.0.0.1"),
        ProbeSpec::new("h9", "10.0.0.1"),
        ProbeSpec::new("h1", "not-an-address"),
        ProbeSpec::new("h2", "10.0.2.2"),
        ProbeSpec::new("h1", "10.0.77.1"),
    ];
    let results = run_campaign(&mut live, &specs, &ProbeConfig::default())
        .await
        .unwrap();

    assert_eq!(results.len(), specs.len());
    for (spec, result) in specs.iter().zip(&results) {
        assert_eq!(result.source(), &spec.source);
        assert_eq!(result.destination(), spec.destination);
    }
    let outcome: Vec<bool> = results.iter().map(|r| r.success()).collect();
    assert_eq!(outcome, vec![true, false, false, true, false]);
    assert!(results[1].output().contains("h9"));
    assert_eq!(live.phase(), Phase::Probing);

    live.stop().await;
}

#[tokio::test]
async fn test_materialization_failure_tears_down() {
    init_logging();
    let sim = Arc::new(SimSubstrate::new());
    sim.fail_stack_creation("h1");
    let (registry, fabric) = Presets::routed().unwrap().declare().unwrap();

    let err = materialize(sim.clone(), &registry, &fabric)
        .await
        .unwrap_err();
    match &err {
        LabError::Materialization { target, .. } => {
            assert_eq!(target, &MaterializationTarget::Node(NodeId::from("h1")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("h1"));
    assert_eq!(sim.stack_count(), 0);

    // Routers created before the failure are torn down in reverse order
    let destroyed: Vec<String> = sim
        .journal()
        .into_iter()
        .filter_map(|e| match e {
            SimEvent::StackDestroyed { node } => Some(node.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(destroyed, vec!["r2", "r1"]);
}

#[tokio::test]
async fn test_router_without_links() {
    init_logging();
    let sim = Arc::new(SimSubstrate::new());
    let mut registry = NodeRegistry::new();
    registry.add_router("r1", net("10.0.0.3/24")).unwrap();

    let mut live = materialize(sim.clone(), &registry, &LinkFabric::new())
        .await
        .unwrap();
    assert_eq!(sim.forwarding("r1"), Some(true));
    assert!(live.node("r1").unwrap().forwarding());

    live.stop().await;
    assert_eq!(sim.forwarding("r1"), None);
    let journal = sim.journal();
    assert!(journal.contains(&SimEvent::Forwarding {
        node: NodeId::from("r1"),
        enabled: false
    }));

    // Second stop does nothing
    live.stop().await;
    assert_eq!(sim.journal().len(), journal.len());
    assert_eq!(live.phase(), Phase::Stopped);
}

#[tokio::test]
async fn test_route_requires_materialized_link() {
    init_logging();
    let route = Route::default_via("h1", "10.0.0.3".parse().unwrap());

    let mut registry = NodeRegistry::new();
    registry.add_router("r1", net("10.0.0.3/24")).unwrap();
    registry.add_host("h1", net("10.0.0.1/24")).unwrap();

    let unlinked = Arc::new(SimSubstrate::new());
    let mut live = materialize(unlinked, &registry, &LinkFabric::new())
        .await
        .unwrap();
    assert!(matches!(
        apply_route(&mut live, &route).await,
        Err(LabError::RouteApplication { .. })
    ));
    live.stop().await;

    let mut fabric = LinkFabric::new();
    fabric.declare(&registry, "h1", "r1", None).unwrap();
    let linked = Arc::new(SimSubstrate::new());
    let mut live = materialize(linked.clone(), &registry, &fabric)
        .await
        .unwrap();
    apply_route(&mut live, &route).await.unwrap();
    assert_eq!(linked.routes("h1").len(), 1);
    live.stop().await;
}

#[tokio::test]
async fn test_phase_ordering() {
    init_logging();
    let sim = Arc::new(SimSubstrate::new());
    let scenario = Presets::switched().unwrap();
    let mut live = bring_up(&sim, &scenario).await;

    run_campaign(&mut live, &scenario.probes, &ProbeConfig::default())
        .await
        .unwrap();
    assert!(matches!(
        apply_routes(&mut live, &[]).await,
        Err(LabError::OutOfPhase { .. })
    ));

    live.stop().await;
    assert!(matches!(
        run_campaign(&mut live, &scenario.probes, &ProbeConfig::default()).await,
        Err(LabError::OutOfPhase { .. })
    ));
}

#[tokio::test]
async fn test_lab_run_writes_artifact() {
    init_logging();
    let dir = tempdir().unwrap();
    let output = dir.path().join("result1.txt");
    let config = LabConfig {
        output: Some(output.clone()),
        ..Default::default()
    };
    let sim = Arc::new(SimSubstrate::new());
    let lab = Lab::with_substrate(config, sim.clone());

    let report = lab.run(&Presets::routed().unwrap()).await.unwrap();
    assert!(report.all_passed());
    assert_eq!(report.output, output);
    assert_eq!(sim.stack_count(), 0);

    let artifact = std::fs::read_to_string(&output).unwrap();
    let headers: Vec<&str> = artifact.lines().filter(|l| l.starts_with("==== ")).collect();
    assert_eq!(
        headers,
        vec![
            "==== h1 → 10.0.2.2 ====",
            "==== h2 → 10.0.2.2 ====",
            "==== h3 → 10.0.0.1 ====",
            "==== h3 → 10.0.3.2 ====",
        ]
    );
}

#[tokio::test]
async fn test_lab_run_without_probes_writes_empty_file() {
    init_logging();
    let dir = tempdir().unwrap();
    let output = dir.path().join("empty.txt");
    std::fs::write(&output, "old").unwrap();

    let mut scenario = Presets::switched().unwrap();
    scenario.probes.clear();
    let config = LabConfig {
        output: Some(output.clone()),
        ..Default::default()
    };
    let lab = Lab::with_substrate(config, Arc::new(SimSubstrate::new()));
    let report = lab.run(&scenario).await.unwrap();

    assert!(report.results.is_empty());
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
}
