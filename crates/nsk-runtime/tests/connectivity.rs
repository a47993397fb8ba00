use nsk_runtime::node::models::{INPUT_PROBE, PARROT_NEURON};
use nsk_runtime::{
    run_cluster, ConnectionFilter, ConnectionRule, Kernel, KernelConfig, KernelError, NodeId,
    NodeParams, Result, SynapseSpec, STATIC_SYNAPSE,
};

/// (source, target, weight bits, delay ms bits) of a rank's connections
type Edges = Vec<(NodeId, NodeId, u64, u64)>;

fn build(k: &mut Kernel) -> Result<Edges> {
    let sources = k.create(PARROT_NEURON, 12, &NodeParams::default())?;
    let targets = k.create(INPUT_PROBE, 9, &NodeParams::default())?;
    k.connect(
        &sources,
        &targets,
        &ConnectionRule::FixedIndegree {
            indegree: 4,
            allow_autapses: true,
            allow_multapses: false,
        },
        &SynapseSpec::default().with_weight(0.5),
    )?;
    k.connect(
        &sources,
        &sources,
        &ConnectionRule::PairwiseBernoulli {
            p: 0.2,
            allow_autapses: false,
        },
        &SynapseSpec::default().with_delay(2.5),
    )?;
    k.connect(
        &targets,
        &sources,
        &ConnectionRule::FixedOutdegree {
            outdegree: 2,
            allow_autapses: true,
            allow_multapses: true,
        },
        &SynapseSpec::default(),
    )?;
    k.connect(
        &sources,
        &targets,
        &ConnectionRule::FixedTotalNumber {
            n: 30,
            allow_autapses: true,
            allow_multapses: true,
        },
        &SynapseSpec::default().with_weight(-1.0),
    )?;
    Ok(k
        .get_connections(&ConnectionFilter::all())?
        .into_iter()
        .map(|c| (c.source, c.target, c.weight.to_bits(), c.delay_ms.to_bits()))
        .collect())
}

fn network(ranks: usize, threads: usize) -> Edges {
    let config = KernelConfig::default().with_threads(threads).with_seed(2024);
    let mut edges: Edges = run_cluster(ranks, &config, build)
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    edges.sort_unstable();
    edges
}

#[test]
fn network_is_independent_of_layout() {
    let reference = network(1, 1);
    assert!(reference.len() > 9 * 4 + 9 * 2);
    assert_eq!(network(1, 3), reference);
    assert_eq!(network(2, 2), reference);
    assert_eq!(network(3, 1), reference);
}

#[test]
fn vp_decomposition_agrees_across_ranks() {
    let config = KernelConfig::default().with_threads(2);
    let layouts = run_cluster(2, &config, |k| {
        let vp = k.vp();
        Ok((1..=16)
            .map(|n| {
                let id = NodeId::new(n);
                (vp.node_id_to_vp(id), vp.node_id_to_thread(id), vp.node_id_to_rank(id))
            })
            .collect::<Vec<_>>())
    })
    .unwrap();

    assert_eq!(layouts[0], layouts[1]);
    assert_eq!(layouts[0][4].0, 1);
    assert_eq!(layouts[0][4].2, 1);
    assert_eq!(layouts[0][4].1, 0);
}

#[test]
fn connections_live_with_their_target() {
    let config = KernelConfig::default().with_threads(2);
    let checks = run_cluster(2, &config, |k| {
        let nodes = k.create(PARROT_NEURON, 8, &NodeParams::default())?;
        k.connect(&nodes, &nodes, &ConnectionRule::all_to_all(), &SynapseSpec::default())?;
        let connections = k.get_connections(&ConnectionFilter::all())?;
        let vp = k.vp();
        Ok(connections
            .iter()
            .all(|c| vp.is_local_node(c.target) && vp.node_id_to_thread(c.target) == c.thread)
            && connections.len() == 32)
    })
    .unwrap();
    assert_eq!(checks, vec![true, true]);
}

#[test]
fn disconnect_then_restructure_removes_descriptor() {
    let config = KernelConfig::default().with_threads(2);
    let counts = run_cluster(2, &config, |k| {
        let a = k.create(PARROT_NEURON, 2, &NodeParams::default())?;
        let b = k.create(PARROT_NEURON, 2, &NodeParams::default())?;
        k.connect(&a, &b, &ConnectionRule::OneToOne, &SynapseSpec::default())?;
        let before = k.get_connections(&ConnectionFilter::all())?.len();

        k.disconnect(&a[..1], &b[..1], &ConnectionRule::OneToOne, STATIC_SYNAPSE)?;
        let removed = k.restructure_connection_tables()?;
        let after = k.get_connections(&ConnectionFilter::all().with_sources([a[0]]))?.len();
        let again = k.restructure_connection_tables()?;
        Ok((before, removed, after, again))
    })
    .unwrap();

    let before: usize = counts.iter().map(|c| c.0).sum();
    let removed: usize = counts.iter().map(|c| c.1).sum();
    assert_eq!(before, 2);
    assert_eq!(removed, 1);
    assert!(counts.iter().all(|c| c.2 == 0 && c.3 == 0));
}

#[test]
fn missing_pair_fails_disconnect_everywhere() {
    let config = KernelConfig::default();
    let err = run_cluster(2, &config, |k| {
        let a = k.create(PARROT_NEURON, 2, &NodeParams::default())?;
        k.connect(&a[..1], &a[1..], &ConnectionRule::OneToOne, &SynapseSpec::default())?;
        k.disconnect(&a[1..], &a[..1], &ConnectionRule::OneToOne, STATIC_SYNAPSE)
    })
    .unwrap_err();
    assert!(err.is_illegal_connection());
}

#[test]
fn diverging_connectivity_is_fatal() {
    let config = KernelConfig::default();
    let err = run_cluster(2, &config, |k| {
        let a = k.create(PARROT_NEURON, 2, &NodeParams::default())?;
        if k.rank() == 0 {
            k.connect(&a, &a, &ConnectionRule::OneToOne, &SynapseSpec::default())?;
        }
        k.prepare()
    })
    .unwrap_err();
    assert!(matches!(err, KernelError::ProtocolViolation { .. }));
    assert!(err.is_fatal());
}
