//! End-to-end tests driving the full orchestration stack through the
//! daemon event loop against the mock switch.

use std::sync::{Arc, RwLock};
use vnetd::daemon::{OrchDaemon, OrchDaemonConfig};
use vnetd::intfs::{IntfsOrch, IntfsOrchConfig, IntfsOrchHandle};
use vnetd::vnet::{
    VnetOrch, VnetOrchConfig, VnetOrchHandle, VnetRouteKey, VnetRouteOrch, VnetRouteOrchConfig,
    VnetRouteOrchHandle, VrDirection, VNET_ROUTE_TABLE, VNET_ROUTE_TUNNEL_TABLE,
};
use vnetd::vxlan::{VxlanTunnelOrch, VxlanTunnelOrchHandle};
use vnetd::{KeyOpFieldsValues, MockSwitchApi, SwitchApi};

struct Stack {
    sai: Arc<MockSwitchApi>,
    tunnel_orch: Arc<RwLock<VxlanTunnelOrch>>,
    intfs_orch: Arc<RwLock<IntfsOrch>>,
    vnet_orch: Arc<RwLock<VnetOrch>>,
    route_orch: Arc<RwLock<VnetRouteOrch>>,
    daemon: OrchDaemon,
}

fn build_stack(vnet_config: VnetOrchConfig) -> Stack {
    let sai = Arc::new(MockSwitchApi::new());
    let sai_dyn: Arc<dyn SwitchApi> = sai.clone();

    let tunnel_orch = Arc::new(RwLock::new(VxlanTunnelOrch::new(sai_dyn.clone())));
    let intfs_orch = Arc::new(RwLock::new(IntfsOrch::new(
        IntfsOrchConfig::default(),
        sai_dyn.clone(),
    )));
    let vnet_orch = Arc::new(RwLock::new(VnetOrch::new(
        vnet_config,
        sai_dyn.clone(),
        tunnel_orch.clone(),
    )));
    let route_orch = Arc::new(RwLock::new(VnetRouteOrch::new(
        VnetRouteOrchConfig::default(),
        sai_dyn,
        vnet_orch.clone(),
        tunnel_orch.clone(),
        intfs_orch.clone(),
    )));

    let mut daemon = OrchDaemon::new(OrchDaemonConfig::default());
    daemon.register_orch(Box::new(IntfsOrchHandle(intfs_orch.clone())));
    daemon.register_orch(Box::new(VxlanTunnelOrchHandle(tunnel_orch.clone())));
    daemon.register_orch(Box::new(VnetOrchHandle(vnet_orch.clone())));
    daemon.register_orch(Box::new(VnetRouteOrchHandle(route_orch.clone())));

    Stack {
        sai,
        tunnel_orch,
        intfs_orch,
        vnet_orch,
        route_orch,
        daemon,
    }
}

fn stack() -> Stack {
    build_stack(VnetOrchConfig::default())
}

fn fv(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(f, v)| (f.to_string(), v.to_string()))
        .collect()
}

fn feed_tunnel(stack: &Stack, name: &str, src_ip: &str) {
    stack
        .tunnel_orch
        .write()
        .unwrap()
        .enqueue([KeyOpFieldsValues::set(name, fv(&[("src_ip", src_ip)]))]);
}

fn feed_vnet(stack: &Stack, name: &str, tunnel: &str, vni: &str) {
    stack.vnet_orch.write().unwrap().enqueue([KeyOpFieldsValues::set(
        name,
        fv(&[("vxlan_tunnel", tunnel), ("vni", vni)]),
    )]);
}

fn feed_tunnel_route(stack: &Stack, key: &str, endpoint: &str) {
    stack.route_orch.write().unwrap().enqueue(
        VNET_ROUTE_TUNNEL_TABLE,
        [KeyOpFieldsValues::set(key, fv(&[("endpoint", endpoint)]))],
    );
}

fn feed_tunnel_route_del(stack: &Stack, key: &str) {
    stack
        .route_orch
        .write()
        .unwrap()
        .enqueue(VNET_ROUTE_TUNNEL_TABLE, [KeyOpFieldsValues::del(key)]);
}

#[tokio::test]
async fn test_shared_endpoint_route_lifecycle() {
    let mut stack = stack();

    // Add VNET Vnet1 with tunnel tun1, VNI 1000.
    feed_tunnel(&stack, "tun1", "10.1.0.32");
    feed_vnet(&stack, "Vnet1", "tun1", "1000");
    stack.daemon.run_pass().await;

    {
        let registry = stack.vnet_orch.read().unwrap();
        assert_eq!(registry.vnet_count(), 1);
        assert!(registry.get_vr_id("Vnet1").unwrap().is_valid());
    }
    assert_eq!(stack.sai.virtual_router_count(), 2);

    // First route to endpoint 1.1.1.1: one next hop, one entry.
    feed_tunnel_route(&stack, "Vnet1:10.0.0.0/24", "1.1.1.1");
    stack.daemon.run_pass().await;
    assert_eq!(stack.sai.next_hop_count(), 1);
    assert_eq!(stack.sai.route_count(), 1);

    // Second route to the same endpoint: next hop reused.
    feed_tunnel_route(&stack, "Vnet1:10.0.1.0/24", "1.1.1.1");
    stack.daemon.run_pass().await;
    assert_eq!(stack.sai.next_hop_count(), 1);
    assert_eq!(stack.sai.route_count(), 2);

    // Delete the first route: the shared next hop survives.
    feed_tunnel_route_del(&stack, "Vnet1:10.0.0.0/24");
    stack.daemon.run_pass().await;
    assert_eq!(stack.sai.next_hop_count(), 1);
    assert_eq!(stack.sai.route_count(), 1);

    // Delete the second: the next hop is destroyed, nothing remains.
    feed_tunnel_route_del(&stack, "Vnet1:10.0.1.0/24");
    stack.daemon.run_pass().await;
    assert_eq!(stack.sai.next_hop_count(), 0);
    assert_eq!(stack.sai.route_count(), 0);
}

#[tokio::test]
async fn test_deferred_apply_across_passes() {
    let mut stack = stack();

    // The route arrives before its VNET, which arrives before its tunnel.
    feed_tunnel_route(&stack, "Vnet1:10.0.0.0/24", "1.1.1.1");
    stack.daemon.run_pass().await;
    assert_eq!(stack.sai.route_count(), 0);

    feed_vnet(&stack, "Vnet1", "tun1", "1000");
    stack.daemon.run_pass().await;
    // VNET itself is deferred: its tunnel does not exist yet.
    assert_eq!(stack.vnet_orch.read().unwrap().vnet_count(), 0);
    assert_eq!(stack.sai.route_count(), 0);

    feed_tunnel(&stack, "tun1", "10.1.0.32");
    stack.daemon.run_pass().await;
    // Tunnel and VNET resolve within this pass (priority order), and the
    // deferred route lands right after.
    assert_eq!(stack.vnet_orch.read().unwrap().vnet_count(), 1);
    assert_eq!(stack.sai.route_count(), 1);

    // Extra passes are idempotent: programmed exactly once.
    stack.daemon.run_pass().await;
    stack.daemon.run_pass().await;
    assert_eq!(stack.sai.route_count(), 1);
    assert_eq!(stack.route_orch.read().unwrap().stats().routes_added, 1);
}

#[tokio::test]
async fn test_vnet_delete_ordering() {
    let mut stack = stack();
    feed_tunnel(&stack, "tun1", "10.1.0.32");
    feed_vnet(&stack, "Vnet1", "tun1", "1000");
    feed_tunnel_route(&stack, "Vnet1:10.0.0.0/24", "1.1.1.1");
    stack.daemon.run_pass().await;
    assert_eq!(stack.sai.route_count(), 1);

    // Deleting the VNET while the route references it is rejected.
    stack
        .vnet_orch
        .write()
        .unwrap()
        .enqueue([KeyOpFieldsValues::del("Vnet1")]);
    stack.daemon.run_pass().await;
    assert_eq!(stack.vnet_orch.read().unwrap().vnet_count(), 1);
    assert_eq!(stack.sai.virtual_router_count(), 2);

    // Route first, then the VNET: both succeed.
    feed_tunnel_route_del(&stack, "Vnet1:10.0.0.0/24");
    stack.daemon.run_pass().await;
    stack
        .vnet_orch
        .write()
        .unwrap()
        .enqueue([KeyOpFieldsValues::del("Vnet1")]);
    stack.daemon.run_pass().await;

    assert_eq!(stack.vnet_orch.read().unwrap().vnet_count(), 0);
    assert_eq!(stack.sai.virtual_router_count(), 0);
    assert_eq!(stack.sai.next_hop_count(), 0);
    assert_eq!(stack.sai.route_count(), 0);
}

#[tokio::test]
async fn test_identity_preserving_peer_update() {
    let mut stack = stack();
    feed_tunnel(&stack, "tun1", "10.1.0.32");
    feed_vnet(&stack, "Vnet1", "tun1", "1000");
    stack.daemon.run_pass().await;

    let vr_before = stack.vnet_orch.read().unwrap().get_vr_id("Vnet1").unwrap();

    stack.vnet_orch.write().unwrap().enqueue([KeyOpFieldsValues::set(
        "Vnet1",
        fv(&[
            ("vxlan_tunnel", "tun1"),
            ("vni", "1000"),
            ("peer_list", "Vnet2,Vnet3"),
        ]),
    )]);
    stack.daemon.run_pass().await;

    let registry = stack.vnet_orch.read().unwrap();
    let peers = registry.get_peer_list("Vnet1").unwrap();
    assert_eq!(peers.len(), 2);
    assert!(peers.contains("Vnet2") && peers.contains("Vnet3"));
    assert_eq!(registry.get_vr_id("Vnet1").unwrap(), vr_before);
    assert_eq!(stack.sai.virtual_router_count(), 2);
}

#[tokio::test]
async fn test_malformed_vnet_add_makes_no_mutation() {
    let mut stack = stack();
    feed_tunnel(&stack, "tun1", "10.1.0.32");
    // Missing the mandatory vni attribute.
    stack.vnet_orch.write().unwrap().enqueue([KeyOpFieldsValues::set(
        "Vnet1",
        fv(&[("vxlan_tunnel", "tun1")]),
    )]);
    stack.daemon.run_pass().await;

    assert_eq!(stack.vnet_orch.read().unwrap().vnet_count(), 0);
    assert_eq!(stack.sai.virtual_router_count(), 0);
    // Dropped, not deferred.
    stack.daemon.run_pass().await;
    assert_eq!(stack.vnet_orch.read().unwrap().vnet_count(), 0);
}

#[tokio::test]
async fn test_direction_context_bounds_handles() {
    let mut stack = build_stack(VnetOrchConfig {
        vr_contexts: vec![VrDirection::Ingress],
        ..VnetOrchConfig::default()
    });
    feed_tunnel(&stack, "tun1", "10.1.0.32");
    feed_vnet(&stack, "Vnet1", "tun1", "1000");
    feed_vnet(&stack, "Vnet2", "tun1", "2000");
    stack.daemon.run_pass().await;

    // One handle per VNET, never one for the unconfigured direction.
    assert_eq!(stack.sai.virtual_router_count(), 2);
    let registry = stack.vnet_orch.read().unwrap();
    assert!(registry.get_decap_map_id("Vnet1").unwrap().is_null());
    assert!(registry.get_decap_map_id("Vnet2").unwrap().is_null());
}

#[tokio::test]
async fn test_local_and_tunnel_routes_coexist() {
    let mut stack = stack();
    feed_tunnel(&stack, "tun1", "10.1.0.32");
    feed_vnet(&stack, "Vnet1", "tun1", "1000");
    stack
        .intfs_orch
        .write()
        .unwrap()
        .enqueue([KeyOpFieldsValues::set(
            "Vlan100",
            fv(&[("ip_prefix", "10.0.2.1/24")]),
        )]);
    stack.daemon.run_pass().await;

    feed_tunnel_route(&stack, "Vnet1:10.0.0.0/24", "1.1.1.1");
    stack.route_orch.write().unwrap().enqueue(
        VNET_ROUTE_TABLE,
        [KeyOpFieldsValues::set(
            "Vnet1:10.0.2.0/24",
            fv(&[("ifname", "Vlan100")]),
        )],
    );
    stack.daemon.run_pass().await;

    assert_eq!(stack.sai.route_count(), 2);
    let routes = stack.route_orch.read().unwrap();
    assert_eq!(routes.route_count_for_vnet("Vnet1"), 2);
    assert_eq!(routes.next_hop_count_for_vnet("Vnet1"), 1);
    // Two references on the VNET: one per route.
    assert_eq!(stack.vnet_orch.read().unwrap().ref_count("Vnet1").unwrap(), 2);
}

#[tokio::test]
async fn test_churn_leaves_no_hardware_behind() {
    let mut stack = stack();
    feed_tunnel(&stack, "tun1", "10.1.0.32");
    feed_vnet(&stack, "Vnet1", "tun1", "1000");
    stack.daemon.run_pass().await;

    // Routes across three endpoints, some sharing.
    let routes = [
        ("Vnet1:10.0.0.0/24", "1.1.1.1"),
        ("Vnet1:10.0.1.0/24", "1.1.1.1"),
        ("Vnet1:10.0.2.0/24", "2.2.2.2"),
        ("Vnet1:10.0.3.0/24", "3.3.3.3"),
    ];
    for (key, endpoint) in routes {
        feed_tunnel_route(&stack, key, endpoint);
    }
    stack.daemon.run_pass().await;
    assert_eq!(stack.sai.route_count(), 4);
    assert_eq!(stack.sai.next_hop_count(), 3);

    // Repoint one route, then tear everything down.
    feed_tunnel_route(&stack, "Vnet1:10.0.3.0/24", "1.1.1.1");
    stack.daemon.run_pass().await;
    assert_eq!(stack.sai.next_hop_count(), 2);

    for (key, _) in routes {
        feed_tunnel_route_del(&stack, key);
    }
    stack.daemon.run_pass().await;
    stack
        .vnet_orch
        .write()
        .unwrap()
        .enqueue([KeyOpFieldsValues::del("Vnet1")]);
    stack.daemon.run_pass().await;

    assert_eq!(stack.sai.route_count(), 0);
    assert_eq!(stack.sai.next_hop_count(), 0);
    assert_eq!(stack.sai.virtual_router_count(), 0);
    let route_orch = stack.route_orch.read().unwrap();
    assert_eq!(route_orch.route_count(), 0);
    assert!(route_orch
        .route_target(&VnetRouteKey::new("Vnet1", "10.0.0.0/24".parse().unwrap()))
        .is_none());
}

#[tokio::test]
async fn test_allocation_failure_is_atomic_and_terminal() {
    let mut stack = stack();
    feed_tunnel(&stack, "tun1", "10.1.0.32");
    stack.daemon.run_pass().await;

    // The tunnel context exists; now fail the second router allocation.
    stack.sai.inject_create_failures(1, 1);
    feed_vnet(&stack, "Vnet1", "tun1", "1000");
    stack.daemon.run_pass().await;

    assert_eq!(stack.vnet_orch.read().unwrap().vnet_count(), 0);
    assert_eq!(stack.sai.virtual_router_count(), 0);

    // The failure was terminal for that event; a fresh add succeeds.
    feed_vnet(&stack, "Vnet1", "tun1", "1000");
    stack.daemon.run_pass().await;
    assert_eq!(stack.vnet_orch.read().unwrap().vnet_count(), 1);
    assert_eq!(stack.sai.virtual_router_count(), 2);
}
