//! Health monitor against instances registered through the listen controller.

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use common::*;
use vhost_proxy::config::schema::HealthCheckConfig;
use vhost_proxy::config::Runtime;
use vhost_proxy::health::{HealthMonitor, RedeployGate};
use vhost_proxy::net::NoopPortKiller;
use vhost_proxy::registry::{ListenController, ListenMetadata, NetworkRegistry, PortServer};

fn controller() -> ListenController {
    ListenController::new(
        Arc::new(NetworkRegistry::new()),
        Arc::new(NoopPortKiller),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
    )
}

fn metadata(host: &str) -> ListenMetadata {
    ListenMetadata {
        host: Some(host.to_string()),
        path: Some("/".to_string()),
        client: Some("web".to_string()),
        runtime: Some(Runtime::Nodejs),
        meta: Some("main".to_string()),
        apis: Vec::new(),
        tls: false,
    }
}

/// Register `host` and serve `status` on its port.
async fn live_instance(controller: &ListenController, host: &str, status: u16) {
    let mut server = PortServer::new();
    assert!(controller.listen_port(&mut server, 0, &metadata(host)).await);
    let listener = tokio::net::TcpListener::from_std(server.take_listener().unwrap()).unwrap();
    serve_listener(listener, move || async move { (status, String::new()) });
}

/// Register `host`, then close its port.
async fn dead_instance(controller: &ListenController, host: &str) {
    let mut server = PortServer::new();
    assert!(controller.listen_port(&mut server, 0, &metadata(host)).await);
    drop(server.take_listener());
}

fn new_monitor(controller: &ListenController) -> HealthMonitor {
    let config = HealthCheckConfig {
        timeout_secs: 2,
        ..Default::default()
    };
    HealthMonitor::new(controller.registry().clone(), RedeployGate::new(), config)
}

#[tokio::test]
async fn test_404_instances_never_escalate() {
    let controller = controller();
    live_instance(&controller, "a.test", 404).await;
    live_instance(&controller, "b.test", 404).await;

    let mut monitor = new_monitor(&controller);
    for _ in 0..5 {
        assert!(monitor.check_cycle().await.is_ok());
    }
}

#[tokio::test]
async fn test_escalates_exactly_when_all_fail() {
    let controller = controller();
    dead_instance(&controller, "a.test").await;
    live_instance(&controller, "b.test", 200).await;

    let mut monitor = new_monitor(&controller);
    assert!(monitor.check_cycle().await.is_ok());
    assert_eq!(monitor.failing_targets().len(), 1);

    dead_instance(&controller, "c.test").await;
    live_instance(&controller, "d.test", 500).await;
    assert!(monitor.check_cycle().await.is_ok());
    assert_eq!(monitor.failing_targets().len(), 3);

    let all_dead = controller_with_dead(&["x.test", "y.test"]).await;
    let fatal = new_monitor(&all_dead).check_cycle().await.unwrap_err();
    assert_eq!((fatal.failed, fatal.total), (2, 2));
}

async fn controller_with_dead(hosts: &[&str]) -> ListenController {
    let controller = controller();
    for host in hosts {
        dead_instance(&controller, host).await;
    }
    controller
}

#[tokio::test]
async fn test_recovered_target_leaves_accumulator() {
    let controller = controller();
    let mut server = PortServer::new();
    assert!(controller.listen_port(&mut server, 0, &metadata("a.test")).await);
    let std_listener = server.take_listener().unwrap();
    let port = std_listener.local_addr().unwrap().port();
    drop(std_listener);
    live_instance(&controller, "b.test", 200).await;

    let mut monitor = new_monitor(&controller);
    assert!(monitor.check_cycle().await.is_ok());
    assert_eq!(monitor.failing_targets().len(), 1);
    assert!(!monitor.errors(monitor.failing_targets()[0]).is_empty());

    start_mock_backend(local(port), "back").await;
    assert!(monitor.check_cycle().await.is_ok());
    assert!(monitor.failing_targets().is_empty());
}
