//! Interactive demo of a Roster membership group.
//!
//! Spins up a three-member SWIM group inside one process over the
//! in-memory transport, lets it stabilize, crashes one member to show
//! failure detection, and walks a late joiner into the group.
//!
//! Run with:
//!   cargo run --example demo --release

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use roster_protocol::observer::noop_metadata;
use roster_protocol::{
    BackendArgs, GroupClient, HandleMode, MemoryNetwork, ObserverRegistry, Provider, ProviderArgs,
    RpcTransport, SwimBackend, WireMember, WireView,
};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

fn banner(text: &str) {
    println!("\n{BOLD}{CYAN}== {text} =={RESET}");
}

async fn start_member(
    network: &Arc<MemoryNetwork>,
    address: &str,
    view: WireView,
    join: bool,
) -> (Arc<SwimBackend>, Arc<Provider>) {
    let observers = Arc::new(ObserverRegistry::new());
    let name = address.to_string();
    observers.add_callbacks(
        1,
        Arc::new(move |update, subject, _| {
            println!("  {name} observed {update:?} for {subject}");
        }),
        noop_metadata(),
    );

    let transport: Arc<dyn RpcTransport> = network.endpoint(address);
    let backend = SwimBackend::start(BackendArgs {
        transport: Arc::clone(&transport),
        provider_id: 0,
        config: json!({"protocol_period_ms": 200, "suspicion_timeout_ms": 1000}),
        initial_view: view,
        join,
        observers: Arc::clone(&observers),
    })
    .await
    .expect("backend starts");

    let backend_dyn: Arc<dyn roster_protocol::GroupBackend> = backend.clone();
    let provider = Provider::start(ProviderArgs {
        transport,
        provider_id: 0,
        config: serde_json::Value::Null,
        backend: Some(backend_dyn),
        observers: Some(observers),
        initial_view: None,
    })
    .await
    .expect("provider starts");

    (backend, provider)
}

#[tokio::main]
async fn main() {
    let network = MemoryNetwork::new();
    let addresses = ["mem://alpha", "mem://beta", "mem://gamma"];
    let view = WireView {
        members: addresses
            .iter()
            .map(|a| WireMember {
                address: a.to_string(),
                provider_id: 0,
            })
            .collect(),
        metadata: BTreeMap::from([("cluster".to_string(), "demo".to_string())]),
    };

    banner("Starting a three-member SWIM group");
    let mut members = Vec::new();
    for address in addresses {
        members.push(start_member(&network, address, view.clone(), false).await);
        println!("  started {address}");
    }

    tokio::time::sleep(Duration::from_secs(1)).await;

    banner("A client fetches the view from alpha");
    let client = GroupClient::new(network.endpoint("mem://client"));
    let handle = client
        .group_handle("mem://alpha", 0, HandleMode::InitUpdate)
        .await
        .expect("view fetch");
    println!("  members : {GREEN}{}{RESET}", handle.live_member_count());
    println!("  backend : {}", handle.find_metadata("__type__").unwrap());
    println!("  digest  : {:#018x}", handle.digest());

    banner("gamma crashes (no goodbye)");
    network.kill("mem://gamma");
    println!("  {RED}gamma is gone; suspicion clock starts on the next probe{RESET}");
    tokio::time::sleep(Duration::from_secs(3)).await;

    handle.update_view().await.expect("refresh");
    println!("  members after detection: {GREEN}{}{RESET}", handle.live_member_count());

    banner("delta joins through alpha");
    let seed = WireView {
        members: vec![WireMember {
            address: "mem://alpha".to_string(),
            provider_id: 0,
        }],
        metadata: BTreeMap::new(),
    };
    let delta = start_member(&network, "mem://delta", seed, true).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    handle.update_view().await.expect("refresh");
    println!("  members after join: {GREEN}{}{RESET}", handle.live_member_count());

    banner("Shutting everything down gracefully");
    delta.1.shutdown().await;
    for (_, provider) in members.into_iter().take(2) {
        provider.shutdown().await;
    }
    println!("  done\n");
}
