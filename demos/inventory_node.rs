//! Inventory node demo
//!
//! Run with: cargo run --example inventory_node [HUB_ADDR]
//!
//! Starts one engine (ledger, hub, notifier, poller), attaches a subscriber
//! for item 42 and sells it out from several threads at once. Every sale is
//! printed by the subscriber callback; the extra attempts are declined.
//!
//! Start a second copy with a different hub port and watch its log: the
//! notifier tells it about each sale without waiting for a poll tick.
//!
//!   cargo run --example inventory_node 127.0.0.1:47910

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stock_sync::event::ItemId;
use stock_sync::hub::{HubConfig, DEFAULT_HUB_PORT};
use stock_sync::notify::{NotifierConfig, DEFAULT_NOTIFY_PORT};
use stock_sync::poller::{MemoryCollection, WatchConfig};
use stock_sync::router::{TopicFilter, TopicRouter};
use stock_sync::{Engine, EngineConfig, SubscriberState};

const ITEM: ItemId = ItemId(42);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let hub_addr: SocketAddr = match std::env::args().nth(1) {
        Some(addr) => addr.parse()?,
        None => SocketAddr::from(([127, 0, 0, 1], DEFAULT_HUB_PORT)),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stock_sync=debug".parse()?)
                .add_directive("inventory_node=debug".parse()?),
        )
        .init();

    // The first node owns the well-known notify port; others use the next
    // port up and point at the first.
    let well_known = SocketAddr::from(([127, 0, 0, 1], DEFAULT_NOTIFY_PORT));
    let sibling = SocketAddr::from(([127, 0, 0, 1], DEFAULT_NOTIFY_PORT + 1));
    let notifier = if hub_addr.port() == DEFAULT_HUB_PORT {
        NotifierConfig::default().listen(well_known).peers(vec![sibling])
    } else {
        NotifierConfig::default().listen(sibling).peers(vec![well_known])
    };

    let menu = Arc::new(MemoryCollection::new("menu"));
    let config = EngineConfig::new()
        .hub(HubConfig::with_addr(hub_addr))
        .notifier(notifier)
        .watch(menu.clone(), WatchConfig::general());

    let mut engine = Engine::start(config).await?;
    println!("Hub listening on {}", engine.hub_addr());

    engine.ledger().insert(ITEM, 3);

    let router = TopicRouter::any_of(vec![
        TopicFilter::scoped("stock", ITEM.to_string()),
        TopicFilter::topic("menu"),
    ]);
    let mut subscriber = engine.subscribe(router, |event| match event.as_stock() {
        Some(change) => println!("item {} now at {} (v{})", change.item_id, change.new_stock, change.version),
        None => println!("{} changed", event.topic_name()),
    })?;
    subscriber
        .wait_for_state(SubscriberState::Connected, Duration::from_secs(5))
        .await;

    let buyers: Vec<_> = (0..5)
        .map(|buyer| {
            let ledger = Arc::clone(engine.ledger());
            std::thread::spawn(move || (buyer, ledger.reserve(ITEM, 1)))
        })
        .collect();

    for handle in buyers {
        match handle.join() {
            Ok((buyer, Ok(change))) => println!("buyer {} reserved one, {} left", buyer, change.new_stock),
            Ok((buyer, Err(e))) if e.is_declined() => println!("buyer {} declined: {}", buyer, e),
            Ok((buyer, Err(e))) => eprintln!("buyer {} failed: {}", buyer, e),
            Err(_) => eprintln!("buyer thread panicked"),
        }
    }

    // Simulate an admin tool writing behind the ledger's back
    menu.upsert("espresso", json!({"price": 3}));

    println!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    subscriber.stop();
    engine.stop().await;
    Ok(())
}
