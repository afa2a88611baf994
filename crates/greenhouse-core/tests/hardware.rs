//! Tests against a real controller on a serial port.
//!
//! These require attached hardware and should be run with:
//! `cargo test --package greenhouse-core --test hardware -- --ignored --nocapture`
//!
//! Set GREENHOUSE_PORT to restrict discovery to one port name fragment,
//! e.g. `GREENHOUSE_PORT=ttyACM0`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use greenhouse_core::transport::TransportProvider;
use greenhouse_core::{ConnectOptions, Engine, EngineOptions, SerialProvider, connect_first};
use tokio::time::sleep;

fn connect_options() -> ConnectOptions {
    match env::var("GREENHOUSE_PORT") {
        Ok(port) => ConnectOptions::default().port_patterns([port]),
        Err(_) => ConnectOptions::default(),
    }
}

#[test]
#[ignore = "requires serial hardware"]
fn test_list_ports() {
    let ports = SerialProvider::new().endpoints().unwrap();
    println!("Found {} ports", ports.len());
    for port in ports {
        println!("  {}", port);
    }
}

#[test]
#[ignore = "requires serial hardware"]
fn test_handshake() {
    let connection = connect_first(&SerialProvider::new(), &connect_options())
        .unwrap_or_else(|e| panic!("No controller answered: {}", e));
    println!("Controller on {}", connection.endpoint);
}

#[tokio::test]
#[ignore = "requires serial hardware"]
async fn test_live_telemetry_and_fan() {
    let engine = Engine::new(
        Arc::new(SerialProvider::new()),
        EngineOptions::default().connect(connect_options()),
    );
    assert!(engine.attempt_connect().await, "no controller answered");
    println!("Connected: {:?}", engine.connection_status());

    sleep(Duration::from_secs(5)).await;
    let reading = engine.refresh();
    println!("Reading: {:?}", reading);
    assert!(reading.is_within_bounds());

    assert!(engine.set_device("fan", true));
    sleep(Duration::from_secs(2)).await;
    assert!(engine.set_device("fan", false));
    sleep(Duration::from_secs(1)).await;

    engine.shutdown().await;
}
