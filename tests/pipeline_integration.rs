//! ---
//! plcsim_section: "07-testing"
//! plcsim_subsection: "integration-tests"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Producer to broker to ingest pipeline runs."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use plcsim_common::AppConfig;
use plcsim_config::ConfigurationLoader;
use plcsim_ingest::{FieldValue, InMemoryPointSink, IngestWorker, QueueDiscovery, Transformer};
use plcsim_msg::{MessageValidator, MessagingMetricsExporter};
use plcsim_orchestrator::Orchestrator;
use plcsim_transport::{ConnectionState, InMemoryBroker};
use prometheus::Registry;
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

fn config_for(lines_dir: &std::path::Path) -> anyhow::Result<AppConfig> {
    let raw = format!(
        r#"
[simulation]
lines_dir = '{}'
update_interval_ms = 3600000
heartbeat_interval_ms = 3600000
bad_quality_probability = 0.0
random_seed = 11
watch = false

[publisher]
retry_delay_ms = 5

[validation]
dedup_ttl_ms = 60000
"#,
        lines_dir.display()
    );
    raw.parse::<AppConfig>()
}

fn write_lines(dir: &std::path::Path) -> anyhow::Result<()> {
    let bakery = json!({
        "id": "line-1", "site": "north", "type": "bread", "line": "Line 1",
        "equipment": [
            { "id": "oven1", "type": "oven", "tags": [
                { "id": "temperature", "dataType": "REAL", "value": 350.0,
                  "behavior": { "type": "sinusoidal", "parameters": { "min": 300, "max": 400, "period": 120000 } } },
                { "id": "heating_status", "dataType": "BOOL", "value": true }
            ] },
            { "id": "belt2", "type": "conveyor", "tags": [
                { "id": "speed", "dataType": "INT", "value": 4,
                  "behavior": { "type": "stepped", "parameters": { "values": [2, 4, 6], "stepDurationMs": 1000 } } }
            ] }
        ]
    });
    fs::write(dir.join("line-1.json"), serde_json::to_string_pretty(&bakery)?)
        .context("writing line file")?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simulated_fleet_reaches_the_point_sink() -> anyhow::Result<()> {
    plcsim_logging::init();
    let dir = tempfile::tempdir()?;
    write_lines(dir.path())?;
    let config = config_for(dir.path())?;

    let registry = Registry::new();
    let metrics = Arc::new(MessagingMetricsExporter::register(&registry)?);
    let broker = InMemoryBroker::new();
    let orchestrator = Orchestrator::from_config(&config, Arc::new(broker.clone()), Some(metrics.clone()));
    orchestrator.start().await?;
    assert!(orchestrator.publisher().wait_for_state(ConnectionState::Connected, WAIT).await);

    orchestrator.run_update_tick().await;
    orchestrator.run_heartbeat_tick().await;
    orchestrator.force_state_transition("oven1", "fault")?;
    // the running event loop publishes STATE_CHANGE and ALARM on its own
    for _ in 0..200 {
        if broker.depth("plc_data_oven1") >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(broker.depth("plc_data_oven1") >= 4);

    let bindings = QueueDiscovery::new(&config.publisher.queue_prefix)
        .discover_from(&ConfigurationLoader::new(&config.simulation.lines_dir))?;
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0].line_number, 1);

    let sink = InMemoryPointSink::new();
    let worker = IngestWorker::new(
        Arc::new(broker.clone()),
        Arc::new(sink.clone()),
        MessageValidator::new(config.validation.dedup_ttl),
        Transformer::from(&config.ingest),
        bindings,
    );
    let report = worker.poll_once().await?;
    assert_eq!(report.invalid, 0);
    assert_eq!(report.duplicates, 0);
    // update + heartbeat for both, plus the oven's state change and alarm
    assert!(report.messages >= 6, "only {} messages ingested", report.messages);
    assert_eq!(report.points, sink.len());

    let points = sink.points();
    let alarm = points
        .iter()
        .find(|p| p.tags.get("tag").map(String::as_str) == Some("alarm_type"))
        .context("alarm point missing")?;
    assert_eq!(alarm.tags["equipment_id"], "oven1");
    assert_eq!(alarm.fields["value"], FieldValue::String("STATE_FAULT".into()));
    let heating = points
        .iter()
        .filter(|p| p.tags.get("tag").map(String::as_str) == Some("heating_status"))
        .count();
    assert!(heating >= 1);
    assert!(points
        .iter()
        .filter(|p| p.measurement == "message_quality")
        .all(|p| p.fields["quality_ratio"] == FieldValue::Float(1.0)));
    assert!(points
        .iter()
        .all(|p| p.tags.get("line").map(String::as_str) == Some("1")));

    assert!(metrics.published_total() >= 6);
    assert_eq!(metrics.rejected_total(), 0);

    orchestrator.stop().await;
    assert_eq!(orchestrator.publisher().state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redelivered_payloads_are_ingested_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_lines(dir.path())?;
    let config = config_for(dir.path())?;
    let broker = InMemoryBroker::new();
    let orchestrator = Orchestrator::from_config(&config, Arc::new(broker.clone()), None);
    orchestrator.start().await?;
    assert!(orchestrator.publisher().wait_for_state(ConnectionState::Connected, WAIT).await);
    orchestrator.run_heartbeat_tick().await;
    orchestrator.stop().await;

    let queue = "plc_data_belt2";
    let delivered = broker.drain(queue);
    assert!(!delivered.is_empty());
    for payload in delivered.iter().chain(delivered.iter()) {
        broker.inject(queue, payload.clone());
    }

    let discovery = QueueDiscovery::new(&config.publisher.queue_prefix);
    let bindings = discovery.discover(&ConfigurationLoader::new(dir.path()).load()?);
    let worker = IngestWorker::from_config(&config, Arc::new(broker.clone()), bindings)?;
    assert_eq!(worker.sink_name(), "memory");
    let report = worker.poll_once().await?;
    assert_eq!(report.messages, delivered.len());
    assert_eq!(report.duplicates, delivered.len());
    Ok(())
}
