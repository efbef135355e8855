mod support;

use domain::{DataType, Point};
use gw_scheduler::{
    AccessRouter, NoopPublisher, ProtocolState, ProtocolSupervisor, SchedulerError,
    SerialArbitration, SupervisorSettings,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use support::{
    RecordingPublisher, Script, StalledPublisher, device, int_points, next_result, parse_result,
    protocol, registry, serial_protocol,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn supervisor(script: &Script, publisher: Arc<dyn gw_scheduler::ResultPublisher>) -> ProtocolSupervisor {
    ProtocolSupervisor::new(
        registry(script),
        publisher,
        Arc::new(AccessRouter::new(SerialArbitration::Bus, CancellationToken::new())),
        SupervisorSettings::default(),
    )
}

#[tokio::test]
async fn int32_and_string_without_length() {
    let script = Script::default();
    let (publisher, mut rx) = RecordingPublisher::new();
    let supervisor = supervisor(&script, publisher);

    let points = vec![
        Point::new("A", "100", DataType::Int32),
        Point::new("B", "200", DataType::String),
    ];
    supervisor
        .start(protocol("p1", 1000, vec![device("meter-1", points)]))
        .await
        .expect("start");

    let (topic, json) = next_result(&mut rx).await;
    assert_eq!(topic, "gateway/data/p1");
    let result = parse_result(&json);
    let device = &result.device_results[0];
    assert_eq!(device.total_points, 2);
    assert_eq!(device.success_points, 1);
    assert_eq!(device.failed_points, 1);
    assert!(!result.success);

    let a = &json["deviceResults"][0]["pointResults"][0];
    assert_eq!(a["dataType"], "int32");
    assert!(a["value"].is_i64());
    let b = &device.point_results[1];
    assert_eq!(b.data_type, DataType::String);
    assert!(b.error_message.as_deref().unwrap_or_default().contains("length"));

    supervisor.stop_all().await;
}

#[tokio::test]
async fn connection_failure_fails_every_point_of_device() {
    let script = Script::default();
    script.fail_connect.store(true, Ordering::SeqCst);
    let (publisher, mut rx) = RecordingPublisher::new();
    let supervisor = supervisor(&script, publisher);

    supervisor
        .start(protocol(
            "p1",
            1000,
            vec![device("meter-1", int_points(&["1", "2", "3"]))],
        ))
        .await
        .expect("start");

    let (_, json) = next_result(&mut rx).await;
    let result = parse_result(&json);
    let device = &result.device_results[0];
    assert_eq!(device.point_results.len(), 3);
    assert!(device.point_results.iter().all(|p| !p.success));
    assert!(
        device
            .point_results
            .iter()
            .all(|p| p.error_message == device.error_message)
    );
    assert_eq!(result.failed_devices, 1);
    assert!(supervisor.live_driver("p1").is_none());

    supervisor.stop_all().await;
}

#[tokio::test]
async fn link_loss_only_fails_its_device() {
    let script = Script::default();
    let (publisher, mut rx) = RecordingPublisher::new();
    let supervisor = supervisor(&script, publisher);

    supervisor
        .start(protocol(
            "p1",
            1000,
            vec![
                device("meter-1", int_points(&["1", "lost", "3"])),
                device("meter-2", int_points(&["4", "5"])),
            ],
        ))
        .await
        .expect("start");

    let (_, json) = next_result(&mut rx).await;
    let result = parse_result(&json);
    assert_eq!(result.device_results[0].point_results.len(), 3);
    assert!(!result.device_results[0].success);
    assert!(result.device_results[1].success);
    assert_eq!(result.success_points, 2);
    // 第一台设备断链后驱动被销毁，第二台设备重新创建
    assert_eq!(script.created.load(Ordering::SeqCst), 2);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn driver_recreated_after_total_failure() {
    let script = Script::default();
    let (publisher, mut rx) = RecordingPublisher::new();
    let supervisor = supervisor(&script, publisher);

    supervisor
        .start(protocol("p1", 50, vec![device("meter-1", int_points(&["1"]))]))
        .await
        .expect("start");

    let (_, first) = next_result(&mut rx).await;
    let value = |json: &serde_json::Value| json["deviceResults"][0]["pointResults"][0]["value"].clone();
    assert_eq!(value(&first), serde_json::json!(1));

    script.failing.store(true, Ordering::SeqCst);
    let (_, second) = next_result(&mut rx).await;
    assert!(parse_result(&second).all_points_failed());

    script.failing.store(false, Ordering::SeqCst);
    let (_, third) = next_result(&mut rx).await;
    assert_eq!(value(&third), serde_json::json!(2));
    assert!(script.closes.load(Ordering::SeqCst) >= 1);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn stop_returns_within_one_point_read() {
    let (tx, mut started) = mpsc::unbounded_channel();
    let script = Script {
        read_delay: Duration::from_millis(100),
        read_started: Some(tx),
        ..Script::default()
    };
    let supervisor = supervisor(&script, Arc::new(NoopPublisher));

    supervisor
        .start(protocol(
            "p1",
            10_000,
            vec![device("meter-1", int_points(&["1", "2", "3", "4", "5"]))],
        ))
        .await
        .expect("start");
    started.recv().await.expect("read started");

    let begin = Instant::now();
    assert!(supervisor.stop("p1").await);
    assert!(begin.elapsed() < Duration::from_millis(1000));
    assert_eq!(supervisor.state("p1"), Some(ProtocolState::Stopped));
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
    assert!(!script.log.events().contains(&"read:5".to_string()));

    // 重复停止无副作用
    assert!(!supervisor.stop("p1").await);
    assert!(!supervisor.stop("p1").await);
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_interrupts_cycle_sleep() {
    let script = Script::default();
    let (publisher, mut rx) = RecordingPublisher::new();
    let supervisor = supervisor(&script, publisher);

    supervisor
        .start(protocol("p1", 60_000, vec![device("meter-1", int_points(&["1"]))]))
        .await
        .expect("start");
    next_result(&mut rx).await;

    let begin = Instant::now();
    assert!(supervisor.stop("p1").await);
    assert!(begin.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn unsupported_protocol_gets_no_loop() {
    let script = Script::default();
    let supervisor = supervisor(&script, Arc::new(NoopPublisher));

    let mut config = protocol("p1", 1000, vec![device("meter-1", int_points(&["1"]))]);
    config.protocol_type = "s7".to_string();
    let err = supervisor.start(config.clone()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnsupportedProtocol { .. }));
    assert!(supervisor.running().is_empty());

    let started = supervisor
        .start_all(&[config, protocol("p2", 1000, vec![])])
        .await;
    assert_eq!(started, 1);
    assert_eq!(supervisor.running(), vec!["p2".to_string()]);
    supervisor.stop_all().await;
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let script = Script::default();
    let supervisor = supervisor(&script, Arc::new(NoopPublisher));
    let config = protocol("p1", 1000, vec![]);
    supervisor.start(config.clone()).await.expect("start");
    assert!(matches!(
        supervisor.start(config).await,
        Err(SchedulerError::AlreadyRunning(_))
    ));
    supervisor.stop_all().await;
}

#[tokio::test]
async fn pause_keeps_driver_and_restart_reuses_it() {
    let script = Script::default();
    let (publisher, mut rx) = RecordingPublisher::new();
    let supervisor = supervisor(&script, publisher);
    let config = protocol("p1", 10_000, vec![device("meter-1", int_points(&["1"]))]);

    supervisor.start(config.clone()).await.expect("start");
    next_result(&mut rx).await;
    let driver = supervisor.live_driver("p1").expect("driver");

    let bound = supervisor.pause("p1").await.expect("paused");
    assert_eq!(bound.as_ref(), &config);
    assert_eq!(supervisor.state("p1"), Some(ProtocolState::Paused));
    assert!(supervisor.running().is_empty());
    assert!(Arc::ptr_eq(&driver, &supervisor.live_driver("p1").expect("driver")));

    supervisor.restart(config.clone()).await.expect("restart");
    next_result(&mut rx).await;
    assert!(Arc::ptr_eq(&driver, &supervisor.live_driver("p1").expect("driver")));
    assert_eq!(script.created.load(Ordering::SeqCst), 1);

    // 配置变化后驱动重建
    let mut changed = config.clone();
    changed.receive_timeout_ms = 2000;
    supervisor.restart(changed).await.expect("restart");
    next_result(&mut rx).await;
    assert_eq!(script.created.load(Ordering::SeqCst), 2);
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);

    supervisor.stop_all().await;
    assert_eq!(supervisor.state("p1"), Some(ProtocolState::Stopped));
}

#[tokio::test]
async fn point_delay_applies_per_protocol_type() {
    let settings = SupervisorSettings {
        point_delays: [("scripted".to_string(), Duration::from_millis(40))]
            .into_iter()
            .collect(),
        ..SupervisorSettings::default()
    };
    assert_eq!(settings.pacing_for("Scripted"), Duration::from_millis(40));
    assert_eq!(settings.pacing_for("modbustcp"), Duration::ZERO);

    let script = Script::default();
    let (publisher, mut rx) = RecordingPublisher::new();
    let supervisor = ProtocolSupervisor::new(
        registry(&script),
        publisher,
        Arc::new(AccessRouter::new(SerialArbitration::Bus, CancellationToken::new())),
        settings,
    );
    supervisor
        .start(protocol("p1", 10_000, vec![device("meter-1", int_points(&["1", "2", "3"]))]))
        .await
        .expect("start");
    let (_, json) = next_result(&mut rx).await;
    let result = parse_result(&json);
    assert!(result.elapsed_ms >= 100);
    supervisor.stop_all().await;
}

#[tokio::test]
async fn stop_not_blocked_by_stalled_publish() {
    let script = Script::default();
    let (publisher, mut entered) = StalledPublisher::new();
    let supervisor = supervisor(&script, publisher);

    supervisor
        .start(protocol("p1", 1000, vec![device("meter-1", int_points(&["1"]))]))
        .await
        .expect("start");
    let topic = tokio::time::timeout(Duration::from_secs(5), entered.recv())
        .await
        .expect("publish entered")
        .expect("publisher open");
    assert_eq!(topic, "gateway/data/p1");

    let stopped = tokio::time::timeout(Duration::from_secs(3), supervisor.stop("p1"))
        .await
        .expect("stop returns while publish is stalled");
    assert!(stopped);
    assert_eq!(supervisor.state("p1"), Some(ProtocolState::Stopped));
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
}

fn serial_supervisor(
    script: &Script,
    publisher: Arc<dyn gw_scheduler::ResultPublisher>,
    arbitration: SerialArbitration,
) -> ProtocolSupervisor {
    ProtocolSupervisor::new(
        registry(script),
        publisher,
        Arc::new(AccessRouter::new(arbitration, CancellationToken::new())),
        SupervisorSettings::default(),
    )
}

async fn serial_link_loss_fails_device(arbitration: SerialArbitration) {
    let script = Script::default();
    let (publisher, mut rx) = RecordingPublisher::new();
    let supervisor = serial_supervisor(&script, publisher, arbitration);

    supervisor
        .start(serial_protocol(
            "p1",
            "/dev/ttyS0",
            10_000,
            vec![
                device("meter-1", int_points(&["1", "lost"])),
                device("meter-2", int_points(&["3", "4"])),
            ],
        ))
        .await
        .expect("start");

    let (_, json) = next_result(&mut rx).await;
    let result = parse_result(&json);
    assert_eq!(result.total_points, 4);
    assert_eq!(result.success_points, 2);
    assert_eq!(result.failed_points, 2);
    let lost = &result.device_results[0];
    assert_eq!(lost.point_results.len(), 2);
    assert!(lost.point_results.iter().all(|p| !p.success));
    assert!(
        lost.point_results
            .iter()
            .all(|p| p.error_message == lost.error_message)
    );
    assert!(result.device_results[1].success);
    assert_eq!(supervisor.access().shared_paths(), 1);

    supervisor.stop_all().await;
}

async fn serial_stop_within_one_point_read(arbitration: SerialArbitration) {
    let (tx, mut started) = mpsc::unbounded_channel();
    let script = Script {
        read_delay: Duration::from_millis(100),
        read_started: Some(tx),
        ..Script::default()
    };
    let supervisor = serial_supervisor(&script, Arc::new(NoopPublisher), arbitration);

    supervisor
        .start(serial_protocol(
            "p1",
            "/dev/ttyS0",
            10_000,
            vec![device("meter-1", int_points(&["1", "2", "3", "4", "5"]))],
        ))
        .await
        .expect("start");
    started.recv().await.expect("read started");

    let begin = Instant::now();
    assert!(supervisor.stop("p1").await);
    assert!(begin.elapsed() < Duration::from_millis(1000));
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);

    // 仲裁器不再继续已放弃的批次
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!script.log.events().contains(&"read:5".to_string()));
}

#[tokio::test]
async fn serial_link_loss_via_bus_arbiter() {
    serial_link_loss_fails_device(SerialArbitration::Bus).await;
}

#[tokio::test]
async fn serial_link_loss_via_point_coordinator() {
    serial_link_loss_fails_device(SerialArbitration::Point).await;
}

#[tokio::test]
async fn serial_stop_latency_via_bus_arbiter() {
    serial_stop_within_one_point_read(SerialArbitration::Bus).await;
}

#[tokio::test]
async fn serial_stop_latency_via_point_coordinator() {
    serial_stop_within_one_point_read(SerialArbitration::Point).await;
}
