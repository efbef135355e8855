use domain::{DataType, Device, DeviceResult, Point, PointResult, PointValue, ProtocolConfig, ProtocolResult};

fn device_with_points(count: usize) -> Device {
    Device {
        equipment_id: "meter-1".to_string(),
        points: (0..count)
            .map(|i| Point::new(format!("P{}", i), format!("4000{}", i + 1), DataType::Int16))
            .collect(),
    }
}

fn protocol(devices: Vec<Device>) -> ProtocolConfig {
    ProtocolConfig {
        id: "proto-1".to_string(),
        interface_kind: Default::default(),
        protocol_type: "ModbusTcp".to_string(),
        collect_cycle_ms: 1000,
        connect_timeout_ms: 1000,
        receive_timeout_ms: 1000,
        devices,
        addressing: Default::default(),
    }
}

#[test]
fn fail_all_replaces_partial_results_one_per_point() {
    let device = device_with_points(3);
    let mut result = DeviceResult::begin(&device.equipment_id);
    result.push(PointResult::ok(&device.points[0], PointValue::I16(1), 2));
    result.fail_all(&device, "connection refused");
    result.finish();

    assert_eq!(result.point_results.len(), 3);
    assert!(result.point_results.iter().all(|r| !r.success));
    assert!(
        result
            .point_results
            .iter()
            .all(|r| r.error_message.as_deref() == Some("connection refused"))
    );
    assert_eq!(result.total_points, 3);
    assert_eq!(result.failed_points, 3);
    assert!(!result.success);
}

#[test]
fn protocol_success_requires_no_failed_devices_and_points() {
    let device = device_with_points(2);
    let config = protocol(vec![device.clone()]);

    let mut healthy = DeviceResult::begin(&device.equipment_id);
    healthy.push(PointResult::ok(&device.points[0], PointValue::I16(1), 1));
    healthy.push(PointResult::ok(&device.points[1], PointValue::I16(2), 1));
    healthy.finish();
    let mut result = ProtocolResult::begin(&config);
    result.push(healthy);
    result.finish();
    assert!(result.success);
    assert!(!result.all_points_failed());

    let mut partial = DeviceResult::begin(&device.equipment_id);
    partial.push(PointResult::ok(&device.points[0], PointValue::I16(1), 1));
    partial.push(PointResult::failed(&device.points[1], "timeout", 1));
    partial.finish();
    let mut result = ProtocolResult::begin(&config);
    result.push(partial);
    result.finish();
    assert!(!result.success);
    assert_eq!(result.failed_devices, 1);
    assert_eq!(result.success_points, 1);
    assert_eq!(result.failed_points, 1);
}

#[test]
fn empty_cycle_is_not_total_failure() {
    let mut result = ProtocolResult::begin(&protocol(Vec::new()));
    result.finish();
    assert!(result.success);
    assert!(!result.all_points_failed());
}

#[test]
fn unknown_data_type_survives_deserialization() {
    let json = r#"{
        "id": "p1",
        "protocolType": "ModbusRtu",
        "interfaceKind": "serial",
        "devices": [{
            "equipmentId": "d1",
            "points": [
                {"label": "A", "address": "40001", "dataType": "Int"},
                {"label": "B", "address": "40003", "dataType": "bcd8"}
            ]
        }],
        "addressing": {"serial": {"portName": "/dev/ttyUSB0"}}
    }"#;
    let config: ProtocolConfig = serde_json::from_str(json).expect("config");
    let points = &config.devices[0].points;
    assert_eq!(points[0].data_type, DataType::Int32);
    assert_eq!(points[1].data_type, DataType::Other("bcd8".to_string()));
    assert_eq!(config.collect_cycle_ms, 0);
    let serial = config.serial_settings().expect("serial");
    assert_eq!(serial.baud_rate, 9600);
    assert_eq!(serial.data_bits, 8);
}

#[test]
fn find_point_prefers_label_then_address() {
    let config = protocol(vec![device_with_points(2)]);
    assert_eq!(config.find_point("P1", None).map(|p| p.address.as_str()), Some("40002"));
    assert_eq!(
        config.find_point("", Some("40001")).map(|p| p.label.as_str()),
        Some("P0")
    );
    assert!(config.find_point("missing", None).is_none());
}
