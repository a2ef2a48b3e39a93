use std::collections::BTreeMap;

use acconeer_link::a121::{SensorCalibration, SensorConfig, SessionConfig, SubsweepConfig};
use acconeer_link::client::{Client, ClientInfo, ExplorationClient, MockA121Client, SensorGeneration};
use acconeer_link::error::ClientError;
use acconeer_link::link::MemoryLink;
use acconeer_link::protocol::version::ExplorationVariant;
use serde_json::Value;

mod common;
use common::{sent_commands, FakeExplorationServer};

fn exploration_client(link: MemoryLink) -> Client<ExplorationClient<MemoryLink>> {
    Client::new(ExplorationClient::new(link), ClientInfo::socket("fake", 6110))
}

fn setup_of(messages: &[Vec<u8>]) -> Value {
    sent_commands(messages)
        .into_iter()
        .filter(|c| c["cmd"] == "setup")
        .last()
        .unwrap_or(Value::Null)
}

#[test]
fn connect_reports_system_and_sensors() {
    let mut client = exploration_client(FakeExplorationServer::new("a121-v1.0.0").into_link());
    let info = client.connect().unwrap().clone();
    assert_eq!(info.sensor, SensorGeneration::A121);
    assert_eq!(info.sensor_count, 5);
    assert_eq!(info.ticks_per_second, Some(1_000_000));
    assert_eq!(info.hardware_name.as_deref(), Some("xm125"));
    assert_eq!(info.sensors.len(), 2);
    assert!(info.sensors[0].connected);
    assert_eq!(info.sensors[1].sensor_id, 2);
    assert_eq!(client.session().variant(), Some(ExplorationVariant::Latest));
}

#[test]
fn variant_follows_server_version() {
    for (version, variant) in [
        ("a121-v0.3.0", ExplorationVariant::NoCalibrationReuse),
        ("a121-v0.4.2-280", ExplorationVariant::NoIqImbalance),
        ("a121-v0.6.0", ExplorationVariant::NoIqImbalance),
        ("a121-v0.7.1", ExplorationVariant::Latest),
    ] {
        let mut client = exploration_client(FakeExplorationServer::new(version).into_link());
        client.connect().unwrap();
        assert_eq!(client.session().variant(), Some(variant), "{}", version);
    }
}

#[test]
fn too_old_server_is_unsupported() {
    let mut client = exploration_client(FakeExplorationServer::new("a121-v0.2.9").into_link());
    assert!(matches!(client.connect(), Err(ClientError::UnsupportedVersion(_))));
    let mut client = exploration_client(FakeExplorationServer::new("nightly").into_link());
    assert!(matches!(client.connect(), Err(ClientError::UnsupportedVersion(_))));
}

#[test]
fn a111_board_is_the_wrong_generation() {
    let mut client = exploration_client(FakeExplorationServer::new("a111-v2.14.0").reporting_a111().into_link());
    match client.connect() {
        Err(ClientError::WrongGeneration { expected, found }) => {
            assert_eq!(expected, "a121");
            assert_eq!(found, "a111");
        }
        other => panic!("expected a generation mismatch, got {:?}", other.map(|_| ())),
    }
    assert!(!client.connected());
}

#[test]
fn iq_imbalance_field_depends_on_version() {
    for (version, present) in [("a121-v0.6.0", false), ("a121-v0.8.0", true)] {
        let link = FakeExplorationServer::new(version).into_link();
        let log = link.sent_log();
        let mut client = exploration_client(link);
        client.setup_session(&SessionConfig::default()).unwrap();
        let setup = setup_of(&log.messages());
        let subsweep = &setup["groups"][0][0]["config"]["subsweeps"][0];
        assert!(subsweep.is_object());
        assert_eq!(subsweep.get("iq_imbalance_compensation").is_some(), present, "{}", version);
    }
}

#[test]
fn calibration_is_captured_and_reused() {
    let link = FakeExplorationServer::new("a121-v1.0.0").reporting_calibration().into_link();
    let log = link.sent_log();
    let mut client = exploration_client(link);

    client.setup_session(&SessionConfig::default()).unwrap();
    let first = setup_of(&log.messages());
    assert!(first["groups"][0][0].get("calibration_info").is_none());
    let stored = client.session().calibrations().clone();
    assert_eq!(
        stored.get(&1),
        Some(&SensorCalibration {
            temperature: 25,
            data: "cafe01".into()
        })
    );

    client.setup_session(&SessionConfig::default()).unwrap();
    let second = setup_of(&log.messages());
    assert_eq!(second["groups"][0][0]["calibration_info"]["data"], "cafe01");
}

#[test]
fn old_server_never_gets_calibration() {
    let link = FakeExplorationServer::new("a121-v0.3.0").into_link();
    let log = link.sent_log();
    let mut client = exploration_client(link);
    let mut calibrations = BTreeMap::new();
    calibrations.insert(
        1,
        SensorCalibration {
            temperature: 30,
            data: "beef".into(),
        },
    );
    client.session_mut().set_calibrations(calibrations);
    client.setup_session(&SessionConfig::default()).unwrap();
    let setup = setup_of(&log.messages());
    assert!(setup["groups"][0][0].get("calibration_info").is_none());
}

#[test]
fn multi_subsweep_frames_are_split_per_sensor() {
    let mut sensor = SensorConfig {
        sweeps_per_frame: 3,
        ..SensorConfig::default()
    };
    sensor.subsweeps.push(SubsweepConfig {
        start_point: 200,
        num_points: 40,
        ..sensor.subsweeps[0].clone()
    });
    let mut group = BTreeMap::new();
    group.insert(1, sensor.clone());
    group.insert(3, sensor);
    let config = SessionConfig {
        groups: vec![group],
        update_rate: None,
        extended: true,
    };

    let mut client = exploration_client(FakeExplorationServer::new("a121-v1.0.0").into_link());
    client.start_session(Some(&config)).unwrap();
    let metadata = client.metadata().unwrap()[0][&3].clone();
    assert_eq!(metadata.sweep_data_length, 200);
    assert_eq!(metadata.subsweep_data_offset, vec![0, 160]);

    let frame = client.get_next().unwrap();
    assert_eq!(frame.groups.len(), 1);
    let result = &frame.groups[0][&3];
    assert_eq!(result.frame.dim(), (3, 200));
    assert_eq!(result.tick, 1000);
    let second = result.subsweep(&metadata, 1).unwrap();
    assert_eq!(second.dim(), (3, 40));
    assert_eq!(second[[0, 0]].re, 160.0);
    assert_eq!(second[[0, 0]].im, -160.0);
}

#[test]
fn baudrate_switch_after_connect() {
    let link = FakeExplorationServer::new("a121-v1.0.0").into_link();
    let log = link.sent_log();
    let mut client = Client::new(
        ExplorationClient::with_baudrate(link, 2_000_000),
        ClientInfo::serial("fake", Some(2_000_000)),
    );
    client.connect().unwrap();
    assert_eq!(client.session().link().baudrate(), Some(2_000_000));
    let sent = sent_commands(&log.messages());
    let switch = sent.iter().find(|c| c["cmd"] == "set_uart_baudrate").unwrap();
    assert_eq!(switch["baudrate"], 2_000_000);
}

#[test]
fn end_of_session_and_restart() {
    let mut client = exploration_client(FakeExplorationServer::new("a121-v1.0.0").ending_after(1).into_link());
    client.start_session(Some(&SessionConfig::default())).unwrap();
    assert!(client.get_next().unwrap().single().is_some());
    assert!(matches!(client.get_next(), Err(ClientError::SessionEnded)));
    assert!(!client.session_is_started());
    client.disconnect().unwrap();
}

#[test]
fn mock_server_agrees_with_its_metadata() {
    let mut client = Client::new(MockA121Client::new(), ClientInfo::Mock);
    let info = client.connect().unwrap().clone();
    assert_eq!(info.sensor, SensorGeneration::A121);
    client.start_session(Some(&SessionConfig::default())).unwrap();
    let metadata = client.metadata().unwrap()[0][&1].clone();
    let first = client.get_next().unwrap();
    let second = client.get_next().unwrap();
    let (a, b) = (first.single().unwrap(), second.single().unwrap());
    assert_eq!(a.frame.len(), metadata.frame_data_length);
    assert!(b.tick > a.tick);
}
