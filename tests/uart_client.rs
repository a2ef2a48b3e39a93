use acconeer_link::a111::{Mode, ServiceConfig};
use acconeer_link::client::uart::{BAUDRATE_CANDIDATES, MAX_BAUDRATE};
use acconeer_link::client::{Client, ClientInfo, UartClient};
use acconeer_link::error::ClientError;
use acconeer_link::link::{Link, MemoryLink};
use acconeer_link::metrics;

mod common;
use common::{FakeModule, MODULE_VERSION_STRING};

fn uart_client(module: FakeModule) -> Client<UartClient<MemoryLink>> {
    Client::new(UartClient::new(module.into_link()), ClientInfo::serial("fake", None))
}

#[test]
fn connect_identifies_the_module() {
    let mut client = uart_client(FakeModule::new());
    let info = client.connect().unwrap();
    assert_eq!(info.version_string, MODULE_VERSION_STRING);
    assert_eq!(info.version.map(|v| (v.major, v.minor, v.patch)), Some((2, 14, 1)));
    assert_eq!(client.session().baudrate(), Some(BAUDRATE_CANDIDATES[0]));
}

#[test]
fn slow_module_is_found_and_switched_up() {
    let mut client = uart_client(FakeModule::at_baudrate(115_200));
    client.connect().unwrap();
    assert_eq!(client.session().baudrate(), Some(MAX_BAUDRATE));
    assert_eq!(client.session().link().baudrate(), Some(MAX_BAUDRATE));
}

#[test]
fn override_baudrate_skips_probing_and_switching() {
    let link = FakeModule::at_baudrate(460_800).into_link();
    let mut client = Client::new(
        UartClient::with_baudrate(link, 460_800),
        ClientInfo::serial("fake", Some(460_800)),
    );
    client.connect().unwrap();
    assert_eq!(client.session().baudrate(), Some(460_800));
}

#[test]
fn silent_module_fails_to_connect() {
    let link = FakeModule::at_baudrate(9_600).into_link();
    let mut client = Client::new(UartClient::new(link), ClientInfo::serial("fake", None));
    assert!(matches!(client.connect(), Err(ClientError::Client(_))));
    assert!(!client.connected());
    assert!(!client.session().link().is_connected());
}

#[test]
fn foreign_device_is_not_accepted() {
    let mut client = uart_client(FakeModule::new().with_product_id(0x1234));
    assert!(client.connect().is_err());
}

#[test]
fn old_module_software_is_unsupported() {
    let mut client = uart_client(FakeModule::new().with_product_version(0x01_05_00));
    assert!(matches!(client.connect(), Err(ClientError::UnsupportedVersion(_))));
}

#[test]
fn envelope_session_streams_frames() {
    let mut client = uart_client(FakeModule::new());
    let config = ServiceConfig::envelope();
    let metadata = client.setup_session(&config).unwrap().clone();
    assert!((metadata.range_start_m - 0.2).abs() < 1e-9);
    assert!((metadata.range_length_m - 0.6).abs() < 1e-9);
    assert_eq!(metadata.free_space_absolute_offset, Some(71));
    assert!(metadata.data_length > 1000);

    client.start_session(None).unwrap();
    for expected in 1..=3 {
        let frame = client.get_next().unwrap();
        assert_eq!(frame.info[0].sequence_number, Some(expected));
        assert_eq!(frame.data.shape(), &[metadata.data_length]);
        let samples = frame.data.as_real().unwrap();
        assert_eq!(samples[&[0usize][..]], 100.0 + expected as f64);
    }
    client.stop_session().unwrap();
    client.disconnect().unwrap();
}

#[test]
fn sparse_frames_have_a_sweep_axis() {
    let mut client = uart_client(FakeModule::new());
    let mut config = ServiceConfig::sparse();
    config.set_sweeps_per_frame(8).unwrap();
    let metadata = client.setup_session(&config).unwrap().clone();
    assert_eq!(metadata.sweep_rate, Some(1000.0));

    client.start_session(None).unwrap();
    let frame = client.get_next().unwrap();
    let shape = frame.data.shape();
    assert_eq!(shape.len(), 2);
    assert_eq!(shape[0], 8);
    assert_eq!(shape[0] * shape[1], metadata.data_length);
}

#[test]
fn iq_frames_are_complex() {
    let mut client = uart_client(FakeModule::new());
    let metadata = client.setup_session(&ServiceConfig::iq()).unwrap().clone();
    assert_eq!(metadata.depth_lowpass_cutoff_ratio, Some(0.25));
    client.start_session(None).unwrap();
    let frame = client.get_next().unwrap();
    let samples = frame.data.as_complex().unwrap();
    assert_eq!(samples.len(), metadata.data_length);
}

#[test]
fn failed_creation_reports_the_error_flag() {
    let mut client = uart_client(FakeModule::new().failing_create());
    match client.setup_session(&ServiceConfig::envelope()) {
        Err(ClientError::Server(msg)) => assert!(msg.contains("error_creation"), "{}", msg),
        other => panic!("expected a server error, got {:?}", other.map(|_| ())),
    }
    assert!(!client.session_is_setup());
}

#[test]
fn corrupted_stream_frame_is_skipped() {
    let before = metrics::snapshot();
    let mut client = uart_client(FakeModule::new().corrupting(2));
    client.start_session(Some(&ServiceConfig::envelope())).unwrap();

    let first = client.get_next().unwrap();
    assert_eq!(first.info[0].sequence_number, Some(1));
    // frame 2 was damaged; the reader resynchronizes on frame 3
    let next = client.get_next().unwrap();
    assert_eq!(next.info[0].sequence_number, Some(3));
    assert_eq!(next.data.shape(), first.data.shape());

    let after = metrics::snapshot();
    assert!(after.frames_recovered > before.frames_recovered);
    assert!(after.bytes_dropped > before.bytes_dropped);
}

#[test]
fn module_stops_sending_after_stop() {
    let mut client = uart_client(FakeModule::new().with_frame_limit(2));
    client.start_session(Some(&ServiceConfig::power_bins())).unwrap();
    assert_eq!(client.metadata().map(|m| m.bin_count), Some(Some(5)));
    client.get_next().unwrap();
    client.get_next().unwrap();
    // no more frames: the link times out
    assert!(matches!(client.get_next(), Err(ClientError::Link(_))));
    client.stop_session().unwrap();
    assert_eq!(client.config().map(|c| c.mode()), Some(Mode::PowerBins));
}
