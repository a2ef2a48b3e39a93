use std::time::Duration;

use acconeer_link::a111::ServiceConfig;
use acconeer_link::client::{Client, ClientInfo, Session, SpiClient};
use acconeer_link::error::ClientError;
use acconeer_link::link::{Link, MemoryLink};

mod common;
use common::{FakeModule, MODULE_VERSION_STRING};

fn spi_client(module: FakeModule) -> Client<SpiClient<MemoryLink>> {
    let info = ClientInfo::Spi {
        device: "/dev/spidev0.0".into(),
    };
    Client::new(SpiClient::new(module.into_link()), info)
}

#[test]
fn worker_owns_the_link_while_connected() {
    let mut client = spi_client(FakeModule::new());
    assert!(client.session().link().is_some());
    let info = client.connect().unwrap();
    assert_eq!(info.version_string, MODULE_VERSION_STRING);
    assert!(client.session().link().is_none());

    client.disconnect().unwrap();
    let link = client.session().link().unwrap();
    assert!(!link.is_connected());
}

#[test]
fn polled_frames_arrive_in_order() {
    let mut client = spi_client(FakeModule::new());
    client.start_session(Some(&ServiceConfig::envelope())).unwrap();
    let data_length = client.metadata().unwrap().data_length;

    let mut last = None;
    for _ in 0..5 {
        let frame = client.get_next().unwrap();
        assert_eq!(frame.data.shape(), &[data_length]);
        let seq = frame.info[0].sequence_number.unwrap();
        if let Some(prev) = last {
            assert_eq!(seq, prev + 1);
        }
        last = Some(seq);
    }
    client.stop_session().unwrap();
    client.disconnect().unwrap();
}

#[test]
fn stop_discards_queued_frames() {
    let mut client = spi_client(FakeModule::new().with_frame_limit(20));
    client.start_session(Some(&ServiceConfig::envelope())).unwrap();
    client.get_next().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    client.stop_session().unwrap();

    // a new session starts clean
    client.start_session(None).unwrap();
    client.stop_session().unwrap();
    client.disconnect().unwrap();
}

#[test]
fn stream_error_goes_to_get_next_only() {
    let mut client = spi_client(FakeModule::new().raising_error_at(2));
    client.start_session(Some(&ServiceConfig::envelope())).unwrap();
    let mut frames = 0;
    let err = loop {
        match client.get_next() {
            Ok(_) => frames += 1,
            Err(e) => break e,
        }
        assert!(frames <= 2);
    };
    assert!(
        matches!(err, ClientError::Server(ref msg) if msg.contains("error_activation")),
        "{}",
        err
    );

    // later commands still get their own replies
    client.stop_session().unwrap();
    client.setup_session(&ServiceConfig::envelope()).unwrap();
    client.start_session(None).unwrap();
    client.get_next().unwrap();
    client.stop_session().unwrap();
    client.disconnect().unwrap();
}

#[test]
fn stream_error_is_dropped_by_stop() {
    let mut client = spi_client(FakeModule::new().raising_error_at(1));
    client.start_session(Some(&ServiceConfig::envelope())).unwrap();
    // let the worker hit the error without anyone reading it
    std::thread::sleep(Duration::from_millis(30));
    client.stop_session().unwrap();
    client.setup_session(&ServiceConfig::iq()).unwrap();
    client.start_session(None).unwrap();
    assert!(client.get_next().unwrap().data.as_complex().is_some());
    client.disconnect().unwrap();
}

#[test]
fn get_next_times_out_without_data() {
    let mut client = spi_client(FakeModule::new().with_frame_limit(1));
    client.start_session(Some(&ServiceConfig::envelope())).unwrap();
    client.session_mut().set_timeout(Duration::from_millis(50));
    client.get_next().unwrap();
    assert!(matches!(client.get_next(), Err(ClientError::Link(_))));
    client.disconnect().unwrap();
}

#[test]
fn creation_error_comes_back_from_the_worker() {
    let mut client = spi_client(FakeModule::new().failing_create());
    client.connect().unwrap();
    assert!(matches!(
        client.setup_session(&ServiceConfig::envelope()),
        Err(ClientError::Server(_))
    ));
    // the worker survives a failed command
    client.setup_session(&ServiceConfig::envelope()).unwrap_err();
    client.disconnect().unwrap();
}

#[test]
fn failed_connect_returns_the_link() {
    let mut client = spi_client(FakeModule::new().with_product_id(0xBEEF));
    assert!(client.connect().is_err());
    assert!(client.session().link().is_some());
    // and the link can be used again
    assert!(client.connect().is_err());
}
