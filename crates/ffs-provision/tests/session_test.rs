//! End-to-end provisioning sessions against the simulated device.

use std::fs;
use std::time::{Duration, Instant};

use ffs_cli_protocol::{param_length, Command, DeviceInfoField, DhaField, PARAM_CHUNK_LEN};
use ffs_provision::sim::{DeviceBehavior, SimulatedDevice};
use ffs_provision::{BlockRead, DeviceInfo, ProvisioningSession, SessionConfig, SessionState, WriteMode};

const CERT_CHAIN: &str = "-----BEGIN CERTIFICATE-----
MIIBszCCAVmgAwIBAgIUFFSreferenceDeviceCertificateChainAAAAAAAAAAAAAAA
ZmZzLXByb3Zpc2lvbi1zaW11bGF0ZWQtY2VydGlmaWNhdGU=
-----END CERTIFICATE-----
-----BEGIN CERTIFICATE-----
MIIBrzCCAVWgAwIBAgIUIntermediate
-----END CERTIFICATE-----";

/// Short timeouts so failing paths do not slow the suite down.
fn test_config() -> SessionConfig {
    SessionConfig {
        command_timeout_ms: 300,
        keygen_timeout_ms: 300,
        csr_timeout_ms: 500,
        cert_read_timeout_ms: 300,
        cert_set_timeout_ms: 500,
        ..SessionConfig::default()
    }
}

fn device_info() -> DeviceInfo {
    DeviceInfo {
        device_serial: "0102030405060708090a0b0c0d0e0f10".to_string(),
        device_type: "A3E7ZRD9XQ8PWN".to_string(),
        ffs_pid: "pCTJSnBb".to_string(),
        dss_pub_key: "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAE5MnMZpA8FUdv1D0I3sWp4lCjxb0eKx9i".to_string(),
        client_id: "amzn1.application-oa2-client.0123456789abcdef".to_string(),
    }
}

fn session(device: &SimulatedDevice) -> ProvisioningSession<ffs_provision::sim::SimLineReader, ffs_provision::sim::SimWriter> {
    ProvisioningSession::new(device.connect(), test_config())
}

fn finalizers(device: &SimulatedDevice) -> Vec<Command> {
    device
        .received()
        .into_iter()
        .filter(|c| matches!(c, Command::DeviceInfoSet { .. } | Command::DhaCertSet))
        .collect()
}

#[test]
fn test_set_device_info_writes_all_fields() {
    let device = SimulatedDevice::default();
    let mut session = session(&device);
    let info = device_info();

    assert!(session.set_device_info(&info).unwrap());
    assert_eq!(session.state(), SessionState::Stopped);

    for (field, value) in info.fields() {
        assert_eq!(device.device_info(field).as_deref(), Some(value), "field {}", field);
    }
    assert_eq!(device.device_info(DeviceInfoField::FfsPin).as_deref(), Some("123ABC456"));
    assert_eq!(device.device_info(DeviceInfoField::BtName).as_deref(), Some("NXP_REF_DEV"));

    let received = device.received();
    assert_eq!(received.first(), Some(&Command::Start));
    assert_eq!(received.last(), Some(&Command::Stop));
    assert!(!device.is_started());
}

#[test]
fn test_set_device_info_continues_after_failed_field() {
    let device = SimulatedDevice::new(DeviceBehavior {
        fail_fields: vec![DeviceInfoField::FfsPid],
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    assert!(!session.set_device_info(&device_info()).unwrap());

    let finals = finalizers(&device);
    assert_eq!(finals.len(), 7);
    for (command, field) in finals.iter().zip(DeviceInfoField::ALL) {
        assert_eq!(command, &Command::DeviceInfoSet { field });
    }
    assert_eq!(device.device_info(DeviceInfoField::FfsPid), None);
    assert!(device.device_info(DeviceInfoField::ClientId).is_some());
    assert_eq!(device.received().last(), Some(&Command::Stop));
}

#[test]
fn test_set_device_info_stops_when_start_fails() {
    let device = SimulatedDevice::new(DeviceBehavior {
        fail_start: true,
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    assert!(!session.set_device_info(&device_info()).unwrap());
    assert_eq!(device.received(), vec![Command::Start]);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_multiline_value_byte_accounting() {
    let device = SimulatedDevice::default();
    let mut session = session(&device);

    let mut info = device_info();
    info.dss_pub_key = format!("{}\n{}\n\n{}", "K".repeat(70), "L".repeat(32), "M");
    assert!(session.set_device_info(&info).unwrap());
    assert_eq!(
        device.device_info(DeviceInfoField::DssPubKey).as_deref(),
        Some(info.dss_pub_key.as_str())
    );

    // Replay the upload of the key and check the declared length.
    let received = device.received();
    let end = received
        .iter()
        .position(|c| *c == Command::DeviceInfoSet { field: DeviceInfoField::DssPubKey })
        .unwrap();
    let begin = received[..end]
        .iter()
        .rposition(|c| matches!(c, Command::ParamBegin { .. }))
        .unwrap();

    let mut written = 0;
    for command in &received[begin + 1..end] {
        match command {
            Command::ParamChunk { chunk } => {
                assert!(chunk.len() <= PARAM_CHUNK_LEN);
                written += chunk.len();
            }
            Command::ParamNewline => written += 1,
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(received[begin], Command::ParamBegin { len: param_length(&info.dss_pub_key) });
    assert_eq!(written, param_length(&info.dss_pub_key));
}

#[test]
fn test_get_csr() {
    let device = SimulatedDevice::default();
    let mut session = session(&device);

    let csr = session.get_csr().unwrap();
    assert!(csr.success);
    assert!(csr.text.starts_with("-----BEGIN CERTIFICATE REQUEST-----\r\n"));
    assert!(csr.text.ends_with("-----END CERTIFICATE REQUEST-----\r\n"));

    assert_eq!(
        device.received(),
        vec![
            Command::Start,
            Command::DhaKeygen,
            Command::DhaGetField { field: DhaField::Csr },
            Command::Stop,
        ]
    );
}

#[test]
fn test_get_csr_skips_request_when_keygen_fails() {
    let device = SimulatedDevice::new(DeviceBehavior {
        fail_keygen: true,
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    let csr = session.get_csr().unwrap();
    assert!(!csr.success);
    assert!(csr.text.is_empty());
    assert_eq!(device.received(), vec![Command::Start, Command::DhaKeygen, Command::Stop]);
}

#[test]
fn test_set_cert_then_get_cert() {
    let device = SimulatedDevice::new(DeviceBehavior {
        open_reads: true,
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    assert!(session.set_cert(CERT_CHAIN).unwrap());
    assert_eq!(device.certificate().as_deref(), Some(CERT_CHAIN));
    assert_eq!(finalizers(&device), vec![Command::DhaCertSet]);

    let before = device.received().len();
    let cert = session.get_cert().unwrap();
    assert_eq!(
        cert,
        "-----BEGIN CERTIFICATE-----\r\n\
         MIIBszCCAVmgAwIBAgIUFFSreferenceDeviceCertificateChainAAAAAAAAAAAAAAA\r\n\
         ZmZzLXByb3Zpc2lvbi1zaW11bGF0ZWQtY2VydGlmaWNhdGU=\r\n\
         -----END CERTIFICATE-----\r\n"
    );

    // No start/stop around the read.
    assert_eq!(
        &device.received()[before..],
        &[Command::DhaGetField { field: DhaField::CrtChain }]
    );
}

#[test]
fn test_get_cert_without_certificate_is_empty() {
    let device = SimulatedDevice::new(DeviceBehavior {
        open_reads: true,
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    assert_eq!(session.get_cert().unwrap(), "");
}

#[test]
fn test_set_cert_start_failure() {
    let device = SimulatedDevice::new(DeviceBehavior {
        fail_start: true,
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    assert!(!session.set_cert(CERT_CHAIN).unwrap());
    assert_eq!(device.received(), vec![Command::Start]);
    assert_eq!(device.certificate(), None);
}

#[test]
fn test_get_csr_start_failure() {
    let device = SimulatedDevice::new(DeviceBehavior {
        fail_start: true,
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    let csr = session.get_csr().unwrap();
    assert_eq!(csr, BlockRead { success: false, text: String::new() });
    assert_eq!(device.received(), vec![Command::Start]);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_set_cert_with_carriage_return_line_breaks() {
    let device = SimulatedDevice::default();
    let mut session = session(&device);

    assert!(session.set_cert("AAAA\rBBBB").unwrap());
    assert_eq!(device.certificate().as_deref(), Some("AAAA\nBBBB"));

    let received = device.received();
    assert_eq!(received[1], Command::ParamBegin { len: 9 });
    assert_eq!(received.last(), Some(&Command::Stop));
    assert!(!device.is_started());
}

#[test]
fn test_set_cert_with_mixed_line_endings() {
    let device = SimulatedDevice::default();
    let mut session = session(&device);
    let chain: String = CERT_CHAIN
        .lines()
        .zip(["\r\n", "\r", "\n"].iter().cycle())
        .map(|(line, ending)| format!("{}{}", line, ending))
        .collect();

    assert!(session.set_cert(&chain).unwrap());
    assert_eq!(device.certificate().as_deref(), Some(CERT_CHAIN));
    assert_eq!(device.received().last(), Some(&Command::Stop));
}

#[test]
fn test_set_device_info_with_carriage_return_in_value() {
    let device = SimulatedDevice::default();
    let mut session = session(&device);
    let mut info = device_info();
    info.ffs_pid = "PID\rX".to_string();

    assert!(session.set_device_info(&info).unwrap());
    assert_eq!(finalizers(&device).len(), 7);
    assert_eq!(device.device_info(DeviceInfoField::FfsPid).as_deref(), Some("PID\nX"));
    assert_eq!(device.received().last(), Some(&Command::Stop));
    assert!(!device.is_started());
}

#[test]
fn test_silent_device_times_out() {
    let device = SimulatedDevice::new(DeviceBehavior {
        silent: true,
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);
    let started = Instant::now();

    assert!(!session.set_device_info(&device_info()).unwrap());
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(device.received(), vec![Command::Start]);
    assert_eq!(session.executor().commands_failed(), 1);
}

#[test]
fn test_slow_device_within_timeout() {
    let device = SimulatedDevice::new(DeviceBehavior {
        response_delay: Duration::from_millis(50),
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    assert!(session.start().unwrap());
    assert!(session.stop().unwrap());
}

#[test]
fn test_slow_write_mode() {
    let device = SimulatedDevice::default();
    let config = SessionConfig {
        write_mode: WriteMode::Slow { delay_ms: 1 },
        ..test_config()
    };
    let mut session = ProvisioningSession::new(device.connect(), config);

    assert!(session.set_cert("short").unwrap());
    assert_eq!(device.certificate().as_deref(), Some("short"));
}

#[test]
fn test_save_csr_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::default();
    let mut session = session(&device);

    let path = session.save_csr(dir.path()).unwrap().unwrap();
    assert_eq!(path, dir.path().join("csr.pem"));
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
}

#[test]
fn test_save_csr_failure_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::new(DeviceBehavior {
        fail_keygen: true,
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    assert_eq!(session.save_csr(dir.path()).unwrap(), None);
    assert!(!dir.path().join("csr.pem").exists());
}

#[test]
fn test_save_cert_writes_even_when_empty() {
    let dir = tempfile::tempdir().unwrap();
    let device = SimulatedDevice::default();
    let mut session = session(&device);

    // Without a session the device refuses dha_get_field.
    let path = session.save_cert(dir.path()).unwrap();
    assert_eq!(fs::read_to_string(path).unwrap(), "");
}

#[test]
fn test_set_cert_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("signed.pem");
    fs::write(&cert_path, format!("{}\n", CERT_CHAIN)).unwrap();

    let device = SimulatedDevice::default();
    let mut session = session(&device);

    assert!(session.set_cert_from_file(&cert_path).unwrap());
    assert_eq!(device.certificate().as_deref(), Some(CERT_CHAIN));
}

#[test]
fn test_set_cert_from_missing_file() {
    let device = SimulatedDevice::default();
    let mut session = session(&device);

    let err = session
        .set_cert_from_file(std::path::Path::new("/nonexistent/cert.pem"))
        .unwrap_err();
    assert!(matches!(err, ffs_provision::ProvisionError::File { .. }));
    assert!(device.received().is_empty());
}

#[test]
fn test_read_serial_number() {
    let device = SimulatedDevice::default();
    let mut session = session(&device);

    let serial = session.read_serial_number(Duration::from_millis(300)).unwrap();
    assert_eq!(serial.as_deref(), Some("AQIDBAUGBwgJCgsMDQ4PEA=="));
    assert_eq!(
        ffs_provision::device_info::serial_to_hex(&serial.unwrap()).unwrap(),
        "0102030405060708090a0b0c0d0e0f10"
    );
}

#[test]
fn test_read_serial_number_timeout() {
    let device = SimulatedDevice::new(DeviceBehavior {
        silent: true,
        ..DeviceBehavior::default()
    });
    let mut session = session(&device);

    assert_eq!(session.read_serial_number(Duration::from_millis(100)).unwrap(), None);
}

#[test]
fn test_transport_returned_after_session() {
    let device = SimulatedDevice::default();
    let mut session = session(&device);
    assert!(session.start().unwrap());

    let transport = session.into_transport();
    assert!(transport.close().is_ok());
}
