//! Integration tests for the signing orchestrator against a mocked SiGa
//! service.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use httpmock::prelude::*;
use serde_json::json;
use siga_bridge::domain::hashcode::{to_hashcode, ASICE_MIMETYPE};
use siga_bridge::{Client, Conf, DataFile, SessionStatus, SessionStore, SigaError, SigaResult};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const SERVICE_UUID: &str = "a7fd7728-a3ea-4975-bfab-f240a67e894f";
const PERSON: &str = "60001019906";
const PHONE: &str = "+37200000766";
const MESSAGE: &str = "Automated testing";

/// A structurally DER-looking certificate stand-in; the mocked service
/// does not parse it.
const CERT_DER: &[u8] = &[0x30, 0x82, 0x01, 0x0a, 0x02, 0x82, 0x01, 0x01];

fn test_conf(url: &str) -> Conf {
    Conf {
        url: url.to_string(),
        service_identifier: SERVICE_UUID.into(),
        service_key: "746573745365637265744b6579303031".into(),
        ..Conf::default()
    }
}

fn fail_txt() -> DataFile {
    DataFile::new("fail.txt", &b"hello"[..]).expect("datafile")
}

/// Build a complete ASiC-E container holding the given data files.
fn complete_container(datafiles: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(&mut cursor);
    writer
        .start_file(
            "mimetype",
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .expect("create mimetype");
    writer
        .write_all(ASICE_MIMETYPE.as_bytes())
        .expect("write mimetype");
    for (name, contents) in datafiles {
        writer
            .start_file(
                *name,
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
            )
            .expect("create datafile");
        writer.write_all(contents).expect("write datafile");
    }
    writer.finish().expect("close zip");
    cursor.into_inner()
}

/// The Base64 hashcode form SiGa would serve for the given data files.
fn hashcode_container_b64(datafiles: &[(&str, &[u8])]) -> String {
    let complete = complete_container(datafiles);
    let mut hashcode = Cursor::new(Vec::new());
    to_hashcode(&mut hashcode, Cursor::new(complete)).expect("to hashcode");
    BASE64.encode(hashcode.into_inner())
}

#[tokio::test]
async fn remote_signing_happy_path() {
    let server = MockServer::start_async().await;
    let create_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hashcodecontainers")
                .header("X-Authorization-ServiceUUID", SERVICE_UUID)
                .header_exists("X-Authorization-Signature")
                .header_exists("X-Authorization-Timestamp")
                .body_contains("fail.txt");
            then.status(200).json_body(json!({ "containerId": "c-1" }));
        })
        .await;
    let start_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hashcodecontainers/c-1/remotesigning")
                .body_contains("signingCertificate")
                .body_contains("\"signatureProfile\":\"LT\"");
            then.status(200).json_body(json!({
                "dataToSign": BASE64.encode(b"xades-signed-info"),
                "digestAlgorithm": "SHA512",
                "generatedSignatureId": "sig-1",
            }));
        })
        .await;
    let finalize_mock = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/hashcodecontainers/c-1/remotesigning/sig-1")
                .body_contains("signatureValue");
            then.status(200).json_body(json!({ "result": "OK" }));
        })
        .await;
    let get_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/hashcodecontainers/c-1");
            then.status(200).json_body(json!({
                "container": hashcode_container_b64(&[("fail.txt", b"hello")]),
            }));
        })
        .await;

    let client = Client::new(&test_conf(&server.base_url())).expect("client");

    client
        .create_container("s1", vec![fail_txt()])
        .await
        .expect("create container");

    let (hash, algorithm) = client
        .start_remote_signing("s1", CERT_DER)
        .await
        .expect("start signing");
    assert_eq!(algorithm, "SHA-512");
    assert_eq!(hash.len(), 64);

    client
        .finalize_remote_signing("s1", b"signature-value")
        .await
        .expect("finalize signing");

    let mut output = Cursor::new(Vec::new());
    client
        .write_container("s1", &mut output)
        .await
        .expect("write container");

    // The written container is a complete ASiC-E again: mimetype first,
    // exactly one data file with the original contents.
    let mut archive = ZipArchive::new(Cursor::new(output.into_inner())).expect("open zip");
    assert_eq!(archive.len(), 2);
    {
        let mut first = archive.by_index(0).expect("first entry");
        assert_eq!(first.name(), "mimetype");
        let mut mimetype = String::new();
        first.read_to_string(&mut mimetype).expect("read mimetype");
        assert_eq!(mimetype, ASICE_MIMETYPE);
    }
    {
        let mut datafile = archive.by_name("fail.txt").expect("fail.txt");
        let mut contents = String::new();
        datafile.read_to_string(&mut contents).expect("read fail.txt");
        assert_eq!(contents, "hello");
    }

    create_mock.assert_async().await;
    start_mock.assert_async().await;
    finalize_mock.assert_async().await;
    get_mock.assert_async().await;
}

#[tokio::test]
async fn unknown_digest_algorithm_is_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers");
            then.status(200).json_body(json!({ "containerId": "c-2" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers/c-2/remotesigning");
            then.status(200).json_body(json!({
                "dataToSign": BASE64.encode(b"xades-signed-info"),
                "digestAlgorithm": "SHA256",
                "generatedSignatureId": "sig-2",
            }));
        })
        .await;

    let client = Client::new(&test_conf(&server.base_url())).expect("client");
    client
        .create_container("s1", vec![fail_txt()])
        .await
        .expect("create container");

    let err = client.start_remote_signing("s1", CERT_DER).await.unwrap_err();
    assert!(matches!(err, SigaError::Validation(_)));
    assert!(err.to_string().contains("unknown digestAlgorithm: SHA256"));
}

#[tokio::test]
async fn bad_hmac_configuration_fails_client_construction() {
    let mut conf = test_conf("https://siga.example.com");
    conf.hmac_algorithm = "HMAC-MD5".into();
    let err = Client::new(&conf).unwrap_err();
    assert!(err.to_string().contains("unknown HMACAlgorithm: HMAC-MD5"));
}

#[tokio::test]
async fn finalize_before_start_fails() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers");
            then.status(200).json_body(json!({ "containerId": "c-3" }));
        })
        .await;

    let client = Client::new(&test_conf(&server.base_url())).expect("client");
    client
        .create_container("s1", vec![fail_txt()])
        .await
        .expect("create container");

    let err = client
        .finalize_remote_signing("s1", b"signature")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("container signing not started"));

    let err = client.request_mobile_id_signing_status("s1").await.unwrap_err();
    assert!(err.to_string().contains("container signing not started"));
}

#[tokio::test]
async fn operations_without_an_open_container_are_not_found() {
    let client = Client::new(&test_conf("http://127.0.0.1:1")).expect("client");
    let err = client.start_remote_signing("ghost", CERT_DER).await.unwrap_err();
    assert!(matches!(err, SigaError::NotFound(_)));
}

#[tokio::test]
async fn close_container_is_idempotent() {
    // No mocks: a close on a session without state must not call SiGa.
    let client = Client::new(&test_conf("http://127.0.0.1:1")).expect("client");
    client.close_container("nobody").await.expect("close is a no-op");
}

#[tokio::test]
async fn close_interrupts_remote_signing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers");
            then.status(200).json_body(json!({ "containerId": "c-4" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers/c-4/remotesigning");
            then.status(200).json_body(json!({
                "dataToSign": BASE64.encode(b"xades-signed-info"),
                "digestAlgorithm": "SHA512",
                "generatedSignatureId": "sig-4",
            }));
        })
        .await;
    let delete_mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/hashcodecontainers/c-4");
            then.status(200);
        })
        .await;

    let client = Client::new(&test_conf(&server.base_url())).expect("client");
    client
        .create_container("s1", vec![fail_txt()])
        .await
        .expect("create container");
    client
        .start_remote_signing("s1", CERT_DER)
        .await
        .expect("start signing");

    client.close_container("s1").await.expect("close container");
    delete_mock.assert_async().await;

    let err = client
        .finalize_remote_signing("s1", b"signature")
        .await
        .unwrap_err();
    assert!(matches!(err, SigaError::NotFound(_)));
}

#[tokio::test]
async fn mobile_id_happy_path() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers");
            then.status(200).json_body(json!({ "containerId": "c-5" }));
        })
        .await;
    let start_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hashcodecontainers/c-5/mobileidsigning")
                .body_contains(PERSON)
                .body_contains(PHONE)
                .body_contains(MESSAGE)
                .body_contains("\"language\":\"EST\"");
            then.status(200).json_body(json!({
                "challengeId": "4321",
                "generatedSignatureId": "mid-sig-5",
            }));
        })
        .await;
    let outstanding_mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/hashcodecontainers/c-5/mobileidsigning/mid-sig-5/status");
            then.status(200)
                .json_body(json!({ "midStatus": "OUTSTANDING_TRANSACTION" }));
        })
        .await;

    let client = Client::new(&test_conf(&server.base_url())).expect("client");
    client
        .create_container("s1", vec![fail_txt()])
        .await
        .expect("create container");

    let challenge = client
        .start_mobile_id_signing("s1", PERSON, PHONE, MESSAGE)
        .await
        .expect("start signing");
    assert_eq!(challenge, "4321");
    start_mock.assert_async().await;

    // Outstanding: not done yet.
    let done = client
        .request_mobile_id_signing_status("s1")
        .await
        .expect("poll status");
    assert!(!done);

    // Replace the poll answer with completion.
    outstanding_mock.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/hashcodecontainers/c-5/mobileidsigning/mid-sig-5/status");
            then.status(200).json_body(json!({ "midStatus": "SIGNATURE" }));
        })
        .await;

    let done = client
        .request_mobile_id_signing_status("s1")
        .await
        .expect("poll status");
    assert!(done);

    // The ceremony is finished; polling again is a state error.
    let err = client.request_mobile_id_signing_status("s1").await.unwrap_err();
    assert!(err.to_string().contains("container signing not started"));
}

#[tokio::test]
async fn mobile_id_failure_status_is_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers");
            then.status(200).json_body(json!({ "containerId": "c-6" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers/c-6/mobileidsigning");
            then.status(200).json_body(json!({
                "challengeId": "4321",
                "generatedSignatureId": "mid-sig-6",
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/hashcodecontainers/c-6/mobileidsigning/mid-sig-6/status");
            then.status(200)
                .json_body(json!({ "midStatus": "EXPIRED_TRANSACTION" }));
        })
        .await;

    let client = Client::new(&test_conf(&server.base_url())).expect("client");
    client
        .create_container("s1", vec![fail_txt()])
        .await
        .expect("create container");
    client
        .start_mobile_id_signing("s1", PERSON, PHONE, MESSAGE)
        .await
        .expect("start signing");

    let err = client.request_mobile_id_signing_status("s1").await.unwrap_err();
    assert!(matches!(err, SigaError::Service(_)));
    assert!(err.to_string().contains("EXPIRED_TRANSACTION"));
}

#[tokio::test]
async fn upload_then_close_roundtrip() {
    let server = MockServer::start_async().await;
    let upload_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/upload/hashcodecontainers")
                .body_contains("container");
            then.status(200).json_body(json!({ "containerId": "c-up" }));
        })
        .await;
    let delete_mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/hashcodecontainers/c-up");
            then.status(200);
        })
        .await;

    let client = Client::new(&test_conf(&server.base_url())).expect("client");
    let container = complete_container(&[("fail.txt", b"hello")]);
    client
        .upload_container("s1", Cursor::new(container))
        .await
        .expect("upload container");
    upload_mock.assert_async().await;

    client.close_container("s1").await.expect("close container");
    delete_mock.assert_async().await;
}

#[tokio::test]
async fn create_container_closes_the_previous_one() {
    let server = MockServer::start_async().await;
    let create_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers");
            then.status(200).json_body(json!({ "containerId": "c-old" }));
        })
        .await;

    let client = Client::new(&test_conf(&server.base_url())).expect("client");
    client
        .create_container("s1", vec![fail_txt()])
        .await
        .expect("create container");
    create_mock.assert_async().await;

    let delete_mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/hashcodecontainers/c-old");
            then.status(200);
        })
        .await;

    client
        .create_container("s1", vec![fail_txt()])
        .await
        .expect("create second container");
    delete_mock.assert_async().await;
}

/// Session store whose status writes always fail; everything else is a
/// no-op. Used to drive the compensation path.
struct FailingStatusStore;

impl SessionStore for FailingStatusStore {
    fn put_status(&self, _session: &str, _status: SessionStatus) -> SigaResult<()> {
        Err(SigaError::Internal("status store unavailable".into()))
    }

    fn status(&self, _session: &str) -> SigaResult<Option<SessionStatus>> {
        Ok(None)
    }

    fn remove_status(&self, _session: &str) -> SigaResult<()> {
        Ok(())
    }

    fn put_data(&self, _key: &str, _contents: Vec<u8>) -> SigaResult<()> {
        Ok(())
    }

    fn data(&self, key: &str) -> SigaResult<Vec<u8>> {
        Err(SigaError::NotFound(format!("no data for {key}")))
    }

    fn remove_data(&self, _key: &str) -> SigaResult<()> {
        Ok(())
    }

    fn close(&self) -> SigaResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn failed_status_write_compensates_with_a_delete() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers");
            then.status(200).json_body(json!({ "containerId": "c-comp" }));
        })
        .await;
    let delete_mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/hashcodecontainers/c-comp");
            then.status(200);
        })
        .await;

    let client = Client::with_store(
        &test_conf(&server.base_url()),
        Arc::new(FailingStatusStore),
    )
    .expect("client");

    let err = client
        .create_container("s1", vec![fail_txt()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("put status"));

    // The compensating DELETE runs in the background; give it a moment.
    for _ in 0..100 {
        if delete_mock.hits_async().await >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    delete_mock.assert_async().await;
}

#[tokio::test]
async fn service_errors_carry_status_code_and_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hashcodecontainers");
            then.status(400).json_body(json!({
                "errorCode": "INVALID_REQUEST",
                "errorMessage": "data file name is invalid",
            }));
        })
        .await;

    let client = Client::new(&test_conf(&server.base_url())).expect("client");
    let err = client
        .create_container("s1", vec![fail_txt()])
        .await
        .unwrap_err();

    match &err {
        SigaError::Service(service) => {
            assert_eq!(service.status, 400);
            assert_eq!(service.code.as_deref(), Some("INVALID_REQUEST"));
            assert_eq!(service.message.as_deref(), Some("data file name is invalid"));
        }
        other => panic!("expected service error, got {other}"),
    }
    assert!(err.to_string().contains("http 400"));
    assert!(err.to_string().contains("INVALID_REQUEST"));
}
