use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relctl::datahub::{DowntimePoint, PushgatewaySink};
use relctl::polarion::{PolarionSink, XunitTransformer, JUNIT_FILE};
use relctl::reportportal::{self, LaunchArchive, ReportPortalSink};
use relctl_core::contract::{
    ArtifactTransformer, JobStatus, MockObjectStore, ObjectSummary, ObjectTag, Prepared,
    ReportSink, Submission,
};
use relctl_core::import::{ImportSettings, Importer, ObjectOutcome};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

/// Build a test-result zip holding `files`.
fn archive(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    for (entry, content) in files {
        writer
            .start_file(*entry, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path
}

const METADATA: &str =
    r#"{"name":"osd-e2e","rhmiVersion":"1.2.0","jobURL":"https://ci/job/osd-e2e/17"}"#;

fn submission(payload: PathBuf) -> Submission {
    Submission {
        key: "results/osd-e2e.zip".to_string(),
        name: "osd-e2e".to_string(),
        version: Some("1.2.0".to_string()),
        job_url: Some("https://ci/job/osd-e2e/17".to_string()),
        payload,
        content_sha256: "deadbeef".to_string(),
    }
}

async fn mount_reportportal(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/rhmi/launch/import"))
        .and(header("authorization", "Bearer rp-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "Launch with id = 0c1f-77aa is successfully imported."
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/rhmi/launch/uuid/0c1f-77aa"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 99 })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/rhmi/launch/99/update"))
        .and(body_json(json!({
            "description": "https://ci/job/osd-e2e/17",
            "attributes": [
                { "value": "osd-e2e" },
                { "key": "version", "value": "1.2.0" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "updated" })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/rhmi/launch/99"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": 99, "status": "FAILED" })),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_reportportal_submit_imports_and_updates_launch() {
    let server = MockServer::start().await;
    mount_reportportal(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let zip = archive(dir.path(), "osd-e2e.zip", &[("metadata.json", METADATA)]);

    let sink = ReportPortalSink::new(server.uri(), "rhmi", "rp-token").unwrap();
    let job = sink.submit(&submission(zip)).await.expect("submit succeeds");
    assert_eq!(job, "99");

    // A finished launch counts as done whatever its test verdict.
    assert_eq!(sink.status(&job).await.unwrap(), JobStatus::Succeeded);
}

#[tokio::test]
async fn test_reportportal_in_progress_launch_is_running() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/rhmi/launch/5"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": 5, "status": "IN_PROGRESS" })),
        )
        .mount(&server)
        .await;

    let sink = ReportPortalSink::new(server.uri(), "rhmi", "rp-token").unwrap();
    assert_eq!(sink.status("5").await.unwrap(), JobStatus::Running);
}

#[test]
fn test_launch_archive_skips_zip_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let zip = archive(dir.path(), "bare.zip", &[("junit.xml", "<testsuites/>")]);

    let prepared = LaunchArchive
        .prepare("results/bare.zip", &zip, "abc", dir.path())
        .unwrap();
    assert!(matches!(prepared, Prepared::Skip(reason) if reason.contains("metadata.json")));
}

/// Store, transformer and sink wired as the `report reportportal-import`
/// command wires them, with S3 replaced by a mock.
#[tokio::test]
async fn test_importer_tags_object_after_reportportal_import() {
    let server = MockServer::start().await;
    mount_reportportal(&server).await;
    let fixtures = tempfile::tempdir().unwrap();
    let zip = archive(fixtures.path(), "osd-e2e.zip", &[("metadata.json", METADATA)]);

    let mut store = MockObjectStore::new();
    store.expect_list_objects().returning(|_, _| {
        Ok(vec![
            ObjectSummary {
                key: "results/osd-e2e.zip".to_string(),
                size: Some(128),
            },
            ObjectSummary {
                key: "results/README.txt".to_string(),
                size: Some(4),
            },
        ])
    });
    store
        .expect_get_tags()
        .withf(|_, key| key == "results/osd-e2e.zip")
        .times(1)
        .returning(|_, _| Ok(vec![ObjectTag::new("owner", "qe")]));
    store
        .expect_download()
        .times(1)
        .returning(move |_, _, dest| {
            std::fs::copy(&zip, dest).unwrap();
            Ok(())
        });
    store
        .expect_put_tags()
        .withf(|bucket, key, tags| {
            bucket == "test-results"
                && key == "results/osd-e2e.zip"
                && tags == &vec![ObjectTag::new("owner", "qe"), ObjectTag::new("rp", "true")]
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let mut settings =
        ImportSettings::new("test-results", reportportal::processed_tag()).with_suffix(".zip");
    settings.poll_interval = Duration::from_millis(5);
    let importer = Importer::new(
        Arc::new(store),
        Arc::new(ReportPortalSink::new(server.uri(), "rhmi", "rp-token").unwrap()),
        Arc::new(LaunchArchive),
        settings,
    );

    let report = importer.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.imported(), 1);
    let outcomes: Vec<_> = report
        .objects
        .iter()
        .map(|o| (o.key.as_str(), o.outcome.clone()))
        .collect();
    assert!(outcomes.contains(&(
        "results/osd-e2e.zip",
        ObjectOutcome::Imported {
            job: "99".to_string(),
            tagged: true
        }
    )));
    assert!(outcomes.contains(&("results/README.txt", ObjectOutcome::Filtered)));
}

#[tokio::test]
async fn test_polarion_submit_returns_queued_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/import/xunit"))
        .and(header("authorization", "Basic cWU6c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": { "file.xml": { "job-ids": [555] } }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("file.xml");
    std::fs::write(&payload, "<testsuites/>").unwrap();

    let sink = PolarionSink::new(server.uri(), "qe", "secret").unwrap();
    let job = sink.submit(&submission(payload)).await.unwrap();
    assert_eq!(job, "555");
}

#[tokio::test]
async fn test_polarion_queue_status_mapping() {
    struct TestCase {
        body: serde_json::Value,
        expected: JobStatus,
    }
    let cases = vec![
        TestCase {
            body: json!({ "jobs": [] }),
            expected: JobStatus::Pending,
        },
        TestCase {
            body: json!({ "jobs": [{ "status": "READY" }] }),
            expected: JobStatus::Running,
        },
        TestCase {
            body: json!({ "jobs": [{ "status": "RUNNING" }] }),
            expected: JobStatus::Running,
        },
        TestCase {
            body: json!({ "jobs": [{ "status": "SUCCESS" }] }),
            expected: JobStatus::Succeeded,
        },
        TestCase {
            body: json!({ "jobs": [{ "status": "FAILED" }] }),
            expected: JobStatus::Failed("FAILED".to_string()),
        },
    ];

    for case in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/import/xunit-queue"))
            .and(query_param("jobIds", "555"))
            .respond_with(ResponseTemplate::new(200).set_body_json(case.body.clone()))
            .mount(&server)
            .await;
        let sink = PolarionSink::new(server.uri(), "qe", "secret").unwrap();
        assert_eq!(
            sink.status("555").await.unwrap(),
            case.expected,
            "{}",
            case.body
        );
    }
}

#[test]
fn test_xunit_transformer_writes_payload() {
    let junit = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites><testsuite name="e2e"><testcase name="C03_routes" time="1"/></testsuite></testsuites>"#;
    let dir = tempfile::tempdir().unwrap();
    let zip = archive(
        dir.path(),
        "osd-e2e.zip",
        &[("metadata.json", METADATA), (JUNIT_FILE, junit)],
    );
    let workdir = tempfile::tempdir().unwrap();

    let transformer = XunitTransformer::new().unwrap();
    let prepared = transformer
        .prepare("results/osd-e2e.zip", &zip, "abc", workdir.path())
        .unwrap();
    let Prepared::Submit(submission) = prepared else {
        panic!("expected a submission");
    };
    assert_eq!(submission.name, "RHMI 1.2.0 osd-e2e Automated Tests");
    assert_eq!(submission.payload, workdir.path().join("file.xml"));
    let xunit = std::fs::read_to_string(&submission.payload).unwrap();
    assert!(xunit.contains(r#"value="C03""#));
    assert!(xunit.contains(r#"value="RHMI 1.2.0 osd-e2e Automated Tests""#));
}

#[test]
fn test_xunit_transformer_skips_zip_without_junit() {
    let dir = tempfile::tempdir().unwrap();
    let zip = archive(dir.path(), "osd-e2e.zip", &[("metadata.json", METADATA)]);

    let transformer = XunitTransformer::new().unwrap();
    let prepared = transformer
        .prepare("results/osd-e2e.zip", &zip, "abc", dir.path())
        .unwrap();
    assert!(matches!(prepared, Prepared::Skip(reason) if reason.contains("junit")));
}

#[tokio::test]
async fn test_pushgateway_puts_one_group_per_point() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(
            "/metrics/job/rhmi-product-downtime/product/threescale/query/threescale_api_downtime/version/1.3.0",
        ))
        .and(body_string_contains("rhmi_product_downtime 35"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(
            "/metrics/job/rhmi-product-downtime/product/rhsso/query/rhsso_login_downtime/version/1.3.0",
        ))
        .and(body_string_contains("# TYPE rhmi_product_downtime gauge"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("points.json");
    let points = vec![
        DowntimePoint {
            product: "threescale".into(),
            query: "threescale_api_downtime".into(),
            version: "1.3.0".into(),
            seconds: 35,
        },
        DowntimePoint {
            product: "rhsso".into(),
            query: "rhsso_login_downtime".into(),
            version: "1.3.0".into(),
            seconds: 0,
        },
    ];
    std::fs::write(&payload, serde_json::to_vec(&points).unwrap()).unwrap();

    let sink = PushgatewaySink::new(server.uri(), "rhmi-product-downtime").unwrap();
    let job = sink.submit(&submission(payload)).await.unwrap();
    assert_eq!(job, "rhmi-product-downtime@deadbeef");
    assert_eq!(sink.status(&job).await.unwrap(), JobStatus::Succeeded);
}

#[tokio::test]
async fn test_pushgateway_rejection_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad metric"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("points.json");
    let point = DowntimePoint {
        product: "amq".into(),
        query: "amq_downtime".into(),
        version: "1.3.0".into(),
        seconds: 1,
    };
    std::fs::write(&payload, serde_json::to_vec(&vec![point]).unwrap()).unwrap();

    let sink = PushgatewaySink::new(server.uri(), "rhmi-product-downtime").unwrap();
    let err = sink.submit(&submission(payload)).await.unwrap_err();
    assert!(err.to_string().contains("HTTP 400"), "got: {err}");
}
