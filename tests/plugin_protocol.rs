//! Docker plugin protocol exercised against a driver with in-memory doubles.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, test, web};
use camino::Utf8PathBuf;
use cinderblock::plugin::{PLUGIN_CONTENT_TYPE, VolumePlugin, configure};
use cinderblock::test_support::{FakeCloud, FakeHost, FixedIdentity, volume_fixture};
use cinderblock::{DriverSettings, PollPolicy, VolumeDriver, VolumeStatus};
use serde_json::{Value, json};
use tempfile::TempDir;

type Driver = VolumeDriver<FakeCloud, FakeHost, FixedIdentity>;

fn driver(root: &TempDir, identity: FixedIdentity) -> Arc<Driver> {
    let path = Utf8PathBuf::from_path_buf(root.path().to_path_buf()).expect("utf8 tempdir");
    let mut settings = DriverSettings::new(path);
    settings.device_wait = PollPolicy::new(Duration::from_millis(1), 3);
    Arc::new(VolumeDriver::new(
        FakeCloud::new(),
        FakeHost::new(),
        identity,
        settings,
    ))
}

fn post(endpoint: &str, body: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri(endpoint)
        .insert_header(("Content-Type", PLUGIN_CONTENT_TYPE))
        .set_payload(body.to_owned())
}

macro_rules! call {
    ($app:expr, $endpoint:expr, $body:expr) => {{
        let body: Value =
            test::call_and_read_body_json($app, post($endpoint, $body).to_request()).await;
        body
    }};
}

#[actix_web::test]
async fn activate_announces_volume_driver() {
    let root = TempDir::new().expect("tempdir");
    let plugin: Arc<dyn VolumePlugin> = driver(&root, FixedIdentity::new("local"));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(plugin))
            .configure(configure),
    )
    .await;

    let body = call!(&app, "/Plugin.Activate", "");
    assert_eq!(body, json!({"Implements": ["VolumeDriver"]}));

    let body = call!(&app, "/VolumeDriver.Capabilities", "{}");
    assert_eq!(body, json!({"Capabilities": {"Scope": "global"}, "Err": ""}));
}

#[actix_web::test]
async fn lifecycle_over_the_wire() {
    let root = TempDir::new().expect("tempdir");
    let driver = driver(&root, FixedIdentity::new("local"));
    let plugin: Arc<dyn VolumePlugin> = driver.clone();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(plugin))
            .configure(configure),
    )
    .await;
    let mountpoint = root.path().join("db1").to_string_lossy().into_owned();

    let create = r#"{"Name":"db1","Opts":{"size":"10","type":"ssd"}}"#;
    let body = call!(&app, "/VolumeDriver.Create", create);
    assert_eq!(body, json!({"Err": ""}));
    let created = driver.cloud().volume("vol-1").expect("created");
    assert_eq!(created.size, 10);
    assert_eq!(created.volume_type.as_deref(), Some("ssd"));

    let body = call!(&app, "/VolumeDriver.Get", r#"{"Name":"db1"}"#);
    assert_eq!(
        body,
        json!({"Volume": {"Name": "db1", "Mountpoint": mountpoint}, "Err": ""})
    );

    let body = call!(&app, "/VolumeDriver.List", "{}");
    assert_eq!(body, json!({"Volumes": [{"Name": "db1"}], "Err": ""}));

    let body = call!(&app, "/VolumeDriver.Mount", r#"{"Name":"db1","ID":"c1"}"#);
    assert_eq!(body, json!({"Mountpoint": mountpoint, "Err": ""}));

    let body = call!(&app, "/VolumeDriver.Path", r#"{"Name":"db1"}"#);
    assert_eq!(body, json!({"Mountpoint": mountpoint, "Err": ""}));

    let body = call!(&app, "/VolumeDriver.Unmount", r#"{"Name":"db1","ID":"c1"}"#);
    assert_eq!(body, json!({"Err": ""}));

    let body = call!(&app, "/VolumeDriver.Remove", r#"{"Name":"db1"}"#);
    assert_eq!(body, json!({"Err": ""}));
    assert_eq!(driver.cloud().volume_count(), 0);
}

#[actix_web::test]
async fn driver_errors_are_reported_in_err() {
    let root = TempDir::new().expect("tempdir");
    let driver = driver(&root, FixedIdentity::unreadable());
    driver
        .cloud()
        .insert_volume(volume_fixture("vol-1", "db1", VolumeStatus::Available));
    let plugin: Arc<dyn VolumePlugin> = driver.clone();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(plugin))
            .configure(configure),
    )
    .await;

    let body = call!(&app, "/VolumeDriver.Get", r#"{"Name":"missing"}"#);
    assert_eq!(body, json!({"Err": "volume 'missing' not found"}));

    let body = call!(&app, "/VolumeDriver.Mount", r#"{"Name":"db1","ID":"c1"}"#);
    let message = body["Err"].as_str().expect("Err string");
    assert!(message.contains("permission denied"), "{message}");
    assert!(
        !driver.cloud().trace().iter().any(|entry| entry == "list db1"),
        "identity is read before any cloud call"
    );

    let body = call!(&app, "/VolumeDriver.Path", r#"{"Name":"../etc"}"#);
    let message = body["Err"].as_str().expect("Err string");
    assert!(message.contains("../etc"), "{message}");
}

#[actix_web::test]
async fn malformed_bodies_are_reported_in_err() {
    let root = TempDir::new().expect("tempdir");
    let plugin: Arc<dyn VolumePlugin> = driver(&root, FixedIdentity::new("local"));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(plugin))
            .configure(configure),
    )
    .await;

    let body = call!(&app, "/VolumeDriver.Create", "not json");
    let message = body["Err"].as_str().expect("Err string");
    assert!(message.starts_with("malformed request"), "{message}");
}
