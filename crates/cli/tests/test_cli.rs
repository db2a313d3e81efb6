use assert_cmd::Command;
use clap::Parser;
use mockito::{Matcher, Mock, Server, ServerGuard};
use restfeature::{Format, OutFields};
use restfeature_cli::{Command as Subcommand, Restfeature};
use rstest::{fixture, rstest};
use tracing::{level_filters::LevelFilter, metadata::Level};

const LAYER: &str = "/arcgis/rest/services/Beaches/MapServer/6";

#[fixture]
fn command() -> Command {
    assert_cmd::cargo::cargo_bin_cmd!("restfeature")
}

fn mock_layer(server: &mut ServerGuard, count: u64) -> Vec<Mock> {
    let metadata = server
        .mock("POST", LAYER)
        .match_body(Matcher::UrlEncoded("f".into(), "json".into()))
        .with_body_from_file("../core/data/beaches-layer.json")
        .create();
    let count = server
        .mock("POST", format!("{LAYER}/query").as_str())
        .match_body(Matcher::UrlEncoded("returnCountOnly".into(), "true".into()))
        .with_body(format!(r#"{{"count": {count}}}"#))
        .create();
    vec![metadata, count]
}

#[rstest]
fn offsets(mut command: Command) {
    command
        .arg("offsets")
        .arg("250")
        .arg("100")
        .arg("--compact-json")
        .arg("true")
        .assert()
        .success()
        .stdout("[0,100,200]\n");
}

#[rstest]
fn offsets_invalid_max_record_count(mut command: Command) {
    command
        .arg("offsets")
        .arg("250")
        .arg("-1")
        .assert()
        .failure();
}

#[rstest]
fn count(mut command: Command) {
    let mut server = Server::new();
    let count = server
        .mock("POST", format!("{LAYER}/query").as_str())
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("returnCountOnly".into(), "true".into()),
            Matcher::UrlEncoded("where".into(), "CITY = 'DAYTONA BEACH'".into()),
        ]))
        .with_body(r#"{"count": 12}"#)
        .expect(1)
        .create();
    command
        .arg("count")
        .arg(format!("{}{LAYER}", server.url()))
        .arg("--where")
        .arg("CITY = 'DAYTONA BEACH'")
        .assert()
        .success()
        .stdout("12\n");
    count.assert();
}

#[rstest]
fn get_to_file(mut command: Command) {
    let mut server = Server::new();
    let _layer = mock_layer(&mut server, 3);
    let chunk = server
        .mock("POST", format!("{LAYER}/query").as_str())
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("returnCountOnly".into(), "false".into()),
            Matcher::UrlEncoded("resultOffset".into(), "0".into()),
        ]))
        .with_body_from_file("../core/data/beaches-0.json")
        .expect(1)
        .create();
    let temp_dir = tempfile::tempdir().unwrap();
    let outfile = temp_dir.path().join("beaches.geojson");
    command
        .arg("get")
        .arg(format!("{}{LAYER}", server.url()))
        .arg(&outfile)
        .assert()
        .success();
    chunk.assert();
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(outfile).unwrap()).unwrap();
    assert_eq!(value["type"], "FeatureCollection");
    assert_eq!(value["features"].as_array().unwrap().len(), 3);
    assert!(value.get("crs").is_some());
}

#[rstest]
fn info(mut command: Command) {
    let mut server = Server::new();
    let _layer = mock_layer(&mut server, 3);
    let output = command
        .arg("info")
        .arg(format!("{}{LAYER}", server.url()))
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["name"], "Beaches");
    assert_eq!(value["count"], 3);
    assert_eq!(value["maxRecordCount"], 100);
    assert_eq!(value["fields"][0]["type"], "OID");
}

#[rstest]
fn not_a_layer_url(mut command: Command) {
    command
        .arg("info")
        .arg("https://example.com/arcgis/rest/services/Beaches/MapServer")
        .assert()
        .failure();
}

#[test]
fn compact_json() {
    let restfeature = Restfeature::parse_from(["restfeature", "offsets", "1", "1"]);
    assert!(!restfeature.compact_json(None));
    assert!(restfeature.compact_json(Some("out.geojson")));

    let restfeature =
        Restfeature::parse_from(["restfeature", "-c", "false", "offsets", "1", "1"]);
    assert!(!restfeature.compact_json(Some("out.geojson")));

    let restfeature = Restfeature::parse_from(["restfeature", "-c", "true", "offsets", "1", "1"]);
    assert!(restfeature.compact_json(None));
}

#[test]
fn log_level() {
    let restfeature = Restfeature::parse_from(["restfeature", "offsets", "1", "1"]);
    assert_eq!(restfeature.log_level(), Some(Level::ERROR));

    let restfeature = Restfeature::parse_from(["restfeature", "-vv", "offsets", "1", "1"]);
    assert_eq!(restfeature.log_level(), Some(Level::INFO));

    let restfeature = Restfeature::parse_from(["restfeature", "-q", "offsets", "1", "1"]);
    assert_eq!(restfeature.log_level(), None);
}

#[test]
fn level_filter() {
    let restfeature = Restfeature::parse_from(["restfeature", "offsets", "1", "1"]);
    assert_eq!(restfeature.level_filter(), LevelFilter::ERROR);

    let restfeature = Restfeature::parse_from(["restfeature", "-q", "offsets", "1", "1"]);
    assert_eq!(restfeature.level_filter(), LevelFilter::OFF);

    let restfeature = Restfeature::parse_from(["restfeature", "-vvvv", "offsets", "1", "1"]);
    assert_eq!(restfeature.level_filter(), LevelFilter::TRACE);
}

#[test]
fn get_arguments() {
    let restfeature = Restfeature::parse_from([
        "restfeature",
        "--token",
        "secret",
        "--concurrency",
        "2",
        "get",
        "https://example.com/arcgis/rest/services/Beaches/MapServer/6",
        "--out-fields",
        "NAME, CITY",
        "--format",
        "geojson",
        "--head",
        "5",
    ]);
    assert_eq!(restfeature.token(), Some("secret"));
    assert_eq!(restfeature.concurrency(), 2);
    let Subcommand::Get {
        out_fields,
        format,
        head,
        where_clause,
        ..
    } = restfeature.command()
    else {
        panic!("expected get");
    };
    assert_eq!(
        out_fields.as_ref(),
        Some(&OutFields::FieldList(vec![
            "NAME".to_string(),
            "CITY".to_string()
        ]))
    );
    assert_eq!(*format, Some(Format::GeoJson));
    assert_eq!(*head, Some(5));
    assert_eq!(where_clause, "1=1");
}

#[test]
fn head_and_sample_conflict() {
    let result = Restfeature::try_parse_from([
        "restfeature",
        "get",
        "https://example.com/arcgis/rest/services/Beaches/MapServer/6",
        "--head",
        "5",
        "--sample",
        "5",
    ]);
    assert!(result.is_err());
}
