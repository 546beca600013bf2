use convenient_params::{ParameterBundle, ParamsError};
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_load_sidecar_from_disk() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("experiment.json");
    fs::write(
        &path,
        r#"{"inputParameters": {"binCuts": [1, 2]}, "analysisParameters": {}, "advancedParameters": {}}"#,
    )
    .unwrap();

    let bundle = ParameterBundle::load(&path).await.unwrap();
    assert_eq!(bundle.path, path);
    assert_eq!(bundle.value()["inputParameters"]["binCuts"][1], 2);
    assert_eq!(bundle.checksum.len(), 64);
}

#[tokio::test]
async fn test_load_missing_file_is_io_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("absent.json");

    let err = ParameterBundle::load(&path).await.unwrap_err();
    assert!(matches!(err, ParamsError::Io(p, _) if p == path));
}

#[tokio::test]
async fn test_load_malformed_file_is_parse_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.json");
    fs::write(&path, "{ \"inputParameters\": ").unwrap();

    let err = ParameterBundle::load(&path).await.unwrap_err();
    assert!(matches!(err, ParamsError::Parse(..)));
    assert!(err.to_string().contains("broken.json"));
}
