/*!
 * Tests for configuration file handling
 */

use subloom::app_config::{Config, LogLevel};

use crate::common::{create_temp_dir, create_test_file};

#[test]
fn test_config_saveThenLoad_shouldKeepValues() {
    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("subloom.json");
    let mut config = Config::default();
    config.target_language = "ja".into();
    config.generation.genre = Some("anime".into());
    config.batch.batch_size = 12;
    config.quality.acceptance.max_issues_per_minute = 2.5;
    config.log_level = LogLevel::Debug;

    config.save(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.target_language, "ja");
    assert_eq!(loaded.generation.genre.as_deref(), Some("anime"));
    assert_eq!(loaded.batch.batch_size, 12);
    assert_eq!(loaded.quality.acceptance.max_issues_per_minute, 2.5);
    assert_eq!(loaded.log_level, LogLevel::Debug);
}

#[test]
fn test_config_fromFile_withInvalidLanguage_shouldFail() {
    let dir = create_temp_dir().unwrap();
    let path = create_test_file(dir.path(), "bad.json", r#"{"target_language": "xx-nope"}"#).unwrap();

    let err = Config::from_file(&path).unwrap_err();

    assert!(err.to_string().contains("Invalid language code"));
}

#[test]
fn test_config_fromFile_withMissingFile_shouldNameThePath() {
    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("absent.json");

    let err = Config::from_file(&path).unwrap_err();

    assert!(format!("{:#}", err).contains("absent.json"));
}

#[test]
fn test_config_fromFile_withGlossary_shouldParseItems() {
    let dir = create_temp_dir().unwrap();
    let json = r#"{
        "source_language": "ja",
        "target_language": "en",
        "generation": {"glossary": [{"term": "Konoha", "translation": "Leaf Village", "notes": "place"}]}
    }"#;
    let path = create_test_file(dir.path(), "glossary.json", json).unwrap();

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.generation.glossary.len(), 1);
    assert_eq!(config.generation.glossary[0].translation, "Leaf Village");
    assert_eq!(config.generation.chunk_duration_secs, 300.0);
}
