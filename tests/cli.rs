//! CLI test cases.
//!
//! Tests which need Tesseract or Poppler installed are marked `#[ignore]`.

use std::{fs, path::Path, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary, ignoring any local settings.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("ocr-desk").unwrap();
    cmd.env_remove("OCR_DESK_TESSERACT")
        .env_remove("OCR_DESK_POPPLER_PATH")
        .env_remove("OCR_DESK_LANG");
    cmd
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_config_defaults() {
    cmd()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""tesseract": "tesseract""#))
        .stdout(predicate::str::contains(r#""language": "eng""#))
        .stdout(predicate::str::contains(r#""dpi": 200"#));
}

#[test]
fn test_config_layers() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("ocr-desk.toml");
    fs::write(
        &config_path,
        "language = \"fra\"\ndpi = 300\n\n[engine]\nsegmentation_mode = \"single-block\"\n",
    )
    .unwrap();

    cmd()
        .env("OCR_DESK_LANG", "deu")
        .arg("config")
        .arg("--config")
        .arg(&config_path)
        .arg("--dpi")
        .arg("150")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""language": "deu""#))
        .stdout(predicate::str::contains(r#""dpi": 150"#))
        .stdout(predicate::str::contains(r#""segmentation_mode": "single-block""#));
}

#[test]
fn test_bad_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("ocr-desk.toml");
    fs::write(&config_path, "dpi = 300\nlangauge = \"eng\"\n").unwrap();

    cmd()
        .arg("config")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config file"));
}

#[test]
fn test_ocr_missing_image() {
    cmd()
        .arg("ocr")
        .arg("no/such/scan.png")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot decode image"));
}

#[test]
fn test_ocr_bad_poppler_path() {
    let dir = tempfile::tempdir().unwrap();
    let pdf_path = dir.path().join("doc.pdf");
    fs::write(&pdf_path, b"%PDF-1.4\n").unwrap();

    cmd()
        .arg("ocr")
        .arg(&pdf_path)
        .arg("--poppler-path")
        .arg(dir.path().join("no-such-dir"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot rasterize document"));
}

#[test]
#[ignore = "Needs tesseract installed"]
fn test_ocr_blank_image() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("blank.png");
    image_to_disk(&image_path);
    let output_path = dir.path().join("out");

    // A blank page has no text, so there's nothing to save.
    cmd()
        .arg("ocr")
        .arg(&image_path)
        .arg("-o")
        .arg(&output_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No text to save"));
}

#[test]
#[ignore = "Needs tesseract installed"]
fn test_langs() {
    cmd()
        .arg("langs")
        .assert()
        .success()
        .stdout(predicate::str::contains("eng"));
}

/// Write an all-white PNG.
fn image_to_disk(path: &Path) {
    image::GrayImage::from_pixel(200, 100, image::Luma([255]))
        .save(path)
        .unwrap();
}
