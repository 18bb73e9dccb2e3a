//! Sample catalog scans over generated WAV libraries

mod helpers;

use helpers::{generate_sample_library, generate_sample_wav, AudioConfig};
use sbe_engine::models::{FailureKind, Sample, SampleId};
use sbe_engine::services::SampleCatalog;
use std::path::Path;
use tempfile::TempDir;

fn ids(samples: &[Sample]) -> Vec<SampleId> {
    samples.iter().map(|s| s.id.clone()).collect()
}

fn file_name(sample: &Sample) -> String {
    sample.path.file_name().unwrap().to_string_lossy().to_string()
}

#[test]
fn test_scan_hashes_and_describes_samples() {
    let dir = TempDir::new().unwrap();
    generate_sample_wav(&dir.path().join("kicks/kick_01.wav"), &AudioConfig::default()).unwrap();
    generate_sample_wav(
        &dir.path().join("pads/warm.wav"),
        &AudioConfig {
            duration_seconds: 0.5,
            frequency_hz: 330.0,
            ..AudioConfig::default()
        },
    )
    .unwrap();
    std::fs::write(dir.path().join("readme.txt"), b"not a sample").unwrap();

    let samples = SampleCatalog::default().scan_parallel(dir.path()).unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(file_name(&samples[0]), "kick_01.wav");
    assert_eq!(file_name(&samples[1]), "warm.wav");

    for sample in &samples {
        assert!(sample.id.is_content_hash());
        assert_eq!(sample.id.as_str().len(), 64);
        assert!(sample.local_failure.is_none());
        assert!(sample.size_bytes > 44);
    }

    assert_eq!(samples[0].category.as_deref(), Some("kick"));
    assert_eq!(samples[1].category.as_deref(), Some("pad"));

    let duration = samples[1].duration_secs.unwrap();
    assert!((duration - 0.5).abs() < 0.05, "duration {}", duration);
}

#[test]
fn test_lazy_and_parallel_scans_agree() {
    let dir = TempDir::new().unwrap();
    generate_sample_library(&dir.path().join("a"), "loop", 4).unwrap();
    generate_sample_library(&dir.path().join("b"), "vox", 3).unwrap();

    let catalog = SampleCatalog::new(3);
    let lazy: Vec<Sample> = catalog.scan(dir.path()).unwrap().collect();
    let parallel = catalog.scan_parallel(dir.path()).unwrap();

    assert_eq!(lazy.len(), 7);
    assert_eq!(ids(&lazy), ids(&parallel));
}

#[test]
fn test_identical_content_is_cataloged_once() {
    let dir = TempDir::new().unwrap();
    let original = generate_sample_wav(&dir.path().join("a_first.wav"), &AudioConfig::default()).unwrap();
    std::fs::copy(&original, dir.path().join("b_copy.wav")).unwrap();

    let samples = SampleCatalog::default().scan_parallel(dir.path()).unwrap();

    assert_eq!(samples.len(), 1);
    assert_eq!(file_name(&samples[0]), "a_first.wav");
}

#[test]
fn test_hash_ignores_location() {
    let dir = TempDir::new().unwrap();
    let path = generate_sample_wav(&dir.path().join("one/tone.wav"), &AudioConfig::default()).unwrap();
    let first = SampleCatalog::default().scan_parallel(&dir.path().join("one")).unwrap();

    let moved = dir.path().join("two/renamed.wav");
    std::fs::create_dir_all(moved.parent().unwrap()).unwrap();
    std::fs::rename(&path, &moved).unwrap();
    let second = SampleCatalog::default().scan_parallel(&dir.path().join("two")).unwrap();

    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn test_bad_files_become_local_failures() {
    let dir = TempDir::new().unwrap();
    generate_sample_wav(&dir.path().join("good.wav"), &AudioConfig::default()).unwrap();
    std::fs::write(dir.path().join("mislabeled.wav"), b"plain text pretending to be a wav file").unwrap();

    let samples = SampleCatalog::default().scan_parallel(dir.path()).unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(file_name(&samples[0]), "good.wav");
    assert!(samples[0].local_failure.is_none());
    assert_eq!(file_name(&samples[1]), "mislabeled.wav");
    assert_eq!(samples[1].local_failure, Some(FailureKind::UnsupportedFormat));
}

#[test]
fn test_ignored_directories_are_skipped() {
    let dir = TempDir::new().unwrap();
    generate_sample_wav(&dir.path().join("kept.wav"), &AudioConfig::default()).unwrap();
    generate_sample_wav(
        &dir.path().join(".git/objects/hidden.wav"),
        &AudioConfig {
            frequency_hz: 550.0,
            ..AudioConfig::default()
        },
    )
    .unwrap();

    let samples = SampleCatalog::default().scan_parallel(dir.path()).unwrap();

    assert_eq!(samples.len(), 1);
    assert_eq!(file_name(&samples[0]), "kept.wav");
}

#[test]
fn test_empty_collection() {
    let dir = TempDir::new().unwrap();
    let samples = SampleCatalog::default().scan_parallel(dir.path()).unwrap();
    assert!(samples.is_empty());
}

#[test]
fn test_file_root_is_rejected() {
    let dir = TempDir::new().unwrap();
    let file = generate_sample_wav(&dir.path().join("solo.wav"), &AudioConfig::default()).unwrap();
    assert!(SampleCatalog::default().scan_parallel(Path::new(&file)).is_err());
}
