//! Cross-process determinism.
//!
//! Proves:
//! 1. The `ledger_fixture` binary prints identical hashes under different
//!    working directories, locales, time zones and unrelated env vars
//! 2. Those hashes equal the ones computed in this process

use std::path::Path;
use std::process::Command;

use evidentia_harness::calibration::{
    run_scenario, CalibrationSettings, Scenario, SyntheticGenerator,
};
use evidentia_harness::config::PipelineConfig;
use evidentia_kernel::proof::dual_hash::dual_hash;
use lock_tests::fixtures::fixed_ledger;

/// Path of the compiled `ledger_fixture` binary next to this test binary.
fn binary_path() -> String {
    let mut path = std::env::current_exe()
        .expect("can resolve test binary path")
        .parent()
        .expect("binary dir exists")
        .parent()
        .expect("deps parent exists")
        .to_path_buf();
    path.push("ledger_fixture");
    path.to_string_lossy().to_string()
}

fn workspace_root() -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("tests/ exists")
        .parent()
        .expect("workspace root exists")
        .to_string_lossy()
        .to_string()
}

fn run_variant(work_dir: &str, env_overrides: &[(&str, &str)]) -> String {
    let bin = binary_path();
    let mut command = Command::new(&bin);
    command
        .current_dir(work_dir)
        .env_remove("LC_ALL")
        .env_remove("LC_COLLATE")
        .env_remove("LANG")
        .env_remove("LANGUAGE")
        .env_remove("RUST_LOG");
    for &(key, val) in env_overrides {
        command.env(key, val);
    }

    let output = command.output().unwrap_or_else(|e| {
        panic!("failed to spawn {bin} (work_dir={work_dir}, overrides={env_overrides:?}): {e}")
    });
    assert!(
        output.status.success(),
        "ledger_fixture exited with {}: stderr={}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("stdout is valid UTF-8")
}

fn field<'a>(output: &'a str, key: &str) -> &'a str {
    output
        .lines()
        .find_map(|l| l.strip_prefix(key)?.strip_prefix('='))
        .unwrap_or_else(|| panic!("output missing {key}:\n{output}"))
}

// --- Cross-process ---

#[test]
fn crossproc_determinism_four_env_variants() {
    let root = workspace_root();
    let baseline = run_variant(&root, &[]);
    assert!(field(&baseline, "head_hash").starts_with("sha256:"));
    assert_eq!(field(&baseline, "verdict"), "CONTINUE");

    let variant_cwd = run_variant("/tmp", &[]);
    assert_eq!(baseline, variant_cwd, "output differs when cwd changes");

    let variant_locale = run_variant(&root, &[("LC_ALL", "C"), ("LANG", "C")]);
    assert_eq!(baseline, variant_locale, "output differs when LC_ALL=C LANG=C");

    let variant_noise = run_variant(
        &root,
        &[
            ("EVIDENTIA_NOISE", "should_not_matter"),
            ("TZ", "America/New_York"),
            ("HOME", "/nonexistent"),
        ],
    );
    assert_eq!(baseline, variant_noise, "output differs under unrelated env vars");
}

#[test]
fn crossproc_matches_in_process() {
    let output = run_variant(&workspace_root(), &[]);

    let settings = CalibrationSettings {
        cycles: 20,
        ..CalibrationSettings::default()
    };
    let sample = SyntheticGenerator::new(settings.seed).clean_batch("sample", "sample-1", 200);
    let evidence = dual_hash(&sample).unwrap();
    let mut ledger = fixed_ledger();
    let run = run_scenario(
        Scenario::DoltonCalibration,
        &settings,
        &PipelineConfig::default(),
        &mut ledger,
    )
    .unwrap();

    assert_eq!(
        field(&output, "batch_order_hash"),
        evidence.order_sensitive_hash.as_str()
    );
    assert_eq!(field(&output, "batch_content_hash"), evidence.content_hash.as_str());
    assert_eq!(
        field(&output, "config_digest"),
        run.result.config_digest.as_str()
    );
    assert_eq!(field(&output, "receipt_count"), ledger.len().to_string());
    assert_eq!(
        field(&output, "head_hash"),
        ledger.last().unwrap().self_hash.as_str()
    );
}
