use cohort::psa::PsaBatch;
use std::{env, fs, path::PathBuf, process::Command};

fn run_bin(args: &[&str]) -> bool {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_cohort"));

    let output = Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command");

    let stdout_str = std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
    let stderr_str = std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");
    if !output.status.success() {
        eprintln!("failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n");
    }
    output.status.success()
}

fn read_json(path: PathBuf) -> serde_json::Value {
    let contents = fs::read_to_string(&path).expect("failed to read output file");
    serde_json::from_str(&contents).expect("failed to parse output file")
}

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    fs::copy("models/hiv/config.toml", test_dir.join("config.toml"))
        .expect("failed to copy config file");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--model-dir", test_dir_str, "run"]));

    let base_case = read_json(test_dir.join("base-case.json"));
    let icer = base_case["incremental"][1]["icer"]
        .as_f64()
        .expect("missing icer");
    assert!((icer - 6276.0).abs() < 5.0, "icer was {icer}");
    assert_eq!(base_case["arms"][0]["fraction_alive"].as_array().map(Vec::len), Some(20));

    assert!(run_bin(&["--model-dir", test_dir_str, "psa", "--n-samples", "40", "--seed", "7"]));
    assert!(run_bin(&["--model-dir", test_dir_str, "psa", "--n-samples", "24"]));
    assert!(test_dir.join("psa-0000.msgpack").is_file());
    assert!(test_dir.join("psa-0001.msgpack").is_file());

    assert!(run_bin(&["--model-dir", test_dir_str, "analyze"]));

    let summary = read_json(test_dir.join("psa-summary.json"));
    let n_vals = summary[1]["incremental"][0]["inc_cost"]["n_vals"].as_u64();
    assert_eq!(n_vals, Some(64));
    let ceac = summary[2]["ceac"].as_array().expect("missing ceac");
    assert_eq!(ceac.len(), 7);
    for point in ceac {
        let total: f64 = point["prob_optimal"]
            .as_array()
            .expect("missing probabilities")
            .iter()
            .filter_map(|prob| prob.as_f64())
            .sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    assert!(run_bin(&["--model-dir", test_dir_str, "clean"]));
    assert!(!test_dir.join("base-case.json").exists());
    assert!(!test_dir.join("psa-0000.msgpack").exists());
    assert!(!test_dir.join("psa-summary.json").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_config_fails() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("invalid_config_fails");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config = fs::read_to_string("models/hiv/config.toml").expect("failed to read config file");
    let config = config.replace("[0.0, 0.0, 1312.0, 437.0]", "[0.0, 0.0, -1312.0, 437.0]");
    fs::write(test_dir.join("config.toml"), config).expect("failed to write config file");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(!run_bin(&["--model-dir", test_dir_str, "run"]));
    assert!(!test_dir.join("base-case.json").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn missing_batch_is_skipped() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("missing_batch_is_skipped");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    fs::copy("models/hiv/config.toml", test_dir.join("config.toml"))
        .expect("failed to copy config file");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--model-dir", test_dir_str, "psa", "--n-samples", "8", "--seed", "3"]));
    assert!(run_bin(&["--model-dir", test_dir_str, "psa", "--n-samples", "6", "--seed", "3"]));
    let second = fs::read(test_dir.join("psa-0001.msgpack")).expect("failed to read second batch");

    fs::remove_file(test_dir.join("psa-0000.msgpack")).expect("failed to remove first batch");
    assert!(run_bin(&["--model-dir", test_dir_str, "psa", "--n-samples", "5", "--seed", "3"]));

    let kept = fs::read(test_dir.join("psa-0001.msgpack")).expect("failed to read second batch");
    assert_eq!(kept, second);
    assert!(test_dir.join("psa-0002.msgpack").is_file());
    assert!(!test_dir.join("psa-0000.msgpack").exists());

    let file = fs::File::open(test_dir.join("psa-0002.msgpack")).expect("failed to open third batch");
    let batch: PsaBatch = rmp_serde::decode::from_read(file).expect("failed to decode third batch");
    assert_eq!(batch.stream_offset, 2 * (1u64 << 32));
    assert_eq!(batch.samples.len(), 5);

    assert!(run_bin(&["--model-dir", test_dir_str, "analyze"]));

    let summary = read_json(test_dir.join("psa-summary.json"));
    let n_vals = summary[1]["incremental"][0]["inc_cost"]["n_vals"].as_u64();
    assert_eq!(n_vals, Some(11));

    fs::remove_dir_all(&test_dir).ok();
}
