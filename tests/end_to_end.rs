// End-to-end runs over small synthetic Price Paid files

use price_paid_stats::{
    read_artifact, run, FinalizedStat, PipelineConfig, PipelineError, RejectReason,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn csv_row(id: u32, price: u64, date: &str, postcode: &str, property_type: &str) -> String {
    format!(
        "\"{{{:08}-0000-0000-0000-000000000000}}\",\"{}\",\"{}\",\"{}\",\"{}\",\"N\",\"F\",\"\",\"10\",\"HIGH STREET\",\"\",\"TOWN\",\"DISTRICT\",\"COUNTY\",\"A\",\"A\"\n",
        id, price, date, postcode, property_type
    )
}

/// 10 rows: districts M1 and SW1A, years 2020 and 2021, types D and F
fn ten_row_input() -> String {
    [
        csv_row(1, 320_000, "2020-03-01 00:00", "M1 1AE", "D"),
        csv_row(2, 1_200_000, "2021-07-09 00:00", "SW1A 2AA", "D"),
        csv_row(3, 150_000, "2020-11-30 00:00", "M1 2AB", "F"),
        csv_row(4, 600_001, "2020-01-15 00:00", "sw1a 1aa", "F"),
        csv_row(5, 160_000, "2021-02-02 00:00", "M1 3HF", "F"),
        csv_row(6, 300_000, "2020-05-20 00:00", "M1 1AE", "D"),
        csv_row(7, 1_000_000, "2020-08-08 00:00", "SW1A 2AA", "D"),
        csv_row(8, 650_000, "2021-12-31 00:00", "SW1A 1AA", "F"),
        csv_row(9, 500_000, "2020-09-01 00:00", "SW1A 1AA", "F"),
        csv_row(10, 330_000, "2021-04-04 00:00", "M1 1AE", "D"),
    ]
    .concat()
}

fn write_input(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("pp-sample.csv");
    fs::write(&path, content).unwrap();
    path
}

fn stat(avg: u64, median: u64, count: u64) -> FinalizedStat {
    FinalizedStat { avg, median, count }
}

#[test]
fn test_ten_rows_match_hand_computed_stats() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path(), &ten_row_input());
    let out = dir.path().join("prices");

    let config = PipelineConfig::new(&input, &out).with_batch_size(3).with_workers(2);
    let report = run(&config).unwrap();

    println!("Report: {}", report.summary());

    assert_eq!(report.stats.total_rows, 10);
    assert_eq!(report.stats.rejected_rows(), 0);
    assert_eq!(report.years, vec![2020, 2021]);
    assert_eq!(report.artifacts.len(), 2);

    let y2020 = read_artifact(&out.join("2020.json")).unwrap();
    assert_eq!(y2020.year, 2020);
    assert_eq!(y2020.data.len(), 2);

    let m1 = &y2020.data["M1"];
    assert_eq!(m1["D"], stat(310_000, 310_000, 2));
    assert_eq!(m1["F"], stat(150_000, 150_000, 1));
    // (150_000 + 300_000 + 320_000) / 3 = 256_666.67
    assert_eq!(m1["A"], stat(256_667, 300_000, 3));

    let sw1a = &y2020.data["SW1A"];
    assert_eq!(sw1a["D"], stat(1_000_000, 1_000_000, 1));
    // 1_100_001 / 2 = 550_000.5 rounds half to even
    assert_eq!(sw1a["F"], stat(550_000, 550_000, 2));
    assert_eq!(sw1a["A"], stat(700_000, 600_001, 3));

    let y2021 = read_artifact(&out.join("2021.json")).unwrap();
    assert_eq!(y2021.data["M1"]["D"], stat(330_000, 330_000, 1));
    assert_eq!(y2021.data["M1"]["F"], stat(160_000, 160_000, 1));
    assert_eq!(y2021.data["M1"]["A"], stat(245_000, 245_000, 2));
    assert_eq!(y2021.data["SW1A"]["D"], stat(1_200_000, 1_200_000, 1));
    assert_eq!(y2021.data["SW1A"]["F"], stat(650_000, 650_000, 1));
    assert_eq!(y2021.data["SW1A"]["A"], stat(925_000, 925_000, 2));

    // Types never observed for a district are absent
    assert!(!y2021.data["M1"].contains_key("S"));
    assert!(!y2021.data["M1"].contains_key("T"));
}

#[test]
fn test_artifact_bytes_exact() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path(), &ten_row_input());
    let out = dir.path().join("prices");

    run(&PipelineConfig::new(&input, &out)).unwrap();

    let text = fs::read_to_string(out.join("2020.json")).unwrap();
    assert_eq!(
        text,
        concat!(
            r#"{"year":2020,"data":{"#,
            r#""M1":{"A":{"avg":256667,"median":300000,"count":3},"D":{"avg":310000,"median":310000,"count":2},"F":{"avg":150000,"median":150000,"count":1}},"#,
            r#""SW1A":{"A":{"avg":700000,"median":600001,"count":3},"D":{"avg":1000000,"median":1000000,"count":1},"F":{"avg":550000,"median":550000,"count":2}}"#,
            r#"}}"#
        )
    );
}

#[test]
fn test_rerun_is_byte_identical_across_batching() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path(), &ten_row_input());

    let out_a = dir.path().join("a");
    let out_b = dir.path().join("b");

    let report_a = run(&PipelineConfig::new(&input, &out_a).with_batch_size(1).with_workers(4)).unwrap();
    let report_b = run(
        &PipelineConfig::new(&input, &out_b)
            .with_batch_size(100)
            .with_workers(1)
            .with_queue_capacity(1),
    )
    .unwrap();

    for year in [2020, 2021] {
        let file = format!("{}.json", year);
        assert_eq!(
            fs::read(out_a.join(&file)).unwrap(),
            fs::read(out_b.join(&file)).unwrap()
        );
    }

    let digests_a: Vec<_> = report_a.artifacts.iter().map(|a| a.sha256.clone()).collect();
    let digests_b: Vec<_> = report_b.artifacts.iter().map(|a| a.sha256.clone()).collect();
    assert_eq!(digests_a, digests_b);
}

#[test]
fn test_malformed_rows_are_skipped_and_counted() {
    let dir = tempdir().unwrap();
    let mut content = ten_row_input();
    content.push_str(&csv_row(11, 100_000, "2020-01-01 00:00", "M1", "F"));
    content.push_str(&csv_row(12, 100_000, "not a date", "M1 1AA", "F"));
    content.push_str(&csv_row(13, 100_000, "2020-01-01 00:00", "M1 1AA", "O"));
    content.push_str(&csv_row(14, 100_000, "2020-01-01 00:00", "", "F"));
    let input = write_input(dir.path(), &content);
    let out = dir.path().join("prices");

    let report = run(&PipelineConfig::new(&input, &out).with_batch_size(4)).unwrap();

    assert_eq!(report.stats.total_rows, 14);
    assert_eq!(report.stats.valid_rows(), 10);
    assert_eq!(report.stats.rejected.get(&RejectReason::Postcode), Some(&2));
    assert_eq!(report.stats.rejected.get(&RejectReason::Date), Some(&1));
    assert_eq!(report.stats.rejected.get(&RejectReason::PropertyType), Some(&1));

    // Rejected rows leave the statistics untouched
    let y2020 = read_artifact(&out.join("2020.json")).unwrap();
    assert_eq!(y2020.data["M1"]["A"].count, 3);
}

#[test]
fn test_missing_input_fails_before_writing() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("prices");

    let err = run(&PipelineConfig::new(dir.path().join("missing.csv"), &out)).unwrap_err();

    match err {
        PipelineError::InputNotFound { path } => assert_eq!(path, dir.path().join("missing.csv")),
        other => panic!("unexpected error: {}", other),
    }
    assert!(!out.exists());
}

#[test]
fn test_empty_file_produces_no_years() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path(), "");
    let out = dir.path().join("prices");

    let report = run(&PipelineConfig::new(&input, &out)).unwrap();

    assert_eq!(report.stats.total_rows, 0);
    assert!(report.artifacts.is_empty());
}

#[test]
fn test_previous_artifacts_survive_failed_run() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path(), &ten_row_input());
    let out = dir.path().join("prices");

    run(&PipelineConfig::new(&input, &out)).unwrap();
    let before = fs::read(out.join("2020.json")).unwrap();

    // Second run hits a short row and aborts
    let mut broken = ten_row_input();
    broken.push_str("\"{X}\",\"1\"\n");
    let broken_input = dir.path().join("pp-broken.csv");
    fs::write(&broken_input, broken).unwrap();

    let err = run(&PipelineConfig::new(&broken_input, &out)).unwrap_err();
    assert!(matches!(err, PipelineError::SchemaMismatch { line: 11, found: 2, .. }));

    assert_eq!(fs::read(out.join("2020.json")).unwrap(), before);
}
