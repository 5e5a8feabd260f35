//! Partitioning of multi-scanner files.

use std::collections::HashSet;
use std::sync::Arc;

use zero_scanner::params::{Boundary, FixedBoundaries};
use zero_scanner::{classify, ParameterExtractor, ScanService, ScannerConfig, ScannerSubmission};

const GAP_AND_RSI: &str = r#"import pandas as pd

def fetch_bars():
    return pd.read_csv("bars.csv")

bars = fetch_bars()

min_gap = 0.04
bars['gap_up'] = (bars['gap_pct'] >= min_gap).astype(int)

threshold = 0.5
bars['rsi_dip'] = ((bars['rsi'] < 30) & (bars['close'] > bars['sma50'])).astype(int)

print(bars.tail())
"#;

const SHARED_THRESHOLD: &str = r#"import pandas as pd
df = pd.read_csv("bars.csv")
threshold = 0.5
df['gap_up'] = (df['gap'] > threshold).astype(int)
threshold = 0.5
df['vol_spike'] = (df['volume_ratio'] > threshold).astype(int)
"#;

const SHARED_VOLUME_FLOOR: &str = r#"import pandas as pd

MIN_VOL = 1000000

def load():
    return pd.read_csv("bars.csv")

def gap_scan():
    df = load()
    gap_min = 0.04
    df['gap_flag'] = ((df['gap'] >= gap_min) & (df['volume'] > MIN_VOL)).astype(int)
    return df

def rsi_scan():
    df = load()
    rsi_max = 30
    df['rsi_flag'] = ((df['rsi'] < rsi_max) & (df['volume'] > MIN_VOL)).astype(int)
    return df
"#;

fn service() -> ScanService {
    ScanService::new(ScannerConfig::default())
}

fn names(parameters: &[zero_scanner::ParameterDescriptor]) -> HashSet<String> {
    parameters.iter().map(|p| p.name.clone()).collect()
}

#[test]
fn test_two_pattern_columns_split_without_loss() {
    let submission = ScannerSubmission::new(GAP_AND_RSI, "gap_rsi.py");
    let partitions = service().split(&submission).unwrap();
    assert_eq!(partitions.len(), 2);

    let whole = ParameterExtractor::new().extract(GAP_AND_RSI).unwrap();
    let split_total: usize = partitions.iter().map(|p| p.parameters.len()).sum();
    assert_eq!(split_total, whole.len());

    // every whole-file name reappears exactly once, under its partition prefix
    let mut unprefixed: Vec<String> = partitions
        .iter()
        .flat_map(|p| {
            let prefix = format!("{}.", p.name);
            p.parameters
                .iter()
                .map(move |d| d.name.strip_prefix(&prefix).unwrap().to_string())
        })
        .collect();
    unprefixed.sort();
    let mut expected: Vec<String> = whole.iter().map(|d| d.name.clone()).collect();
    expected.sort();
    assert_eq!(unprefixed, expected);
}

#[test]
fn test_module_constant_used_by_both_blocks_is_kept_once() {
    let submission = ScannerSubmission::new(SHARED_VOLUME_FLOOR, "volume_floor.py");
    let partitions = service().split(&submission).unwrap();
    assert_eq!(partitions.len(), 2);

    let whole = ParameterExtractor::new().extract(SHARED_VOLUME_FLOOR).unwrap();
    assert!(whole.iter().any(|d| d.name == "MIN_VOL"));
    let split_total: usize = partitions.iter().map(|p| p.parameters.len()).sum();
    assert_eq!(split_total, whole.len());

    let gap = names(&partitions[0].parameters);
    let rsi = names(&partitions[1].parameters);
    assert!(gap.contains("gap_scan.MIN_VOL"));
    assert!(!rsi.contains("rsi_scan.MIN_VOL"));
    assert!(gap.is_disjoint(&rsi));

    let floor = partitions[0]
        .parameters
        .iter()
        .find(|p| p.name == "gap_scan.MIN_VOL")
        .unwrap();
    assert_eq!(floor.raw_value, "1000000");
    assert_eq!(floor.source_span.start_line, 3);

    // both partitions still carry the constant in their own source
    for partition in &partitions {
        assert!(partition.source.contains("MIN_VOL = 1000000"));
    }
}

#[test]
fn test_identical_constants_stay_disjoint() {
    let submission = ScannerSubmission::new(SHARED_THRESHOLD, "shared.py");
    let partitions = service().split(&submission).unwrap();
    assert_eq!(partitions.len(), 2);

    let first = names(&partitions[0].parameters);
    let second = names(&partitions[1].parameters);
    assert!(first.contains("gap_up.threshold"));
    assert!(second.contains("vol_spike.threshold"));
    assert!(first.is_disjoint(&second));
}

#[test]
fn test_partitions_run_on_their_own() {
    let submission = ScannerSubmission::new(GAP_AND_RSI, "gap_rsi.py");
    for partition in service().split(&submission).unwrap() {
        let standalone = partition.submission(&submission);
        assert!(standalone.source().starts_with("import pandas as pd"));
        assert!(standalone.source().contains("bars = fetch_bars()"));
        assert!(standalone.source().contains(&partition.source_slice));

        assert!(classify(standalone.source()).is_ok());
        assert!(standalone.filename().starts_with("gap_rsi__"));
    }
}

#[test]
fn test_external_detector_is_still_checked() {
    let source = "a = 1\nthreshold = 0.5\nb = 2\nthreshold = 0.5\n";
    let detector = FixedBoundaries::new(vec![Boundary::new("first", 1, 2), Boundary::new("second", 3, 4)]);
    let service = service().with_detector(Arc::new(detector));

    let partitions = service.split(&ScannerSubmission::new(source, "x.py")).unwrap();
    assert_eq!(partitions.len(), 2);
    assert!(names(&partitions[0].parameters).is_disjoint(&names(&partitions[1].parameters)));
    assert_eq!(partitions[1].start_line, 3);
}

#[test]
fn test_single_scanner_is_not_split() {
    let source = "import pandas as pd\ndf = pd.read_csv('x.csv')\ndf['hit'] = (df['gap'] > 0.02).astype(int)\n";
    let partitions = service().split(&ScannerSubmission::new(source, "one.py")).unwrap();
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].source, source);
}
