use assert_matches::assert_matches;

use bamfetch::domain::{ArchivePath, JobStatus, parse_size, rate_mb_per_sec};

#[test]
fn archive_path_follows_barcode_layout() {
    let path = ArchivePath::derive(
        "GBM",
        "TCGA-02-0001-01C-01D-0182-01",
        "WXS",
        "ILLUMINA",
        "uuid-1",
        "C484.TCGA-02-0001-01C-01D-0182-01.bam",
    );
    assert_eq!(
        path.relative().as_str(),
        "gbm/TCGA-02-0001/TCGA-02-0001-01/WXS/CGHub_ILLUMINA/uuid-1/C484.TCGA-02-0001-01C-01D-0182-01.bam"
    );
    assert_eq!(
        path.relative_dir().as_str(),
        "gbm/TCGA-02-0001/TCGA-02-0001-01/WXS/CGHub_ILLUMINA/uuid-1"
    );
    assert_eq!(
        path.relative_platform_dir().as_str(),
        "gbm/TCGA-02-0001/TCGA-02-0001-01/WXS/CGHub_ILLUMINA"
    );
}

#[test]
fn status_tokens_parse() {
    let status: JobStatus = "".parse().unwrap();
    assert_eq!(status, JobStatus::Unknown);
    assert!("Live".parse::<JobStatus>().unwrap().is_complete());
    assert!("Staged".parse::<JobStatus>().unwrap().is_transferred());
    assert!(!"Failed".parse::<JobStatus>().unwrap().is_transferred());
    assert_matches!("redacted".parse::<JobStatus>().unwrap(), JobStatus::Remote(token) if token == "redacted");
}

#[test]
fn sizes_and_rates() {
    assert_eq!(parse_size("2048"), 2048);
    assert_eq!(parse_size("not a size"), 0);
    assert_eq!(rate_mb_per_sec(10_485_760, 0), 0.0);
    assert!((rate_mb_per_sec(10_485_760, 5) - 2.0).abs() < f64::EPSILON);
}
