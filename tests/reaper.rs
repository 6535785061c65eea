use std::fs;

use camino::Utf8PathBuf;

use bamfetch::reaper::reap_empty_dirs;

#[test]
fn removes_empty_chains_and_keeps_files() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let kept = root.join("gbm/TCGA-02-0001/TCGA-02-0001-01/WXS/CGHub_ILLUMINA/u1");
    let empty = root.join("luad/TCGA-05-4244/TCGA-05-4244-01/RNA-Seq/CGHub_ILLUMINA/u2");
    fs::create_dir_all(kept.as_std_path()).unwrap();
    fs::create_dir_all(empty.as_std_path()).unwrap();
    fs::create_dir_all(root.join("gbm/TCGA-02-0001/stale").as_std_path()).unwrap();
    fs::write(kept.join("u1.bam").as_std_path(), b"data").unwrap();

    let removed = reap_empty_dirs(&root);

    assert_eq!(removed.len(), 7);
    assert!(kept.join("u1.bam").as_std_path().is_file());
    assert!(!root.join("luad").as_std_path().exists());
    assert!(!root.join("gbm/TCGA-02-0001/stale").as_std_path().exists());
    assert!(root.as_std_path().is_dir());
}

#[test]
fn empty_root_is_kept() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    assert!(reap_empty_dirs(&root).is_empty());
    assert!(root.as_std_path().is_dir());
}
