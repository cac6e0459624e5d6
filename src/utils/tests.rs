use crate::error::{find_error, Error};
use crate::utils::*;
use color_eyre::eyre::{Report, Result};
use std::collections::BTreeMap;

#[test]
fn write_atomic_replaces_existing() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("file.txt");
    write_atomic(&path, b"first")?;
    write_atomic(&path, b"second")?;
    assert_eq!(std::fs::read_to_string(&path)?, "second");
    assert_eq!(std::fs::read_dir(dir.path().join("nested"))?.count(), 1);
    Ok(())
}

#[test]
fn json_round_trip() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("value.json");
    let value = BTreeMap::from([("domain".to_string(), 3_usize)]);
    write_json(&value, &path)?;
    let observed: BTreeMap<String, usize> = read_json(&path)?;
    assert_eq!(observed, value);
    Ok(())
}

#[test]
fn read_json_missing_is_artifact_error() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let result: Result<BTreeMap<String, usize>, Report> = read_json(&dir.path().join("absent.json"));
    let report = result.expect_err("reading a missing file must fail");
    assert!(matches!(find_error(&report), Some(Error::ArtifactIo { .. })));
    Ok(())
}

#[test]
fn outdirs_create() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let outdirs = Outdirs::create(&dir.path().join("out"))?;
    assert!(outdirs.data.is_dir());
    assert!(outdirs.models.is_dir());
    assert!(outdirs.results.is_dir());
    Ok(())
}
