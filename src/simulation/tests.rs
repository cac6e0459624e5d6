use crate::error::{find_error, Error};
use crate::simulation::*;
use color_eyre::eyre::{Report, Result};
use strum::IntoEnumIterator;

fn sampled_table() -> Result<FeatureTable, Report> {
    let mut table = FeatureTable::new(vec!["AAAA".to_string(), "ACGT".to_string()]);
    let labels = |domain: &str| BTreeMap::from([("domain".to_string(), domain.to_string())]);
    table.add_row("long", vec![0, 0], &labels("Bacteria"))?;
    table.add_row("short", vec![0, 0], &labels("Host"))?;
    Ok(table)
}

fn write_fasta(dir: &Path) -> Result<PathBuf, Report> {
    let path = dir.join("reference.fasta");
    let long = "ACGTAAAA".repeat(100);
    std::fs::write(&path, format!(">long\n{long}\n>short\nAAAAAAAA\n>other\nCCCC\n"))?;
    Ok(path)
}

#[test]
fn read_lengths() {
    let lengths = Technology::iter().map(|t| t.read_length()).collect::<Vec<_>>();
    assert_eq!(lengths, [300, 125, 150]);
}

#[test]
fn simulate_labels_and_publishes() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let fasta = write_fasta(dir.path())?;
    let engine = Arc::new(Engine::start(Some(2))?);
    let simulator = FragmentSimulator { engine, k: 4, reads_per_sequence: 3, seed: 7 };

    let out_dir = dir.path().join("Xy_genome_simulation_validation_data_K4");
    let table = simulator.simulate(&[fasta], &sampled_table()?, Technology::HiSeq, &out_dir, "validation")?;

    assert_eq!(table.row_count(), 6);
    assert_eq!(table.kmers, ["AAAA", "ACGT"]);
    assert_eq!(table.ids[0], "long_read_0");
    assert_eq!(table.label_column("domain")?, ["Bacteria", "Bacteria", "Bacteria", "Host", "Host", "Host"]);

    // a 125 bp read of the long sequence holds at most 122 4-mers
    assert!(table.counts[0].iter().sum::<u32>() <= 122);
    // the short sequence is used whole: AAAAAAAA has five AAAA windows
    assert_eq!(table.counts[3], [5, 0]);

    assert!(out_dir.join(READS).exists());
    let cached = read_simulation(&out_dir)?;
    assert_eq!(cached.counts, table.counts);
    assert_eq!(cached.labels, table.labels);

    // only the published directory is left next to the reference
    let entries = std::fs::read_dir(dir.path())?.count();
    assert_eq!(entries, 2);
    Ok(())
}

#[test]
fn simulate_is_seeded() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let fasta = write_fasta(dir.path())?;
    let engine = Arc::new(Engine::start(Some(1))?);
    let simulator = FragmentSimulator::new(engine, 4, 11);
    let sampled = sampled_table()?;

    let a = simulator.simulate(&[fasta.clone()], &sampled, Technology::NovaSeq, &dir.path().join("a"), "a")?;
    let b = simulator.simulate(&[fasta], &sampled, Technology::NovaSeq, &dir.path().join("b"), "b")?;
    assert_eq!(a.counts, b.counts);
    Ok(())
}

#[test]
fn simulate_missing_reference() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(Engine::start(Some(1))?);
    let simulator = FragmentSimulator::new(engine, 4, 1);
    let absent = dir.path().join("absent.fasta");

    let result = simulator.simulate(&[absent], &sampled_table()?, Technology::MiSeq, &dir.path().join("out"), "test");
    let report = result.expect_err("the fasta file does not exist");
    assert!(matches!(find_error(&report), Some(Error::DataConsistency(_))));
    assert!(!dir.path().join("out").exists());
    Ok(())
}
