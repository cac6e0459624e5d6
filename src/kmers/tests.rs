use crate::error::{find_error, Error};
use crate::kmers::*;
use crate::Engine;
use color_eyre::eyre::{Report, Result};
use std::path::Path;

fn write_inputs(dir: &Path) -> Result<(PathBuf, PathBuf), Report> {
    let fasta = dir.join("bacteria.fasta");
    std::fs::write(&fasta, ">seq_1\nACGTACGTAA\n>seq_2\nGGGGCCCCTT\n>seq_3\nAANNAATTAA\n")?;
    let classes = dir.join("bacteria.csv");
    std::fs::write(&classes, "id,Domain,Genus\nseq_1,Bacteria,Vibrio\nseq_2,Archaea,Haloferax\n")?;
    Ok((fasta, classes))
}

#[test]
fn native_counter_forward_strand() -> Result<(), Report> {
    let counter = NativeCounter { k: 2, canonical: false, min_count: 1 };
    let counts = counter.count("seq", b"aacc")?;
    assert_eq!(counts.get("AA"), Some(&1));
    assert_eq!(counts.get("AC"), Some(&1));
    assert_eq!(counts.get("CC"), Some(&1));
    assert_eq!(counts.len(), 3);
    Ok(())
}

#[test]
fn native_counter_min_count() -> Result<(), Report> {
    let counter = NativeCounter { k: 2, canonical: false, min_count: 2 };
    let counts = counter.count("seq", b"AAACG")?;
    assert_eq!(counts.into_iter().collect::<Vec<_>>(), [("AA".to_string(), 2)]);
    Ok(())
}

#[test]
fn native_counter_short_sequence() -> Result<(), Report> {
    let counts = NativeCounter::new(5).count("seq", b"ACG")?;
    assert!(counts.is_empty());
    Ok(())
}

#[test]
fn count_records_outer_join() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let (fasta, _classes) = write_inputs(dir.path())?;
    let records = read_fasta(&fasta)?;
    let engine = Engine::start(Some(2))?;

    let counter = NativeCounter::new(4);
    let table = count_records(&engine, &counter, &records, None)?;
    assert_eq!(table.ids, ["seq_1", "seq_2", "seq_3"]);
    assert!(table.kmers.windows(2).all(|w| w[0] < w[1]));

    // every k-mer of seq_3 is absent from the others, and filled with zero there
    let seq_3 = counter.count("seq_3", b"AANNAATTAA")?;
    for kmer in seq_3.keys() {
        let column = table.kmers.iter().position(|k| k == kmer).expect("seen k-mer is a column");
        assert_eq!(table.counts[0][column], 0);
    }
    engine.shutdown();
    Ok(())
}

#[test]
fn classes_label_unknown() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let (fasta, classes) = write_inputs(dir.path())?;
    let classes = Classes::read(&classes)?;
    assert_eq!(classes.ranks, ["domain", "genus"]);

    let engine = Engine::start(Some(1))?;
    let table = count_records(&engine, &NativeCounter::new(3), &read_fasta(&fasta)?, None)?;
    let labelled = classes.label_table(&table)?;
    assert_eq!(labelled.label_column("domain")?, ["Bacteria", "Archaea", UNKNOWN]);
    assert_eq!(labelled.counts, table.counts);
    Ok(())
}

#[test]
fn extract_reference_and_host() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let (fasta, classes) = write_inputs(dir.path())?;
    let host_fasta = dir.path().join("host.fasta");
    std::fs::write(&host_fasta, ">human_1\nTTTTGGGGAAAACCCC\n")?;
    let host_classes = dir.path().join("host.tsv");
    std::fs::write(&host_classes, "id\tdomain\nhuman_1\tHost\n")?;

    let args = Args {
        seq_file: fasta,
        cls_file: Some(classes),
        dataset_name: "bacteria".to_string(),
        seq_file_host: Some(host_fasta),
        cls_file_host: Some(host_classes),
        k: 4,
        outdir: dir.path().join("out"),
        ..Default::default()
    };
    let engine = Engine::start(Some(2))?;
    let extraction = extract(&engine, &args)?;

    let data = dir.path().join("out").join("data");
    assert!(data.join("Xy_genome_bacteria_data_K4.tsv.zst").exists());
    assert!(data.join("Xy_genome_bacteria_data_K4.json").exists());
    assert!(data.join("Xy_genome_host_data_K4.tsv.zst").exists());
    assert!(dir.path().join("out").join("run_args.json").exists());

    // seen mode writes the k-mer list, and the host reuses it
    let list_path = extraction.kmers_list.expect("seen mode writes a k-mer list");
    let kmers = read_kmers_list(&list_path, 4)?;
    assert_eq!(kmers, extraction.dataset.kmers);
    let host = extraction.host.expect("host was extracted");
    assert_eq!(host.kmers, kmers);
    assert_eq!(host.ranks, ["domain"]);
    assert_eq!(host.labels("domain")?, ["Host"]);
    Ok(())
}

#[test]
fn extract_metagenome_requires_kmers_list() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let (fasta, _classes) = write_inputs(dir.path())?;
    let args = Args { seq_file: fasta, k: 4, outdir: dir.path().join("out"), ..Default::default() };
    let engine = Engine::start(Some(1))?;
    let report = extract(&engine, &args).expect_err("unlabelled sequences need a k-mer list");
    assert!(matches!(find_error(&report), Some(Error::Configuration(_))));
    Ok(())
}

#[test]
fn extract_metagenome_given_kmers() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let (fasta, _classes) = write_inputs(dir.path())?;
    let list = dir.path().join("kmers_list.txt");
    std::fs::write(&list, "AAAA\nACGT\n")?;

    let args = Args {
        seq_file: fasta,
        dataset_name: "metagenome".to_string(),
        kmers_list: Some(list),
        k: 4,
        outdir: dir.path().join("out"),
        ..Default::default()
    };
    let engine = Engine::start(Some(1))?;
    let extraction = extract(&engine, &args)?;
    assert_eq!(extraction.dataset.kmers, ["AAAA", "ACGT"]);
    assert!(extraction.dataset.ranks.is_empty());
    assert!(extraction.kmers_list.is_none());
    Ok(())
}

#[test]
fn kmers_list_wrong_length() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let list = dir.path().join("kmers_list.txt");
    std::fs::write(&list, "AAAA\nACG\n")?;
    let report = read_kmers_list(&list, 4).expect_err("ACG is not a 4-mer");
    assert!(matches!(find_error(&report), Some(Error::Configuration(_))));
    Ok(())
}

#[test]
fn kmc_missing_binary() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let kmc = Kmc { k: 4, min_count: 1, bin_dir: Some(dir.path().join("no_such_dir")) };
    let report = kmc.count("seq", b"ACGTACGT").expect_err("kmc is not installed there");
    assert!(matches!(find_error(&report), Some(Error::ArtifactIo { .. })));
    Ok(())
}
