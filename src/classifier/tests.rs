use crate::classifier::metrics::Evaluation;
use crate::classifier::*;
use crate::error::{find_error, Error};
use color_eyre::eyre::{Report, Result};

/// Two classes that never share a k-mer.
fn separable(column: &str, first: &str, second: &str) -> Result<FeatureTable, Report> {
    let mut table = FeatureTable::new(vec!["AAAA".to_string(), "CCCC".to_string()]);
    let rows = [
        ("a_1", [10, 0], first),
        ("a_2", [8, 1], first),
        ("a_3", [12, 2], first),
        ("b_1", [0, 10], second),
        ("b_2", [1, 9], second),
        ("b_3", [2, 11], second),
    ];
    for (id, counts, label) in rows {
        let labels = BTreeMap::from([(column.to_string(), label.to_string())]);
        table.add_row(id, counts.to_vec(), &labels)?;
    }
    Ok(table)
}

fn params() -> TrainParams {
    TrainParams { learning_rate: 1.0, threshold: 0.6, ..Default::default() }
}

fn fit_and_predict(kind: ClassifierKind) -> Result<(Model, Vec<Prediction>), Report> {
    let table = separable("genus", "Vibrio", "Listeria")?;
    let mut model = Models::new(params()).build(kind, "genus")?;
    model.fit("genus", &table, &table)?;
    let predictions = model.predict(&table)?;
    Ok((model, predictions))
}

fn labels(predictions: &[Prediction]) -> Vec<Option<&str>> {
    predictions.iter().map(|p| p.label.as_deref()).collect()
}

// ----------------------------------------------------------------------------
// Kinds and parameters

#[test]
fn kind_properties() {
    let binary = ClassifierKind::iter().filter(|k| k.is_binary()).collect_vec();
    assert_eq!(
        binary,
        [
            ClassifierKind::OneSvm,
            ClassifierKind::LinearSvm,
            ClassifierKind::Attention,
            ClassifierKind::Lstm,
            ClassifierKind::DeepLstm
        ]
    );
    assert_eq!(ClassifierKind::Cnn.hidden_width(), Some(32));
    assert_eq!(ClassifierKind::Sgd.hidden_width(), None);
    assert!(ClassifierKind::iter().all(|k| k.get_str("estimator").is_some()));
}

#[test]
fn kind_names_round_trip() -> Result<(), Report> {
    for kind in ClassifierKind::iter() {
        assert_eq!(kind.to_string().parse::<ClassifierKind>()?, kind);
        let json = serde_json::to_string(&kind)?;
        assert_eq!(json, format!("\"{kind}\""));
    }
    Ok(())
}

#[test]
fn params_validate() {
    assert!(TrainParams::default().validate().is_ok());

    let invalid = [
        TrainParams { batch_size: 0, ..Default::default() },
        TrainParams { epochs: 0, ..Default::default() },
        TrainParams { threshold: 0.0, ..Default::default() },
        TrainParams { threshold: 1.5, ..Default::default() },
    ];
    for params in invalid {
        let report = params.validate().expect_err("parameters are invalid");
        assert!(matches!(find_error(&report), Some(Error::Configuration(_))));
    }
}

#[test]
fn normalize_is_unit_length() {
    let x = normalize(&[1, 2, 2]);
    let norm = x.iter().map(|v| v * v).sum::<f64>();
    assert!((norm - 1.0).abs() < 1e-12);
}

// ----------------------------------------------------------------------------
// Estimators

#[test]
fn multiclass_estimators_separate_classes() -> Result<(), Report> {
    let expected = [
        Some("Vibrio"),
        Some("Vibrio"),
        Some("Vibrio"),
        Some("Listeria"),
        Some("Listeria"),
        Some("Listeria"),
    ];
    for kind in [ClassifierKind::Sgd, ClassifierKind::Mnb, ClassifierKind::Cnn] {
        let (model, predictions) = fit_and_predict(kind)?;
        assert_eq!(model.classes, ["Listeria", "Vibrio"]);
        assert_eq!(labels(&predictions), expected, "{kind}");
        assert!(model.created.is_some());
    }
    Ok(())
}

#[test]
fn linear_binary_needs_two_classes() -> Result<(), Report> {
    let table = separable("domain", "Bacteria", "Host")?;
    let mut model = Models::new(params()).build(ClassifierKind::LinearSvm, "domain")?;
    model.fit("domain", &table, &table)?;
    let predictions = model.predict(&table)?;
    assert_eq!(labels(&predictions)[0], Some("Bacteria"));
    assert_eq!(labels(&predictions)[5], Some("Host"));

    let bacteria = table.select_rows(&[0, 1, 2]);
    let mut model = Models::new(params()).build(ClassifierKind::LinearSvm, "domain")?;
    assert!(model.fit("domain", &bacteria, &bacteria).is_err());
    Ok(())
}

#[test]
fn isolator_rejects_outliers() -> Result<(), Report> {
    let table = separable("domain", "Bacteria", "Host")?;
    let bacteria = table.select_rows(&[0, 1, 2]);

    let mut model = Models::new(params()).build(ClassifierKind::OneSvm, "domain")?;
    model.fit("domain", &bacteria, &table)?;
    assert_eq!(model.classes, ["Bacteria"]);

    let predictions = model.predict(&table)?;
    assert_eq!(labels(&predictions), [Some("Bacteria"), Some("Bacteria"), Some("Bacteria"), None, None, None]);
    assert!(predictions[0].confidence >= 0.5);
    assert!(predictions[5].confidence < 0.5);
    Ok(())
}

#[test]
fn threshold_withholds_labels() -> Result<(), Report> {
    let table = separable("genus", "Vibrio", "Listeria")?;
    // equal counts of both k-mers
    let mut ambiguous = FeatureTable::new(table.kmers.clone());
    ambiguous.add_row("mixed", vec![5, 5], &BTreeMap::new())?;

    let (model, _) = fit_and_predict(ClassifierKind::Mnb)?;
    let predictions = model.predict(&ambiguous)?;
    assert_eq!(predictions[0].label, None);
    assert!(predictions[0].confidence < 0.6);
    Ok(())
}

#[test]
fn missing_classes_are_not_learned() -> Result<(), Report> {
    use crate::classify::state::ClassificationState;
    use crate::kmers::{Classes, UNKNOWN};

    let kmers = ["AAAA", "CCCC", "GGGG"].map(String::from).to_vec();
    let mut table = FeatureTable::new(kmers.clone());
    let rows = [
        ("a_1", [10, 0, 0]),
        ("a_2", [8, 1, 0]),
        ("a_3", [12, 2, 0]),
        ("b_1", [0, 10, 0]),
        ("b_2", [1, 9, 0]),
        ("b_3", [2, 11, 0]),
        ("c_1", [0, 0, 10]),
        ("c_2", [0, 1, 9]),
        ("c_3", [1, 0, 12]),
    ];
    for (id, counts) in rows {
        table.add_row(id, counts.to_vec(), &BTreeMap::new())?;
    }
    // the c_* sequences have no class row
    let labels = ["a_1", "a_2", "a_3", "b_1", "b_2", "b_3"]
        .iter()
        .map(|id| (id.to_string(), vec![(if id.starts_with('a') { "Vibrio" } else { "Listeria" }).to_string()]))
        .collect();
    let classes = Classes { ranks: vec!["genus".to_string()], labels };
    let table = classes.label_table(&table)?;
    assert_eq!(table.label("genus", 6), Some(UNKNOWN));

    let mut model = Models::new(params()).build(ClassifierKind::Mnb, "genus")?;
    model.fit("genus", &table, &table)?;
    assert_eq!(model.classes, ["Listeria", "Vibrio"]);

    let mut read = FeatureTable::new(kmers);
    read.add_row("read", vec![0, 0, 11], &BTreeMap::new())?;
    let predictions = model.predict(&read)?;
    assert_ne!(predictions[0].label.as_deref(), Some(UNKNOWN));

    let mut state = ClassificationState::new(["read".to_string()]);
    state.resolve("genus", &predictions)?;
    assert_ne!(state.label_of("read").map(|(_, label)| label), Some(UNKNOWN));
    Ok(())
}

#[test]
fn predict_aligns_kmer_columns() -> Result<(), Report> {
    let (model, _) = fit_and_predict(ClassifierKind::Mnb)?;

    // reversed columns and an extra k-mer the model never saw
    let mut reordered = FeatureTable::new(vec!["CCCC".to_string(), "GGGG".to_string(), "AAAA".to_string()]);
    reordered.add_row("a", vec![0, 7, 10], &BTreeMap::new())?;
    let predictions = model.predict(&reordered)?;
    assert_eq!(predictions[0].label.as_deref(), Some("Vibrio"));
    Ok(())
}

#[test]
fn fit_requires_rows_and_classes() -> Result<(), Report> {
    let empty = FeatureTable::new(vec!["AAAA".to_string()]);
    let mut model = Models::default().build(ClassifierKind::Cnn, "genus")?;
    assert!(model.fit("genus", &empty, &empty).is_err());

    let table = separable("genus", "Vibrio", "Vibrio")?;
    assert!(model.fit("genus", &table, &table).is_err());
    assert!(model.fit("species", &table, &table).is_err());
    Ok(())
}

#[test]
fn unfitted_model_cannot_predict_or_save() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let table = separable("genus", "Vibrio", "Listeria")?;
    let model = Models::default().build(ClassifierKind::Sgd, "genus")?;
    assert!(model.predict(&table).is_err());
    assert!(model.save(&dir.path().join("sgd_genus.json")).is_err());
    Ok(())
}

#[test]
fn build_validates_params() {
    let models = Models::new(TrainParams { epochs: 0, ..Default::default() });
    let report = models.build(ClassifierKind::Cnn, "genus").expect_err("zero epochs");
    assert!(matches!(find_error(&report), Some(Error::Configuration(_))));
}

// ----------------------------------------------------------------------------
// Persistence

#[test]
fn save_and_load() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("models").join("widecnn_genus.json");
    let table = separable("genus", "Vibrio", "Listeria")?;

    let (model, predictions) = fit_and_predict(ClassifierKind::WideCnn)?;
    model.save(&path)?;

    let loaded = Models::new(params()).load(&path)?;
    assert_eq!(loaded.kind, model.kind);
    assert_eq!(loaded.classes, model.classes);
    assert_eq!(loaded.kmers, model.kmers);
    assert_eq!(labels(&loaded.predict(&table)?), labels(&predictions));
    Ok(())
}

#[test]
fn load_uses_current_threshold() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("mnb_genus.json");
    let (model, _) = fit_and_predict(ClassifierKind::Mnb)?;
    model.save(&path)?;

    let strict = Models::new(TrainParams { threshold: 1.0, ..Default::default() });
    assert_eq!(strict.load(&path)?.params.threshold, 1.0);
    Ok(())
}

#[test]
fn load_missing_model() {
    let report = Models::default().load(Path::new("absent/cnn_genus.json")).expect_err("no model file");
    assert!(matches!(find_error(&report), Some(Error::ArtifactIo { .. })));
}

#[test]
fn load_unfitted_model() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cnn_genus.json");
    utils::write_json(&Model::new(ClassifierKind::Cnn, "genus", TrainParams::default()), &path)?;

    let report = Models::default().load(&path).expect_err("the model was never fitted");
    assert!(matches!(find_error(&report), Some(Error::ArtifactIo { .. })));
    Ok(())
}

#[test]
fn load_model_without_classes() -> Result<(), Report> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("onesvm_domain.json");
    let table = separable("domain", "Bacteria", "Host")?;
    let mut model = Models::new(params()).build(ClassifierKind::OneSvm, "domain")?;
    model.fit("domain", &table.select_rows(&[0, 1, 2]), &table)?;
    model.classes.clear();
    model.save(&path)?;

    let report = Models::default().load(&path).expect_err("the model has no classes");
    assert!(matches!(find_error(&report), Some(Error::ArtifactIo { .. })));

    // an in-memory model without classes labels nothing
    assert!(model.predict(&table)?.iter().all(|p| p.label.is_none()));
    Ok(())
}

#[test]
fn version_check() -> Result<(), Report> {
    let mut model = Model::new(ClassifierKind::Cnn, "genus", TrainParams::default());
    assert!(model.check_version()?);
    model.version = "999.0.0".to_string();
    assert!(!model.check_version()?);
    Ok(())
}

// ----------------------------------------------------------------------------
// Metrics

#[test]
fn evaluation_counts_labels() -> Result<(), Report> {
    let table = separable("genus", "Vibrio", "Listeria")?;
    let (_, predictions) = fit_and_predict(ClassifierKind::Mnb)?;
    let truth = table.label_column("genus")?;

    let evaluation = Evaluation::new(ClassifierKind::Mnb, "genus", &predictions, truth)?;
    assert_eq!(evaluation.rows, 6);
    assert_eq!(evaluation.accuracy, 1.0);
    assert_eq!(evaluation.classified_fraction, 1.0);
    assert_eq!(evaluation.labels["Listeria"], metrics::LabelCounts { support: 3, predicted: 3, correct: 3 });

    let summary = evaluation.to_string();
    assert!(summary.starts_with("classifier: mnb\nrows: 6\n"));
    assert!(summary.contains("- Listeria: 3/3 correct, 3 predicted"));

    assert!(Evaluation::new(ClassifierKind::Mnb, "genus", &predictions, &truth[..2]).is_err());
    Ok(())
}
