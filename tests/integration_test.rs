use gpu_fault_campaign::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::Path;

const RUN_ID: &str = "4711";
const BENCH: &str = "DCT";

fn status_report(sim_end: &str) -> String {
    format!(
        "[ General ]\nRealTime = 2.50 [s]\nSimEnd = {sim_end}\nCycles = 240000\n\n\
         [ Evergreen ]\nCycles = 120000\nIPC = 0.85\n"
    )
}

/// Write the artifacts of one trial. `None` leaves the file out.
fn write_trial(
    results: &Path,
    trial: u32,
    fault: Option<&str>,
    status: Option<&str>,
    bench_output: Option<&str>,
    trace: Option<&str>,
) {
    let dir = results.join(trial.to_string());
    fs::create_dir_all(&dir).unwrap();
    if let Some(fault) = fault {
        fs::write(dir.join(trial.to_string()), format!("{fault}\n")).unwrap();
    }
    if let Some(status) = status {
        fs::write(dir.join(format!("slurm-{RUN_ID}_{trial}.out")), status).unwrap();
    }
    if let Some(output) = bench_output {
        fs::write(dir.join(format!("{BENCH}_{trial}.out")), output).unwrap();
    }
    if let Some(trace) = trace {
        fs::write(dir.join(format!("debug_{trial}")), trace).unwrap();
    }
}

fn aggregate(results: &Path, store: &ResultStore, threads: usize) -> AggregationSummary {
    let processor = TrialProcessor::new(
        ArtifactLayout::new(BENCH, RUN_ID),
        RunArtifactClassifier::new(StatusSections::default()),
    );
    Aggregator::new(processor, results, store, threads)
        .run()
        .unwrap()
}

#[test]
/// A failed memory trial with a complete error trace ends up as one row
fn memory_trial_end_to_end() {
    let results = tempfile::tempdir().unwrap();
    write_trial(
        results.path(),
        1,
        Some("100 mem 0 2000 3"),
        Some(&status_report("ContextsFinished")),
        Some("Running DCT\nFailed\n"),
        Some("cycle 100 injected\neffect=error byte=2000 bit=3 wg=0\n"),
    );
    let store = ResultStore::open_in_memory().unwrap();
    let summary = aggregate(results.path(), &store, 1);

    assert_eq!(summary.trials, 1);
    assert_eq!(summary.inserted, 1);
    assert!(summary.issues.is_empty());
    assert_eq!(store.row_count(FaultKind::Memory).unwrap(), 1);
    assert_eq!(store.row_count(FaultKind::Register).unwrap(), 0);

    let row: (u32, String, String, i64, i64, i64, i64, String, String, i64, i64, f64) = store
        .connection()
        .query_row(
            "SELECT TrialIndex, Type, Bench, Cycle, CuID, ByteID, Bit, SimEnd, Outcome, \
             TotalCycles, GPUCycles, GPUIPC FROM MemoryFaults",
            [],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                    r.get(8)?,
                    r.get(9)?,
                    r.get(10)?,
                    r.get(11)?,
                ))
            },
        )
        .unwrap();
    assert_eq!(
        row,
        (
            1,
            "mem".to_string(),
            BENCH.to_string(),
            100,
            0,
            2000,
            3,
            "contexts_finished".to_string(),
            "failed".to_string(),
            240000,
            120000,
            0.85
        )
    );

    let effect: (String, Option<i64>, Option<i64>, Option<i64>, Option<i64>, Option<i64>, bool) =
        store
            .connection()
            .query_row(
                "SELECT Effect, EffectBit, WG, WF, WI, Byte, NeedsReview FROM MemoryFaults",
                [],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                        r.get(6)?,
                    ))
                },
            )
            .unwrap();
    assert_eq!(
        effect,
        (
            "error".to_string(),
            Some(3),
            Some(0),
            Some(-1),
            Some(-1),
            Some(2000),
            false
        )
    );
}

#[test]
/// Running the aggregation twice leaves the database unchanged
fn rerun_is_idempotent() {
    let results = tempfile::tempdir().unwrap();
    for trial in 1..=3 {
        write_trial(
            results.path(),
            trial,
            Some(&format!("{} reg 0 {} 7", trial * 10, trial)),
            Some(&status_report("EvergreenMaxCycles")),
            None,
            Some("effect=none"),
        );
    }
    let db = tempfile::tempdir().unwrap();
    let path = db.path().join("4711_DCT.db");

    let store = ResultStore::open(&path).unwrap();
    let first = aggregate(results.path(), &store, 1);
    assert_eq!((first.inserted, first.ignored), (3, 0));
    drop(store);

    let store = ResultStore::open(&path).unwrap();
    let second = aggregate(results.path(), &store, 1);
    assert_eq!((second.inserted, second.ignored), (0, 3));
    assert_eq!(store.row_count(FaultKind::Register).unwrap(), 3);

    let outcome: String = store
        .connection()
        .query_row(
            "SELECT Outcome FROM RegisterFaults WHERE TrialIndex = 2",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(outcome, "cycle_timeout");
}

#[test]
/// Broken trials are tallied per kind without aborting the run
fn issues_are_tallied() {
    let results = tempfile::tempdir().unwrap();
    let report = status_report("ContextsFinished");
    // 1: complete
    write_trial(
        results.path(),
        1,
        Some("5 ams 0 1 2 3"),
        Some(&report),
        Some("Passed\n"),
        Some("effect=masked"),
    );
    // 2: no status report, no benchmark output
    write_trial(results.path(), 2, Some("6 ams 0 1 2 3"), None, None, Some("effect=none"));
    // 3: directory missing
    // 4: fault descriptor missing
    write_trial(results.path(), 4, None, Some(&report), Some("Passed\n"), Some("effect=none"));
    // 5: unsupported fault type
    write_trial(
        results.path(),
        5,
        Some("7 cache 0 1 2"),
        Some(&report),
        Some("Passed\n"),
        Some("effect=none"),
    );
    // 6: debug trace without effect marker
    write_trial(
        results.path(),
        6,
        Some("8 ams 0 1 2 3"),
        Some(&report),
        Some("Passed\n"),
        Some("nothing to see"),
    );
    // 7: error trace lacking the workitem
    write_trial(
        results.path(),
        7,
        Some("9 ams 0 1 2 3"),
        Some(&report),
        Some("Failed\n"),
        Some("effect=error bit=3 wg=1 wf=2"),
    );
    // 8: debug trace missing, contexts finished without benchmark output
    write_trial(results.path(), 8, Some("10 ams 0 1 2 3"), Some(&report), None, None);
    fs::create_dir(results.path().join("logs")).unwrap();

    let store = ResultStore::open_in_memory().unwrap();
    let summary = aggregate(results.path(), &store, 2);

    assert_eq!(summary.trials, 8);
    assert_eq!(summary.inserted, 3);
    assert_eq!(store.row_count(FaultKind::MicroState).unwrap(), 3);
    assert_eq!(store.needs_review_count(FaultKind::MicroState).unwrap(), 1);

    let counts = summary.counts();
    assert_eq!(counts[&IssueKind::MissingOrUnparseableStatusReport], 1);
    assert_eq!(counts[&IssueKind::MissingTrialDirectory], 1);
    assert_eq!(counts[&IssueKind::MissingFaultDescriptor], 1);
    assert_eq!(counts[&IssueKind::MalformedFaultDescriptor], 1);
    assert_eq!(counts[&IssueKind::MalformedDebugTrace], 1);
    assert_eq!(counts[&IssueKind::IncompleteErrorFields], 1);
    assert_eq!(counts[&IssueKind::MissingDebugTrace], 1);
    assert_eq!(counts[&IssueKind::MissingBenchmarkOutput], 1);
    assert_eq!(summary.dropped(), 5);

    let unknown: (String, String, i64) = store
        .connection()
        .query_row(
            "SELECT SimEnd, Outcome, TotalCycles FROM MicroStateFaults WHERE TrialIndex = 2",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(unknown, ("unknown".to_string(), "unknown".to_string(), 0));

    let review: (String, Option<i64>, bool) = store
        .connection()
        .query_row(
            "SELECT Effect, EffectBit, NeedsReview FROM MicroStateFaults WHERE TrialIndex = 7",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(review, ("error".to_string(), None, true));
}

#[test]
/// Worker count does not change what is stored
fn parallel_aggregation_matches_sequential() {
    let results = tempfile::tempdir().unwrap();
    let report = status_report("ContextsFinished");
    for trial in 1..=40 {
        let output = if trial % 2 == 0 { "Passed\n" } else { "Failed\n" };
        write_trial(
            results.path(),
            trial,
            Some(&format!("{trial} reg 0 {trial} 1")),
            Some(&report),
            Some(output),
            Some(&format!("effect=error bit=1 wg=0 wf=1 wi={trial} lo_reg=2")),
        );
    }

    let dump = |store: &ResultStore| -> Vec<(u32, String, i64)> {
        let mut stmt = store
            .connection()
            .prepare("SELECT TrialIndex, Outcome, WI FROM RegisterFaults ORDER BY TrialIndex")
            .unwrap();
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .map(|row| row.unwrap())
            .collect();
        rows
    };

    let sequential = ResultStore::open_in_memory().unwrap();
    aggregate(results.path(), &sequential, 1);
    let parallel = ResultStore::open_in_memory().unwrap();
    let summary = aggregate(results.path(), &parallel, 4);

    assert_eq!(summary.inserted, 40);
    assert_eq!(dump(&sequential), dump(&parallel));
    assert_eq!(dump(&parallel)[1], (2, "passed".to_string(), 2));
}

#[test]
/// Generated descriptors are read back by the aggregation pass
fn generated_descriptors_are_aggregated() {
    let root = tempfile::tempdir().unwrap();
    let model = HardwareFaultModel::default();
    let mut generator = FaultGenerator::new(
        &model,
        StdRng::seed_from_u64(42),
        CyclePolicy::ZeroBased,
    );
    let request = CampaignRequest {
        benchmark: BENCH.to_string(),
        kind: FaultKind::Memory,
        trials: 5,
        faults_root: root.path().to_path_buf(),
        cycle_max: Some(1000),
        max_compute_units: 0,
    };
    let summary =
        generate_campaign(&mut generator, &BenchmarkCatalog::builtin(), &request).unwrap();
    assert_eq!(summary.batches.len(), 1);
    let fault_dir = fault_dir_for(root.path(), BENCH);
    assert_eq!(summary.batches[0].fault_dir, fault_dir);

    // Lay the descriptors out the way the job scripts do
    let results = tempfile::tempdir().unwrap();
    let mut expected = Vec::new();
    for trial in 1..=5 {
        let line = fs::read_to_string(FaultDescriptor::path_in(&fault_dir, trial)).unwrap();
        let descriptor: FaultDescriptor = line.parse().unwrap();
        assert!(descriptor.within(&model));
        assert!(descriptor.cycle < 1000);
        expected.push(descriptor);
        write_trial(
            results.path(),
            trial,
            Some(line.trim_end()),
            Some(&status_report("EvergreenNoFaults")),
            None,
            Some("effect=none"),
        );
    }

    let store = ResultStore::open_in_memory().unwrap();
    let aggregated = aggregate(results.path(), &store, 2);
    assert_eq!(aggregated.inserted, 5);
    assert!(aggregated.issues.is_empty());

    let mut stmt = store
        .connection()
        .prepare("SELECT Cycle, ByteID, Bit, Outcome FROM MemoryFaults ORDER BY TrialIndex")
        .unwrap();
    let rows: Vec<(u64, u32, u32, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
        .unwrap()
        .map(|row| row.unwrap())
        .collect();
    for (row, descriptor) in rows.iter().zip(&expected) {
        let FaultPayload::Memory { byte_offset, bit } = descriptor.payload else {
            panic!("unexpected payload {descriptor:?}");
        };
        assert_eq!(
            *row,
            (descriptor.cycle, byte_offset, bit, "not_injected".to_string())
        );
    }
}

#[test]
/// A results directory without trials is fatal
fn empty_results_dir_is_an_error() {
    let results = tempfile::tempdir().unwrap();
    let store = ResultStore::open_in_memory().unwrap();
    let processor = TrialProcessor::new(
        ArtifactLayout::new(BENCH, RUN_ID),
        RunArtifactClassifier::default(),
    );
    assert!(matches!(
        Aggregator::new(processor, results.path(), &store, 1).run(),
        Err(CampaignError::NoTrialDirectories(_))
    ));
}
