use std::{io::Write, path::Path};

use deed_escrow::{
    ether,
    scenario::{Scenario, ScenarioError, StepOutcome},
    ErrorKind,
};

#[test]
fn bundled_demo_runs_to_completion() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/escrow.json");
    let report = Scenario::load(&path).unwrap().run().unwrap();

    let rejected: Vec<ErrorKind> = report
        .steps
        .iter()
        .filter_map(|s| match &s.outcome {
            StepOutcome::Rejected { kind, .. } => Some(*kind),
            StepOutcome::Committed { .. } => None,
        })
        .collect();
    assert_eq!(
        rejected,
        vec![
            ErrorKind::Precursor,
            ErrorKind::Authorization,
            ErrorKind::Authorization,
            ErrorKind::Authorization,
        ]
    );

    let escrow_addr = report.names["escrow"];
    let escrow = report.chain.escrow(&escrow_addr).unwrap();
    assert!(escrow.is_listed(1));
    assert!(escrow.inspection_passed(1));
    assert_eq!(
        report.chain.get_balance(&escrow_addr).unwrap(),
        ether("0.001").unwrap()
    );
    assert_eq!(report.chain.height(), 7);
}

#[test]
fn scenario_file_errors_are_reported() {
    let missing = Scenario::load(Path::new("/definitely/not/here.json")).unwrap_err();
    assert!(matches!(missing, ScenarioError::Io { .. }));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{\"accounts\": [").unwrap();
    let err = Scenario::load(file.path()).unwrap_err();
    assert!(matches!(err, ScenarioError::Parse(_)));
}

#[test]
fn fixed_secret_keys_give_stable_addresses() {
    let json = r#"{
        "accounts": [
            {"name": "a", "secret_key": "0101010101010101010101010101010101010101010101010101010101010101"}
        ],
        "steps": []
    }"#;
    let first = Scenario::from_json(json).unwrap().run().unwrap();
    let second = Scenario::from_json(json).unwrap().run().unwrap();
    assert_eq!(first.names["a"], second.names["a"]);
    assert_eq!(
        first.chain.snapshot().state_root,
        second.chain.snapshot().state_root
    );
}
