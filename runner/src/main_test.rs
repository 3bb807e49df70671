use super::*;
use std::{fs, os::unix::fs::PermissionsExt};
use tempfile::TempDir;

const SBATCH_JOB_ID: u64 = 31337;

/// A batch file in a scratch directory with fake sacct/sbatch tools next to it
struct Batch {
    dir: TempDir,
    path: PathBuf,
    settings: PathBuf,
}

fn fake_tool(dir: &Path, name: &str, output: &str, code: i32) -> PathBuf {
    let path = dir.join(name);
    let args = dir.join(format!("{name}.args"));
    fs::write(
        &path,
        format!(
            "#!/bin/sh\nfor arg in \"$@\"; do echo \"$arg\" >> '{}'; done\ncat <<'EOF'\n{output}\nEOF\nexit {code}\n",
            args.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

impl Batch {
    fn new(content: &str, sacct_output: &str, sbatch_code: i32) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sweep.conf");
        fs::write(&path, content).unwrap();

        let sacct = fake_tool(dir.path(), "sacct", sacct_output, 0);
        let sbatch_output = if sbatch_code == 0 {
            SBATCH_JOB_ID.to_string()
        } else {
            "sbatch: error: Batch job submission failed: Job violates accounting/QOS policy".to_owned()
        };
        let sbatch = fake_tool(dir.path(), "sbatch", &sbatch_output, sbatch_code);

        let settings = dir.path().join("jobwin.yaml");
        fs::write(
            &settings,
            format!(
                "executor:\n  sacct: '{}'\n  sbatch: '{}'\n  timeout: 10000\n",
                sacct.display(),
                sbatch.display()
            ),
        )
        .unwrap();

        Self {
            dir,
            path,
            settings,
        }
    }

    fn run(&self, args: &[&str]) -> Result<(), CliError> {
        let mut argv = vec![
            "jobwin".to_owned(),
            "--settings".to_owned(),
            self.settings.display().to_string(),
            "--batch".to_owned(),
            self.path.display().to_string(),
        ];
        argv.extend(args.iter().map(|arg| arg.to_string()));

        run(Cli::try_parse_from(argv).unwrap())
    }

    fn content(&self) -> String {
        fs::read_to_string(&self.path).unwrap()
    }

    fn store(&self) -> BatchStore {
        BatchStore::open(&self.path).unwrap()
    }

    /// arguments of every call to `tool`, `None` if it was never called
    fn calls(&self, tool: &str) -> Option<Vec<String>> {
        fs::read_to_string(self.dir.path().join(format!("{tool}.args")))
            .ok()
            .map(|args| args.lines().map(str::to_owned).collect())
    }
}

#[test]
pub fn submit_sends_the_next_window_and_records_it() {
    let batch = Batch::new("MAX_ID=10\nRESERVE=3\n", "", 0);

    batch.run(&["submit", "--", "job.sh"]).unwrap();

    // nothing submitted yet, so sacct is not asked
    assert_eq!(batch.calls("sacct"), None);
    assert_eq!(
        batch.calls("sbatch").unwrap(),
        [
            "--parsable".to_owned(),
            "--job-name=sweep".to_owned(),
            "--array=0-3".to_owned(),
            "--chdir".to_owned(),
            batch.dir.path().display().to_string(),
            "--export=ALL,JOBWIN_NEXT_RUN_ID=0,JOBWIN_LAST_RUN_ID=3".to_owned(),
            "job.sh".to_owned(),
        ]
    );

    let store = batch.store();
    assert_eq!(store.get(Key::NextRunId), Some("0"));
    assert_eq!(store.get(Key::LastRunId), Some("3"));
    assert_eq!(store.job_ids().unwrap(), [SBATCH_JOB_ID]);
    assert!(store.get(Key::JobDate).is_some());
}

#[test]
pub fn full_queue_skips_without_submitting() {
    let content =
        "MAX_ID=10\nRESERVE=3\nNEXT_RUN_ID=0\nLAST_RUN_ID=3\nJOB_IDS=400\nJOB_DATE=2026-10-18\n";
    let sacct_output = "\
400_0|COMPLETED|batch|2026-10-18T09:00:00|2026-10-18T09:00:05|2026-10-18T09:01:00|401
400_1|RUNNING|batch|2026-10-18T09:00:00|2026-10-18T09:00:05|Unknown|402
400_[2-4]|PENDING|batch|2026-10-18T09:00:00|Unknown|Unknown|400";
    let batch = Batch::new(content, sacct_output, 0);

    batch.run(&["submit", "--", "job.sh"]).unwrap();

    let sacct = batch.calls("sacct").unwrap();
    assert!(sacct.contains(&"--jobs=400".to_owned()));
    assert!(sacct.contains(&"--starttime=2026-10-18".to_owned()));
    assert_eq!(batch.calls("sbatch"), None);
    assert_eq!(batch.content(), content);
}

#[test]
pub fn dry_run_persists_nothing() {
    for content in ["MAX_ID=10\nRESERVE=3\n", "ARRAY=0-9\n"] {
        let batch = Batch::new(content, "", 0);

        batch.run(&["submit", "--dry-run", "--", "job.sh"]).unwrap();

        assert_eq!(batch.calls("sbatch"), None);
        assert_eq!(batch.content(), content);
    }
}

#[test]
pub fn fixed_array_bypasses_the_cursor() {
    let batch = Batch::new("ARRAY=0-9%2\nBATCH_NAME=render\n", "", 0);

    batch.run(&["submit", "--", "job.sh"]).unwrap();

    let sbatch = batch.calls("sbatch").unwrap();
    assert!(sbatch.contains(&"--array=0-9%2".to_owned()));
    assert!(sbatch.contains(&"--job-name=render".to_owned()));
    assert!(!sbatch.iter().any(|arg| arg.starts_with("--export")));

    let store = batch.store();
    assert_eq!(store.job_ids().unwrap(), [SBATCH_JOB_ID]);
    assert_eq!(store.get(Key::NextRunId), None);
    assert_eq!(store.get(Key::LastRunId), None);
}

#[test]
pub fn submit_needs_reserve_or_array() {
    let batch = Batch::new("MAX_ID=10\n", "", 0);

    let error = batch.run(&["submit", "--", "job.sh"]).unwrap_err();

    assert!(matches!(error, CliError::Validation(_)));
    assert_eq!(error.exit_code(), 1);
    assert_eq!(batch.calls("sbatch"), None);
    assert_eq!(batch.content(), "MAX_ID=10\n");
}

#[test]
pub fn failed_sbatch_exit_code_is_passed_through() {
    let content = "MAX_ID=10\nRESERVE=3\n";
    let batch = Batch::new(content, "", 5);

    let error = batch.run(&["submit", "--", "job.sh"]).unwrap_err();

    assert_eq!(error.exit_code(), 5);
    assert_eq!(batch.content(), content);
}

#[test]
pub fn reset_starts_the_batch_over() {
    let batch = Batch::new(
        "MAX_ID=10\nRESERVE=3\nNEXT_RUN_ID=4\nLAST_RUN_ID=7\nJOB_IDS=400,401\n",
        "",
        0,
    );

    batch.run(&["reset"]).unwrap();
    assert_eq!(
        batch.content(),
        "MAX_ID=10\nRESERVE=3\nNEXT_RUN_ID=0\nLAST_RUN_ID=-1\nJOB_IDS=\n"
    );

    batch.run(&["submit", "--", "job.sh"]).unwrap();
    assert!(batch
        .calls("sbatch")
        .unwrap()
        .contains(&"--export=ALL,JOBWIN_NEXT_RUN_ID=0,JOBWIN_LAST_RUN_ID=3".to_owned()));
}

#[test]
pub fn set_checks_numeric_keys() {
    let batch = Batch::new("MAX_ID=10\nRESERVE=3\n", "", 0);

    batch.run(&["set", "LAST_RUN_ID", "-1"]).unwrap();
    batch.run(&["set", "batch_name", "render"]).unwrap();
    assert_eq!(
        batch.content(),
        "MAX_ID=10\nRESERVE=3\nLAST_RUN_ID=-1\nBATCH_NAME=render\n"
    );

    let error = batch.run(&["set", "MAX_ID", "lots"]).unwrap_err();
    assert!(matches!(
        error,
        CliError::Store(StoreError::InvalidValue { key: Key::MaxId, .. })
    ));
    assert_eq!(error.exit_code(), 1);
    assert!(batch.content().starts_with("MAX_ID=10\n"));
}

#[test]
pub fn get_of_an_unset_key_fails() {
    let batch = Batch::new("MAX_ID=10\n", "", 0);

    batch.run(&["get", "max_id"]).unwrap();
    assert!(matches!(
        batch.run(&["get", "RESERVE"]),
        Err(CliError::Validation(_))
    ));
}

#[test]
pub fn unknown_keys_are_usage_errors() {
    let error = Cli::try_parse_from(["jobwin", "set", "HOME", "/tmp"])
        .err()
        .unwrap();

    assert_eq!(error.kind(), ErrorKind::ValueValidation);
}

#[test]
pub fn status_queries_the_ledger() {
    let batch = Batch::new(
        "MAX_ID=10\nRESERVE=3\nJOB_IDS=400,410\n",
        "400_0|FAILED|batch|2026-10-18T09:00:00|2026-10-18T09:00:05|2026-10-18T09:01:00|401",
        0,
    );

    batch.run(&["status", "--json", "--samples", "1"]).unwrap();
    batch.run(&["status", "--list", "failed"]).unwrap();
    assert!(matches!(
        Cli::try_parse_from(["jobwin", "status", "--list", "exploded"]),
        Err(_)
    ));

    let sacct = batch.calls("sacct").unwrap();
    assert_eq!(
        sacct.iter().filter(|arg| *arg == "--jobs=400,410").count(),
        2
    );
    assert_eq!(batch.calls("sbatch"), None);
}
