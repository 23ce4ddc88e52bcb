//! Run orchestration integration tests
//!
//! Drives the public Coordinator API end to end, with small `sh` scripts
//! standing in for the data generator, trainer, and sampler.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;
use wavediff::checkpoint::CheckpointDir;
use wavediff::config::{Config, PathsConfig, WorkerProgram};
use wavediff::coordinator::StatusSource;
use wavediff::domain::{DataParams, RunStatus, TrainParams};
use wavediff::error::Result;
use wavediff::tail::TailEvent;
use wavediff::{Coordinator, WavediffError};

const DATA_GENERATOR: &str = r#"
mkdir -p data
echo "date,close" > data/index_time_series.csv
echo "Simulating $6 days"
echo "Rows generated: 720"
"#;

const TRAINER: &str = r#"
mkdir -p "$WAVEDIFF_SAVE_DIR"
i=0
while [ "$i" -lt "$WAVEDIFF_EPOCHS" ]; do
  echo "epoch $i/$WAVEDIFF_EPOCHS loss=0.0$i"
  : > "$WAVEDIFF_SAVE_DIR/model_epoch_$i.pt"
  sleep 0.01
  i=$((i + 1))
done
printf 'training complete'
"#;

const SAMPLER: &str = r#"printf 'PNG' > "$WAVEDIFF_OUTPUT_PATH""#;

fn config(temp: &TempDir, trainer: &str) -> Config {
    let mut config = Config::default();
    config.paths = PathsConfig::rooted_at(temp.path());
    config.workers.data_generator = WorkerProgram::shell(DATA_GENERATOR).timeout_ms(10_000);
    config.workers.trainer = WorkerProgram::shell(trainer);
    config.workers.sampler = WorkerProgram::shell(SAMPLER).timeout_ms(10_000);
    config.tail.poll_interval_ms = 20;
    config.checkpoints.keep_last = 3;
    config
}

fn epochs(n: u32) -> TrainParams {
    TrainParams {
        epochs: n,
        ..Default::default()
    }
}

fn collect_lines(events: &[TailEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            TailEvent::Line { line } => Some(format!("{}\n", line)),
            TailEvent::Done { .. } => None,
        })
        .collect()
}

/// Integration test: data run parses the row marker and persists the log
#[tokio::test]
async fn test_data_run_round_trip() -> Result<()> {
    let temp = TempDir::new()?;
    let coordinator = Coordinator::open(&config(&temp, TRAINER))?;

    let first = coordinator.submit_data_run(&DataParams::default()).await?;
    let second = coordinator
        .submit_data_run(&DataParams {
            days: 5,
            ..Default::default()
        })
        .await?;

    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(first.row_count, 720);
    assert!(first.artifact_path.is_file());
    assert!(second.log.contains("Simulating 5 days"));

    let listed: Vec<i64> = coordinator.list_data_runs()?.iter().map(|r| r.id).collect();
    assert_eq!(listed, vec![second.id, first.id]);
    Ok(())
}

/// Integration test: ten epochs with retention three, then a restart
#[tokio::test]
async fn test_training_retention_and_restart() -> Result<()> {
    let temp = TempDir::new()?;
    let config = config(&temp, TRAINER);

    let run = {
        let coordinator = Coordinator::open(&config)?;
        let run = coordinator.submit_train_run(&epochs(10))?;
        assert_eq!(run.status, RunStatus::Pending);

        let before = coordinator.get_train_run(run.id)?;
        assert_eq!(before.status_source, StatusSource::Live);
        assert!(!before.status().is_terminal());

        assert_eq!(coordinator.wait_for_train_run(run.id).await?, RunStatus::Success);
        run
    };

    let remaining: Vec<u32> = CheckpointDir::new(&run.checkpoint_dir)
        .list()?
        .iter()
        .map(|c| c.epoch)
        .collect();
    assert_eq!(remaining, vec![7, 8, 9]);
    assert_eq!(fs::read_dir(&run.checkpoint_dir)?.count(), 3);

    // A fresh coordinator has no registry entry; the store answers
    tokio::time::sleep(Duration::from_millis(5)).await;
    let restarted = Coordinator::open(&config)?;
    let view = restarted.get_train_run(run.id)?;
    assert_eq!(view.status(), RunStatus::Success);
    assert_eq!(view.status_source, StatusSource::Persisted);

    let events: Vec<TailEvent> = restarted.stream_train_logs(run.id)?.collect().await;
    assert_eq!(events.last(), Some(&TailEvent::done(RunStatus::Success)));
    let log = fs::read_to_string(&run.log_path)?;
    assert_eq!(collect_lines(&events), format!("{}\n", log));
    Ok(())
}

/// Integration test: concurrent observers each see the whole log exactly once
#[tokio::test]
async fn test_concurrent_log_observers() -> Result<()> {
    let temp = TempDir::new()?;
    let coordinator = Coordinator::open(&config(&temp, TRAINER))?;
    let run = coordinator.submit_train_run(&epochs(6))?;

    let first = coordinator.stream_train_logs(run.id)?;
    let second = coordinator.stream_train_logs(run.id)?;
    let (first, second): (Vec<TailEvent>, Vec<TailEvent>) = tokio::join!(first.collect(), second.collect());

    let log = fs::read_to_string(&run.log_path)?;
    for events in [&first, &second] {
        assert_eq!(events.iter().filter(|e| e.is_done()).count(), 1);
        assert_eq!(events.last(), Some(&TailEvent::done(RunStatus::Success)));
        assert_eq!(collect_lines(events), format!("{}\n", log));
    }
    Ok(())
}

/// Integration test: generation gating, image fetch, and delete cascade
#[tokio::test]
async fn test_generation_lifecycle() -> Result<()> {
    let temp = TempDir::new()?;
    let coordinator = Coordinator::open(&config(&temp, TRAINER))?;

    let trained = coordinator.submit_train_run(&epochs(2))?;
    let other = coordinator.submit_train_run(&epochs(1))?;

    // Still pending or running: rejected without touching the sampler
    match coordinator.submit_generation(trained.id).await {
        Err(WavediffError::NotReady { status, .. }) => assert!(!status.is_terminal()),
        result => panic!("expected NotReady, got {:?}", result),
    }

    coordinator.wait_for_train_run(trained.id).await?;
    coordinator.wait_for_train_run(other.id).await?;

    let generation = coordinator.submit_generation(trained.id).await?;
    coordinator.submit_generation(trained.id).await?;
    let kept = coordinator.submit_generation(other.id).await?;

    let image = coordinator.fetch_generated_image(&generation.artifact_name).await?;
    assert_eq!(image.bytes, b"PNG");
    assert_eq!(coordinator.list_generations(Some(trained.id))?.len(), 2);

    assert_eq!(coordinator.delete_train_run(trained.id)?, 2);
    let remaining = coordinator.list_generations(None)?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, kept.id);
    assert_eq!(coordinator.get_train_run(other.id)?.status(), RunStatus::Success);
    Ok(())
}

/// Integration test: failed training blocks generation with the actual status
#[tokio::test]
async fn test_failed_training_blocks_generation() -> Result<()> {
    let temp = TempDir::new()?;
    let coordinator = Coordinator::open(&config(&temp, "echo 'diverged' >&2; exit 2"))?;

    let run = coordinator.submit_train_run(&epochs(3))?;
    assert_eq!(coordinator.wait_for_train_run(run.id).await?, RunStatus::Failed);

    let err = coordinator.submit_generation(run.id).await.unwrap_err();
    assert_eq!(err.to_string(), format!("Training run {} status: failed", run.id));
    assert!(coordinator.list_generations(None)?.is_empty());
    assert!(fs::read_dir(coordinator.paths().generated_dir())?.next().is_none());
    Ok(())
}

/// Integration test: a run orphaned by a previous process is surfaced, then swept
#[tokio::test]
async fn test_orphaned_run_is_stale_until_recovered() -> Result<()> {
    let temp = TempDir::new()?;
    let config = config(&temp, TRAINER);

    let orphan = {
        let crashed = Coordinator::open(&config)?;
        let paths = crashed.paths().clone();
        crashed.store().create_train_run(&serde_json::json!({ "epochs": 4 }), 4, |id| {
            (paths.train_log_path(id), paths.checkpoint_dir(id))
        })?
    };
    fs::write(&orphan.log_path, "epoch 0/4 loss=0.00\n")?;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let coordinator = Coordinator::open(&config)?;
    let view = coordinator.get_train_run(orphan.id)?;
    assert_eq!(view.status_source, StatusSource::Stale);
    assert_eq!(view.status(), RunStatus::Pending);

    let events: Vec<TailEvent> = coordinator.stream_train_logs(orphan.id)?.collect().await;
    assert_eq!(
        events,
        vec![
            TailEvent::line("epoch 0/4 loss=0.00"),
            TailEvent::interrupted(RunStatus::Pending),
        ]
    );

    let report = coordinator.recover_interrupted()?;
    assert_eq!(report.actions.len(), 1);
    let view = coordinator.get_train_run(orphan.id)?;
    assert_eq!(view.status(), RunStatus::Failed);
    assert_eq!(view.status_source, StatusSource::Persisted);
    Ok(())
}

/// Integration test: image names cannot escape the generated directory
#[tokio::test]
async fn test_image_fetch_rejects_paths() -> Result<()> {
    let temp = TempDir::new()?;
    let coordinator = Coordinator::open(&config(&temp, TRAINER))?;
    let db: PathBuf = coordinator.paths().database();
    assert!(db.is_file());

    for name in ["../wavediff.db", "/etc/passwd", "sub/gen.png"] {
        assert!(matches!(
            coordinator.fetch_generated_image(name).await,
            Err(WavediffError::ImageNotFound(_))
        ));
    }
    Ok(())
}
