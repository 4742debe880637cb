//! Resuming a stored session rebuilds the same channel store as live ingestion.

use std::sync::Arc;

use chrono::Utc;
use egm_daq::persistence::{
    sort_for_replay, JsonLinesRepository, PersistenceQueue, ReadingRepository,
};
use egm_daq::protocol::{FieldValue, Reading, RecordKind};
use egm_daq::store::{Channel, ChannelStore};
use egm_daq::ReadingSink;

fn measurement(plot: i64, dt: i64, co2: i64) -> Reading {
    let mut reading = Reading::new(RecordKind::MemoryMeasurement, "R", Utc::now());
    reading.set("plot", FieldValue::Int(plot));
    reading.set("probe_type", FieldValue::Int(8));
    reading.set("co2", FieldValue::Int(co2));
    reading.set("dt", FieldValue::Int(dt));
    reading.set("atmp", FieldValue::Int(1003));
    reading
}

/// Temporal order: the two plots are measured alternately, plot 2 last.
fn live_sequence() -> Vec<Reading> {
    (0..12)
        .flat_map(|dt| [measurement(1, dt, 400 + dt), measurement(2, dt, 500 + dt * 3)])
        .collect()
}

#[tokio::test]
async fn replayed_session_matches_live_store() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(JsonLinesRepository::open(dir.path()).await.unwrap());
    let session = repo.create_session("two plots").await.unwrap();

    let (mut queue, worker) = PersistenceQueue::spawn(
        Arc::clone(&repo) as Arc<dyn ReadingRepository>,
        session.id,
        64,
    );
    let mut live = ChannelStore::default();
    for reading in live_sequence() {
        live.on_reading(&reading);
        queue.on_reading(&reading);
    }
    drop(queue);
    worker.await.unwrap();

    let mut stored = repo.session_readings(session.id).await.unwrap();
    assert_eq!(stored.len(), 24);

    // Simulate a store that returns dump order: newest first.
    stored.reverse();
    sort_for_replay(&mut stored);

    let mut resumed = ChannelStore::default();
    assert_eq!(resumed.replay(&stored), 24);
    assert_eq!(resumed, live);
    assert_eq!(
        resumed.window(2, Channel::Co2, 3).iter().map(|s| s.value).collect::<Vec<_>>(),
        vec![527.0, 530.0, 533.0]
    );
}

#[tokio::test]
async fn recent_sessions_lists_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let repo = JsonLinesRepository::open(dir.path()).await.unwrap();
    let first = repo.create_session("morning").await.unwrap();
    let second = repo.create_session("afternoon").await.unwrap();

    let sessions = repo.recent_sessions(5).await.unwrap();
    let ids: Vec<_> = sessions.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(sessions[0].notes, "afternoon");
}
