use std::sync::Arc;

use tempfile::TempDir;
use tvchan_core::schedule::SCHEDULE_KEY;
use tvchan_core::{
    AtomicJsonStore, ChannelSchedule, DocumentStatus, LocalDirStore, PlaylistItem, RepairStrategy,
    Schedule, ScheduleSlot,
};

fn sample_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    for index in 0..6 {
        schedule.channels.insert(
            format!("loop-{index}"),
            ChannelSchedule::looping(vec![
                PlaylistItem::new(format!("shows/{index}/a.mp4"), 600.0),
                PlaylistItem::new(format!("shows/{index}/b.mp4"), 300.0),
            ]),
        );
    }
    schedule.channels.insert(
        "zz-day".into(),
        ChannelSchedule::twenty_four_hour(vec![ScheduleSlot::new("00:00", "24:00", "day.mp4")]),
    );
    schedule
}

fn store(dir: &TempDir) -> AtomicJsonStore {
    AtomicJsonStore::new(Arc::new(LocalDirStore::new(dir.path())))
}

#[tokio::test]
async fn truncated_schedule_recovers_complete_channels() {
    let dir = TempDir::new().unwrap();
    let full = serde_json::to_vec_pretty(&sample_schedule()).unwrap();
    // cut inside the last channel
    let marker = b"\"zz-day\"";
    let cut_at = full
        .windows(marker.len())
        .position(|window| window == marker)
        .unwrap()
        + 20;
    let truncated = full[..cut_at].to_vec();
    std::fs::write(dir.path().join("channels.json"), &truncated).unwrap();
    let store = store(&dir);

    let status = store.check_status("channels.json").await;
    assert_eq!(status.status, DocumentStatus::Corrupted);

    let report = store.repair("channels.json", SCHEDULE_KEY).await.unwrap();
    assert!(report.was_corrupted);
    assert_eq!(report.recovered_entry_count, 6);
    assert_eq!(report.strategy, Some(RepairStrategy::TruncateAndClose));

    let backup_name = report.backup_name.clone().unwrap();
    assert!(backup_name.starts_with("channels.json.corrupt-"));
    assert!(backup_name.ends_with(".bak"));
    let backup = std::fs::read(dir.path().join(&backup_name)).unwrap();
    assert_eq!(backup, truncated);

    let repaired: Schedule = store.read("channels.json", Schedule::default()).await.unwrap();
    let expected = sample_schedule();
    for index in 0..6 {
        let id = format!("loop-{index}");
        assert_eq!(repaired.channels.get(&id), expected.channels.get(&id));
    }
    assert!(!repaired.channels.contains_key("zz-day"));
    assert_eq!(
        store.check_status("channels.json").await.status,
        DocumentStatus::Ok
    );
}

#[tokio::test]
async fn trailing_garbage_uses_balanced_span() {
    let dir = TempDir::new().unwrap();
    let mut raw = serde_json::to_vec(&sample_schedule()).unwrap();
    raw.extend_from_slice(b"\n}}garbage");
    std::fs::write(dir.path().join("channels.json"), &raw).unwrap();
    let store = store(&dir);

    let report = store.repair("channels.json", SCHEDULE_KEY).await.unwrap();
    assert_eq!(report.strategy, Some(RepairStrategy::BalancedSpan));
    assert_eq!(report.recovered_entry_count, 7);
}

#[tokio::test]
async fn healthy_document_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let raw = serde_json::to_vec(&sample_schedule()).unwrap();
    std::fs::write(dir.path().join("channels.json"), &raw).unwrap();
    let store = store(&dir);

    let report = store.repair("channels.json", SCHEDULE_KEY).await.unwrap();
    assert!(!report.was_corrupted);
    assert_eq!(report.recovered_entry_count, 7);
    assert!(report.backup_location.is_none());
    assert_eq!(std::fs::read(dir.path().join("channels.json")).unwrap(), raw);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn unrecoverable_document_keeps_backup_and_original() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("channels.json"), b"\x00\x01 not json").unwrap();
    let store = store(&dir);

    let err = store.repair("channels.json", SCHEDULE_KEY).await.unwrap_err();
    assert_eq!(err.kind(), tvchan_core::ErrorKind::CorruptedState);
    assert_eq!(
        std::fs::read(dir.path().join("channels.json")).unwrap(),
        b"\x00\x01 not json"
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn status_of_missing_document() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let status = store.check_status("absent.json").await;
    assert_eq!(status.status, DocumentStatus::NotFound);
    assert!(store.repair("absent.json", SCHEDULE_KEY).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn channel_cut_inside_playlist_is_not_kept_partially() {
    let dir = TempDir::new().unwrap();
    let mut schedule = Schedule::default();
    schedule.channels.insert(
        "a".into(),
        ChannelSchedule::looping(vec![PlaylistItem::new("a1.mp4", 60.0)]),
    );
    schedule.channels.insert(
        "b".into(),
        ChannelSchedule::looping(vec![
            PlaylistItem::new("b1.mp4", 60.0),
            PlaylistItem::new("b2.mp4", 60.0),
            PlaylistItem::new("b3.mp4", 60.0),
        ]),
    );
    let full = serde_json::to_vec_pretty(&schedule).unwrap();
    let marker = b"\"b3.mp4\"";
    let cut_at = full
        .windows(marker.len())
        .position(|window| window == marker)
        .unwrap();
    std::fs::write(dir.path().join("channels.json"), &full[..cut_at]).unwrap();
    let store = store(&dir);

    let report = store.repair("channels.json", SCHEDULE_KEY).await.unwrap();
    assert_eq!(report.recovered_entry_count, 1);
    let repaired: Schedule = store.read("channels.json", Schedule::default()).await.unwrap();
    assert_eq!(repaired.channels.get("a"), schedule.channels.get("a"));
    assert!(!repaired.channels.contains_key("b"));
}
