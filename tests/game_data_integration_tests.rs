//! Integration tests for GameDataMover
//!
//! These tests verify:
//! - planning against a mocked library list and a real scratch tree
//! - moving data out to an external drive leaves symlinks behind
//! - moving it back restores real directories
//! - cleanup of uninstalled games across every data location

mod common;

use camino::{Utf8Path, Utf8PathBuf};
use common::{MockLibraries, Sandbox, libraries};
use decktune::services::game_data::{GameDataError, GameDataMover, MoveSet};
use decktune::services::library::Library;
use decktune::{Metrics, StateChange, StateManager};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::Ordering;

struct Drives {
    sandbox: Sandbox,
    internal: Utf8PathBuf,
    sdcard: Utf8PathBuf,
}

impl Drives {
    fn new() -> Self {
        let sandbox = Sandbox::new();
        let internal = sandbox.config.game_data.steam_data_root.clone();
        let sdcard = sandbox.config.game_data.mount_root.join("sdcard");
        fs::create_dir_all(internal.join("steamapps/compatdata")).unwrap();
        fs::create_dir_all(internal.join("steamapps/shadercache")).unwrap();
        fs::create_dir_all(&sdcard).unwrap();
        Self {
            sandbox,
            internal,
            sdcard,
        }
    }

    fn mover(&self, source: MockLibraries) -> GameDataMover<MockLibraries> {
        GameDataMover::new(source, self.sandbox.config.game_data.clone())
    }

    fn internal_compat(&self, id: u32) -> Utf8PathBuf {
        self.internal.join(format!("steamapps/compatdata/{}", id))
    }

    fn internal_shader(&self, id: u32) -> Utf8PathBuf {
        self.internal.join(format!("steamapps/shadercache/{}", id))
    }

    fn external(&self, kind: &str, id: u32) -> Utf8PathBuf {
        self.sdcard
            .join(&self.sandbox.config.game_data.external_dir_name)
            .join(kind)
            .join(id.to_string())
    }

    /// Write a small prefix and shader cache for `id` on the internal drive.
    fn seed_internal(&self, id: u32) {
        let compat = self.internal_compat(id);
        fs::create_dir_all(compat.join("pfx/drive_c")).unwrap();
        fs::write(compat.join("pfx/user.reg"), "x".repeat(4096)).unwrap();
        std::os::unix::fs::symlink("drive_c", compat.join("pfx/dosdevices")).unwrap();

        let shader = self.internal_shader(id);
        fs::create_dir_all(&shader).unwrap();
        fs::write(shader.join("fozpipelinesv6"), "y".repeat(1024)).unwrap();
    }
}

fn is_symlink(path: &Utf8Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_move_to_sdcard_and_back() {
    let drives = Drives::new();
    drives.seed_internal(620);

    let on_sdcard = vec![
        Library::new(drives.internal.clone(), []),
        Library::new(drives.sdcard.join("SteamLibrary"), [620]),
    ];
    let mover = drives.mover(libraries(on_sdcard));

    let moves = mover.plan(&drives.internal, &drives.sdcard).unwrap();
    assert_eq!(moves.to_right, vec![620]);
    assert!(moves.to_left.is_empty());
    assert_eq!(moves.to_right_bytes, 4096 + 1024);

    mover
        .move_game_data(&moves, &drives.internal, &drives.sdcard)
        .await
        .unwrap();
    mover.verify(&moves, &drives.internal, &drives.sdcard).unwrap();

    // Data is on the card, Steam's paths are links to it
    let moved_reg = drives.external("compatdata", 620).join("pfx/user.reg");
    assert_eq!(fs::read_to_string(&moved_reg).unwrap().len(), 4096);
    assert!(is_symlink(
        &drives.external("compatdata", 620).join("pfx/dosdevices")
    ));
    assert!(is_symlink(&drives.internal_compat(620)));
    assert!(is_symlink(&drives.internal_shader(620)));
    assert_eq!(
        fs::read_link(drives.internal_compat(620)).unwrap(),
        drives.external("compatdata", 620).as_std_path()
    );
    assert!(drives.internal_compat(620).join("pfx/user.reg").exists());

    // Library moved back to the internal drive
    let on_internal = vec![
        Library::new(drives.internal.clone(), [620]),
        Library::new(drives.sdcard.join("SteamLibrary"), []),
    ];
    let mover = drives.mover(libraries(on_internal));

    let moves = mover.sync(&drives.internal, &drives.sdcard).await.unwrap();

    assert_eq!(moves.to_left, vec![620]);
    assert!(!is_symlink(&drives.internal_compat(620)));
    assert!(drives.internal_compat(620).is_dir());
    assert!(drives.internal_shader(620).join("fozpipelinesv6").is_file());
    assert!(!drives.external("compatdata", 620).exists());
    assert!(!drives.external("shadercache", 620).exists());
}

#[tokio::test]
async fn test_sync_with_nothing_to_do() {
    let drives = Drives::new();
    drives.seed_internal(620);
    let mover = drives.mover(libraries(vec![Library::new(drives.internal.clone(), [620])]));

    let moves = mover.sync(&drives.internal, &drives.sdcard).await.unwrap();

    assert!(moves.is_empty());
    assert!(drives.internal_compat(620).is_dir());
}

#[test]
fn test_partial_data_is_not_moved() {
    let drives = Drives::new();
    fs::create_dir_all(drives.internal_compat(70)).unwrap();
    let mover = drives.mover(libraries(vec![Library::new(drives.sdcard.clone(), [70])]));

    let moves = mover.plan(&drives.internal, &drives.sdcard).unwrap();

    assert!(moves.is_empty());
}

#[test]
fn test_same_roots_rejected() {
    let drives = Drives::new();
    let mover = drives.mover(MockLibraries::new());

    assert!(matches!(
        mover.plan(&drives.sdcard, &drives.sdcard),
        Err(GameDataError::SameRoots(_))
    ));
}

#[test]
fn test_verify_reports_unmoved_games() {
    let drives = Drives::new();
    drives.seed_internal(620);
    drives.seed_internal(730);
    let mover = drives.mover(MockLibraries::new());

    let moves = MoveSet {
        to_right: vec![620, 730],
        ..MoveSet::default()
    };
    let err = mover
        .verify(&moves, &drives.internal, &drives.sdcard)
        .unwrap_err();

    assert!(matches!(&err, GameDataError::Unmoved(names) if names == &["620", "730"]));
    assert!(err.to_string().ends_with("620, 730"));
}

#[tokio::test]
async fn test_move_reports_progress() {
    let drives = Drives::new();
    drives.seed_internal(620);
    drives.seed_internal(730);
    let state = StateManager::new();
    let mut rx = state.subscribe();
    let metrics = Arc::new(Metrics::new());
    let mover = drives
        .mover(libraries(vec![Library::new(drives.sdcard.clone(), [620, 730])]))
        .with_state(state.clone())
        .with_metrics(Arc::clone(&metrics));

    mover.sync(&drives.internal, &drives.sdcard).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.first(), Some(&StateChange::MoveStarted { total: 2 }));
    assert!(events.contains(&StateChange::MoveProgressUpdated {
        completed: 1,
        total: 2,
        current_game: Some("730".to_string()),
    }));
    assert!(events.contains(&StateChange::MoveFinished { moved: 2 }));
    assert_eq!(metrics.games_moved.load(Ordering::Relaxed), 2);
    assert_eq!(state.snapshot().moved_games, vec!["620", "730"]);
}

#[tokio::test]
async fn test_failed_move_is_recorded() {
    let drives = Drives::new();
    drives.seed_internal(620);
    // A file where the external data directory should be
    let blocker = drives
        .sdcard
        .join(&drives.sandbox.config.game_data.external_dir_name)
        .join("compatdata/620");
    let state = StateManager::new();
    let mover = drives
        .mover(libraries(vec![Library::new(drives.sdcard.clone(), [620])]))
        .with_state(state.clone());

    let moves = mover.plan(&drives.internal, &drives.sdcard).unwrap();
    fs::write(&blocker, "not a directory").unwrap();

    let err = mover
        .move_game_data(&moves, &drives.internal, &drives.sdcard)
        .await
        .unwrap_err();

    assert!(matches!(err, GameDataError::Copy { .. }));
    // Source data stays put when the copy fails
    assert!(drives.internal_compat(620).join("pfx/user.reg").exists());
    let snapshot = state.snapshot();
    assert!(!snapshot.is_moving);
    assert!(snapshot.last_error.is_some());
}

#[test]
fn test_data_locations_include_mounted_drives() {
    let drives = Drives::new();
    let settings = &drives.sandbox.config.game_data;
    fs::write(
        &settings.mountinfo,
        format!(
            "22 1 259:2 / / rw,relatime - ext4 /dev/nvme0n1p8 rw\n\
             98 22 179:1 / {} rw,nosuid - ext4 /dev/mmcblk0p1 rw\n",
            drives.sdcard
        ),
    )
    .unwrap();
    let mover = drives.mover(MockLibraries::new());

    let locations = mover.data_locations().unwrap();

    let external = drives.sdcard.join(&settings.external_dir_name);
    assert_eq!(
        locations,
        vec![
            settings.steam_compat_root(),
            settings.steam_shader_root(),
            external.join("compatdata"),
            external.join("shadercache"),
        ]
    );
}

#[test]
fn test_remove_uninstalled_game_data() {
    let drives = Drives::new();
    let settings = drives.sandbox.config.game_data.clone();
    fs::write(&settings.mountinfo, "").unwrap();

    for id in [620, 730, 0] {
        fs::create_dir_all(drives.internal_compat(id)).unwrap();
    }
    fs::create_dir_all(drives.internal_shader(730)).unwrap();
    // Runtime tools and non-numeric entries are never touched
    fs::create_dir_all(drives.internal.join("steamapps/compatdata/1070560000")).unwrap();
    fs::create_dir_all(drives.internal.join("steamapps/compatdata/notagame")).unwrap();

    let mover = drives.mover(libraries(vec![Library::new(drives.internal.clone(), [620])]));
    let locations = mover.data_locations().unwrap();

    let ids = mover.uninstalled_game_ids(&locations).unwrap();
    assert_eq!(ids, vec![730]);

    let removed = mover.remove_game_data(&ids, &locations).unwrap();
    assert_eq!(removed, 2);
    assert!(!drives.internal_compat(730).exists());
    assert!(!drives.internal_shader(730).exists());
    assert!(drives.internal_compat(620).exists());
    assert!(drives.internal.join("steamapps/compatdata/notagame").exists());
}
