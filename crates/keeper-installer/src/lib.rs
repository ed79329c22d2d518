mod attempts;
mod backup;
mod fs_utils;
mod install;
mod layout;
mod toolchain;
mod types;

pub use attempts::{
    append_attempt_journal_entry, attempt_id_for, clear_active_attempt, list_attempts,
    prune_finished_attempts, read_active_attempt, read_attempt_journal, read_attempt_metadata,
    recover_interrupted_attempt, set_active_attempt, update_attempt_status,
    write_attempt_metadata, AttemptInProgress, AttemptJournal, RETAINED_ATTEMPTS,
};
pub use backup::{discard_backup, restore_binary, snapshot_binary};
pub use fs_utils::remove_file_if_exists;
pub use install::{cleanup_previous_binary, file_owner, install_binary, staging_path_for};
pub use layout::{default_state_dir, StateLayout};
pub use toolchain::{find_gcc_dir, go_environment, BuildToolchain, GoToolchain};
pub use types::{
    AttemptJournalEntry, AttemptMetadata, AttemptStatus, BackupRecord, FileOwner,
};
