//! Push conflict resolution.

use crate::config::ConflictPolicy;
use crate::models::{ConflictWinner, ScheduleEntry};

/// Pick the version that survives a push conflict.
///
/// Last-writer-wins orders versions by `updated_at`, then revision, then id,
/// then the remaining fields. The order is total, so the same version wins no
/// matter which side it arrives from. Identical versions resolve to remote.
pub fn resolve_conflict(
    policy: ConflictPolicy,
    local: &ScheduleEntry,
    remote: &ScheduleEntry,
) -> ConflictWinner {
    match policy {
        ConflictPolicy::RemoteWins => ConflictWinner::Remote,
        ConflictPolicy::Lww => {
            if lww_key(local) > lww_key(remote) {
                ConflictWinner::Local
            } else {
                ConflictWinner::Remote
            }
        }
    }
}

#[allow(clippy::type_complexity)]
fn lww_key(
    entry: &ScheduleEntry,
) -> (i64, i64, &str, bool, &str, &str, &str, i64, i64, Option<crate::models::TransportKind>) {
    (
        entry.updated_at,
        entry.revision,
        entry.id.as_str(),
        entry.is_deleted,
        entry.title.as_str(),
        entry.location.as_str(),
        entry.owner_id.as_str(),
        entry.starts_at,
        entry.ends_at,
        entry.transport,
    )
}
