//! Constants used throughout the edgedir library.

use std::time::Duration;

/// First POSIX uid handed out by the authority.
pub const UID_BASE: i64 = 2000;

/// Group every account belongs to unless told otherwise.
pub const DEFAULT_GID: i64 = 2000;

/// Longest login name accepted by the directory.
pub const USERNAME_MAX_LEN: usize = 32;

/// Port the authority HTTP API listens on by default.
pub const DEFAULT_AUTHORITY_PORT: u16 = 8000;

/// Port every edge accepts snapshot pushes on unless it registers another one.
pub const DEFAULT_EDGE_PORT: u16 = 8100;

/// SSH port recorded for an edge that registers without one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH user recorded for an edge that registers without one.
pub const DEFAULT_SSH_USER: &str = "root";

/// Upper bound on a single snapshot push to one edge.
///
/// Covers the edge's whole reconciliation, so it stays above the combined
/// budget of the default artifact steps.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single artifact generation step.
pub const DEFAULT_ARTIFACT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between unprompted full resyncs.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Attempts an edge makes to register itself before giving up.
pub const DEFAULT_REGISTER_ATTEMPTS: u32 = 3;

/// Pause between edge registration attempts.
pub const DEFAULT_REGISTER_DELAY: Duration = Duration::from_secs(5);

/// Header carrying the snapshot version on a push.
pub const SNAPSHOT_VERSION_HEADER: &str = "x-edgedir-snapshot-version";

/// Header naming the edge a relayed password change came from.
pub const EDGE_HOST_HEADER: &str = "x-edgedir-edge-host";

/// Path edges accept snapshot pushes on.
pub const SYNC_USERS_PATH: &str = "/api/sync/users";

/// Environment variable handed to artifact steps with the mirror connection URL.
pub const MIRROR_URL_ENV: &str = "EDGEDIR_MIRROR_URL";

/// Environment variable handed to artifact steps with the file they should write.
pub const ARTIFACT_OUTPUT_ENV: &str = "EDGEDIR_ARTIFACT_OUTPUT";
