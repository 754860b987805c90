//! Application-level building blocks shared by the InstaDrop frontends:
//! persisted configuration, file-backed transfer data, join links and the
//! usage tracking context.

pub mod config;
pub mod file_data;
pub mod share;
pub mod usage;

pub use config::{
    API_URL_ENV, AppConfig, DEFAULT_FREE_QUOTA, DEFAULT_JOIN_BASE_URL,
    UsageBackend, suggested_default_out_dir,
};
pub use file_data::FileData;
pub use share::{ROOM_PARAM, ShareError, join_link, render_qr, room_from_link};
pub use usage::{
    DeviceId, Gate, LocalUsageStore, UsageError, UsageStatus, UsageStore,
    UsageTracker,
};
