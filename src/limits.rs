//! Hard caps. Every limit rejects with `EngineError::LimitExceeded` rather
//! than degrading silently.

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 64;
pub const MAX_PURPOSE_LEN: usize = 1024;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_REMARKS_LEN: usize = 2048;

pub const MAX_RESOURCES_PER_SITE: usize = 10_000;
pub const MAX_SLOTS_PER_SITE: usize = 4_096;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;

pub const MAX_SITES: usize = 256;
pub const MAX_SITE_NAME_LEN: usize = 256;
