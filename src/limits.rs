//! Hard limits on inputs and in-memory state.

pub const MIN_PLATE_LEN: usize = 5;
pub const MAX_PLATE_LEN: usize = 32;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_STATION_NAME_LEN: usize = 100;
pub const MAX_STATIONS: usize = 1_000;
pub const MAX_RESERVATIONS_PER_STATION: usize = 100_000;
