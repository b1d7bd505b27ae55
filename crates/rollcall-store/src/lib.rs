//! rollcall-store — persistence for the attendance kiosk.
//!
//! Users, their enrolled face descriptors and attendance check-ins live in a
//! single SQLite database.

pub mod models;
pub mod store;

pub use models::{
    attendance_rate, start_of_day, Attendance, AttendanceEntry, DashboardStats, NewUser, User,
    UserSummary, DEFAULT_ROLE, STATUS_PRESENT,
};
pub use store::{Store, StoreError};
