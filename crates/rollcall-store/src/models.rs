use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ROLE: &str = "student";
pub const STATUS_PRESENT: &str = "present";

/// Fields supplied when registering a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub employee_id: String,
    #[serde(default)]
    pub department: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

impl NewUser {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        employee_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            employee_id: employee_id.into(),
            department: String::new(),
            role: default_role(),
        }
    }

    /// Name, email and employee ID must all be non-blank.
    pub fn has_required_fields(&self) -> bool {
        [&self.name, &self.email, &self.employee_id]
            .iter()
            .all(|f| !f.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub employee_id: String,
    pub department: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attendance {
    pub id: String,
    pub user_id: String,
    pub check_in_time: DateTime<Utc>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub status: String,
    pub confidence_score: f32,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// User columns shown next to an attendance row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub name: String,
    pub employee_id: String,
    pub department: String,
}

/// An attendance row joined with its user, if the user still exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEntry {
    pub id: String,
    pub check_in_time: DateTime<Utc>,
    pub status: String,
    pub confidence_score: f32,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_users: u64,
    /// Distinct users checked in since the start of the day.
    pub today_attendance: u64,
    /// Whole percent, rounded to nearest.
    pub attendance_rate: u32,
}

pub fn attendance_rate(present: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    (present as f64 / total as f64 * 100.0).round() as u32
}

/// Midnight of `now`'s calendar day in its own timezone, as UTC.
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(Default::default());
    match now.timezone().from_local_datetime(&midnight).earliest() {
        Some(t) => t.with_timezone(&Utc),
        // Midnight skipped by a DST jump.
        None => Utc.from_utc_datetime(&midnight),
    }
}
