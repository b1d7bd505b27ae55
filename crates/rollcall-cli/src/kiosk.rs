//! Kiosk workflows: register, mark attendance, identify and dashboard.
//!
//! Each workflow returns an outcome carrying the status line shown to the
//! person at the kiosk. Only malformed data and infrastructure failures are
//! errors.

use crate::engine::{EngineError, EngineHandle};
use chrono::{DateTime, TimeZone, Utc};
use rollcall_core::{find_match, Embedding, MatchError, MatchResult};
use rollcall_store::{
    start_of_day, Attendance, AttendanceEntry, DashboardStats, NewUser, Store, StoreError, User,
    STATUS_PRESENT,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("capture error: {0}")]
    Engine(#[from] EngineError),
    #[error("embedding does not fit the enrolled faces: {0}")]
    Match(#[from] MatchError),
}

/// Matching and capture settings for the workflows.
#[derive(Debug, Clone)]
pub struct KioskSettings {
    pub match_threshold: f32,
    pub capture_attempts: usize,
    pub location: String,
}

#[derive(Debug)]
pub enum RegisterOutcome {
    Registered(User),
    MissingFields,
    CameraNotReady,
    NoFaceDetected,
    Duplicate,
}

impl RegisterOutcome {
    pub fn message(&self) -> String {
        match self {
            RegisterOutcome::Registered(_) => "User registered successfully!".into(),
            RegisterOutcome::MissingFields => "Please fill in all required fields".into(),
            RegisterOutcome::CameraNotReady => {
                "Camera is still loading. Please wait a moment and try again.".into()
            }
            RegisterOutcome::NoFaceDetected => {
                "No face detected. Please position your face clearly in the camera.".into()
            }
            RegisterOutcome::Duplicate => "Email or Employee ID already exists".into(),
        }
    }
}

#[derive(Debug)]
pub enum MarkOutcome {
    Marked {
        user: User,
        attendance: Attendance,
        distance: f32,
    },
    NotRecognized,
    CameraNotReady,
    NoFaceDetected,
}

impl MarkOutcome {
    pub fn message(&self) -> String {
        match self {
            MarkOutcome::Marked { user, .. } => format!("Attendance marked for {}", user.name),
            MarkOutcome::NotRecognized => "Face not recognized.".into(),
            MarkOutcome::CameraNotReady => "Camera still loading...".into(),
            MarkOutcome::NoFaceDetected => "No face detected.".into(),
        }
    }
}

/// Dashboard contents: totals plus the latest check-ins.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub stats: DashboardStats,
    pub recent: Vec<AttendanceEntry>,
}

/// Confidence stored with a check-in, derived from the match distance.
pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

pub struct Kiosk {
    store: Store,
    settings: KioskSettings,
}

impl Kiosk {
    pub fn new(store: Store, settings: KioskSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn register(
        &mut self,
        engine: &EngineHandle,
        user: &NewUser,
    ) -> Result<RegisterOutcome, KioskError> {
        if !user.has_required_fields() {
            return Ok(RegisterOutcome::MissingFields);
        }

        let embedding = match engine.capture_embedding(self.settings.capture_attempts).await {
            Ok(e) => e,
            Err(EngineError::NoFaceDetected) => return Ok(RegisterOutcome::NoFaceDetected),
            Err(EngineError::CameraNotReady { .. }) => return Ok(RegisterOutcome::CameraNotReady),
            Err(e) => return Err(e.into()),
        };

        match self.store.register(user, &embedding) {
            Ok(created) => Ok(RegisterOutcome::Registered(created)),
            Err(StoreError::Duplicate(key)) => {
                tracing::info!(key = %key, "registration rejected: duplicate");
                Ok(RegisterOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn mark(&mut self, engine: &EngineHandle) -> Result<MarkOutcome, KioskError> {
        let query = match engine.capture_embedding(self.settings.capture_attempts).await {
            Ok(e) => e,
            Err(EngineError::NoFaceDetected) => return Ok(MarkOutcome::NoFaceDetected),
            Err(EngineError::CameraNotReady { .. }) => return Ok(MarkOutcome::CameraNotReady),
            Err(e) => return Err(e.into()),
        };
        self.mark_embedding(&query, Utc::now())
    }

    /// Match `query` against a fresh enrolled snapshot and record a check-in.
    pub fn mark_embedding(
        &mut self,
        query: &Embedding,
        now: DateTime<Utc>,
    ) -> Result<MarkOutcome, KioskError> {
        let (identity, distance) = match self.identify(query)? {
            MatchResult::Matched { identity, distance } => (identity, distance),
            MatchResult::NoMatch => return Ok(MarkOutcome::NotRecognized),
        };

        let Some(user) = self.store.get_user(&identity)? else {
            tracing::warn!(identity = %identity, "matched identity no longer exists");
            return Ok(MarkOutcome::NotRecognized);
        };

        let attendance = self.store.record_attendance(
            &user.id,
            now,
            STATUS_PRESENT,
            confidence_from_distance(distance),
            &self.settings.location,
        )?;

        Ok(MarkOutcome::Marked {
            user,
            attendance,
            distance,
        })
    }

    /// Match without recording anything. A query whose length differs from
    /// the enrolled faces is an error, not a silent non-match.
    pub fn identify(&self, query: &Embedding) -> Result<MatchResult, KioskError> {
        let enrolled = self.store.list_enrolled()?;
        if let Some(first) = enrolled.first() {
            if query.dim() != first.embedding.dim() {
                return Err(MatchError::DimensionMismatch {
                    expected: first.embedding.dim(),
                    actual: query.dim(),
                }
                .into());
            }
        }
        let result = find_match(query, &enrolled, self.settings.match_threshold)?;
        tracing::info!(
            enrolled = enrolled.len(),
            threshold = self.settings.match_threshold,
            ?result,
            "identify"
        );
        Ok(result)
    }

    pub fn dashboard<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        limit: usize,
    ) -> Result<DashboardReport, KioskError> {
        Ok(DashboardReport {
            stats: self.store.dashboard_stats(start_of_day(now))?,
            recent: self.store.recent_attendance(limit)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::engine::testing::{ScriptedCamera, ScriptedEmbedder};
    use std::time::Duration;

    fn settings() -> KioskSettings {
        KioskSettings {
            match_threshold: 0.6,
            capture_attempts: 3,
            location: "Front desk".into(),
        }
    }

    fn kiosk() -> Kiosk {
        Kiosk::new(Store::open_in_memory().unwrap(), settings())
    }

    fn engine(outputs: Vec<Option<Vec<f32>>>) -> EngineHandle {
        spawn_engine(
            ScriptedCamera {
                not_ready: 0,
                fail: false,
            },
            ScriptedEmbedder::new(outputs),
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn ada() -> NewUser {
        NewUser::new("Ada Lovelace", "ada@example.com", "EMP001")
    }

    #[tokio::test]
    async fn test_register_then_mark() {
        let mut kiosk = kiosk();
        let engine = engine(vec![Some(vec![0.0, 0.5]), Some(vec![0.0, 0.0])]);

        let outcome = kiosk.register(&engine, &ada()).await.unwrap();
        assert_eq!(outcome.message(), "User registered successfully!");
        let RegisterOutcome::Registered(user) = outcome else {
            panic!("expected registration");
        };

        let outcome = kiosk.mark(&engine).await.unwrap();
        assert_eq!(outcome.message(), "Attendance marked for Ada Lovelace");
        match outcome {
            MarkOutcome::Marked {
                user: marked,
                attendance,
                distance,
            } => {
                assert_eq!(marked.id, user.id);
                assert_eq!(distance, 0.5);
                assert_eq!(attendance.status, "present");
                assert_eq!(attendance.location, "Front desk");
                assert!((attendance.confidence_score - 0.5).abs() < 1e-6);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(kiosk.store().recent_attendance(50).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_requires_fields() {
        let mut kiosk = kiosk();
        let engine = engine(vec![Some(vec![0.1])]);
        let outcome = kiosk
            .register(&engine, &NewUser::new("Ada", "", "EMP001"))
            .await
            .unwrap();
        assert!(matches!(outcome, RegisterOutcome::MissingFields));
        assert_eq!(kiosk.store().count_users().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_no_face() {
        let mut kiosk = kiosk();
        let engine = engine(vec![None]);
        let outcome = kiosk.register(&engine, &ada()).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::NoFaceDetected));
        assert_eq!(kiosk.store().count_users().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let mut kiosk = kiosk();
        let engine = engine(vec![Some(vec![0.1]), Some(vec![0.2])]);
        kiosk.register(&engine, &ada()).await.unwrap();
        let outcome = kiosk.register(&engine, &ada()).await.unwrap();
        assert_eq!(outcome.message(), "Email or Employee ID already exists");
    }

    #[tokio::test]
    async fn test_mark_not_recognized() {
        let mut kiosk = kiosk();
        let engine = engine(vec![Some(vec![0.0, 0.5]), Some(vec![1.0, 1.0])]);
        kiosk.register(&engine, &ada()).await.unwrap();

        let outcome = kiosk.mark(&engine).await.unwrap();
        assert!(matches!(outcome, MarkOutcome::NotRecognized));
        assert!(kiosk.store().recent_attendance(50).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_camera_not_ready() {
        let mut kiosk = kiosk();
        let engine = spawn_engine(
            ScriptedCamera {
                not_ready: 100,
                fail: false,
            },
            ScriptedEmbedder::new(vec![]),
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .unwrap();
        let outcome = kiosk.mark(&engine).await.unwrap();
        assert_eq!(outcome.message(), "Camera still loading...");
    }

    #[tokio::test]
    async fn test_model_change_is_reported() {
        let mut kiosk = kiosk();
        kiosk
            .register(&engine(vec![Some(vec![0.0, 0.5])]), &ada())
            .await
            .unwrap();

        let grace = NewUser::new("Grace Hopper", "grace@example.com", "EMP002");
        let err = kiosk
            .register(&engine(vec![Some(vec![0.0, 0.5, 0.1])]), &grace)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KioskError::Store(StoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert_eq!(kiosk.store().count_users().unwrap(), 1);

        let err = kiosk
            .mark_embedding(&Embedding::new(vec![0.0, 0.5, 0.1]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, KioskError::Match(_)));
        assert!(kiosk.store().recent_attendance(50).unwrap().is_empty());
    }

    #[test]
    fn test_empty_query_is_hard_error() {
        let mut kiosk = kiosk();
        let err = kiosk
            .mark_embedding(&Embedding::new(vec![]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, KioskError::Match(_)));
    }

    #[test]
    fn test_identify_has_no_side_effects() {
        let mut kiosk = kiosk();
        let user = kiosk
            .store
            .register(&ada(), &Embedding::new(vec![0.0, 0.5]))
            .unwrap();

        let result = kiosk.identify(&Embedding::new(vec![0.0, 0.0])).unwrap();
        assert_eq!(result.identity(), Some(user.id.as_str()));
        assert!(kiosk.store().recent_attendance(50).unwrap().is_empty());
    }

    #[test]
    fn test_dashboard_report() {
        let mut kiosk = kiosk();
        kiosk
            .store
            .register(&ada(), &Embedding::new(vec![0.0, 0.5]))
            .unwrap();
        kiosk
            .store
            .register(
                &NewUser::new("Grace Hopper", "grace@example.com", "EMP002"),
                &Embedding::new(vec![1.0, 1.0]),
            )
            .unwrap();

        let now = Utc::now();
        kiosk
            .mark_embedding(&Embedding::new(vec![0.0, 0.1]), now)
            .unwrap();

        let report = kiosk.dashboard(&now, 50).unwrap();
        assert_eq!(report.stats.total_users, 2);
        assert_eq!(report.stats.today_attendance, 1);
        assert_eq!(report.stats.attendance_rate, 50);
        assert_eq!(report.recent.len(), 1);
        assert_eq!(report.recent[0].user.as_ref().unwrap().employee_id, "EMP001");
    }

    #[test]
    fn test_confidence_from_distance() {
        assert_eq!(confidence_from_distance(0.0), 1.0);
        assert!((confidence_from_distance(0.25) - 0.75).abs() < 1e-6);
        assert_eq!(confidence_from_distance(1.7), 0.0);
    }
}
