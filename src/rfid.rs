use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::db;
use crate::error::AppError;
use crate::models::{
    AttendanceMethod, AttendanceRecord, AttendanceStatus, Card, ClassOffering, LiveClass, Payment,
    Student,
};

/// Fan-out point for scan events. Producers are the `/rfid/scan` endpoint;
/// consumers are SSE subscribers at the reception desk. Delivery is
/// at-most-once: a subscriber that lags past the channel capacity loses the
/// oldest events rather than stalling the scanner.
#[derive(Clone)]
pub struct ScannerHub {
    sender: broadcast::Sender<ScanEvent>,
}

impl ScannerHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ScanEvent) {
        // Err here only means nobody is listening right now.
        if self.sender.send(event).is_err() {
            info!("Scan event dropped: no active subscribers");
        }
    }
}

impl Default for ScannerHub {
    fn default() -> Self {
        Self::new(64)
    }
}

/// What a card scan resolved to. Serialized as the SSE payload for desk
/// displays and returned to the scanner process as the POST response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ScanEvent {
    StudentDetected {
        student: Student,
        card: Card,
        classes: Vec<ClassOffering>,
        unpaid_payments: Vec<Payment>,
        ongoing_sessions: Vec<LiveClass>,
        attendance: Option<AttendanceRecord>,
    },
    UnknownCard {
        uid: String,
    },
}

/// Resolve a raw card UID to its student and publish the outcome.
///
/// If exactly one of the student's classes has a session ongoing today, the
/// scan doubles as an attendance record (present, method `rfid`). With zero
/// or several candidates nothing is recorded; the desk disambiguates.
#[instrument(skip(pool, hub))]
pub async fn process_scan(
    pool: &Pool<Sqlite>,
    hub: &ScannerHub,
    uid: &str,
    today: NaiveDate,
) -> Result<ScanEvent, AppError> {
    let Some(card) = db::find_card_by_uid(pool, uid).await? else {
        warn!(uid, "Scan from unknown card");
        let event = ScanEvent::UnknownCard {
            uid: uid.to_string(),
        };
        hub.publish(event.clone());
        return Ok(event);
    };

    let student = db::get_student(pool, card.student_id).await?;
    let classes = db::get_classes_for_student(pool, student.id).await?;
    let unpaid_payments = db::list_unpaid_payments(pool, student.id, today).await?;

    let ongoing = db::list_live_classes(pool, Some(crate::models::SessionStatus::Ongoing), Some(today), None).await?;
    let candidates: Vec<LiveClass> = ongoing
        .into_iter()
        .filter(|s| classes.iter().any(|c| c.id == s.class_id))
        .collect();

    let attendance = match candidates.as_slice() {
        [session] => Some(
            db::record_attendance(
                pool,
                session.id,
                student.id,
                AttendanceStatus::Present,
                AttendanceMethod::Rfid,
            )
            .await?,
        ),
        _ => None,
    };

    info!(
        student_id = student.id,
        candidates = candidates.len(),
        recorded = attendance.is_some(),
        "Card resolved"
    );

    let event = ScanEvent::StudentDetected {
        student,
        card,
        classes,
        unpaid_payments,
        ongoing_sessions: candidates,
        attendance,
    };
    hub.publish(event.clone());

    Ok(event)
}
