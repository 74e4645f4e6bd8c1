//! Live-class lifecycle rules and attendance aggregation.
//!
//! Transitions are one-directional: scheduled -> ongoing -> completed, with
//! cancellation allowed from scheduled or ongoing. Completed and cancelled
//! are terminal.

use serde::Serialize;

use crate::error::AppError;
use crate::models::{AttendanceStatus, LiveClass, SessionStatus, Student};

pub fn validate_transition(from: SessionStatus, to: SessionStatus) -> Result<(), AppError> {
    use SessionStatus::*;
    let allowed = matches!(
        (from, to),
        (Scheduled, Ongoing) | (Ongoing, Completed) | (Scheduled, Cancelled) | (Ongoing, Cancelled)
    );
    if allowed {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "Cannot move session from {} to {}",
            from, to
        )))
    }
}

/// Attendance may only be captured while the session is running.
pub fn ensure_attendance_open(status: SessionStatus) -> Result<(), AppError> {
    if status == SessionStatus::Ongoing {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "Attendance can only be recorded while a session is ongoing (session is {})",
            status
        )))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentAttendanceSummary {
    pub student_id: i64,
    pub student_name: String,
    pub present: u32,
    pub late: u32,
    pub absent: u32,
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceReport {
    pub class_id: i64,
    pub total_sessions: u32,
    pub students: Vec<StudentAttendanceSummary>,
}

/// Aggregate per-student attendance counts over the given sessions.
///
/// Cancelled sessions do not count towards the total; a student with no
/// recorded entry for a session simply does not accumulate a count for it.
/// The rate is present / total_sessions, 0 when there were no sessions.
pub fn aggregate_report(
    class_id: i64,
    roster: &[Student],
    sessions: &[LiveClass],
) -> AttendanceReport {
    let counted: Vec<&LiveClass> = sessions
        .iter()
        .filter(|s| s.status != SessionStatus::Cancelled)
        .collect();
    let total_sessions = counted.len() as u32;

    let students = roster
        .iter()
        .map(|student| {
            let mut present = 0u32;
            let mut late = 0u32;
            let mut absent = 0u32;
            for session in &counted {
                for record in &session.attendance {
                    if record.student_id != student.id {
                        continue;
                    }
                    match record.status {
                        AttendanceStatus::Present => present += 1,
                        AttendanceStatus::Late => late += 1,
                        AttendanceStatus::Absent => absent += 1,
                    }
                }
            }
            let attendance_rate = if total_sessions == 0 {
                0.0
            } else {
                f64::from(present) / f64::from(total_sessions)
            };
            StudentAttendanceSummary {
                student_id: student.id,
                student_name: student.name.clone(),
                present,
                late,
                absent,
                attendance_rate,
            }
        })
        .collect();

    AttendanceReport {
        class_id,
        total_sessions,
        students,
    }
}
