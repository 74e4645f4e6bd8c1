use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::billing::Month;
use crate::error::AppError;

/// Stored status of a payment row. `late` is never written to the database;
/// it is derived at read time from the month and the current date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Late,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Late => "late",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "late" => Ok(PaymentStatus::Late),
            _ => Err(AppError::Validation(format!("Unknown payment status: {}", s))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Bank,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Bank => "bank",
            PaymentMethod::Online => "online",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "bank" => Ok(PaymentMethod::Bank),
            "online" => Ok(PaymentMethod::Online),
            _ => Err(AppError::Validation(format!("Unknown payment method: {}", s))),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Ongoing,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Ongoing => "ongoing",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "scheduled" => Ok(SessionStatus::Scheduled),
            "ongoing" => Ok(SessionStatus::Ongoing),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            _ => Err(AppError::Validation(format!("Unknown session status: {}", s))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "late" => Ok(AttendanceStatus::Late),
            "absent" => Ok(AttendanceStatus::Absent),
            _ => Err(AppError::Validation(format!(
                "Unknown attendance status: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceMethod {
    Manual,
    Rfid,
}

impl AttendanceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceMethod::Manual => "manual",
            AttendanceMethod::Rfid => "rfid",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "manual" => Ok(AttendanceMethod::Manual),
            "rfid" => Ok(AttendanceMethod::Rfid),
            _ => Err(AppError::Validation(format!(
                "Unknown attendance method: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for AttendanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub student_code: String,
    pub parent_name: String,
    pub parent_phone: String,
    pub parent_email: Option<String>,
    pub academic_year: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbStudent {
    pub id: i64,
    pub name: String,
    pub student_code: String,
    pub parent_name: Option<String>,
    pub parent_phone: String,
    pub parent_email: Option<String>,
    pub academic_year: String,
    pub registered_at: Option<NaiveDateTime>,
}

impl From<DbStudent> for Student {
    fn from(db: DbStudent) -> Self {
        Self {
            id: db.id,
            name: db.name,
            student_code: db.student_code,
            parent_name: db.parent_name.unwrap_or_default(),
            parent_phone: db.parent_phone,
            parent_email: db.parent_email,
            academic_year: db.academic_year,
            registered_at: to_utc(db.registered_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Teacher {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub hired_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbTeacher {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub hired_at: Option<NaiveDateTime>,
}

impl From<DbTeacher> for Teacher {
    fn from(db: DbTeacher) -> Self {
        Self {
            id: db.id,
            name: db.name,
            subject: db.subject,
            phone: db.phone,
            email: db.email,
            hired_at: to_utc(db.hired_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Classroom {
    pub id: i64,
    pub name: String,
    pub capacity: Option<i64>,
    pub location: Option<String>,
}

/// One weekly slot of a class offering.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSlot {
    pub id: i64,
    pub day: String,
    pub time: String,
    pub classroom_id: Option<i64>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbScheduleSlot {
    pub id: i64,
    pub class_id: i64,
    pub day: String,
    pub time: String,
    pub classroom_id: Option<i64>,
}

impl From<DbScheduleSlot> for ScheduleSlot {
    fn from(db: DbScheduleSlot) -> Self {
        Self {
            id: db.id,
            day: db.day,
            time: db.time,
            classroom_id: db.classroom_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassOffering {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub academic_year: String,
    pub teacher_id: Option<i64>,
    pub price: i64,
    pub schedule: Vec<ScheduleSlot>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbClass {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub academic_year: String,
    pub teacher_id: Option<i64>,
    pub price: i64,
}

impl From<DbClass> for ClassOffering {
    fn from(db: DbClass) -> Self {
        Self {
            id: db.id,
            name: db.name,
            subject: db.subject,
            academic_year: db.academic_year,
            teacher_id: db.teacher_id,
            price: db.price,
            schedule: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub month: Month,
    pub amount: i64,
    /// Derived status: `late` replaces `pending` once the month has elapsed.
    pub status: PaymentStatus,
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<PaymentMethod>,
    pub invoice_number: Option<String>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPayment {
    pub id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub month: String,
    pub amount: i64,
    pub status: String,
    pub payment_date: Option<String>,
    pub payment_method: Option<String>,
    pub invoice_number: Option<String>,
}

impl From<DbPayment> for Payment {
    fn from(db: DbPayment) -> Self {
        Self {
            id: db.id,
            student_id: db.student_id,
            class_id: db.class_id,
            month: Month::parse(&db.month).unwrap_or_default(),
            amount: db.amount,
            status: PaymentStatus::from_str(&db.status).unwrap_or(PaymentStatus::Pending),
            payment_date: db
                .payment_date
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            payment_method: db
                .payment_method
                .and_then(|m| PaymentMethod::from_str(&m).ok()),
            invoice_number: db.invoice_number,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    pub status: AttendanceStatus,
    pub method: AttendanceMethod,
    pub recorded_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAttendance {
    pub id: i64,
    pub live_class_id: i64,
    pub student_id: i64,
    pub status: String,
    pub method: String,
    pub recorded_at: Option<NaiveDateTime>,
}

impl From<DbAttendance> for AttendanceRecord {
    fn from(db: DbAttendance) -> Self {
        Self {
            id: db.id,
            student_id: db.student_id,
            status: AttendanceStatus::from_str(&db.status).unwrap_or(AttendanceStatus::Present),
            method: AttendanceMethod::from_str(&db.method).unwrap_or(AttendanceMethod::Manual),
            recorded_at: to_utc(db.recorded_at),
        }
    }
}

/// One concrete scheduled occurrence of a class offering.
#[derive(Debug, Clone, Serialize)]
pub struct LiveClass {
    pub id: i64,
    pub class_id: i64,
    pub teacher_id: i64,
    pub classroom_id: Option<i64>,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: Option<String>,
    pub status: SessionStatus,
    pub notes: Option<String>,
    pub attendance: Vec<AttendanceRecord>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLiveClass {
    pub id: i64,
    pub class_id: i64,
    pub teacher_id: i64,
    pub classroom_id: Option<i64>,
    pub date: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub status: String,
    pub notes: Option<String>,
}

impl From<DbLiveClass> for LiveClass {
    fn from(db: DbLiveClass) -> Self {
        Self {
            id: db.id,
            class_id: db.class_id,
            teacher_id: db.teacher_id,
            classroom_id: db.classroom_id,
            date: NaiveDate::parse_from_str(&db.date, "%Y-%m-%d").unwrap_or_default(),
            start_time: db.start_time,
            end_time: db.end_time,
            status: SessionStatus::from_str(&db.status).unwrap_or(SessionStatus::Scheduled),
            notes: db.notes,
            attendance: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Card {
    pub id: i64,
    pub uid: String,
    pub student_id: i64,
    pub issued_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCard {
    pub id: i64,
    pub uid: String,
    pub student_id: i64,
    pub issued_at: Option<NaiveDateTime>,
}

impl From<DbCard> for Card {
    fn from(db: DbCard) -> Self {
        Self {
            id: db.id,
            uid: db.uid,
            student_id: db.student_id,
            issued_at: to_utc(db.issued_at),
        }
    }
}

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}
