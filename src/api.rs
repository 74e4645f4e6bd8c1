use chrono::{Local, NaiveDate, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::response::stream::{Event, EventStream};
use rocket::serde::{Deserialize, Serialize, json::Json};
use rand::Rng;
use rand::distributions::Alphanumeric;
use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast::error::RecvError;
use validator::Validate;

use crate::auth::{Permission, User, UserSession};
use crate::billing::{BillingConfig, FinancialReport, Month};
use crate::db;
use crate::error::AppError;
use crate::models::{
    AttendanceMethod, AttendanceRecord, AttendanceStatus, Card, ClassOffering, Classroom,
    LiveClass, Payment, PaymentMethod, PaymentStatus, SessionStatus, Student, Teacher,
};
use crate::rfid::{ScanEvent, ScannerHub, process_scan};
use crate::sessions::{AttendanceReport, aggregate_report};
use crate::validation::{JsonValidateExt, validate_academic_year, validate_time};

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("{} must be formatted YYYY-MM-DD", field)))
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub archived: bool,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role.to_string(),
            archived: user.archived,
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, AppError> {
    let validated = login.validate_custom()?;

    match db::authenticate_user(db, &validated.username, &validated.password).await? {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(8);

            db::create_user_session(db, user.id, &token, expires_at.naive_utc()).await?;

            let cookie = Cookie::build(("session_token", token))
                .same_site(SameSite::Lax)
                .http_only(true)
                .max_age(rocket::time::Duration::hours(8));
            cookies.add_private(cookie);

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(cookie) = cookies.get_private("session_token") {
        db::invalidate_session(db, cookie.value()).await?;
        cookies.remove_private(Cookie::from("session_token"));
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/health")]
pub async fn api_health(db: &State<Pool<Sqlite>>) -> Result<Json<serde_json::Value>, AppError> {
    sqlx::query("SELECT 1").fetch_one(db.inner()).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, message = "Username must be at least 3 characters"))]
    username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    role: String,
    display_name: Option<String>,
}

#[post("/users", data = "<request>")]
pub async fn api_create_user(
    user: User,
    request: Json<CreateUserRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserData>, AppError> {
    user.require_permission(Permission::ManageUsers)?;
    let validated = request.validate_custom()?;

    crate::auth::Role::from_str(&validated.role)
        .map_err(|_| AppError::Validation(format!("Unknown role: {}", validated.role)))?;

    let id = db::create_user(
        db,
        &validated.username,
        &validated.password,
        &validated.role,
        validated.display_name.as_deref(),
    )
    .await?;

    Ok(Json(UserData::from(db::get_user(db, id).await?)))
}

// ---------------------------------------------------------------------------
// Student registry
// ---------------------------------------------------------------------------

#[derive(Deserialize, Validate)]
pub struct StudentRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    name: String,
    student_code: Option<String>,
    parent_name: Option<String>,
    #[validate(length(min = 1, message = "Parent phone is required"))]
    parent_phone: String,
    #[validate(email(message = "Parent email must be a valid address"))]
    parent_email: Option<String>,
    #[validate(custom(function = validate_academic_year))]
    academic_year: String,
}

fn generate_student_code() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("STU-{}", suffix.to_uppercase())
}

#[get("/students?<academic_year>")]
pub async fn api_list_students(
    user: User,
    academic_year: Option<String>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Student>>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;
    Ok(Json(db::list_students(db, academic_year.as_deref()).await?))
}

#[post("/students", data = "<request>")]
pub async fn api_create_student(
    user: User,
    request: Json<StudentRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Student>, AppError> {
    user.require_permission(Permission::ManageStudents)?;
    let validated = request.validate_custom()?;

    let code = validated
        .student_code
        .unwrap_or_else(generate_student_code);

    let student = db::create_student(
        db,
        &validated.name,
        &code,
        validated.parent_name.as_deref(),
        &validated.parent_phone,
        validated.parent_email.as_deref(),
        &validated.academic_year,
    )
    .await?;

    Ok(Json(student))
}

#[derive(Serialize)]
pub struct StudentDetailResponse {
    pub student: Student,
    pub classes: Vec<ClassOffering>,
}

#[get("/students/<id>")]
pub async fn api_get_student(
    user: User,
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<StudentDetailResponse>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;

    let student = db::get_student(db, id).await?;
    let classes = db::get_classes_for_student(db, id).await?;

    Ok(Json(StudentDetailResponse { student, classes }))
}

#[put("/students/<id>", data = "<request>")]
pub async fn api_update_student(
    user: User,
    id: i64,
    request: Json<StudentRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Student>, AppError> {
    user.require_permission(Permission::ManageStudents)?;
    let validated = request.validate_custom()?;

    let student = db::update_student(
        db,
        id,
        &validated.name,
        validated.parent_name.as_deref(),
        &validated.parent_phone,
        validated.parent_email.as_deref(),
        &validated.academic_year,
    )
    .await?;

    Ok(Json(student))
}

#[delete("/students/<id>")]
pub async fn api_delete_student(
    user: User,
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::DeleteRecords)?;
    db::delete_student(db, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

// ---------------------------------------------------------------------------
// Teacher & classroom registries
// ---------------------------------------------------------------------------

#[derive(Deserialize, Validate)]
pub struct TeacherRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    name: String,
    #[validate(length(min = 1, message = "Subject is required"))]
    subject: String,
    phone: Option<String>,
    #[validate(email(message = "Email must be a valid address"))]
    email: Option<String>,
}

#[get("/teachers")]
pub async fn api_list_teachers(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Teacher>>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;
    Ok(Json(db::list_teachers(db).await?))
}

#[post("/teachers", data = "<request>")]
pub async fn api_create_teacher(
    user: User,
    request: Json<TeacherRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Teacher>, AppError> {
    user.require_permission(Permission::ManageTeachers)?;
    let validated = request.validate_custom()?;

    let teacher = db::create_teacher(
        db,
        &validated.name,
        &validated.subject,
        validated.phone.as_deref(),
        validated.email.as_deref(),
    )
    .await?;

    Ok(Json(teacher))
}

#[get("/teachers/<id>")]
pub async fn api_get_teacher(
    user: User,
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Teacher>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;
    Ok(Json(db::get_teacher(db, id).await?))
}

#[put("/teachers/<id>", data = "<request>")]
pub async fn api_update_teacher(
    user: User,
    id: i64,
    request: Json<TeacherRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Teacher>, AppError> {
    user.require_permission(Permission::ManageTeachers)?;
    let validated = request.validate_custom()?;

    let teacher = db::update_teacher(
        db,
        id,
        &validated.name,
        &validated.subject,
        validated.phone.as_deref(),
        validated.email.as_deref(),
    )
    .await?;

    Ok(Json(teacher))
}

#[delete("/teachers/<id>")]
pub async fn api_delete_teacher(
    user: User,
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::DeleteRecords)?;
    db::delete_teacher(db, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize, Validate)]
pub struct ClassroomRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    name: String,
    #[validate(range(min = 1, message = "Capacity must be positive"))]
    capacity: Option<i64>,
    location: Option<String>,
}

#[get("/classrooms")]
pub async fn api_list_classrooms(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Classroom>>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;
    Ok(Json(db::list_classrooms(db).await?))
}

#[post("/classrooms", data = "<request>")]
pub async fn api_create_classroom(
    user: User,
    request: Json<ClassroomRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Classroom>, AppError> {
    user.require_permission(Permission::ManageClassrooms)?;
    let validated = request.validate_custom()?;

    let classroom = db::create_classroom(
        db,
        &validated.name,
        validated.capacity,
        validated.location.as_deref(),
    )
    .await?;

    Ok(Json(classroom))
}

// ---------------------------------------------------------------------------
// Class offerings & enrollment
// ---------------------------------------------------------------------------

#[derive(Deserialize, Validate)]
pub struct ScheduleSlotRequest {
    #[validate(length(min = 1, message = "Day is required"))]
    day: String,
    #[validate(custom(function = validate_time))]
    time: String,
    classroom_id: Option<i64>,
}

#[derive(Deserialize, Validate)]
pub struct ClassRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    name: String,
    #[validate(length(min = 1, message = "Subject is required"))]
    subject: String,
    #[validate(custom(function = validate_academic_year))]
    academic_year: String,
    teacher_id: Option<i64>,
    #[validate(range(min = 0, message = "Price must not be negative"))]
    price: i64,
    #[validate(nested)]
    schedule: Vec<ScheduleSlotRequest>,
}

impl ClassRequest {
    fn schedule_tuples(&self) -> Vec<(String, String, Option<i64>)> {
        self.schedule
            .iter()
            .map(|s| (s.day.clone(), s.time.clone(), s.classroom_id))
            .collect()
    }
}

#[get("/classes?<academic_year>&<subject>&<teacher>")]
pub async fn api_list_classes(
    user: User,
    academic_year: Option<String>,
    subject: Option<String>,
    teacher: Option<i64>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ClassOffering>>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;
    Ok(Json(
        db::list_classes(db, academic_year.as_deref(), subject.as_deref(), teacher).await?,
    ))
}

#[post("/classes", data = "<request>")]
pub async fn api_create_class(
    user: User,
    request: Json<ClassRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ClassOffering>, AppError> {
    user.require_permission(Permission::ManageClasses)?;
    let validated = request.validate_custom()?;

    let class = db::create_class(
        db,
        &validated.name,
        &validated.subject,
        &validated.academic_year,
        validated.teacher_id,
        validated.price,
        &validated.schedule_tuples(),
    )
    .await?;

    Ok(Json(class))
}

#[derive(Serialize)]
pub struct ClassDetailResponse {
    pub class: ClassOffering,
    pub roster: Vec<Student>,
}

#[get("/classes/<id>")]
pub async fn api_get_class(
    user: User,
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ClassDetailResponse>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;

    let class = db::get_class(db, id).await?;
    let roster = db::get_roster(db, id).await?;

    Ok(Json(ClassDetailResponse { class, roster }))
}

#[put("/classes/<id>", data = "<request>")]
pub async fn api_update_class(
    user: User,
    id: i64,
    request: Json<ClassRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ClassOffering>, AppError> {
    user.require_permission(Permission::ManageClasses)?;
    let validated = request.validate_custom()?;

    let class = db::update_class(
        db,
        id,
        &validated.name,
        &validated.subject,
        &validated.academic_year,
        validated.teacher_id,
        validated.price,
        &validated.schedule_tuples(),
    )
    .await?;

    Ok(Json(class))
}

#[delete("/classes/<id>")]
pub async fn api_delete_class(
    user: User,
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::DeleteRecords)?;
    db::delete_class(db, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[post("/classes/<id>/enroll/<student_id>")]
pub async fn api_enroll_student(
    user: User,
    id: i64,
    student_id: i64,
    db: &State<Pool<Sqlite>>,
    billing: &State<BillingConfig>,
) -> Result<Json<Vec<Payment>>, AppError> {
    user.require_permission(Permission::EnrollStudents)?;

    let payments = db::enroll_student(db, id, student_id, today(), billing.horizon_months).await?;

    Ok(Json(payments))
}

#[delete("/classes/<id>/unenroll/<student_id>")]
pub async fn api_unenroll_student(
    user: User,
    id: i64,
    student_id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::EnrollStudents)?;
    db::unenroll_student(db, id, student_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[get("/payments?<student>&<class>&<month>&<status>")]
pub async fn api_list_payments(
    user: User,
    student: Option<i64>,
    class: Option<i64>,
    month: Option<String>,
    status: Option<String>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Payment>>, AppError> {
    user.require_permission(Permission::ViewPayments)?;

    let month = month.as_deref().map(Month::parse).transpose()?;
    let status = status.as_deref().map(PaymentStatus::from_str).transpose()?;

    Ok(Json(
        db::list_payments(db, student, class, month, status, today()).await?,
    ))
}

#[get("/payments/<id>")]
pub async fn api_get_payment(
    user: User,
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Payment>, AppError> {
    user.require_permission(Permission::ViewPayments)?;
    Ok(Json(db::get_payment(db, id, today()).await?))
}

#[derive(Deserialize, Validate)]
pub struct PayRequest {
    payment_date: Option<String>,
    #[validate(length(min = 1, message = "Payment method is required"))]
    payment_method: String,
}

#[put("/payments/<id>/pay", data = "<request>")]
pub async fn api_record_payment(
    user: User,
    id: i64,
    request: Json<PayRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Payment>, AppError> {
    user.require_permission(Permission::RecordPayments)?;
    let validated = request.validate_custom()?;

    let method = PaymentMethod::from_str(&validated.payment_method)?;
    let payment_date = match validated.payment_date.as_deref() {
        Some(raw) => parse_date(raw, "payment_date")?,
        None => today(),
    };

    Ok(Json(
        db::record_payment(db, id, payment_date, method, today()).await?,
    ))
}

#[get("/reports/financial?<year>")]
pub async fn api_financial_report(
    user: User,
    year: Option<i32>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<FinancialReport>, AppError> {
    user.require_permission(Permission::ViewPayments)?;
    Ok(Json(db::financial_report(db, year, today()).await?))
}

// ---------------------------------------------------------------------------
// Live-class sessions
// ---------------------------------------------------------------------------

#[derive(Deserialize, Validate)]
pub struct LiveClassRequest {
    class_id: i64,
    teacher_id: i64,
    classroom_id: Option<i64>,
    date: String,
    #[validate(custom(function = validate_time))]
    start_time: String,
    notes: Option<String>,
}

#[post("/live-classes", data = "<request>")]
pub async fn api_create_live_class(
    user: User,
    request: Json<LiveClassRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LiveClass>, AppError> {
    user.require_permission(Permission::RunSessions)?;
    let validated = request.validate_custom()?;

    let date = parse_date(&validated.date, "date")?;

    let session = db::create_live_class(
        db,
        validated.class_id,
        validated.teacher_id,
        validated.classroom_id,
        date,
        &validated.start_time,
        validated.notes.as_deref(),
    )
    .await?;

    Ok(Json(session))
}

#[get("/live-classes?<status>&<date>&<class>")]
pub async fn api_list_live_classes(
    user: User,
    status: Option<String>,
    date: Option<String>,
    class: Option<i64>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<LiveClass>>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;

    let status = status.as_deref().map(SessionStatus::from_str).transpose()?;
    let date = date.as_deref().map(|d| parse_date(d, "date")).transpose()?;

    Ok(Json(db::list_live_classes(db, status, date, class).await?))
}

#[get("/live-classes/<id>")]
pub async fn api_get_live_class(
    user: User,
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LiveClass>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;
    Ok(Json(db::get_live_class(db, id).await?))
}

#[derive(Deserialize, Validate)]
pub struct TransitionRequest {
    status: String,
    end_time: Option<String>,
}

#[put("/live-classes/<id>", data = "<request>")]
pub async fn api_transition_live_class(
    user: User,
    id: i64,
    request: Json<TransitionRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LiveClass>, AppError> {
    user.require_permission(Permission::RunSessions)?;
    let validated = request.validate_custom()?;

    let to = SessionStatus::from_str(&validated.status)?;
    if let Some(end_time) = validated.end_time.as_deref() {
        validate_time(end_time)
            .map_err(|_| AppError::Validation("end_time must be formatted HH:MM".to_string()))?;
    }
    // Wall-clock at the centre, not UTC
    let now_hhmm = Local::now().format("%H:%M").to_string();

    Ok(Json(
        db::transition_live_class(db, id, to, validated.end_time, &now_hhmm).await?,
    ))
}

#[derive(Deserialize, Validate)]
pub struct AttendanceRequest {
    student_id: i64,
    status: String,
    method: Option<String>,
}

#[post("/live-classes/<id>/attendance", data = "<request>")]
pub async fn api_record_attendance(
    user: User,
    id: i64,
    request: Json<AttendanceRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AttendanceRecord>, AppError> {
    user.require_permission(Permission::RunSessions)?;
    let validated = request.validate_custom()?;

    let status = AttendanceStatus::from_str(&validated.status)?;
    let method = match validated.method.as_deref() {
        Some(raw) => AttendanceMethod::from_str(raw)?,
        None => AttendanceMethod::Manual,
    };

    Ok(Json(db::record_attendance(db, id, validated.student_id, status, method).await?))
}

#[get("/live-classes/<class_id>/report?<from>&<to>")]
pub async fn api_attendance_report(
    user: User,
    class_id: i64,
    from: String,
    to: String,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AttendanceReport>, AppError> {
    user.require_permission(Permission::ViewRegistries)?;

    let from = parse_date(&from, "from")?;
    let to = parse_date(&to, "to")?;
    if from > to {
        return Err(AppError::Validation(
            "from must not be after to".to_string(),
        ));
    }

    db::get_class(db, class_id).await?;
    let roster = db::get_roster(db, class_id).await?;
    let sessions = db::list_sessions_in_range(db, class_id, from, to).await?;

    Ok(Json(aggregate_report(class_id, &roster, &sessions)))
}

// ---------------------------------------------------------------------------
// Cards & RFID
// ---------------------------------------------------------------------------

#[derive(Deserialize, Validate)]
pub struct CardRequest {
    #[validate(length(min = 1, message = "Card UID is required"))]
    uid: String,
    student_id: i64,
}

#[get("/cards")]
pub async fn api_list_cards(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Card>>, AppError> {
    user.require_permission(Permission::ManageCards)?;
    Ok(Json(db::list_cards(db).await?))
}

#[post("/cards", data = "<request>")]
pub async fn api_assign_card(
    user: User,
    request: Json<CardRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Card>, AppError> {
    user.require_permission(Permission::ManageCards)?;
    let validated = request.validate_custom()?;

    Ok(Json(db::assign_card(db, &validated.uid, validated.student_id).await?))
}

#[delete("/cards/<id>")]
pub async fn api_delete_card(
    user: User,
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::ManageCards)?;
    db::delete_card(db, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize, Validate)]
pub struct ScanRequest {
    #[validate(length(min = 1, message = "Card UID is required"))]
    uid: String,
}

// The reader daemon posts here from localhost; it has no operator session,
// so this route takes no user guard.
#[post("/rfid/scan", data = "<request>")]
pub async fn api_rfid_scan(
    request: Json<ScanRequest>,
    db: &State<Pool<Sqlite>>,
    hub: &State<ScannerHub>,
) -> Result<Json<ScanEvent>, AppError> {
    let validated = request.validate_custom()?;

    Ok(Json(process_scan(db, hub, &validated.uid, today()).await?))
}

#[get("/events")]
pub async fn api_events(_user: User, hub: &State<ScannerHub>) -> EventStream![] {
    let mut rx = hub.subscribe();
    EventStream! {
        loop {
            match rx.recv().await {
                Ok(event) => yield Event::json(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "SSE subscriber lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}
