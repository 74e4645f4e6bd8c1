use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::{DbUser, DbUserSession, User, UserSession};
use crate::billing::{FinancialReport, Month, aggregate_financials, billing_months, classify};
use crate::error::AppError;
use crate::models::{
    AttendanceMethod, AttendanceRecord, AttendanceStatus, Card, ClassOffering, Classroom,
    DbAttendance, DbCard, DbClass, DbLiveClass, DbPayment, DbScheduleSlot, DbStudent, DbTeacher,
    LiveClass, Payment, PaymentMethod, PaymentStatus, SessionStatus, Student, Teacher,
};

// ---------------------------------------------------------------------------
// Users & sessions
// ---------------------------------------------------------------------------

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!("User with id {} not found", id))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip_all, fields(username, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: &str,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let existing = sqlx::query("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query("INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)")
        .bind(username)
        .bind(hashed_password)
        .bind(role)
        .bind(display_name)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, password FROM users WHERE username = ? AND archived IS 0",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((id, hash)) => {
            let valid = bcrypt::verify(password, &hash).unwrap_or(false);
            if valid {
                Ok(Some(get_user(pool, id).await?))
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication("Invalid session token".to_string())),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Student registry
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(name))]
pub async fn create_student(
    pool: &Pool<Sqlite>,
    name: &str,
    student_code: &str,
    parent_name: Option<&str>,
    parent_phone: &str,
    parent_email: Option<&str>,
    academic_year: &str,
) -> Result<Student, AppError> {
    info!("Registering student");

    let existing = sqlx::query("SELECT id FROM students WHERE student_code = ?")
        .bind(student_code)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "Student code '{}' already exists",
            student_code
        )));
    }

    let res = sqlx::query(
        "INSERT INTO students (name, student_code, parent_name, parent_phone, parent_email, academic_year)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(student_code)
    .bind(parent_name)
    .bind(parent_phone)
    .bind(parent_email)
    .bind(academic_year)
    .execute(pool)
    .await?;

    get_student(pool, res.last_insert_rowid()).await
}

#[instrument]
pub async fn get_student(pool: &Pool<Sqlite>, id: i64) -> Result<Student, AppError> {
    let row = sqlx::query_as::<_, DbStudent>("SELECT * FROM students WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(student) => Ok(Student::from(student)),
        _ => Err(AppError::NotFound(format!(
            "Student with id {} not found",
            id
        ))),
    }
}

#[instrument]
pub async fn list_students(
    pool: &Pool<Sqlite>,
    academic_year: Option<&str>,
) -> Result<Vec<Student>, AppError> {
    let rows = match academic_year {
        Some(year) => {
            sqlx::query_as::<_, DbStudent>(
                "SELECT * FROM students WHERE academic_year = ? ORDER BY name",
            )
            .bind(year)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, DbStudent>("SELECT * FROM students ORDER BY name")
                .fetch_all(pool)
                .await?
        }
    };

    Ok(rows.into_iter().map(Student::from).collect())
}

#[instrument(skip_all, fields(id))]
pub async fn update_student(
    pool: &Pool<Sqlite>,
    id: i64,
    name: &str,
    parent_name: Option<&str>,
    parent_phone: &str,
    parent_email: Option<&str>,
    academic_year: &str,
) -> Result<Student, AppError> {
    info!("Updating student");

    let res = sqlx::query(
        "UPDATE students
         SET name = ?, parent_name = ?, parent_phone = ?, parent_email = ?, academic_year = ?
         WHERE id = ?",
    )
    .bind(name)
    .bind(parent_name)
    .bind(parent_phone)
    .bind(parent_email)
    .bind(academic_year)
    .bind(id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Student with id {} not found",
            id
        )));
    }

    get_student(pool, id).await
}

/// Removing a student takes their enrollments, payments, cards and attendance
/// history with them.
#[instrument]
pub async fn delete_student(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting student and dependent records");

    get_student(pool, id).await?;

    sqlx::query("DELETE FROM live_class_attendance WHERE student_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM payments WHERE student_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM cards WHERE student_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM enrollments WHERE student_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM students WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Teacher & classroom registries
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(name))]
pub async fn create_teacher(
    pool: &Pool<Sqlite>,
    name: &str,
    subject: &str,
    phone: Option<&str>,
    email: Option<&str>,
) -> Result<Teacher, AppError> {
    info!("Creating teacher");

    let res = sqlx::query("INSERT INTO teachers (name, subject, phone, email) VALUES (?, ?, ?, ?)")
        .bind(name)
        .bind(subject)
        .bind(phone)
        .bind(email)
        .execute(pool)
        .await?;

    get_teacher(pool, res.last_insert_rowid()).await
}

#[instrument]
pub async fn get_teacher(pool: &Pool<Sqlite>, id: i64) -> Result<Teacher, AppError> {
    let row = sqlx::query_as::<_, DbTeacher>("SELECT * FROM teachers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(teacher) => Ok(Teacher::from(teacher)),
        _ => Err(AppError::NotFound(format!(
            "Teacher with id {} not found",
            id
        ))),
    }
}

#[instrument]
pub async fn list_teachers(pool: &Pool<Sqlite>) -> Result<Vec<Teacher>, AppError> {
    let rows = sqlx::query_as::<_, DbTeacher>("SELECT * FROM teachers ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Teacher::from).collect())
}

#[instrument(skip_all, fields(id))]
pub async fn update_teacher(
    pool: &Pool<Sqlite>,
    id: i64,
    name: &str,
    subject: &str,
    phone: Option<&str>,
    email: Option<&str>,
) -> Result<Teacher, AppError> {
    info!("Updating teacher");

    let res =
        sqlx::query("UPDATE teachers SET name = ?, subject = ?, phone = ?, email = ? WHERE id = ?")
            .bind(name)
            .bind(subject)
            .bind(phone)
            .bind(email)
            .bind(id)
            .execute(pool)
            .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Teacher with id {} not found",
            id
        )));
    }

    get_teacher(pool, id).await
}

#[instrument]
pub async fn delete_teacher(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting teacher");

    get_teacher(pool, id).await?;

    let (sessions,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM live_classes WHERE teacher_id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;

    if sessions > 0 {
        return Err(AppError::Conflict(format!(
            "Teacher {} has recorded sessions and cannot be deleted",
            id
        )));
    }

    sqlx::query("UPDATE classes SET teacher_id = NULL WHERE teacher_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM teachers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip_all, fields(name))]
pub async fn create_classroom(
    pool: &Pool<Sqlite>,
    name: &str,
    capacity: Option<i64>,
    location: Option<&str>,
) -> Result<Classroom, AppError> {
    info!("Creating classroom");

    let res = sqlx::query("INSERT INTO classrooms (name, capacity, location) VALUES (?, ?, ?)")
        .bind(name)
        .bind(capacity)
        .bind(location)
        .execute(pool)
        .await?;

    let row =
        sqlx::query_as::<_, Classroom>("SELECT * FROM classrooms WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(pool)
            .await?;

    Ok(row)
}

#[instrument]
pub async fn list_classrooms(pool: &Pool<Sqlite>) -> Result<Vec<Classroom>, AppError> {
    let rows = sqlx::query_as::<_, Classroom>("SELECT * FROM classrooms ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// Class offerings
// ---------------------------------------------------------------------------

async fn load_schedule(pool: &Pool<Sqlite>, class_id: i64) -> Result<Vec<DbScheduleSlot>, AppError> {
    let slots = sqlx::query_as::<_, DbScheduleSlot>(
        "SELECT * FROM class_schedule WHERE class_id = ? ORDER BY id",
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;

    Ok(slots)
}

#[instrument(skip_all, fields(name))]
pub async fn create_class(
    pool: &Pool<Sqlite>,
    name: &str,
    subject: &str,
    academic_year: &str,
    teacher_id: Option<i64>,
    price: i64,
    schedule: &[(String, String, Option<i64>)],
) -> Result<ClassOffering, AppError> {
    info!("Creating class offering");

    if let Some(teacher_id) = teacher_id {
        get_teacher(pool, teacher_id).await?;
    }

    let res = sqlx::query(
        "INSERT INTO classes (name, subject, academic_year, teacher_id, price) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(subject)
    .bind(academic_year)
    .bind(teacher_id)
    .bind(price)
    .execute(pool)
    .await?;

    let class_id = res.last_insert_rowid();

    for (day, time, classroom_id) in schedule {
        sqlx::query(
            "INSERT INTO class_schedule (class_id, day, time, classroom_id) VALUES (?, ?, ?, ?)",
        )
        .bind(class_id)
        .bind(day)
        .bind(time)
        .bind(classroom_id)
        .execute(pool)
        .await?;
    }

    get_class(pool, class_id).await
}

#[instrument]
pub async fn get_class(pool: &Pool<Sqlite>, id: i64) -> Result<ClassOffering, AppError> {
    let row = sqlx::query_as::<_, DbClass>("SELECT * FROM classes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Err(AppError::NotFound(format!("Class with id {} not found", id)));
    };

    let mut class = ClassOffering::from(row);
    class.schedule = load_schedule(pool, id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(class)
}

#[instrument]
pub async fn list_classes(
    pool: &Pool<Sqlite>,
    academic_year: Option<&str>,
    subject: Option<&str>,
    teacher_id: Option<i64>,
) -> Result<Vec<ClassOffering>, AppError> {
    let mut sql = String::from("SELECT * FROM classes WHERE 1 = 1");
    if academic_year.is_some() {
        sql.push_str(" AND academic_year = ?");
    }
    if subject.is_some() {
        sql.push_str(" AND subject = ?");
    }
    if teacher_id.is_some() {
        sql.push_str(" AND teacher_id = ?");
    }
    sql.push_str(" ORDER BY name");

    let mut query = sqlx::query_as::<_, DbClass>(&sql);
    if let Some(year) = academic_year {
        query = query.bind(year.to_string());
    }
    if let Some(subject) = subject {
        query = query.bind(subject.to_string());
    }
    if let Some(teacher_id) = teacher_id {
        query = query.bind(teacher_id);
    }

    let rows = query.fetch_all(pool).await?;

    let mut classes = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id;
        let mut class = ClassOffering::from(row);
        class.schedule = load_schedule(pool, id)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        classes.push(class);
    }

    Ok(classes)
}

#[instrument(skip_all, fields(id))]
pub async fn update_class(
    pool: &Pool<Sqlite>,
    id: i64,
    name: &str,
    subject: &str,
    academic_year: &str,
    teacher_id: Option<i64>,
    price: i64,
    schedule: &[(String, String, Option<i64>)],
) -> Result<ClassOffering, AppError> {
    info!("Updating class offering");

    if let Some(teacher_id) = teacher_id {
        get_teacher(pool, teacher_id).await?;
    }

    let res = sqlx::query(
        "UPDATE classes SET name = ?, subject = ?, academic_year = ?, teacher_id = ?, price = ? WHERE id = ?",
    )
    .bind(name)
    .bind(subject)
    .bind(academic_year)
    .bind(teacher_id)
    .bind(price)
    .bind(id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Class with id {} not found", id)));
    }

    sqlx::query("DELETE FROM class_schedule WHERE class_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    for (day, time, classroom_id) in schedule {
        sqlx::query(
            "INSERT INTO class_schedule (class_id, day, time, classroom_id) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(day)
        .bind(time)
        .bind(classroom_id)
        .execute(pool)
        .await?;
    }

    get_class(pool, id).await
}

#[instrument]
pub async fn delete_class(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting class and dependent records");

    get_class(pool, id).await?;

    sqlx::query(
        "DELETE FROM live_class_attendance WHERE live_class_id IN
         (SELECT id FROM live_classes WHERE class_id = ?)",
    )
    .bind(id)
    .execute(pool)
    .await?;
    sqlx::query("DELETE FROM live_classes WHERE class_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM payments WHERE class_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM enrollments WHERE class_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM class_schedule WHERE class_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM classes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument]
pub async fn get_roster(pool: &Pool<Sqlite>, class_id: i64) -> Result<Vec<Student>, AppError> {
    let rows = sqlx::query_as::<_, DbStudent>(
        "SELECT s.* FROM students s
         JOIN enrollments e ON e.student_id = s.id
         WHERE e.class_id = ?
         ORDER BY s.name",
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Student::from).collect())
}

#[instrument]
pub async fn get_classes_for_student(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<ClassOffering>, AppError> {
    let rows = sqlx::query_as::<_, DbClass>(
        "SELECT c.* FROM classes c
         JOIN enrollments e ON e.class_id = c.id
         WHERE e.student_id = ?
         ORDER BY c.name",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mut classes = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id;
        let mut class = ClassOffering::from(row);
        class.schedule = load_schedule(pool, id)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        classes.push(class);
    }

    Ok(classes)
}

#[instrument]
pub async fn is_enrolled(
    pool: &Pool<Sqlite>,
    class_id: i64,
    student_id: i64,
) -> Result<bool, AppError> {
    let row = sqlx::query("SELECT 1 FROM enrollments WHERE class_id = ? AND student_id = ?")
        .bind(class_id)
        .bind(student_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.is_some())
}

// ---------------------------------------------------------------------------
// Enrollment & payment ledger
// ---------------------------------------------------------------------------

/// Enroll a student and materialize their payment schedule.
///
/// One pending row per month of the horizon, starting at `today`'s month.
/// The UNIQUE (student, class, month) index plus `ON CONFLICT DO NOTHING`
/// keeps retries from ever duplicating a row.
#[instrument(skip(pool))]
pub async fn enroll_student(
    pool: &Pool<Sqlite>,
    class_id: i64,
    student_id: i64,
    today: NaiveDate,
    horizon_months: u32,
) -> Result<Vec<Payment>, AppError> {
    info!("Enrolling student in class");

    let class = get_class(pool, class_id).await?;
    let student = get_student(pool, student_id).await?;

    if class.academic_year != student.academic_year {
        return Err(AppError::Validation(format!(
            "Academic year mismatch: class is {}, student is {}",
            class.academic_year, student.academic_year
        )));
    }

    if is_enrolled(pool, class_id, student_id).await? {
        return Err(AppError::Conflict(format!(
            "Student {} is already enrolled in class {}",
            student_id, class_id
        )));
    }

    sqlx::query("INSERT INTO enrollments (class_id, student_id) VALUES (?, ?)")
        .bind(class_id)
        .bind(student_id)
        .execute(pool)
        .await?;

    for month in billing_months(today, horizon_months) {
        sqlx::query(
            "INSERT INTO payments (student_id, class_id, month, amount)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (student_id, class_id, month) DO NOTHING",
        )
        .bind(student_id)
        .bind(class_id)
        .bind(month.to_string())
        .bind(class.price)
        .execute(pool)
        .await?;
    }

    list_payments_for_pair(pool, class_id, student_id, today).await
}

/// Reverse of enrollment: drops the roster row and every payment row for the
/// pair. Destructive; the caller is expected to have confirmed.
#[instrument]
pub async fn unenroll_student(
    pool: &Pool<Sqlite>,
    class_id: i64,
    student_id: i64,
) -> Result<(), AppError> {
    info!("Unenrolling student from class");

    let res = sqlx::query("DELETE FROM enrollments WHERE class_id = ? AND student_id = ?")
        .bind(class_id)
        .bind(student_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Student {} is not enrolled in class {}",
            student_id, class_id
        )));
    }

    sqlx::query("DELETE FROM payments WHERE class_id = ? AND student_id = ?")
        .bind(class_id)
        .bind(student_id)
        .execute(pool)
        .await?;

    Ok(())
}

fn derive_payment(db: DbPayment, today: NaiveDate) -> Payment {
    let mut payment = Payment::from(db);
    payment.status = classify(payment.status, payment.month, today);
    payment
}

#[instrument]
pub async fn list_payments_for_pair(
    pool: &Pool<Sqlite>,
    class_id: i64,
    student_id: i64,
    today: NaiveDate,
) -> Result<Vec<Payment>, AppError> {
    let rows = sqlx::query_as::<_, DbPayment>(
        "SELECT * FROM payments WHERE class_id = ? AND student_id = ? ORDER BY month",
    )
    .bind(class_id)
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| derive_payment(r, today)).collect())
}

#[instrument(skip(pool))]
pub async fn list_payments(
    pool: &Pool<Sqlite>,
    student_id: Option<i64>,
    class_id: Option<i64>,
    month: Option<Month>,
    status: Option<PaymentStatus>,
    today: NaiveDate,
) -> Result<Vec<Payment>, AppError> {
    let mut sql = String::from("SELECT * FROM payments WHERE 1 = 1");
    if student_id.is_some() {
        sql.push_str(" AND student_id = ?");
    }
    if class_id.is_some() {
        sql.push_str(" AND class_id = ?");
    }
    if month.is_some() {
        sql.push_str(" AND month = ?");
    }
    sql.push_str(" ORDER BY month");

    let mut query = sqlx::query_as::<_, DbPayment>(&sql);
    if let Some(student_id) = student_id {
        query = query.bind(student_id);
    }
    if let Some(class_id) = class_id {
        query = query.bind(class_id);
    }
    if let Some(month) = month {
        query = query.bind(month.to_string());
    }

    let rows = query.fetch_all(pool).await?;

    // Status filtering happens on the derived status, so a `late` filter
    // matches stored-pending rows whose month has elapsed.
    let payments = rows
        .into_iter()
        .map(|r| derive_payment(r, today))
        .filter(|p| status.map_or(true, |s| p.status == s))
        .collect();

    Ok(payments)
}

#[instrument]
pub async fn get_payment(
    pool: &Pool<Sqlite>,
    id: i64,
    today: NaiveDate,
) -> Result<Payment, AppError> {
    let row = sqlx::query_as::<_, DbPayment>("SELECT * FROM payments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(payment) => Ok(derive_payment(payment, today)),
        _ => Err(AppError::NotFound(format!(
            "Payment with id {} not found",
            id
        ))),
    }
}

#[instrument]
pub async fn list_unpaid_payments(
    pool: &Pool<Sqlite>,
    student_id: i64,
    today: NaiveDate,
) -> Result<Vec<Payment>, AppError> {
    let rows = sqlx::query_as::<_, DbPayment>(
        "SELECT * FROM payments WHERE student_id = ? AND status != 'paid' ORDER BY month",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| derive_payment(r, today)).collect())
}

/// Roll the whole ledger (or one calendar year of it) up into per-month
/// paid/outstanding totals.
#[instrument]
pub async fn financial_report(
    pool: &Pool<Sqlite>,
    year: Option<i32>,
    today: NaiveDate,
) -> Result<FinancialReport, AppError> {
    let mut sql = String::from("SELECT * FROM payments");
    if year.is_some() {
        sql.push_str(" WHERE month LIKE ?");
    }

    let mut query = sqlx::query_as::<_, DbPayment>(&sql);
    if let Some(year) = year {
        query = query.bind(format!("{:04}-%", year));
    }

    let rows = query.fetch_all(pool).await?;
    let payments: Vec<Payment> = rows
        .into_iter()
        .map(|r| derive_payment(r, today))
        .collect();

    Ok(aggregate_financials(&payments))
}

/// Mark a payment as paid. The conditional UPDATE doubles as the guard
/// against concurrent double-processing: whichever call loses the race sees
/// zero affected rows and reports the invalid state.
#[instrument(skip(pool))]
pub async fn record_payment(
    pool: &Pool<Sqlite>,
    id: i64,
    payment_date: NaiveDate,
    method: PaymentMethod,
    today: NaiveDate,
) -> Result<Payment, AppError> {
    info!("Recording payment");

    let invoice_number = format!("INV-{}", Uuid::new_v4().simple());

    let res = sqlx::query(
        "UPDATE payments
         SET status = 'paid', payment_date = ?, payment_method = ?, invoice_number = ?
         WHERE id = ? AND status != 'paid'",
    )
    .bind(payment_date.format("%Y-%m-%d").to_string())
    .bind(method.as_str())
    .bind(&invoice_number)
    .bind(id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        // Either missing or already paid; look to tell the two apart.
        let existing = get_payment(pool, id, today).await?;
        return Err(AppError::InvalidState(format!(
            "Payment {} is already {}",
            id, existing.status
        )));
    }

    get_payment(pool, id, today).await
}

// ---------------------------------------------------------------------------
// Live-class sessions
// ---------------------------------------------------------------------------

async fn load_attendance(
    pool: &Pool<Sqlite>,
    live_class_id: i64,
) -> Result<Vec<AttendanceRecord>, AppError> {
    let rows = sqlx::query_as::<_, DbAttendance>(
        "SELECT * FROM live_class_attendance WHERE live_class_id = ? ORDER BY id",
    )
    .bind(live_class_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

#[instrument(skip(pool))]
pub async fn create_live_class(
    pool: &Pool<Sqlite>,
    class_id: i64,
    teacher_id: i64,
    classroom_id: Option<i64>,
    date: NaiveDate,
    start_time: &str,
    notes: Option<&str>,
) -> Result<LiveClass, AppError> {
    info!("Scheduling live class");

    get_class(pool, class_id).await?;
    get_teacher(pool, teacher_id).await?;

    let res = sqlx::query(
        "INSERT INTO live_classes (class_id, teacher_id, classroom_id, date, start_time, notes)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(class_id)
    .bind(teacher_id)
    .bind(classroom_id)
    .bind(date.format("%Y-%m-%d").to_string())
    .bind(start_time)
    .bind(notes)
    .execute(pool)
    .await?;

    get_live_class(pool, res.last_insert_rowid()).await
}

#[instrument]
pub async fn get_live_class(pool: &Pool<Sqlite>, id: i64) -> Result<LiveClass, AppError> {
    let row = sqlx::query_as::<_, DbLiveClass>("SELECT * FROM live_classes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Err(AppError::NotFound(format!(
            "Live class with id {} not found",
            id
        )));
    };

    let mut session = LiveClass::from(row);
    session.attendance = load_attendance(pool, id).await?;

    Ok(session)
}

#[instrument(skip(pool))]
pub async fn list_live_classes(
    pool: &Pool<Sqlite>,
    status: Option<SessionStatus>,
    date: Option<NaiveDate>,
    class_id: Option<i64>,
) -> Result<Vec<LiveClass>, AppError> {
    let mut sql = String::from("SELECT * FROM live_classes WHERE 1 = 1");
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if date.is_some() {
        sql.push_str(" AND date = ?");
    }
    if class_id.is_some() {
        sql.push_str(" AND class_id = ?");
    }
    sql.push_str(" ORDER BY date DESC, start_time DESC");

    let mut query = sqlx::query_as::<_, DbLiveClass>(&sql);
    if let Some(status) = status {
        query = query.bind(status.as_str());
    }
    if let Some(date) = date {
        query = query.bind(date.format("%Y-%m-%d").to_string());
    }
    if let Some(class_id) = class_id {
        query = query.bind(class_id);
    }

    let rows = query.fetch_all(pool).await?;

    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id;
        let mut session = LiveClass::from(row);
        session.attendance = load_attendance(pool, id).await?;
        sessions.push(session);
    }

    Ok(sessions)
}

/// Drive a lifecycle transition. Completing a session stamps the end time
/// (caller-provided, or the current wall clock).
#[instrument(skip(pool))]
pub async fn transition_live_class(
    pool: &Pool<Sqlite>,
    id: i64,
    to: SessionStatus,
    end_time: Option<String>,
    now_hhmm: &str,
) -> Result<LiveClass, AppError> {
    info!("Transitioning live class");

    let session = get_live_class(pool, id).await?;
    crate::sessions::validate_transition(session.status, to)?;

    let end_time = match to {
        SessionStatus::Completed => Some(end_time.unwrap_or_else(|| now_hhmm.to_string())),
        _ => session.end_time.clone(),
    };

    sqlx::query("UPDATE live_classes SET status = ?, end_time = ? WHERE id = ?")
        .bind(to.as_str())
        .bind(&end_time)
        .bind(id)
        .execute(pool)
        .await?;

    get_live_class(pool, id).await
}

/// Record (or overwrite) one student's attendance entry for an ongoing
/// session. One row per student per session, enforced by the unique index.
#[instrument(skip(pool))]
pub async fn record_attendance(
    pool: &Pool<Sqlite>,
    live_class_id: i64,
    student_id: i64,
    status: AttendanceStatus,
    method: AttendanceMethod,
) -> Result<AttendanceRecord, AppError> {
    info!("Recording attendance");

    let session = get_live_class(pool, live_class_id).await?;
    crate::sessions::ensure_attendance_open(session.status)?;

    if !is_enrolled(pool, session.class_id, student_id).await? {
        return Err(AppError::Validation(format!(
            "Student {} is not enrolled in class {}",
            student_id, session.class_id
        )));
    }

    let now = Utc::now().naive_utc();
    sqlx::query(
        "INSERT INTO live_class_attendance (live_class_id, student_id, status, method, recorded_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (live_class_id, student_id)
         DO UPDATE SET status = excluded.status, method = excluded.method, recorded_at = excluded.recorded_at",
    )
    .bind(live_class_id)
    .bind(student_id)
    .bind(status.as_str())
    .bind(method.as_str())
    .bind(now)
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, DbAttendance>(
        "SELECT * FROM live_class_attendance WHERE live_class_id = ? AND student_id = ?",
    )
    .bind(live_class_id)
    .bind(student_id)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

#[instrument(skip(pool))]
pub async fn list_sessions_in_range(
    pool: &Pool<Sqlite>,
    class_id: i64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<LiveClass>, AppError> {
    let rows = sqlx::query_as::<_, DbLiveClass>(
        "SELECT * FROM live_classes WHERE class_id = ? AND date >= ? AND date <= ? ORDER BY date",
    )
    .bind(class_id)
    .bind(from.format("%Y-%m-%d").to_string())
    .bind(to.format("%Y-%m-%d").to_string())
    .fetch_all(pool)
    .await?;

    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id;
        let mut session = LiveClass::from(row);
        session.attendance = load_attendance(pool, id).await?;
        sessions.push(session);
    }

    Ok(sessions)
}

// ---------------------------------------------------------------------------
// RFID cards
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(uid))]
pub async fn assign_card(pool: &Pool<Sqlite>, uid: &str, student_id: i64) -> Result<Card, AppError> {
    info!("Binding card to student");

    get_student(pool, student_id).await?;

    let existing = sqlx::query_as::<_, DbCard>("SELECT * FROM cards WHERE uid = ?")
        .bind(uid)
        .fetch_optional(pool)
        .await?;

    if let Some(card) = existing {
        return Err(AppError::Conflict(format!(
            "Card '{}' is already bound to student {}",
            uid, card.student_id
        )));
    }

    let res = sqlx::query("INSERT INTO cards (uid, student_id) VALUES (?, ?)")
        .bind(uid)
        .bind(student_id)
        .execute(pool)
        .await?;

    let row = sqlx::query_as::<_, DbCard>("SELECT * FROM cards WHERE id = ?")
        .bind(res.last_insert_rowid())
        .fetch_one(pool)
        .await?;

    Ok(row.into())
}

#[instrument]
pub async fn list_cards(pool: &Pool<Sqlite>) -> Result<Vec<Card>, AppError> {
    let rows = sqlx::query_as::<_, DbCard>("SELECT * FROM cards ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

#[instrument(skip_all, fields(uid))]
pub async fn find_card_by_uid(pool: &Pool<Sqlite>, uid: &str) -> Result<Option<Card>, AppError> {
    let row = sqlx::query_as::<_, DbCard>("SELECT * FROM cards WHERE uid = ?")
        .bind(uid)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(Into::into))
}

/// Unbinding a card breaks future scans for that UID only; attendance rows
/// recorded through it are untouched.
#[instrument]
pub async fn delete_card(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting card binding");

    let res = sqlx::query("DELETE FROM cards WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Card with id {} not found", id)));
    }

    Ok(())
}
