#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::db::{
        assign_card, create_class, create_classroom, create_live_class, create_student,
        create_teacher, create_user, enroll_student, transition_live_class,
    };
    use crate::error::AppError;
    use crate::models::SessionStatus;
    use chrono::NaiveDate;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";
    pub static STANDARD_YEAR: &str = "1AS";

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub password: String,
    }

    pub struct TestStudent {
        pub name: String,
        pub code: String,
        pub academic_year: String,
    }

    pub struct TestTeacher {
        pub name: String,
        pub subject: String,
    }

    pub struct TestClass {
        pub name: String,
        pub subject: String,
        pub academic_year: String,
        pub teacher_name: Option<String>,
        pub price: i64,
    }

    pub struct TestEnrollment {
        pub class_name: String,
        pub student_name: String,
        pub start: NaiveDate,
    }

    pub struct TestLiveClass {
        pub class_name: String,
        pub teacher_name: String,
        pub date: NaiveDate,
        pub start_time: String,
        pub status: SessionStatus,
    }

    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        students: Vec<TestStudent>,
        teachers: Vec<TestTeacher>,
        classrooms: Vec<String>,
        classes: Vec<TestClass>,
        enrollments: Vec<TestEnrollment>,
        live_classes: Vec<TestLiveClass>,
        cards: Vec<(String, String)>,
        horizon_months: u32,
    }

    impl Default for TestDbBuilder {
        fn default() -> Self {
            Self {
                users: Vec::new(),
                students: Vec::new(),
                teachers: Vec::new(),
                classrooms: Vec::new(),
                classes: Vec::new(),
                enrollments: Vec::new(),
                live_classes: Vec::new(),
                cards: Vec::new(),
                horizon_months: 3,
            }
        }
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn user(mut self, username: &str, role: Role) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: Some(username.replace('_', " ")),
                role,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn student(mut self, name: &str, code: &str) -> Self {
            self.students.push(TestStudent {
                name: name.to_string(),
                code: code.to_string(),
                academic_year: STANDARD_YEAR.to_string(),
            });
            self
        }

        pub fn student_in_year(mut self, name: &str, code: &str, academic_year: &str) -> Self {
            self.students.push(TestStudent {
                name: name.to_string(),
                code: code.to_string(),
                academic_year: academic_year.to_string(),
            });
            self
        }

        pub fn teacher(mut self, name: &str, subject: &str) -> Self {
            self.teachers.push(TestTeacher {
                name: name.to_string(),
                subject: subject.to_string(),
            });
            self
        }

        pub fn classroom(mut self, name: &str) -> Self {
            self.classrooms.push(name.to_string());
            self
        }

        pub fn class(mut self, name: &str, subject: &str, teacher_name: Option<&str>, price: i64) -> Self {
            self.classes.push(TestClass {
                name: name.to_string(),
                subject: subject.to_string(),
                academic_year: STANDARD_YEAR.to_string(),
                teacher_name: teacher_name.map(String::from),
                price,
            });
            self
        }

        pub fn billing_horizon(mut self, months: u32) -> Self {
            self.horizon_months = months;
            self
        }

        pub fn enroll(mut self, class_name: &str, student_name: &str, start: NaiveDate) -> Self {
            self.enrollments.push(TestEnrollment {
                class_name: class_name.to_string(),
                student_name: student_name.to_string(),
                start,
            });
            self
        }

        pub fn live_class(
            mut self,
            class_name: &str,
            teacher_name: &str,
            date: NaiveDate,
            start_time: &str,
            status: SessionStatus,
        ) -> Self {
            self.live_classes.push(TestLiveClass {
                class_name: class_name.to_string(),
                teacher_name: teacher_name.to_string(),
                date,
                start_time: start_time.to_string(),
                status,
            });
            self
        }

        pub fn card(mut self, uid: &str, student_name: &str) -> Self {
            self.cards.push((uid.to_string(), student_name.to_string()));
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = tracing_subscriber::fmt()
                    .with_test_writer()
                    .with_env_filter("info")
                    .try_init();
            });

            // One connection only: each connection to sqlite::memory: would
            // otherwise see its own empty database.
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut student_id_map: HashMap<String, i64> = HashMap::new();
            let mut teacher_id_map: HashMap<String, i64> = HashMap::new();
            let mut class_id_map: HashMap<String, i64> = HashMap::new();
            let mut live_class_ids: Vec<i64> = Vec::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    &user.password,
                    user.role.as_str(),
                    user.display_name.as_deref(),
                )
                .await?;
                user_id_map.insert(user.username.clone(), user_id);
            }

            for student in &self.students {
                let created = create_student(
                    &pool,
                    &student.name,
                    &student.code,
                    Some("Test Parent"),
                    "0700000000",
                    None,
                    &student.academic_year,
                )
                .await?;
                student_id_map.insert(student.name.clone(), created.id);
            }

            for teacher in &self.teachers {
                let created = create_teacher(&pool, &teacher.name, &teacher.subject, None, None).await?;
                teacher_id_map.insert(teacher.name.clone(), created.id);
            }

            for classroom in &self.classrooms {
                create_classroom(&pool, classroom, Some(20), None).await?;
            }

            for class in &self.classes {
                let teacher_id = class
                    .teacher_name
                    .as_ref()
                    .and_then(|name| teacher_id_map.get(name).copied());
                let created = create_class(
                    &pool,
                    &class.name,
                    &class.subject,
                    &class.academic_year,
                    teacher_id,
                    class.price,
                    &[],
                )
                .await?;
                class_id_map.insert(class.name.clone(), created.id);
            }

            for enrollment in &self.enrollments {
                let class_id = class_id_map[&enrollment.class_name];
                let student_id = student_id_map[&enrollment.student_name];
                enroll_student(&pool, class_id, student_id, enrollment.start, self.horizon_months)
                    .await?;
            }

            for live in &self.live_classes {
                let class_id = class_id_map[&live.class_name];
                let teacher_id = teacher_id_map[&live.teacher_name];
                let session = create_live_class(
                    &pool,
                    class_id,
                    teacher_id,
                    None,
                    live.date,
                    &live.start_time,
                    None,
                )
                .await?;

                match live.status {
                    SessionStatus::Scheduled => {}
                    SessionStatus::Ongoing => {
                        transition_live_class(&pool, session.id, SessionStatus::Ongoing, None, "12:00")
                            .await?;
                    }
                    SessionStatus::Completed => {
                        transition_live_class(&pool, session.id, SessionStatus::Ongoing, None, "12:00")
                            .await?;
                        transition_live_class(&pool, session.id, SessionStatus::Completed, None, "13:00")
                            .await?;
                    }
                    SessionStatus::Cancelled => {
                        transition_live_class(&pool, session.id, SessionStatus::Cancelled, None, "12:00")
                            .await?;
                    }
                }
                live_class_ids.push(session.id);
            }

            for (uid, student_name) in &self.cards {
                let student_id = student_id_map[student_name];
                assign_card(&pool, uid, student_id).await?;
            }

            Ok(TestDb {
                pool,
                user_id_map,
                student_id_map,
                teacher_id_map,
                class_id_map,
                live_class_ids,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub student_id_map: HashMap<String, i64>,
        pub teacher_id_map: HashMap<String, i64>,
        pub class_id_map: HashMap<String, i64>,
        pub live_class_ids: Vec<i64>,
    }

    impl TestDb {
        pub fn student_id(&self, name: &str) -> i64 {
            self.student_id_map[name]
        }

        pub fn teacher_id(&self, name: &str) -> i64 {
            self.teacher_id_map[name]
        }

        pub fn class_id(&self, name: &str) -> i64 {
            self.class_id_map[name]
        }

        pub async fn payment_id(
            &self,
            class_name: &str,
            student_name: &str,
            month: &str,
        ) -> Result<i64, sqlx::Error> {
            let (id,): (i64,) = sqlx::query_as(
                "SELECT id FROM payments WHERE class_id = ? AND student_id = ? AND month = ?",
            )
            .bind(self.class_id(class_name))
            .bind(self.student_id(student_name))
            .bind(month)
            .fetch_one(&self.pool)
            .await?;
            Ok(id)
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use crate::auth::Role;
    use crate::billing::BillingConfig;
    use crate::init_rocket;

    pub use super::test_db::{STANDARD_PASSWORD, STANDARD_YEAR, TestDb, TestDbBuilder};

    /// One of everything: an operator per role, two students, a teacher, a
    /// class and a card, with billing over a 3 month horizon.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .user("admin_user", Role::Admin)
            .user("secretary_user", Role::Secretary)
            .user("accountant_user", Role::Accountant)
            .user("teacher_user", Role::Teacher)
            .student("Amira Hassan", "STU-001")
            .student("Karim Nasser", "STU-002")
            .teacher("Mona Adel", "Mathematics")
            .classroom("Room A")
            .class("Algebra", "Mathematics", Some("Mona Adel"), 20)
            .card("04A1B2C3", "Amira Hassan")
            .build()
            .await
            .expect("Failed to build test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(
            test_db.pool.clone(),
            BillingConfig { horizon_months: 3 },
        )
        .await;

        let client = Client::tracked(rocket)
            .await
            .expect("Failed to build test client");

        (client, test_db)
    }

    pub async fn login_test_user(
        client: &Client,
        username: &str,
        password: &str,
    ) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        response
            .cookies()
            .iter()
            .map(|c| c.clone().into_owned())
            .collect()
    }
}
