#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod billing;
mod db;
mod env;
mod error;
mod models;
mod rfid;
mod sessions;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::{
    api_assign_card, api_attendance_report, api_create_class, api_create_classroom,
    api_create_live_class, api_create_student, api_create_teacher, api_create_user,
    api_delete_card, api_delete_class, api_delete_student, api_delete_teacher, api_enroll_student,
    api_events, api_financial_report, api_get_class, api_get_live_class, api_get_payment,
    api_get_student, api_get_teacher, api_health, api_list_cards, api_list_classes,
    api_list_classrooms, api_list_live_classes, api_list_payments, api_list_students,
    api_list_teachers, api_login,
    api_logout, api_me, api_record_attendance, api_record_payment, api_rfid_scan,
    api_transition_live_class, api_unenroll_student, api_update_class, api_update_student,
    api_update_teacher,
};
use auth::unauthorized_api;
use billing::BillingConfig;
use db::clean_expired_sessions;
use rfid::ScannerHub;
use rocket::{Build, Rocket, tokio};
use telemetry::{TelemetryFairing, init_tracing};

use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use std::str::FromStr;
use tracing::{error, info};

#[launch]
async fn rocket() -> _ {
    init_tracing();

    if let Err(e) = env::load_environment() {
        error!("Failed to load environment files: {}", e);
    }

    let database_url = std::env::var("DATABASE_URL").unwrap_or_default();

    // SQLite only honours foreign keys when each connection opts in
    let options = SqliteConnectOptions::from_str(&database_url)
        .expect("Invalid DATABASE_URL")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options)
        .await
        .expect("Failed to connect to SQLite database");

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    init_rocket(pool, BillingConfig::from_env()).await
}

pub async fn init_rocket(pool: SqlitePool, billing: BillingConfig) -> Rocket<Build> {
    info!(
        horizon_months = billing.horizon_months,
        "Starting tutoring center server"
    );

    rocket::build()
        .manage(pool)
        .manage(billing)
        .manage(ScannerHub::default())
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_health,
                api_create_user,
                api_list_students,
                api_create_student,
                api_get_student,
                api_update_student,
                api_delete_student,
                api_list_teachers,
                api_create_teacher,
                api_get_teacher,
                api_update_teacher,
                api_delete_teacher,
                api_list_classrooms,
                api_create_classroom,
                api_list_classes,
                api_create_class,
                api_get_class,
                api_update_class,
                api_delete_class,
                api_enroll_student,
                api_unenroll_student,
                api_list_payments,
                api_get_payment,
                api_record_payment,
                api_financial_report,
                api_create_live_class,
                api_list_live_classes,
                api_get_live_class,
                api_transition_live_class,
                api_record_attendance,
                api_attendance_report,
                api_list_cards,
                api_assign_card,
                api_delete_card,
                api_rfid_scan,
                api_events,
            ],
        )
        .register("/api", catchers![unauthorized_api])
        .attach(TelemetryFairing)
}
