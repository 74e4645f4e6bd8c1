#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Cookie, Status};
    use serde_json::{Value, json};

    use crate::api::{LoginResponse, UserData};
    use crate::test::utils::test_utils::{
        create_standard_test_db, login_test_user, setup_test_client,
    };

    #[rocket::async_test]
    async fn test_login_api() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "secretary_user",
                    "password": "password123"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let login_response: LoginResponse = serde_json::from_str(&body).unwrap();

        assert!(login_response.success);
        assert_eq!(login_response.user.unwrap().username, "secretary_user");

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "secretary_user",
                    "password": "wrong_password"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let login_response: LoginResponse = serde_json::from_str(&body).unwrap();

        assert!(!login_response.success);
        assert!(login_response.error.is_some());
    }

    #[rocket::async_test]
    async fn test_auth_required_apis() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let endpoints = vec![
            "/api/me",
            "/api/students",
            "/api/classes",
            "/api/payments",
            "/api/live-classes",
            "/api/cards",
            "/api/events",
        ];

        for endpoint in endpoints {
            let response = client.get(endpoint).dispatch().await;
            assert_eq!(
                response.status(),
                Status::Unauthorized,
                "Endpoint {} did not require authentication",
                endpoint
            );
        }
    }

    #[rocket::async_test]
    async fn test_forged_session_rejected() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let forged_cookie = Cookie::build(("session_token", "fake_token")).build();

        let response = client
            .get("/api/me")
            .private_cookie(forged_cookie)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_me_api() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let cookies = login_test_user(&client, "teacher_user", "password123").await;

        let response = client.get("/api/me").cookies(cookies).dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let user_data: UserData = serde_json::from_str(&body).unwrap();

        assert_eq!(user_data.username, "teacher_user");
        assert_eq!(user_data.role, "teacher");
    }

    #[rocket::async_test]
    async fn test_health_is_public() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[rocket::async_test]
    async fn test_role_permissions_enforced() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        // Accountants see the ledger but never touch the registries
        let cookies = login_test_user(&client, "accountant_user", "password123").await;

        let response = client
            .get("/api/payments")
            .cookies(cookies.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .post("/api/students")
            .header(ContentType::JSON)
            .cookies(cookies)
            .body(
                json!({
                    "name": "New Student",
                    "parent_phone": "0711111111",
                    "academic_year": "1AS"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        // Teachers run sessions but cannot read the ledger
        let cookies = login_test_user(&client, "teacher_user", "password123").await;
        let response = client.get("/api/payments").cookies(cookies).dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_student_crud_and_validation() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let cookies = login_test_user(&client, "secretary_user", "password123").await;

        let response = client
            .post("/api/students")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(
                json!({
                    "name": "Layla Samir",
                    "parent_phone": "0722222222",
                    "academic_year": "1AS"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(body["name"], "Layla Samir");
        // Code is generated when the request omits one
        assert!(body["student_code"].as_str().unwrap().starts_with("STU-"));

        let response = client
            .post("/api/students")
            .header(ContentType::JSON)
            .cookies(cookies)
            .body(
                json!({
                    "name": "Bad Year",
                    "parent_phone": "0733333333",
                    "academic_year": ""
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_enroll_and_pay_flow() {
        let test_db = create_standard_test_db().await;
        let class_id = test_db.class_id("Algebra");
        let student_id = test_db.student_id("Amira Hassan");
        let (client, _) = setup_test_client(test_db).await;

        let cookies = login_test_user(&client, "secretary_user", "password123").await;

        let response = client
            .post(format!("/api/classes/{}/enroll/{}", class_id, student_id))
            .cookies(cookies.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let payments: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        let payments = payments.as_array().unwrap().clone();
        assert_eq!(payments.len(), 3);
        assert!(payments.iter().all(|p| p["amount"] == 20));
        assert!(payments.iter().all(|p| p["status"] == "pending"));

        // A second enrollment for the same pair conflicts
        let response = client
            .post(format!("/api/classes/{}/enroll/{}", class_id, student_id))
            .cookies(cookies.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let payment_id = payments[0]["id"].as_i64().unwrap();
        let response = client
            .put(format!("/api/payments/{}/pay", payment_id))
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "payment_method": "cash" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let paid: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(paid["status"], "paid");
        assert_eq!(paid["payment_method"], "cash");
        assert!(paid["invoice_number"].as_str().unwrap().starts_with("INV-"));

        // Paying twice is rejected
        let response = client
            .put(format!("/api/payments/{}/pay", payment_id))
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "payment_method": "bank" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        // The financial report reflects the payment just taken
        let response = client
            .get("/api/reports/financial")
            .cookies(cookies)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let report: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(report["total_paid"], 20);
        assert_eq!(report["total_outstanding"], 40);
        assert_eq!(report["months"].as_array().unwrap().len(), 3);
    }

    #[rocket::async_test]
    async fn test_completion_stamps_local_wall_clock() {
        let test_db = create_standard_test_db().await;
        let class_id = test_db.class_id("Algebra");
        let teacher_id = test_db.teacher_id("Mona Adel");
        let (client, _) = setup_test_client(test_db).await;

        let cookies = login_test_user(&client, "teacher_user", "password123").await;

        let response = client
            .post("/api/live-classes")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(
                json!({
                    "class_id": class_id,
                    "teacher_id": teacher_id,
                    "date": "2024-03-04",
                    "start_time": "16:00"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        let session: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        let session_id = session["id"].as_i64().unwrap();

        client
            .put(format!("/api/live-classes/{}", session_id))
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "status": "ongoing" }).to_string())
            .dispatch()
            .await;

        // No end_time supplied, so the server stamps the centre's clock
        let before = chrono::Local::now().format("%H:%M").to_string();
        let response = client
            .put(format!("/api/live-classes/{}", session_id))
            .header(ContentType::JSON)
            .cookies(cookies)
            .body(json!({ "status": "completed" }).to_string())
            .dispatch()
            .await;
        let after = chrono::Local::now().format("%H:%M").to_string();
        assert_eq!(response.status(), Status::Ok);

        let session: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        let end_time = session["end_time"].as_str().unwrap().to_string();
        assert!(end_time == before || end_time == after);
    }

    #[rocket::async_test]
    async fn test_live_class_lifecycle() {
        let test_db = create_standard_test_db().await;
        let class_id = test_db.class_id("Algebra");
        let teacher_id = test_db.teacher_id("Mona Adel");
        let student_id = test_db.student_id("Amira Hassan");
        let (client, _) = setup_test_client(test_db).await;

        let secretary = login_test_user(&client, "secretary_user", "password123").await;
        client
            .post(format!("/api/classes/{}/enroll/{}", class_id, student_id))
            .cookies(secretary)
            .dispatch()
            .await;

        let cookies = login_test_user(&client, "teacher_user", "password123").await;

        let response = client
            .post("/api/live-classes")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(
                json!({
                    "class_id": class_id,
                    "teacher_id": teacher_id,
                    "date": "2024-03-04",
                    "start_time": "16:00"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let session: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(session["status"], "scheduled");
        let session_id = session["id"].as_i64().unwrap();

        // Attendance before the session starts is rejected
        let response = client
            .post(format!("/api/live-classes/{}/attendance", session_id))
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "student_id": student_id, "status": "present" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = client
            .put(format!("/api/live-classes/{}", session_id))
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "status": "ongoing" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .post(format!("/api/live-classes/{}/attendance", session_id))
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "student_id": student_id, "status": "late" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let record: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(record["status"], "late");
        assert_eq!(record["method"], "manual");

        let response = client
            .put(format!("/api/live-classes/{}", session_id))
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "status": "completed", "end_time": "17:30" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let session: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(session["status"], "completed");
        assert_eq!(session["end_time"], "17:30");

        // Terminal states cannot be left
        let response = client
            .put(format!("/api/live-classes/{}", session_id))
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "status": "ongoing" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = client
            .get(format!(
                "/api/live-classes/{}/report?from=2024-03-01&to=2024-03-31",
                class_id
            ))
            .cookies(cookies)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let report: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(report["total_sessions"], 1);
        let students = report["students"].as_array().unwrap();
        let amira = students
            .iter()
            .find(|s| s["student_id"].as_i64() == Some(student_id))
            .unwrap();
        assert_eq!(amira["late"], 1);
        assert_eq!(amira["present"], 0);
    }

    #[rocket::async_test]
    async fn test_card_endpoints_and_scan() {
        let test_db = create_standard_test_db().await;
        let student_id = test_db.student_id("Karim Nasser");
        let (client, _) = setup_test_client(test_db).await;

        let cookies = login_test_user(&client, "secretary_user", "password123").await;

        // Rebinding an existing UID is refused
        let response = client
            .post("/api/cards")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "uid": "04A1B2C3", "student_id": student_id }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = client
            .post("/api/cards")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "uid": "09F8E7D6", "student_id": student_id }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.get("/api/cards").cookies(cookies).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let cards: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(cards.as_array().unwrap().len(), 2);

        // The scanner daemon posts without a session
        let response = client
            .post("/api/rfid/scan")
            .header(ContentType::JSON)
            .body(json!({ "uid": "09F8E7D6" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let event: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(event["event"], "student-detected");
        assert_eq!(event["student"]["name"], "Karim Nasser");

        let response = client
            .post("/api/rfid/scan")
            .header(ContentType::JSON)
            .body(json!({ "uid": "FFFFFFFF" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let event: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(event["event"], "unknown-card");
        assert_eq!(event["uid"], "FFFFFFFF");
    }
}
