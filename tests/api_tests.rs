mod common;

use common::{PASSWORD, TestContext, context, context_with, seed_category, seed_user};
use listing_board::{
    AppConfig, MockStorageService, auth, create_router,
    models::User,
    policy::Roles,
};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub struct TestApp {
    pub address: String,
    pub config: AppConfig,
    pub storage: MockStorageService,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    fn token(&self, user: &User) -> String {
        auth::issue_token(&self.config, user.id).unwrap().access
    }
}

/// Serves the router on an ephemeral port, backed by the in-memory repository and mock storage.
async fn spawn_app(ctx: TestContext) -> TestApp {
    let config = ctx.state.config.clone();
    let router = create_router(ctx.state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{port}");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        config,
        storage: ctx.storage,
    }
}

async fn json_body(response: reqwest::Response) -> Value {
    response.json().await.expect("response body should be JSON")
}

#[tokio::test]
async fn test_health_check_and_request_id() {
    let app = spawn_app(context()).await;
    let client = Client::new();

    let response = client.get(app.url("/health")).send().await.expect("req fail");
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));

    let response = client
        .get(app.url("/health"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = spawn_app(context()).await;
    let response = Client::new().get(app.url("/api-docs/openapi.json")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let doc = json_body(response).await;
    assert!(doc["paths"]["/listings"].is_object());
    assert!(doc["paths"]["/admin/listings/{id}/moderate"].is_object());
}

#[tokio::test]
async fn test_listing_lifecycle_over_http() {
    let ctx = context();
    let author = seed_user(ctx.repo.as_ref(), "seller", Roles::default()).await;
    let moderator = seed_user(ctx.repo.as_ref(), "mod", Roles::MODERATOR).await;
    let category = seed_category(ctx.repo.as_ref(), "electronics").await;
    let app = spawn_app(ctx).await;
    let client = Client::new();
    let author_token = app.token(&author);
    let mod_token = app.token(&moderator);

    // 1. Upload an image through the API.
    let response = client
        .post(app.url("/upload/images"))
        .bearer_auth(&author_token)
        .header("content-type", "image/jpeg")
        .body(vec![0xFF, 0xD8, 0xFF, 0xE0])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let uploaded = json_body(response).await;
    let key = uploaded["resource_key"].as_str().unwrap().to_string();
    assert!(key.starts_with(&format!("listings/{}/", author.id)) && key.ends_with(".jpg"));
    assert_eq!(app.storage.stored_keys(), vec![key.clone()]);

    // 2. Create the listing; it starts pending.
    let response = client
        .post(app.url("/listings"))
        .bearer_auth(&author_token)
        .json(&json!({
            "title": "Phone",
            "description": "Barely used",
            "price": "1500.5",
            "category_id": category.id,
            "author_phone": "+7 (999) 123-45-67",
            "author_email": "seller@example.com",
            "image_keys": [key]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["price"], "1500.50");
    assert_eq!(created["images"][0]["key"], key.as_str());
    let id = created["id"].as_str().unwrap().to_string();

    // 3. Invisible to the public until approved.
    let response = client.get(app.url(&format!("/listings/{id}"))).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let page = json_body(client.get(app.url("/listings")).send().await.unwrap()).await;
    assert_eq!(page["count"], 0);

    // 4. The moderator approves it.
    let response = client
        .patch(app.url(&format!("/admin/listings/{id}/moderate")))
        .bearer_auth(&mod_token)
        .json(&json!({ "status": "approved" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.get(app.url(&format!("/listings/{id}"))).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = json_body(client.get(app.url("/listings?search=phone")).send().await.unwrap()).await;
    assert_eq!(page["count"], 1);
    assert_eq!(page["page_size"], 12);

    // 5. An author edit sends it back to moderation.
    let response = client
        .patch(app.url(&format!("/listings/{id}")))
        .bearer_auth(&author_token)
        .json(&json!({ "price": "1400.00" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let edited = json_body(response).await;
    assert_eq!(edited["status"], "pending");

    let history = json_body(
        client
            .get(app.url(&format!("/admin/listings/{id}/moderation")))
            .bearer_auth(&mod_token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["to_status"], "approved");

    // 6. The author deletes it; the blob goes with it.
    let response = client
        .delete(app.url(&format!("/listings/{id}")))
        .bearer_auth(&author_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.storage.deleted_keys(), vec![key]);
}

#[tokio::test]
async fn test_non_author_edit_is_forbidden_over_http() {
    let ctx = context();
    let author = seed_user(ctx.repo.as_ref(), "seller", Roles::default()).await;
    let stranger = seed_user(ctx.repo.as_ref(), "stranger", Roles::default()).await;
    let category = seed_category(ctx.repo.as_ref(), "electronics").await;
    let app = spawn_app(ctx).await;
    let client = Client::new();

    let created = json_body(
        client
            .post(app.url("/listings"))
            .bearer_auth(app.token(&author))
            .json(&json!({
                "title": "Radio",
                "description": "Works",
                "price": "10",
                "category_id": category.id,
                "author_phone": "+7 999 123 45 67",
                "author_email": "seller@example.com"
            }))
            .send()
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let response = client
        .patch(app.url(&format!("/listings/{id}")))
        .bearer_auth(app.token(&stranger))
        .json(&json!({ "title": "Stolen" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .delete(app.url(&format!("/listings/{}", uuid::Uuid::new_v4())))
        .bearer_auth(app.token(&stranger))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_too_many_images_over_http() {
    let ctx = context();
    let author = seed_user(ctx.repo.as_ref(), "seller", Roles::default()).await;
    let category = seed_category(ctx.repo.as_ref(), "electronics").await;
    let app = spawn_app(ctx).await;

    let keys: Vec<String> = (1..=6).map(|i| format!("listings/{}/{i}.jpg", author.id)).collect();
    let response = Client::new()
        .post(app.url("/listings"))
        .bearer_auth(app.token(&author))
        .json(&json!({
            "title": "Album",
            "description": "Photos",
            "price": "10.00",
            "category_id": category.id,
            "author_phone": "+7 999 123 45 67",
            "author_email": "seller@example.com",
            "image_keys": keys
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["errors"]["images"][0]["code"], "too_many_images");
}

#[tokio::test]
async fn test_uploads_validate_type_and_size() {
    let config = AppConfig {
        max_image_bytes: 16,
        ..AppConfig::default()
    };
    let ctx = context_with(config);
    let author = seed_user(ctx.repo.as_ref(), "seller", Roles::default()).await;
    let app = spawn_app(ctx).await;
    let client = Client::new();
    let token = app.token(&author);

    let response = client
        .post(app.url("/upload/images"))
        .bearer_auth(&token)
        .header("content-type", "image/png")
        .body(vec![0u8; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let response = client
        .post(app.url("/upload/images"))
        .bearer_auth(&token)
        .header("content-type", "application/pdf")
        .body(vec![1u8; 8])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(app.url("/upload/presigned"))
        .bearer_auth(&token)
        .json(&json!({ "filename": "sofa.webp", "file_type": "image/webp" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let presigned = json_body(response).await;
    assert!(presigned["resource_key"].as_str().unwrap().ends_with(".webp"));
    assert!(presigned["upload_url"].as_str().unwrap().contains("signature=fake"));

    let response = client
        .post(app.url("/upload/presigned"))
        .bearer_auth(&token)
        .json(&json!({ "filename": "me.png", "file_type": "image/png", "purpose": "avatar" }))
        .send()
        .await
        .unwrap();
    let presigned = json_body(response).await;
    let avatar_prefix = format!("avatars/{}/", author.id);
    assert!(presigned["resource_key"].as_str().unwrap().starts_with(&avatar_prefix));
    assert!(app.storage.stored_keys().is_empty());
}

#[tokio::test]
async fn test_staff_manage_categories_over_http() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;
    let app = spawn_app(ctx).await;
    let client = Client::new();

    let response = client
        .post(app.url("/admin/categories"))
        .bearer_auth(app.token(&staff))
        .json(&json!({ "name": "Garden Tools" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let category = json_body(response).await;
    assert_eq!(category["slug"], "garden-tools");

    let all = json_body(client.get(app.url("/categories")).send().await.unwrap()).await;
    assert_eq!(all.as_array().unwrap().len(), 1);

    let response = client
        .delete(app.url(&format!("/admin/categories/{}", category["id"].as_str().unwrap())))
        .bearer_auth(app.token(&staff))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_register_and_public_profile_over_http() {
    let app = spawn_app(context()).await;
    let client = Client::new();

    let response = client
        .post(app.url("/auth/register"))
        .json(&json!({
            "username": "ivan",
            "email": "ivan@example.com",
            "password": PASSWORD,
            "password_confirm": PASSWORD,
            "first_name": "Ivan",
            "last_name": "Petrov"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let registered = json_body(response).await;
    let id = registered["user"]["id"].as_str().unwrap().to_string();

    let public = json_body(client.get(app.url(&format!("/users/{id}"))).send().await.unwrap()).await;
    assert_eq!(public["username"], "ivan");
    assert_eq!(public["listings_count"], 0);
    assert!(public.get("email").is_none());
}

#[tokio::test]
async fn test_avatar_upload_and_profile_over_http() {
    let ctx = context();
    let user = seed_user(ctx.repo.as_ref(), "ivan", Roles::default()).await;
    let app = spawn_app(ctx).await;
    let client = Client::new();
    let token = app.token(&user);

    let response = client
        .post(app.url("/upload/images?purpose=avatar"))
        .bearer_auth(&token)
        .header("content-type", "image/png")
        .body(vec![0x89, 0x50, 0x4E, 0x47])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let uploaded = json_body(response).await;
    let key = uploaded["resource_key"].as_str().unwrap().to_string();
    assert!(key.starts_with(&format!("avatars/{}/", user.id)));

    let response = client
        .patch(app.url("/auth/profile"))
        .bearer_auth(&token)
        .json(&json!({ "avatar_key": key }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let profile = json_body(response).await;
    assert_eq!(profile["avatar_key"], key.as_str());
    assert_eq!(profile["avatar_url"], uploaded["url"]);

    let public = json_body(client.get(app.url(&format!("/users/{}", user.id))).send().await.unwrap()).await;
    assert_eq!(public["avatar_url"], uploaded["url"]);
}

#[tokio::test]
async fn test_admin_user_list_and_queue_filter_over_http() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;
    let moderator = seed_user(ctx.repo.as_ref(), "mod", Roles::MODERATOR).await;
    seed_user(ctx.repo.as_ref(), "ivan", Roles::default()).await;
    let app = spawn_app(ctx).await;
    let client = Client::new();

    let response = client
        .get(app.url("/admin/users?search=iv&ordering=username"))
        .bearer_auth(app.token(&staff))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = json_body(response).await;
    assert_eq!(page["count"], 1);
    assert_eq!(page["results"][0]["username"], "ivan");
    assert!(page["results"][0].get("password_hash").is_none());

    let response = client
        .get(app.url("/admin/users"))
        .bearer_auth(app.token(&moderator))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .get(app.url("/admin/listings?status=archived"))
        .bearer_auth(app.token(&moderator))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["errors"]["status"][0]["code"], "invalid_choice");
}
