#![allow(dead_code)]

use listing_board::{
    AppConfig, AppState, InMemoryRepository, MockStorageService,
    auth::AuthUser,
    models::{Category, CreateListingRequest, ListingView, NewCategory, NewUser, User},
    policy::{Roles, Viewer},
    repository::{Repository, RepositoryState},
    storage::StorageState,
};
use rust_decimal::Decimal;
use std::sync::Arc;

pub const PASSWORD: &str = "Str0ng-pass!";

// --- Shared Test Fixtures ---

/// Everything a test needs: the store, a storage mock that records blob traffic, and the state
/// the router is built from. The mock is cloned into the state, so both handles see the same
/// recorded keys.
pub struct TestContext {
    pub repo: Arc<InMemoryRepository>,
    pub storage: MockStorageService,
    pub state: AppState,
}

pub fn context() -> TestContext {
    context_with(AppConfig::default())
}

pub fn context_with(config: AppConfig) -> TestContext {
    let repo = Arc::new(InMemoryRepository::new());
    let storage = MockStorageService::new();
    let state = AppState {
        repo: repo.clone() as RepositoryState,
        storage: Arc::new(storage.clone()) as StorageState,
        config,
    };
    TestContext { repo, storage, state }
}

/// Inserts a user directly, skipping password hashing. Such users cannot log in.
pub async fn seed_user(repo: &dyn Repository, username: &str, roles: Roles) -> User {
    repo.create_user(NewUser {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        password_hash: "not-a-real-hash".to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        phone: None,
        roles,
    })
    .await
    .expect("seeding a user should succeed")
}

pub async fn seed_category(repo: &dyn Repository, slug: &str) -> Category {
    repo.create_category(NewCategory {
        name: slug.to_uppercase(),
        slug: slug.to_string(),
    })
    .await
    .expect("seeding a category should succeed")
}

pub fn viewer(user: &User) -> Viewer {
    AuthUser::from(user).viewer()
}

/// The key an upload by `owner` would have produced for `name`.
pub fn owned_key(owner: &User, name: &str) -> String {
    format!("listings/{}/{name}", owner.id)
}

pub fn owned_keys(owner: &User, names: &[&str]) -> Vec<String> {
    names.iter().map(|name| owned_key(owner, name)).collect()
}

pub fn listing_request(category: &Category, title: &str, price: i64, keys: &[String]) -> CreateListingRequest {
    CreateListingRequest {
        title: title.to_string(),
        description: format!("{title} in good condition"),
        price: Decimal::new(price * 100, 2),
        category_id: category.id,
        author_phone: "+7 (999) 123-45-67".to_string(),
        author_email: "seller@example.com".to_string(),
        image_keys: keys.to_vec(),
    }
}

pub fn image_keys(view: &ListingView) -> Vec<String> {
    view.images.iter().map(|i| i.key.clone()).collect()
}
