mod common;

use common::{PASSWORD, context, listing_request, owned_key, seed_category, seed_user, viewer};
use listing_board::{
    accounts,
    config::AdminSeed,
    error::{AppError, ErrorCode},
    filters::{PageRequest, UserFilter, UserOrdering},
    listings, moderation,
    models::{LoginRequest, ModerateRequest, RegisterRequest, UpdateProfileRequest, User},
    policy::{Roles, Viewer},
    repository::Repository,
};

fn registration(username: &str, phone: Option<&str>) -> RegisterRequest {
    RegisterRequest {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        password: PASSWORD.to_string(),
        password_confirm: PASSWORD.to_string(),
        first_name: "Ivan".to_string(),
        last_name: "Petrov".to_string(),
        phone: phone.map(str::to_string),
    }
}

fn login(username: &str, password: &str) -> LoginRequest {
    LoginRequest {
        username: username.to_string(),
        password: password.to_string(),
    }
}

// --- Registration ---

#[tokio::test]
async fn formatted_phone_is_accepted_and_short_phone_rejected() {
    let ctx = context();

    let user = accounts::create_account(ctx.repo.as_ref(), registration("ivan", Some("+7 (999) 123-45-67")))
        .await
        .unwrap();
    assert_eq!(user.phone.as_deref(), Some("+7 (999) 123-45-67"));
    assert!(user.is_active);
    assert!(!user.is_staff && !user.is_moderator);

    let err = accounts::create_account(ctx.repo.as_ref(), registration("olga", Some("12345")))
        .await
        .unwrap_err();
    assert!(err.has_field_error("phone", ErrorCode::PhoneFormatInvalid));
}

#[tokio::test]
async fn duplicate_username_and_email_are_reported_together() {
    let ctx = context();
    accounts::create_account(ctx.repo.as_ref(), registration("ivan", None))
        .await
        .unwrap();

    let mut again = registration("ivan", None);
    again.email = "IVAN@example.com".to_string();
    let err = accounts::create_account(ctx.repo.as_ref(), again).await.unwrap_err();

    assert!(err.has_field_error("username", ErrorCode::DuplicateUsername));
    assert!(err.has_field_error("email", ErrorCode::DuplicateEmail));
}

#[tokio::test]
async fn weak_and_mismatched_passwords_are_rejected() {
    let ctx = context();

    let mut numeric = registration("ivan", None);
    numeric.password = "12345678".to_string();
    numeric.password_confirm = "12345678".to_string();
    let err = accounts::create_account(ctx.repo.as_ref(), numeric).await.unwrap_err();
    assert!(err.has_field_error("password", ErrorCode::WeakPassword));

    let mut mismatch = registration("ivan", None);
    mismatch.password_confirm = "Different-pass1".to_string();
    let err = accounts::create_account(ctx.repo.as_ref(), mismatch).await.unwrap_err();
    assert!(err.has_field_error("password_confirm", ErrorCode::PasswordMismatch));

    assert!(!ctx.repo.username_exists("ivan").await.unwrap());
}

#[tokio::test]
async fn missing_required_fields_are_all_listed() {
    let ctx = context();
    let req = RegisterRequest {
        password: PASSWORD.to_string(),
        password_confirm: PASSWORD.to_string(),
        ..RegisterRequest::default()
    };

    let err = accounts::create_account(ctx.repo.as_ref(), req).await.unwrap_err();
    for field in ["username", "email", "first_name", "last_name"] {
        assert!(err.has_field_error(field, ErrorCode::Required), "{field} should be required");
    }
}

// --- Login ---

#[tokio::test]
async fn login_checks_password_then_active_flag() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;
    let user = accounts::create_account(ctx.repo.as_ref(), registration("ivan", None))
        .await
        .unwrap();

    let logged_in = accounts::authenticate(ctx.repo.as_ref(), login("ivan", PASSWORD)).await.unwrap();
    assert_eq!(logged_in.id, user.id);

    let wrong = accounts::authenticate(ctx.repo.as_ref(), login("ivan", "Wrong-pass1")).await;
    assert!(matches!(wrong, Err(AppError::InvalidCredentials)));
    let unknown = accounts::authenticate(ctx.repo.as_ref(), login("nobody", PASSWORD)).await;
    assert!(matches!(unknown, Err(AppError::InvalidCredentials)));

    accounts::set_user_active(ctx.repo.as_ref(), &viewer(&staff), user.id, false)
        .await
        .unwrap();
    let disabled = accounts::authenticate(ctx.repo.as_ref(), login("ivan", PASSWORD)).await;
    assert!(matches!(disabled, Err(AppError::AccountDisabled)));
    // A wrong password never reveals that the account is disabled.
    let probing = accounts::authenticate(ctx.repo.as_ref(), login("ivan", "Wrong-pass1")).await;
    assert!(matches!(probing, Err(AppError::InvalidCredentials)));
}

// --- Profiles ---

#[tokio::test]
async fn profile_update_changes_only_given_fields() {
    let ctx = context();
    let user = seed_user(ctx.repo.as_ref(), "ivan", Roles::default()).await;
    let other = seed_user(ctx.repo.as_ref(), "olga", Roles::default()).await;

    let updated = accounts::update_profile(
        ctx.repo.as_ref(),
        &ctx.storage,
        &viewer(&user),
        UpdateProfileRequest {
            first_name: Some("Ivan".to_string()),
            phone: Some("8 800 555 35 35".to_string()),
            ..UpdateProfileRequest::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.user.first_name, "Ivan");
    assert_eq!(updated.user.last_name, user.last_name);
    assert_eq!(updated.user.phone.as_deref(), Some("8 800 555 35 35"));

    let cleared = accounts::update_profile(
        ctx.repo.as_ref(),
        &ctx.storage,
        &viewer(&user),
        UpdateProfileRequest {
            phone: Some(String::new()),
            ..UpdateProfileRequest::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(cleared.user.phone, None);

    let taken = accounts::update_profile(
        ctx.repo.as_ref(),
        &ctx.storage,
        &viewer(&user),
        UpdateProfileRequest {
            email: Some(other.email.clone()),
            ..UpdateProfileRequest::default()
        },
    )
    .await
    .unwrap_err();
    assert!(taken.has_field_error("email", ErrorCode::DuplicateEmail));

    // Keeping one's own email is not a duplicate.
    let same = accounts::update_profile(
        ctx.repo.as_ref(),
        &ctx.storage,
        &viewer(&user),
        UpdateProfileRequest {
            email: Some(user.email.clone()),
            ..UpdateProfileRequest::default()
        },
    )
    .await;
    assert!(same.is_ok());
}

fn set_avatar(key: &str) -> UpdateProfileRequest {
    UpdateProfileRequest {
        avatar_key: Some(key.to_string()),
        ..UpdateProfileRequest::default()
    }
}

#[tokio::test]
async fn avatar_must_be_an_own_upload_and_replacing_it_purges_the_old_blob() {
    let ctx = context();
    let user = seed_user(ctx.repo.as_ref(), "ivan", Roles::default()).await;
    let other = seed_user(ctx.repo.as_ref(), "olga", Roles::default()).await;
    let first = format!("avatars/{}/first.png", user.id);
    let second = format!("avatars/{}/second.png", user.id);

    for foreign in [
        format!("avatars/{}/hers.png", other.id),
        owned_key(&user, "listing.jpg"),
        format!("avatars/{}/../x.png", user.id),
    ] {
        let err = accounts::update_profile(ctx.repo.as_ref(), &ctx.storage, &viewer(&user), set_avatar(&foreign))
            .await
            .unwrap_err();
        assert!(err.has_field_error("avatar_key", ErrorCode::InvalidImage));
    }

    let profile = accounts::update_profile(ctx.repo.as_ref(), &ctx.storage, &viewer(&user), set_avatar(&first))
        .await
        .unwrap();
    assert_eq!(profile.user.avatar_key.as_deref(), Some(first.as_str()));
    assert_eq!(
        profile.avatar_url,
        Some(format!("http://localhost:9000/mock-bucket/{first}"))
    );
    let public = accounts::public_profile(ctx.repo.as_ref(), &ctx.storage, user.id).await.unwrap();
    assert_eq!(public.avatar_url, profile.avatar_url);
    assert!(ctx.storage.deleted_keys().is_empty());

    accounts::update_profile(ctx.repo.as_ref(), &ctx.storage, &viewer(&user), set_avatar(&second))
        .await
        .unwrap();
    assert_eq!(ctx.storage.deleted_keys(), vec![first.clone()]);

    let cleared = accounts::update_profile(ctx.repo.as_ref(), &ctx.storage, &viewer(&user), set_avatar(""))
        .await
        .unwrap();
    assert_eq!(cleared.user.avatar_key, None);
    assert_eq!(cleared.avatar_url, None);
    assert_eq!(ctx.storage.deleted_keys(), vec![first, second]);
}

#[tokio::test]
async fn public_profile_counts_only_approved_listings() {
    let ctx = context();
    let author = seed_user(ctx.repo.as_ref(), "seller", Roles::default()).await;
    let moderator = seed_user(ctx.repo.as_ref(), "mod", Roles::MODERATOR).await;
    let category = seed_category(ctx.repo.as_ref(), "misc").await;
    for title in ["One", "Two"] {
        let view = listings::create_listing(
            ctx.repo.as_ref(),
            &ctx.storage,
            &viewer(&author),
            listing_request(&category, title, 10, &[]),
        )
        .await
        .unwrap();
        if title == "One" {
            moderation::moderate(
                ctx.repo.as_ref(),
                &ctx.storage,
                &viewer(&moderator),
                view.listing.id,
                ModerateRequest {
                    status: "approved".to_string(),
                },
            )
            .await
            .unwrap();
        }
    }

    let public = accounts::public_profile(ctx.repo.as_ref(), &ctx.storage, author.id).await.unwrap();
    assert_eq!(public.username, "seller");
    assert_eq!(public.listings_count, 1);

    let own = accounts::profile(ctx.repo.as_ref(), &ctx.storage, &viewer(&author)).await.unwrap();
    assert_eq!(own.listings_count, 1);

    let anon = accounts::profile(ctx.repo.as_ref(), &ctx.storage, &Viewer::Anonymous).await;
    assert!(matches!(anon, Err(AppError::Unauthorized)));
}

#[tokio::test]
async fn deactivated_user_has_no_public_profile_but_keeps_listings() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;
    let author = seed_user(ctx.repo.as_ref(), "seller", Roles::default()).await;
    let category = seed_category(ctx.repo.as_ref(), "misc").await;
    let view = listings::create_listing(
        ctx.repo.as_ref(),
        &ctx.storage,
        &viewer(&author),
        listing_request(&category, "Kettle", 8, &[]),
    )
    .await
    .unwrap();

    let deactivated = accounts::set_user_active(ctx.repo.as_ref(), &viewer(&staff), author.id, false)
        .await
        .unwrap();
    assert!(!deactivated.is_active);

    let public = accounts::public_profile(ctx.repo.as_ref(), &ctx.storage, author.id).await;
    assert!(matches!(public, Err(AppError::NotFound)));
    assert!(ctx.repo.get_listing(view.listing.id).await.unwrap().is_some());

    let by_regular_user = accounts::set_user_active(ctx.repo.as_ref(), &viewer(&author), staff.id, false).await;
    assert!(matches!(by_regular_user, Err(AppError::Forbidden)));
}

// --- Administration ---

fn usernames(users: &[User]) -> Vec<&str> {
    users.iter().map(|u| u.username.as_str()).collect()
}

#[tokio::test]
async fn staff_can_list_and_search_every_account() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;
    let moderator = seed_user(ctx.repo.as_ref(), "mod", Roles::MODERATOR).await;
    let ivan = seed_user(ctx.repo.as_ref(), "ivan", Roles::default()).await;
    seed_user(ctx.repo.as_ref(), "olga", Roles::default()).await;
    accounts::set_user_active(ctx.repo.as_ref(), &viewer(&staff), ivan.id, false)
        .await
        .unwrap();

    let by_name = UserFilter {
        ordering: UserOrdering::UsernameAsc,
        ..UserFilter::default()
    };
    let all = accounts::list_users(ctx.repo.as_ref(), &viewer(&staff), &by_name, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(all.count, 4);
    assert_eq!(usernames(&all.results), vec!["ivan", "mod", "olga", "staff"]);
    assert!(!all.results[0].is_active);

    let search = UserFilter {
        search: Some("OLGA@".to_string()),
        ..UserFilter::default()
    };
    let found = accounts::list_users(ctx.repo.as_ref(), &viewer(&staff), &search, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(usernames(&found.results), vec!["olga"]);

    let second_page = PageRequest::new(Some(2), Some(3)).unwrap();
    let page = accounts::list_users(ctx.repo.as_ref(), &viewer(&staff), &by_name, second_page)
        .await
        .unwrap();
    assert_eq!(usernames(&page.results), vec!["staff"]);
    assert_eq!(page.total_pages, 2);

    for outsider in [Viewer::Anonymous, viewer(&moderator), viewer(&ivan)] {
        let denied = accounts::list_users(ctx.repo.as_ref(), &outsider, &by_name, PageRequest::default()).await;
        assert!(matches!(denied, Err(AppError::Forbidden | AppError::Unauthorized)));
    }
}

// --- Deletion ---

#[tokio::test]
async fn deleting_a_user_cascades_to_listings_and_blobs() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;
    let author = seed_user(ctx.repo.as_ref(), "seller", Roles::default()).await;
    let category = seed_category(ctx.repo.as_ref(), "misc").await;
    let view = listings::create_listing(
        ctx.repo.as_ref(),
        &ctx.storage,
        &viewer(&author),
        listing_request(&category, "Kettle", 8, &[owned_key(&author, "kettle.jpg")]),
    )
    .await
    .unwrap();
    let avatar = format!("avatars/{}/me.png", author.id);
    accounts::update_profile(
        ctx.repo.as_ref(),
        &ctx.storage,
        &viewer(&author),
        UpdateProfileRequest {
            avatar_key: Some(avatar.clone()),
            ..UpdateProfileRequest::default()
        },
    )
    .await
    .unwrap();

    let forbidden = accounts::delete_user(ctx.repo.as_ref(), &ctx.storage, &viewer(&author), staff.id).await;
    assert!(matches!(forbidden, Err(AppError::Forbidden)));

    accounts::delete_user(ctx.repo.as_ref(), &ctx.storage, &viewer(&staff), author.id)
        .await
        .unwrap();

    assert!(ctx.repo.get_user(author.id).await.unwrap().is_none());
    assert!(ctx.repo.get_listing(view.listing.id).await.unwrap().is_none());
    assert_eq!(ctx.storage.deleted_keys(), vec![owned_key(&author, "kettle.jpg"), avatar]);
    // The category only loses a reference; it is still there.
    assert!(ctx.repo.get_category(category.id).await.unwrap().is_some());

    let again = accounts::delete_user(ctx.repo.as_ref(), &ctx.storage, &viewer(&staff), author.id).await;
    assert!(matches!(again, Err(AppError::NotFound)));
}

// --- Bootstrap ---

#[tokio::test]
async fn bootstrap_admin_runs_once() {
    let ctx = context();
    let seed = AdminSeed {
        username: "root".to_string(),
        email: "root@example.com".to_string(),
        password: PASSWORD.to_string(),
    };

    let created = accounts::bootstrap_admin(ctx.repo.as_ref(), &seed).await.unwrap().unwrap();
    assert!(created.is_staff && created.is_moderator);
    assert!(accounts::bootstrap_admin(ctx.repo.as_ref(), &seed).await.unwrap().is_none());

    let logged_in = accounts::authenticate(ctx.repo.as_ref(), login("root", PASSWORD)).await.unwrap();
    assert_eq!(logged_in.id, created.id);
}
