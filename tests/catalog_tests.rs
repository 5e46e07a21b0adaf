mod common;

use common::{context, listing_request, seed_category, seed_user, viewer};
use listing_board::{
    catalog,
    error::{AppError, ErrorCode},
    listings,
    models::CreateCategoryRequest,
    policy::{Roles, Viewer},
};

fn named(name: &str, slug: Option<&str>) -> CreateCategoryRequest {
    CreateCategoryRequest {
        name: name.to_string(),
        slug: slug.map(str::to_string),
    }
}

#[tokio::test]
async fn staff_creates_category_with_derived_slug() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;

    let category = catalog::create_category(ctx.repo.as_ref(), &viewer(&staff), named("Garden Tools", None))
        .await
        .unwrap();
    assert_eq!(category.name, "Garden Tools");
    assert_eq!(category.slug, "garden-tools");

    let all = catalog::list_categories(ctx.repo.as_ref()).await.unwrap();
    assert_eq!(all, vec![category]);
}

#[tokio::test]
async fn duplicate_slug_is_a_field_error() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;
    catalog::create_category(ctx.repo.as_ref(), &viewer(&staff), named("Pets", None))
        .await
        .unwrap();

    let err = catalog::create_category(ctx.repo.as_ref(), &viewer(&staff), named("Other pets", Some("pets")))
        .await
        .unwrap_err();
    assert!(err.has_field_error("slug", ErrorCode::DuplicateSlug));
}

#[tokio::test]
async fn blank_name_and_unsluggable_name_are_rejected() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;

    let blank = catalog::create_category(ctx.repo.as_ref(), &viewer(&staff), named("  ", None))
        .await
        .unwrap_err();
    assert!(blank.has_field_error("name", ErrorCode::Required));

    let symbols = catalog::create_category(ctx.repo.as_ref(), &viewer(&staff), named("???", None))
        .await
        .unwrap_err();
    assert!(symbols.has_field_error("slug", ErrorCode::Required));
}

#[tokio::test]
async fn category_name_is_limited_to_one_hundred_characters() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;

    let longest = "a".repeat(100);
    let category = catalog::create_category(ctx.repo.as_ref(), &viewer(&staff), named(&longest, None))
        .await
        .unwrap();
    assert_eq!(category.name.chars().count(), 100);

    let too_long = "б".repeat(101);
    let err = catalog::create_category(ctx.repo.as_ref(), &viewer(&staff), named(&too_long, None))
        .await
        .unwrap_err();
    assert!(err.has_field_error("name", ErrorCode::TooLong));

    // Transliteration can make the derived slug longer than the name.
    let err = catalog::create_category(ctx.repo.as_ref(), &viewer(&staff), named(&"щ".repeat(60), None))
        .await
        .unwrap_err();
    assert!(err.has_field_error("slug", ErrorCode::TooLong));
}

#[tokio::test]
async fn only_staff_manage_the_catalog() {
    let ctx = context();
    let user = seed_user(ctx.repo.as_ref(), "user", Roles::default()).await;
    let moderator = seed_user(ctx.repo.as_ref(), "mod", Roles::MODERATOR).await;
    let category = seed_category(ctx.repo.as_ref(), "pets").await;

    for who in [viewer(&user), viewer(&moderator)] {
        let create = catalog::create_category(ctx.repo.as_ref(), &who, named("Cars", None)).await;
        assert!(matches!(create, Err(AppError::Forbidden)));
        let delete = catalog::delete_category(ctx.repo.as_ref(), &who, category.id).await;
        assert!(matches!(delete, Err(AppError::Forbidden)));
    }
    let anon = catalog::create_category(ctx.repo.as_ref(), &Viewer::Anonymous, named("Cars", None)).await;
    assert!(matches!(anon, Err(AppError::Unauthorized)));
}

#[tokio::test]
async fn category_in_use_cannot_be_deleted() {
    let ctx = context();
    let staff = seed_user(ctx.repo.as_ref(), "staff", Roles::STAFF).await;
    let author = seed_user(ctx.repo.as_ref(), "seller", Roles::default()).await;
    let category = seed_category(ctx.repo.as_ref(), "pets").await;
    let created = listings::create_listing(
        ctx.repo.as_ref(),
        &ctx.storage,
        &viewer(&author),
        listing_request(&category, "Cage", 35, &[]),
    )
    .await
    .unwrap();

    let refused = catalog::delete_category(ctx.repo.as_ref(), &viewer(&staff), category.id).await;
    assert!(matches!(refused, Err(AppError::Protected(_))));

    listings::delete_listing(ctx.repo.as_ref(), &ctx.storage, &viewer(&author), created.listing.id)
        .await
        .unwrap();
    catalog::delete_category(ctx.repo.as_ref(), &viewer(&staff), category.id)
        .await
        .unwrap();
    assert!(catalog::list_categories(ctx.repo.as_ref()).await.unwrap().is_empty());

    let missing = catalog::delete_category(ctx.repo.as_ref(), &viewer(&staff), category.id).await;
    assert!(matches!(missing, Err(AppError::NotFound)));
}

#[tokio::test]
async fn seeding_defaults_is_idempotent() {
    let ctx = context();

    let first = catalog::seed_default_categories(ctx.repo.as_ref()).await.unwrap();
    assert_eq!(first, catalog::DEFAULT_CATEGORIES.len());
    let second = catalog::seed_default_categories(ctx.repo.as_ref()).await.unwrap();
    assert_eq!(second, 0);

    let all = catalog::list_categories(ctx.repo.as_ref()).await.unwrap();
    assert_eq!(all.len(), catalog::DEFAULT_CATEGORIES.len());
    assert!(all.iter().any(|c| c.slug == "elektronika"));
}
