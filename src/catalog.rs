//! The category catalog.

use uuid::Uuid;

use crate::{
    error::{AppError, ErrorCode, FieldErrors},
    models::{Category, CreateCategoryRequest, NewCategory},
    policy::{self, Viewer},
    repository::Repository,
    validation::{self, CATEGORY_NAME_MAX_LEN, SLUG_MAX_LEN},
};

/// Categories every fresh installation starts with, as (name, slug).
pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Электроника", "elektronika"),
    ("Недвижимость", "nedvizhimost"),
    ("Транспорт", "transport"),
    ("Услуги", "uslugi"),
    ("Для дома и дачи", "dlya-doma-i-dachi"),
    ("Одежда и обувь", "odezhda-i-obuv"),
    ("Хобби и отдых", "hobbi-i-otdyh"),
    ("Работа", "rabota"),
    ("Животные", "zhivotnye"),
    ("Разное", "raznoe"),
];

/// resolve_slug
///
/// Uses the explicit slug when one is given, otherwise derives it from the name. Either way the
/// result is normalized through `slugify` and must not be empty.
pub fn resolve_slug(name: &str, slug: Option<&str>) -> Option<String> {
    let source = slug.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(name);
    let slug = slug::slugify(source);
    (!slug.is_empty()).then_some(slug)
}

pub async fn list_categories(repo: &dyn Repository) -> Result<Vec<Category>, AppError> {
    Ok(repo.list_categories().await?)
}

/// create_category
///
/// Staff-only.
pub async fn create_category(
    repo: &dyn Repository,
    viewer: &Viewer,
    req: CreateCategoryRequest,
) -> Result<Category, AppError> {
    policy::authorize_administration(viewer)?;
    let mut errors = FieldErrors::new();
    let name = validation::required_text("name", &req.name, Some(CATEGORY_NAME_MAX_LEN), &mut errors);
    let slug = resolve_slug(&name, req.slug.as_deref());
    match &slug {
        None if !name.is_empty() => {
            errors.add("slug", ErrorCode::Required, "A slug could not be derived from this name.");
        }
        Some(slug) if slug.chars().count() > SLUG_MAX_LEN => {
            errors.add(
                "slug",
                ErrorCode::TooLong,
                format!("at most {SLUG_MAX_LEN} characters"),
            );
        }
        _ => {}
    }
    errors.into_result()?;

    let category = repo
        .create_category(NewCategory {
            name,
            slug: slug.unwrap_or_default(),
        })
        .await?;
    tracing::info!(category_id = %category.id, slug = %category.slug, "category created");
    Ok(category)
}

/// delete_category
///
/// Staff-only; fails with `Protected` while listings reference the category.
pub async fn delete_category(repo: &dyn Repository, viewer: &Viewer, id: Uuid) -> Result<(), AppError> {
    policy::authorize_administration(viewer)?;
    repo.delete_category(id).await?;
    tracing::info!(category_id = %id, "category deleted");
    Ok(())
}

/// seed_default_categories
///
/// Get-or-create by slug, so running it repeatedly is harmless. Returns how many were inserted.
pub async fn seed_default_categories(repo: &dyn Repository) -> Result<usize, AppError> {
    let mut created = 0;
    for (name, slug) in DEFAULT_CATEGORIES {
        let (category, inserted) = repo
            .ensure_category(NewCategory {
                name: (*name).to_string(),
                slug: (*slug).to_string(),
            })
            .await?;
        if inserted {
            created += 1;
            tracing::debug!(slug = %category.slug, "seeded category");
        }
    }
    tracing::info!(created, existing = DEFAULT_CATEGORIES.len() - created, "default categories ready");
    Ok(created)
}
