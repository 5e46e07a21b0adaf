//! Image-set planning shared by every repository implementation.
//!
//! Repositories call these functions inside their write transaction, after the listing row is
//! locked and the current image set has been re-read. Nothing is persisted unless the plan is Ok.

use std::collections::HashSet;

use uuid::Uuid;

use crate::{models::ListingImage, repository::RepoError, storage::sanitize_key};

pub const MAX_IMAGES_PER_LISTING: usize = 5;

/// Blob prefix of listing images.
pub const LISTING_KEY_PREFIX: &str = "listings";
/// Blob prefix of user avatars.
pub const AVATAR_KEY_PREFIX: &str = "avatars";
const KEY_MAX_LEN: usize = 255;

/// new_object_key
///
/// A fresh blob key `<prefix>/<owner>/<uuid>.<extension>`. The owner segment is what
/// `is_owned_key` checks when the key is later attached to a listing or profile.
pub fn new_object_key(prefix: &str, owner: Uuid, extension: &str) -> String {
    format!("{prefix}/{owner}/{}.{extension}", Uuid::new_v4())
}

/// True when `key` is a clean key directly inside `<prefix>/<owner>/`.
pub fn is_owned_key(prefix: &str, owner: Uuid, key: &str) -> bool {
    if key.len() > KEY_MAX_LEN || sanitize_key(key) != key {
        return false;
    }
    let owner_dir = format!("{prefix}/{owner}/");
    key.strip_prefix(owner_dir.as_str())
        .is_some_and(|name| !name.is_empty() && !name.contains('/'))
}

fn duplicate_key() -> RepoError {
    RepoError::Duplicate("image_key".to_string())
}

/// Each blob key may back one image row only: no repeats in the request, and none that the
/// listing already holds (including rows this very update deletes).
fn check_unique_keys(new_keys: &[String], current: &[ListingImage]) -> Result<(), RepoError> {
    let mut seen = HashSet::new();
    for key in new_keys {
        if !seen.insert(key.as_str()) || current.iter().any(|image| image.image_key == *key) {
            return Err(duplicate_key());
        }
    }
    Ok(())
}

/// NewImage
///
/// An image row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub key: String,
    pub order: i32,
}

/// ImagePlan
///
/// The image rows an update removes and inserts, plus the blob keys that become orphaned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImagePlan {
    pub delete: Vec<Uuid>,
    pub insert: Vec<NewImage>,
    pub removed_keys: Vec<String>,
}

fn check_count(resulting: usize) -> Result<(), RepoError> {
    if resulting > MAX_IMAGES_PER_LISTING {
        return Err(RepoError::TooManyImages {
            resulting,
            max: MAX_IMAGES_PER_LISTING,
        });
    }
    Ok(())
}

fn to_order(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// plan_initial
///
/// Images submitted with a new listing take their submission index as `order`.
pub fn plan_initial(keys: &[String]) -> Result<Vec<NewImage>, RepoError> {
    check_count(keys.len())?;
    check_unique_keys(keys, &[])?;
    Ok(keys
        .iter()
        .enumerate()
        .map(|(index, key)| NewImage {
            key: key.clone(),
            order: to_order(index),
        })
        .collect())
}

/// plan_update
///
/// `resulting = current - deleted + new` must not exceed the cap. Every delete id must name an
/// image of `current`; duplicates are collapsed. New keys must be unique and not already on the
/// listing. Appended images continue after the highest order
/// that survives the deletions, or start at 0 when none survive.
pub fn plan_update(
    current: &[ListingImage],
    delete_ids: &[Uuid],
    new_keys: &[String],
) -> Result<ImagePlan, RepoError> {
    let mut seen = HashSet::new();
    let mut delete = Vec::new();
    for id in delete_ids {
        if !seen.insert(*id) {
            continue;
        }
        if !current.iter().any(|image| image.id == *id) {
            return Err(RepoError::InvalidImage(*id));
        }
        delete.push(*id);
    }
    check_unique_keys(new_keys, current)?;

    let remaining: Vec<&ListingImage> = current
        .iter()
        .filter(|image| !seen.contains(&image.id))
        .collect();
    check_count(remaining.len() + new_keys.len())?;

    let start = remaining
        .iter()
        .map(|image| image.order)
        .max()
        .map_or(0, |max| max.saturating_add(1));
    let insert = new_keys
        .iter()
        .enumerate()
        .map(|(offset, key)| NewImage {
            key: key.clone(),
            order: start.saturating_add(to_order(offset)),
        })
        .collect();

    let removed_keys = current
        .iter()
        .filter(|image| seen.contains(&image.id))
        .map(|image| image.image_key.clone())
        .collect();

    Ok(ImagePlan {
        delete,
        insert,
        removed_keys,
    })
}

/// Sorts images the way every reader sees them: by `order`, then upload time.
pub fn sort_images(images: &mut [ListingImage]) {
    images.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.uploaded_at.cmp(&b.uploaded_at))
    });
}
