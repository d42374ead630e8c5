use std::path::{Path, PathBuf};

use thiserror::Error;
use workshop_core::ItemId;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("item id is empty")]
    Empty,
    #[error("item id {0:?} is not a valid directory name")]
    UnsupportedId(String),
}

/// Maps an item id to its directory under `root`.
pub fn item_dir_for(root: &Path, id: &ItemId) -> Result<PathBuf, PathError> {
    validate_id(id.as_str())?;
    Ok(root.join(id.as_str()))
}

/// Inverse of [`item_dir_for`] for directory listings; hidden working
/// directories and foreign names yield `None`.
pub fn item_id_from_dir_name(name: &str) -> Option<ItemId> {
    validate_id(name).ok()?;
    Some(ItemId::from(name))
}

fn validate_id(id: &str) -> Result<(), PathError> {
    if id.is_empty() {
        return Err(PathError::Empty);
    }
    // Ids must stay a single normal component; '.'-prefixed names are reserved
    // for promotion scratch directories.
    if id.starts_with('.')
        || id.contains(['/', '\\'])
        || id.chars().any(|c| c.is_control())
    {
        return Err(PathError::UnsupportedId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_item_id_under_root() {
        let root = PathBuf::from("/data/workshop");
        let mapped = item_dir_for(&root, &ItemId::from("1001")).unwrap();
        assert_eq!(mapped, PathBuf::from("/data/workshop/1001"));
    }

    #[test]
    fn rejects_traversal_and_separators() {
        let root = PathBuf::from("/data/workshop");
        for bad in ["..", "../secret", "a/b", "a\\b", ".hidden"] {
            assert!(
                matches!(
                    item_dir_for(&root, &ItemId::from(bad)),
                    Err(PathError::UnsupportedId(_))
                ),
                "{bad} should be rejected"
            );
        }
        assert!(matches!(
            item_dir_for(&root, &ItemId::from("")),
            Err(PathError::Empty)
        ));
    }

    #[test]
    fn dir_names_round_trip_to_ids() {
        assert_eq!(item_id_from_dir_name("1001"), Some(ItemId::from("1001")));
        assert_eq!(item_id_from_dir_name(".1001.old"), None);
    }
}
