use serde::{Deserialize, Serialize};

/// One user's contest submission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub owner: String,
    pub images: Vec<String>,
    pub voted_users: Vec<String>,
}

impl Entry {
    pub fn votes(&self) -> usize {
        self.voted_users.len()
    }

    pub fn has_voted(&self, user: &str) -> bool {
        self.voted_users.iter().any(|voter| voter == user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    /// Accepted extensions are `jpg`, `jpeg` and `png`, in any case.
    pub fn from_filename(filename: &str) -> Option<ImageKind> {
        let (_, extension) = filename.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
        }
    }
}

/// An uploaded image that has not been stored yet.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub filename: String,
    pub kind: ImageKind,
    pub bytes: Vec<u8>,
}

/// Fields to change on an existing entry. `None` leaves a field untouched.
#[derive(Debug, Default)]
pub struct EntryPatch {
    pub images: Option<Vec<String>>,
    pub new_images: Vec<ImageFile>,
    pub voted_users: Option<Vec<String>>,
}

impl EntryPatch {
    pub fn voters(voted_users: Vec<String>) -> Self {
        EntryPatch {
            voted_users: Some(voted_users),
            ..Default::default()
        }
    }

    pub fn keep_images(images: Vec<String>) -> Self {
        EntryPatch {
            images: Some(images),
            ..Default::default()
        }
    }

    pub fn append_images(existing: Vec<String>, new_images: Vec<ImageFile>) -> Self {
        EntryPatch {
            images: Some(existing),
            new_images,
            voted_users: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_kind_by_extension() {
        assert_eq!(ImageKind::from_filename("stage.JPG"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_filename("a.b.jpeg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_filename("crowd.png"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_filename("crowd.gif"), None);
        assert_eq!(ImageKind::from_filename("png"), None);
    }

    #[test]
    fn has_voted_is_exact() {
        let entry = Entry {
            id: "e1".to_owned(),
            owner: "alice".to_owned(),
            images: vec![],
            voted_users: vec!["anna".to_owned()],
        };
        assert!(entry.has_voted("anna"));
        assert!(!entry.has_voted("ann"));
        assert_eq!(entry.votes(), 1);
    }
}
