use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one reference icon: `<category>/<filename>` in the icon tree.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IconRecord {
    /// Folder name of the icon's class.
    pub category: String,
    pub filename: String,
}

impl IconRecord {
    pub fn new(category: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            filename: filename.into(),
        }
    }

    /// Key handed to the external image resolver.
    pub fn resource_path(&self) -> String {
        format!("icon/{}/{}", self.category, self.filename)
    }
}

impl fmt::Display for IconRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.filename)
    }
}
