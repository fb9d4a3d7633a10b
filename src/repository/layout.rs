//! Where the project lives on the instance and where it is cloned from.

use std::fmt;

/// Remote location and clone URL derived from the origin prefix, folder name
/// and remote home directory. Construction is pure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepositoryLayout {
    folder_name: String,
    parent: String,
    remote_path: String,
    clone_url: String,
}

impl RepositoryLayout {
    /// Derives the layout.
    ///
    /// ```
    /// use code_remote::repository::RepositoryLayout;
    ///
    /// let layout = RepositoryLayout::new("git@github.com:acme", "widgets", "/data/dev/");
    /// assert_eq!(layout.remote_path(), "/data/dev/widgets");
    /// assert_eq!(layout.clone_url(), "git@github.com:acme/widgets.git");
    /// ```
    #[must_use]
    pub fn new(origin_prefix: &str, folder_name: &str, remote_home: &str) -> Self {
        let trimmed_home = remote_home.trim().trim_end_matches('/');
        let parent = if trimmed_home.is_empty() {
            String::from("/")
        } else {
            trimmed_home.to_owned()
        };
        let remote_path = if parent == "/" {
            format!("/{folder_name}")
        } else {
            format!("{parent}/{folder_name}")
        };

        let prefix = origin_prefix.trim();
        let separator = if prefix.ends_with('/') || prefix.ends_with(':') {
            ""
        } else {
            "/"
        };
        let clone_url = format!("{prefix}{separator}{folder_name}.git");

        Self {
            folder_name: folder_name.to_owned(),
            parent,
            remote_path,
            clone_url,
        }
    }

    /// Name of the project directory.
    #[must_use]
    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    /// Directory the project is cloned into.
    #[must_use]
    pub fn parent(&self) -> &str {
        &self.parent
    }

    /// Absolute path of the project on the instance.
    #[must_use]
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// URL passed to `git clone`.
    #[must_use]
    pub fn clone_url(&self) -> &str {
        &self.clone_url
    }
}

impl fmt::Display for RepositoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- {}", self.remote_path, self.clone_url)
    }
}
