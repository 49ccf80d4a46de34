//! Local user resolution.
//!
//! Maps a login name to the credentials, home directory, and environment a
//! command started on that user's behalf receives.

use std::io;
use std::path::PathBuf;

use nix::unistd::User;
use warden_common::constants::{DEFAULT_USER, ROOT_PATH_ENV, USER_PATH_ENV};
use warden_common::error::{Result, WardenError};

/// A local account commands can run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    /// Login name.
    pub name: String,
    /// Numeric user id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
    /// Home directory, used as the working directory.
    pub home: PathBuf,
}

impl ResolvedUser {
    /// Looks up a user by login name; an empty name means the default user.
    ///
    /// Returns `Ok(None)` when no such user exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the user database cannot be read.
    pub fn lookup(name: &str) -> Result<Option<Self>> {
        let name = if name.is_empty() { DEFAULT_USER } else { name };
        let user = User::from_name(name)
            .map_err(|e| WardenError::io("/etc/passwd", io::Error::from(e)))?;
        Ok(user.map(Self::from))
    }

    /// Returns the `PATH` commands run as this user get.
    #[must_use]
    pub const fn path_env(&self) -> &'static str {
        if self.uid == 0 {
            ROOT_PATH_ENV
        } else {
            USER_PATH_ENV
        }
    }

    /// Returns the complete environment for commands run as this user.
    #[must_use]
    pub fn environment(&self) -> Vec<(&'static str, String)> {
        vec![
            ("PATH", self.path_env().to_string()),
            ("USER", self.name.clone()),
            ("HOME", self.home.to_string_lossy().into_owned()),
        ]
    }
}

impl From<User> for ResolvedUser {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
        }
    }
}
