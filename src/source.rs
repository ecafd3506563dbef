//! Where exports come from: download URLs on the membership platform and the
//! [`Downloader`] seam that fetches them with an authenticated session.

use std::{fmt, io};

pub const DEFAULT_BASE_URL: &str = "https://membermojo.co.uk";

/// Fetches the raw bytes behind a URL. Session handling and login live
/// behind this trait; the importer only ever sees CSV bytes.
pub trait Downloader {
    fn fetch(&self, url: &str) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MemberState {
    #[default]
    Active,
    Expired,
    Archived,
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemberState::Active => "active",
            MemberState::Expired => "expired",
            MemberState::Archived => "archived",
        })
    }
}

/// Builds export URLs for one organisation's shortname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MojoUrls {
    base: String,
    shortname: String,
}

impl MojoUrls {
    pub fn new(shortname: impl Into<String>) -> Self {
        Self::with_base(DEFAULT_BASE_URL, shortname)
    }

    pub fn with_base(base: impl Into<String>, shortname: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            shortname: shortname.into(),
        }
    }

    pub fn make_url(&self, endpoint: &str) -> String {
        format!("{}/{}/{endpoint}", self.base, self.shortname)
    }

    pub fn login(&self) -> String {
        self.make_url("signin_password")
    }

    pub fn membership(&self) -> String {
        self.make_url("membership")
    }

    pub fn members(&self, state: MemberState) -> String {
        match state {
            MemberState::Active => format!("{}/download_members", self.membership()),
            other => format!("{}/download_{other}_members", self.membership()),
        }
    }

    pub fn completed_payments(&self) -> String {
        format!("{}/download_completed_payments?state=CO", self.membership())
    }

    pub fn pending_approval(&self) -> String {
        format!("{}/download_pending_approval_members", self.membership())
    }

    pub fn pending_completion(&self) -> String {
        format!("{}/download_pending_completion_members", self.membership())
    }

    pub fn pending_payments(&self) -> String {
        format!("{}/download_pending_payments", self.membership())
    }
}
