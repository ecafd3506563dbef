use std::{fs::File, io::BufReader, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    import::ConflictPolicy,
    io_utils::DEFAULT_ENCODING,
    members::DEFAULT_MEMBERS_TABLE,
    resolve::DEFAULT_FUZZY_CUTOFF,
    schema::DEFAULT_SAMPLE_ROWS,
};

/// Settings file contents. Every field is optional in YAML and falls back
/// to the documented default; command-line flags override what is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database: PathBuf,
    /// Any `encoding_rs` label.
    pub encoding: String,
    pub sample_rows: usize,
    pub fuzzy_cutoff: f32,
    pub conflict: ConflictPolicy,
    pub members_table: String,
    pub payments_table: String,
    /// Organisation name used in export URLs.
    pub shortname: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("members.db"),
            encoding: DEFAULT_ENCODING.to_string(),
            sample_rows: DEFAULT_SAMPLE_ROWS,
            fuzzy_cutoff: DEFAULT_FUZZY_CUTOFF,
            conflict: ConflictPolicy::default(),
            members_table: DEFAULT_MEMBERS_TABLE.to_string(),
            payments_table: "payments".to_string(),
            shortname: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let settings = serde_yaml::from_reader(BufReader::new(file))?;
        Ok(settings)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let settings: Settings =
            serde_yaml::from_str("database: club.db\nconflict: abort\nshortname: club\n").unwrap();
        assert_eq!(settings.database, PathBuf::from("club.db"));
        assert_eq!(settings.conflict, ConflictPolicy::Abort);
        assert_eq!(settings.shortname.as_deref(), Some("club"));
        assert_eq!(settings.sample_rows, 100);
        assert_eq!(settings.fuzzy_cutoff, 0.7);
        assert_eq!(settings.members_table, "members");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_yaml::from_str::<Settings>("databse: x.db\n").is_err());
    }

    #[test]
    fn missing_path_means_defaults() {
        assert_eq!(Settings::load_or_default(None).unwrap(), Settings::default());
    }
}
