//! Directory + filename bookkeeping for path-addressed endpoints.

use super::log::OperationLog;

/// Where a file or object lives on a path-addressed endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    remote_directory: String,
    filename: String,
}

impl Location {
    /// Build a location from a full path without logging.
    pub fn from_filepath(filepath: &str) -> Self {
        let mut location = Self::default();
        location.split_into(filepath);
        location
    }

    pub fn remote_directory(&self) -> &str {
        &self.remote_directory
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Directory joined with filename; either part may be empty.
    pub fn filepath(&self) -> String {
        match (self.remote_directory.is_empty(), self.filename.is_empty()) {
            (true, _) => self.filename.clone(),
            (false, true) => self.remote_directory.clone(),
            (false, false) => format!(
                "{}/{}",
                self.remote_directory.trim_end_matches('/'),
                self.filename
            ),
        }
    }

    /// Replace the filename with the basename of `filepath`. The directory is
    /// only replaced when `filepath` carries one.
    pub fn set_filepath(&mut self, filepath: &str) {
        self.split_into(filepath);
    }

    pub fn set_remote_directory(&mut self, remote_directory: &str, log: &mut OperationLog) {
        log.record(format!("Setting remote directory...{}", remote_directory));
        self.remote_directory = remote_directory.to_string();
    }

    pub fn set_filename(&mut self, filename: &str, log: &mut OperationLog) {
        log.record(format!("Setting filename...{}", filename));
        self.filename = filename.to_string();
    }

    fn split_into(&mut self, filepath: &str) {
        match filepath.rsplit_once('/') {
            Some((dir, name)) => {
                self.remote_directory = dir.to_string();
                self.filename = name.to_string();
            }
            None => self.filename = filepath.to_string(),
        }
    }
}
