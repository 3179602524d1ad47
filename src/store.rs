//! The AWS shared credentials file.
//!
//! Updates are read-merge-write: only the three credential keys of the target profile change,
//! every other line is kept verbatim, and the new contents replace the file by rename.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;

use crate::{
    config::{env_path, parse_entry},
    ConfigError, TemporaryCredential,
};

const AWS_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
const AWS_SHARED_CREDENTIALS_FILE_DEFAULT: &[&str] = &[".aws", "credentials"];

const ACCESS_KEY_ID: &str = "aws_access_key_id";
const SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const SESSION_TOKEN: &str = "aws_session_token";

/// A shared credentials file.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// A store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store named by `AWS_SHARED_CREDENTIALS_FILE`, or `~/.aws/credentials`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is invalid or the home directory is unknown.
    pub fn from_env() -> Result<Self, ConfigError> {
        env_path(
            AWS_SHARED_CREDENTIALS_FILE,
            AWS_SHARED_CREDENTIALS_FILE_DEFAULT,
        )
        .map(Self::new)
    }

    /// The file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set the credential keys of `profile`, creating the section and file if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot be read or
    /// replaced. The file is left unchanged on error.
    pub async fn write_profile(
        &self,
        profile: &str,
        credential: &TemporaryCredential,
    ) -> Result<(), String> {
        let mut file = self.read().await?;
        file.set(profile, ACCESS_KEY_ID, &credential.access_key_id);
        file.set(profile, SECRET_ACCESS_KEY, &credential.secret_access_key);
        file.set(profile, SESSION_TOKEN, &credential.session_token);

        replace(&self.path, &file.render()).await.map_err(|error| {
            format!(
                "unable to write credentials file {}: {error}",
                self.path.display()
            )
        })
    }

    /// Read the keys of `profile`, in file order, or `None` if there is no such section.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn read_profile(
        &self,
        profile: &str,
    ) -> Result<Option<Vec<(String, String)>>, String> {
        Ok(self.read().await?.section(profile).map(|section| {
            section
                .lines
                .iter()
                .filter_map(|line| parse_entry(line))
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect()
        }))
    }

    async fn read(&self) -> Result<CredentialsFile, String> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(CredentialsFile::parse(&content)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(CredentialsFile::default()),
            Err(error) => Err(format!(
                "unable to read credentials file {}: {error}",
                self.path.display()
            )),
        }
    }
}

#[derive(Debug, Default)]
struct CredentialsFile {
    preamble: Vec<String>,
    sections: Vec<Section>,
}

#[derive(Debug)]
struct Section {
    name: String,
    header: String,
    lines: Vec<String>,
}

impl CredentialsFile {
    fn parse(content: &str) -> Self {
        let mut file = Self::default();
        for line in content.lines() {
            if let Some(name) = parse_section_name(line) {
                file.sections.push(Section {
                    name: name.to_string(),
                    header: line.to_string(),
                    lines: Vec::new(),
                });
            } else if let Some(section) = file.sections.last_mut() {
                section.lines.push(line.to_string());
            } else {
                file.preamble.push(line.to_string());
            }
        }
        file
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name == name)
    }

    fn set(&mut self, profile: &str, key: &str, value: &str) {
        let existing = self
            .sections
            .iter()
            .position(|section| section.name == profile);
        let index = match existing {
            Some(index) => index,
            None => {
                let previous = self
                    .sections
                    .last_mut()
                    .map_or(&mut self.preamble, |section| &mut section.lines);
                if previous.last().is_some_and(|line| !line.trim().is_empty()) {
                    previous.push(String::new());
                }
                self.sections.push(Section {
                    name: profile.to_string(),
                    header: format!("[{profile}]"),
                    lines: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        let section = &mut self.sections[index];

        let entry = format!("{key} = {value}");
        let mut matches = section
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| {
                parse_entry(line).is_some_and(|(name, _)| name.eq_ignore_ascii_case(key))
            })
            .map(|(index, _)| index)
            .collect::<Vec<_>>()
            .into_iter();

        if let Some(first) = matches.next() {
            section.lines[first] = entry;
            // drop stale duplicates, last first so indices stay valid
            for duplicate in matches.rev() {
                section.lines.remove(duplicate);
            }
        } else {
            let end = section
                .lines
                .iter()
                .rposition(|line| !line.trim().is_empty())
                .map_or(0, |index| index + 1);
            section.lines.insert(end, entry);
        }
    }

    fn render(&self) -> String {
        let mut content = String::new();
        for line in &self.preamble {
            content.push_str(line);
            content.push('\n');
        }
        for section in &self.sections {
            content.push_str(&section.header);
            content.push('\n');
            for line in &section.lines {
                content.push_str(line);
                content.push('\n');
            }
        }
        content
    }
}

fn parse_section_name(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix('[')
        .and_then(|line| line.strip_suffix(']'))
        .map(str::trim)
}

/// Replace `path` with `content` via a temporary file in the same directory.
async fn replace(path: &Path, content: &str) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = dir.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let result = async {
        fs::write(&tmp, content).await?;
        set_permissions(path, &tmp).await?;
        fs::rename(&tmp, path).await
    }
    .await;
    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    result
}

/// Keep the permissions of an existing file, otherwise restrict to the owner.
#[cfg(unix)]
async fn set_permissions(path: &Path, tmp: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = match fs::metadata(path).await {
        Ok(meta) => meta.permissions(),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            std::fs::Permissions::from_mode(0o600)
        }
        Err(error) => return Err(error),
    };
    fs::set_permissions(tmp, permissions).await
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Path, _tmp: &Path) -> io::Result<()> {
    Ok(())
}
