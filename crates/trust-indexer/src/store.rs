//! Published documents on disk.
//!
//! Every write goes to a uniquely named temporary sibling of the target, is
//! flushed to disk and then renamed over the target, so a reader opening the
//! target sees either the previous or the new body in full.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("contract name `{0}` cannot be used as a file name component")]
    InvalidName(String),
}

impl PublishError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Which of a contract's two documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Subjects,
    Signers,
}

impl Purpose {
    pub const ALL: [Purpose; 2] = [Purpose::Subjects, Purpose::Signers];

    pub const fn as_str(self) -> &'static str {
        match self {
            Purpose::Subjects => "subjects",
            Purpose::Signers => "signers",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subjects" => Ok(Purpose::Subjects),
            "signers" => Ok(Purpose::Signers),
            _ => Err(()),
        }
    }
}

/// Names end up in file names: ASCII letters, digits, `_` and `-` only.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Atomically replace `target` with `content`.
pub fn publish_atomic(content: &str, target: &Path) -> Result<(), PublishError> {
    publish_with(target, |file| file.write_all(content.as_bytes()))
}

pub(crate) fn publish_with<F>(target: &Path, write: F) -> Result<(), PublishError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // Dropped (and removed) on any early return below.
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| PublishError::io(dir, e))?;

    write(tmp.as_file_mut()).map_err(|e| PublishError::io(tmp.path(), e))?;
    tmp.as_file_mut()
        .flush()
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| PublishError::io(tmp.path(), e))?;

    tmp.persist(target)
        .map_err(|e| PublishError::io(target, e.error))?;
    debug!(path = %target.display(), "document published");
    Ok(())
}

/// Directory holding `{contract}-{purpose}.json` for every tracked contract.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    base_dir: PathBuf,
}

impl DocumentStore {
    /// Creates `base_dir` when missing.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, PublishError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| PublishError::io(&base_dir, e))?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path(&self, contract: &str, purpose: Purpose) -> Result<PathBuf, PublishError> {
        if !is_safe_name(contract) {
            return Err(PublishError::InvalidName(contract.to_string()));
        }
        Ok(self.base_dir.join(format!("{contract}-{purpose}.json")))
    }

    pub fn publish(
        &self,
        contract: &str,
        purpose: Purpose,
        content: &str,
    ) -> Result<(), PublishError> {
        publish_atomic(content, &self.path(contract, purpose)?)
    }

    /// Current body, or `None` before the first successful publish.
    pub fn read(&self, contract: &str, purpose: Purpose) -> Result<Option<String>, PublishError> {
        let path = self.path(contract, purpose)?;
        match std::fs::read_to_string(&path) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PublishError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn publish_replaces_content() {
        let dir = tempdir().expect("tmpdir");
        let target = dir.path().join("doc.json");
        publish_atomic("[1]", &target).unwrap();
        publish_atomic("[1,2]", &target).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "[1,2]");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn failed_write_leaves_target_untouched() {
        let dir = tempdir().expect("tmpdir");
        let target = dir.path().join("doc.json");
        publish_atomic(r#"[{"old":true}]"#, &target).unwrap();

        let err = publish_with(&target, |file| {
            file.write_all(br#"[{"new":"#)?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        })
        .unwrap_err();
        assert!(matches!(err, PublishError::Io { .. }));

        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            r#"[{"old":true}]"#
        );
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn reader_sees_whole_documents_while_writes_fail_halfway() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = tempdir().expect("tmpdir");
        let target = dir.path().join("doc.json");
        let body = |n: usize| format!("[{}]", vec![n.to_string(); 2_000].join(","));
        publish_atomic(&body(0), &target).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = Arc::clone(&stop);
            let target = target.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let text = std::fs::read_to_string(&target).unwrap();
                    assert!(text.starts_with('[') && text.ends_with(']'), "partial read");
                }
            })
        };

        for n in 1..100 {
            if n % 2 == 0 {
                let full = body(n);
                let half = full.len() / 2;
                let _ = publish_with(&target, |file| {
                    file.write_all(&full.as_bytes()[..half])?;
                    Err(io::Error::new(io::ErrorKind::Other, "injected"))
                });
            } else {
                publish_atomic(&body(n), &target).unwrap();
            }
        }
        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), body(99));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn missing_directory_is_an_error_not_a_panic() {
        let dir = tempdir().expect("tmpdir");
        let target = dir.path().join("nope").join("doc.json");
        assert!(matches!(
            publish_atomic("[]", &target),
            Err(PublishError::Io { .. })
        ));
    }

    #[test]
    fn store_names_documents_per_contract_and_purpose() {
        let dir = tempdir().expect("tmpdir");
        let store = DocumentStore::open(dir.path().join("data")).unwrap();
        assert_eq!(store.read("tokens", Purpose::Subjects).unwrap(), None);

        store.publish("tokens", Purpose::Subjects, "[]").unwrap();
        store.publish("tokens", Purpose::Signers, "[1]").unwrap();
        assert!(dir.path().join("data/tokens-subjects.json").exists());
        assert_eq!(
            store.read("tokens", Purpose::Signers).unwrap().as_deref(),
            Some("[1]")
        );
    }

    #[test]
    fn unsafe_names_are_refused() {
        let dir = tempdir().expect("tmpdir");
        let store = DocumentStore::open(dir.path()).unwrap();
        for name in ["", "../etc", "a/b", "a b", "x.json"] {
            assert!(
                matches!(store.path(name, Purpose::Subjects), Err(PublishError::InvalidName(_))),
                "{name}"
            );
        }
        assert!(is_safe_name("token_trust-2"));
    }

    #[test]
    fn purpose_parses_its_own_labels() {
        for purpose in Purpose::ALL {
            assert_eq!(purpose.as_str().parse::<Purpose>(), Ok(purpose));
        }
        assert!("Subjects".parse::<Purpose>().is_err());
    }
}
