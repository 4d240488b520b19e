//! File-backed [`MessageStore`].
//!
//! Layout under the state directory:
//!   sessions/sessions.json   -- session index (id → Session)
//!   sessions/<id>.jsonl      -- append-only message log, one JSON line
//!                              per message
//!
//! The index lives in memory behind an `RwLock` and is flushed on every
//! mutation. Log appends are plain `O_APPEND` writes; the compaction
//! replace path writes a temp file and renames it over the log so a
//! crash can never leave a half-written history.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use keel_domain::message::{Message, Session};
use keel_domain::{Error, Result};

use crate::MessageStore;

pub struct FileStore {
    dir: PathBuf,
    index_path: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
}

impl FileStore {
    /// Load or create the store at `state_dir/sessions`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let dir = state_dir.join("sessions");
        std::fs::create_dir_all(&dir).map_err(store_err)?;

        let index_path = dir.join("sessions.json");
        let sessions: HashMap<String, Session> = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path).map_err(store_err)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %index_path.display(),
            "message store loaded"
        );

        Ok(Self {
            dir,
            index_path,
            sessions: RwLock::new(sessions),
        })
    }

    fn log_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.jsonl"))
    }

    /// Flush the session index. Callers hold no lock when invoking.
    fn flush_index(&self) -> Result<()> {
        let json = {
            let sessions = self.sessions.read();
            serde_json::to_string_pretty(&*sessions).map_err(store_err)?
        };
        std::fs::write(&self.index_path, json).map_err(store_err)?;
        Ok(())
    }

    fn read_log(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.log_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path).map_err(store_err)?;
        let mut messages = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(m) => messages.push(m),
                Err(e) => {
                    tracing::warn!(
                        session_id = session_id,
                        error = %e,
                        "skipping malformed message log line"
                    );
                }
            }
        }
        Ok(messages)
    }

    fn encode_lines(messages: &[Message]) -> Result<String> {
        let mut buf = String::new();
        for msg in messages {
            let json = serde_json::to_string(msg).map_err(store_err)?;
            buf.push_str(&json);
            buf.push('\n');
        }
        Ok(buf)
    }
}

impl MessageStore for FileStore {
    fn create_session(&self, parent_session_id: Option<&str>, title: &str) -> Result<Session> {
        let session = Session::new(parent_session_id.map(String::from), title);
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        self.flush_index()?;

        tracing::debug!(
            session_id = %session.id,
            parent = parent_session_id.unwrap_or(""),
            "session created"
        );
        Ok(session)
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(id).cloned())
    }

    fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut all: Vec<Session> = self.sessions.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    fn update_session(&self, session: &Session) -> Result<()> {
        {
            let mut sessions = self.sessions.write();
            if !sessions.contains_key(&session.id) {
                return Err(Error::Store(format!("unknown session: {}", session.id)));
            }
            sessions.insert(session.id.clone(), session.clone());
        }
        self.flush_index()
    }

    fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        if !self.sessions.read().contains_key(session_id) {
            return Err(Error::Store(format!("unknown session: {session_id}")));
        }

        let buf = Self::encode_lines(messages)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(session_id))
            .map_err(store_err)?;
        file.write_all(buf.as_bytes()).map_err(store_err)?;

        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(session_id) {
                entry.message_count += messages.len() as u64;
                entry.updated_at = Utc::now();
            }
        }
        self.flush_index()
    }

    fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.read_log(session_id)
    }

    fn replace_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        if !self.sessions.read().contains_key(session_id) {
            return Err(Error::Store(format!("unknown session: {session_id}")));
        }

        let buf = Self::encode_lines(messages)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(store_err)?;
        tmp.write_all(buf.as_bytes()).map_err(store_err)?;
        tmp.persist(self.log_path(session_id))
            .map_err(|e| Error::Store(format!("replacing message log: {e}")))?;

        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(session_id) {
                entry.message_count = messages.len() as u64;
                entry.updated_at = Utc::now();
            }
        }
        self.flush_index()?;

        tracing::debug!(
            session_id = session_id,
            messages = messages.len(),
            "session history replaced"
        );
        Ok(())
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        self.sessions.write().remove(id);
        let path = self.log_path(id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(store_err)?;
        }
        self.flush_index()
    }
}

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::Store(e.to_string())
}
