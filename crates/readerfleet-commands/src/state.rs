//! Command state persistence.
//!
//! [`CommandStore`] is the only writer of command records. Records are JSON
//! documents in the `commands` table keyed by command id. Status changes go
//! through [`StorageBackend::update`] and are checked against
//! [`CommandStatus::can_transition_to`] inside the same atomic step, so a
//! late writer can never move a command backwards.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use readerfleet_core::StorageBackend;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::command::{Command, CommandId, CommandStatus};
use crate::error::{CommandError, Result};

const COMMANDS_TABLE: &str = "commands";

/// Result of a guarded status change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The change was stored.
    Applied(Command),
    /// The change would have moved the command backwards; nothing stored.
    Refused { current: CommandStatus },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub by_status: HashMap<CommandStatus, usize>,
}

/// Persistent command store.
pub struct CommandStore {
    backend: Arc<dyn StorageBackend>,
}

impl CommandStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Persist a new command.
    pub async fn create(&self, command: &Command) -> Result<()> {
        let bytes = serde_json::to_vec(command)?;
        let created = self.backend.update(COMMANDS_TABLE, &command.command_id, &mut |current| {
            Ok(match current {
                Some(_) => None,
                None => Some(bytes.clone()),
            })
        })?;
        if !created {
            return Err(CommandError::AlreadyExists(command.command_id.clone()));
        }
        debug!(
            command_id = %command.command_id,
            device_serial = %command.device_serial,
            command = %command.name(),
            "command stored"
        );
        Ok(())
    }

    /// Persist a batch of new commands in one write.
    pub async fn insert_many(&self, commands: &[Command]) -> Result<()> {
        let items = commands
            .iter()
            .map(|c| Ok((c.command_id.clone(), serde_json::to_vec(c)?)))
            .collect::<Result<Vec<_>>>()?;
        self.backend.write_batch(COMMANDS_TABLE, items)?;
        debug!(count = commands.len(), "commands stored");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Command>> {
        match self.backend.read(COMMANDS_TABLE, id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn require(&self, id: &str) -> Result<Command> {
        self.get(id)
            .await?
            .ok_or_else(|| CommandError::NotFound(id.to_string()))
    }

    pub async fn status_of(&self, id: &CommandId) -> Result<CommandStatus> {
        Ok(self.require(id).await?.status)
    }

    /// Apply `f` to a stored command and persist the result.
    ///
    /// `f` returns `false` to leave the record untouched.
    pub async fn update_by_command_id<F>(&self, id: &str, mut f: F) -> Result<Option<Command>>
    where
        F: FnMut(&mut Command) -> bool,
    {
        let mut found = false;
        let mut updated = None;
        self.backend.update(COMMANDS_TABLE, id, &mut |current| {
            let Some(bytes) = current else {
                return Ok(None);
            };
            found = true;
            let mut command: Command = serde_json::from_slice(bytes)?;
            if !f(&mut command) {
                return Ok(None);
            }
            let out = serde_json::to_vec(&command)?;
            updated = Some(command);
            Ok(Some(out))
        })?;

        if !found {
            return Err(CommandError::NotFound(id.to_string()));
        }
        Ok(updated)
    }

    /// Move a command to `status` if the lifecycle allows it.
    ///
    /// `response` replaces the stored response when given. Terminal statuses
    /// stamp `executed_at`.
    pub async fn transition(&self, id: &str, status: CommandStatus, response: Option<Value>) -> Result<Transition> {
        let mut refused_from = None;
        let updated = self
            .update_by_command_id(id, |command| {
                if !command.status.can_transition_to(status) {
                    refused_from = Some(command.status);
                    return false;
                }
                command.status = status;
                if let Some(response) = &response {
                    command.response = Some(response.clone());
                }
                if status.is_terminal() {
                    command.executed_at = Some(Utc::now());
                }
                true
            })
            .await?;

        match (updated, refused_from) {
            (Some(command), _) => Ok(Transition::Applied(command)),
            (None, Some(current)) => Ok(Transition::Refused { current }),
            // update_by_command_id only skips the write when the closure refused.
            (None, None) => Err(CommandError::NotFound(id.to_string())),
        }
    }

    /// Atomically claim a pending command for execution.
    ///
    /// Exactly one caller wins for a given command.
    pub async fn claim(&self, id: &str) -> Result<bool> {
        let claimed = self
            .update_by_command_id(id, |command| {
                if command.status != CommandStatus::Pending {
                    return false;
                }
                command.status = CommandStatus::Processing;
                true
            })
            .await?;
        Ok(claimed.is_some())
    }

    /// Highest-priority due scheduled command, earliest `execute_at` first.
    pub async fn find_next_eligible(&self, now: DateTime<Utc>) -> Result<Option<Command>> {
        let next = self
            .scan()?
            .into_iter()
            .filter(|c| c.is_due(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.execute_at.cmp(&b.execute_at))
                    .then(a.created_at.cmp(&b.created_at))
            });
        Ok(next)
    }

    /// Non-terminal commands whose reference time is before `cutoff`.
    pub async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Command>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|c| !c.status.is_terminal() && c.reference_time() < cutoff)
            .collect())
    }

    /// Member commands of one group dispatch, ordered by device serial.
    pub async fn list_by_group(&self, group_command_id: &str) -> Result<Vec<Command>> {
        let mut commands: Vec<Command> = self
            .scan()?
            .into_iter()
            .filter(|c| c.group_command_id.as_deref() == Some(group_command_id))
            .collect();
        commands.sort_by(|a, b| a.device_serial.cmp(&b.device_serial));
        Ok(commands)
    }

    /// Every member command fanned out to `group_id`.
    pub async fn list_by_group_id(&self, group_id: &str) -> Result<Vec<Command>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|c| c.group_id.as_deref() == Some(group_id) && c.group_command_id.is_some())
            .collect())
    }

    /// A device's commands, newest first.
    pub async fn list_by_device(&self, device_serial: &str, limit: usize) -> Result<Vec<Command>> {
        let mut commands: Vec<Command> = self
            .scan()?
            .into_iter()
            .filter(|c| c.device_serial == device_serial)
            .collect();
        commands.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        commands.truncate(limit);
        Ok(commands)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let commands = self.scan()?;
        let mut stats = StoreStats {
            total: commands.len(),
            ..Default::default()
        };
        for command in commands {
            *stats.by_status.entry(command.status).or_insert(0) += 1;
        }
        Ok(stats)
    }

    fn scan(&self) -> Result<Vec<Command>> {
        let rows = self.backend.scan(COMMANDS_TABLE, "")?;
        let mut commands = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            match serde_json::from_slice(&bytes) {
                Ok(command) => commands.push(command),
                Err(e) => warn!(command_id = %key, error = %e, "skipping unreadable command record"),
            }
        }
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandPayload, CommandPriority, CommandType};
    use readerfleet_storage::MemoryBackend;
    use serde_json::json;

    fn store() -> CommandStore {
        CommandStore::new(Arc::new(MemoryBackend::default()))
    }

    fn stop(serial: &str) -> Command {
        Command::new(serial, CommandType::Control, CommandPayload::Stop)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store();
        let command = stop("R-1");
        store.create(&command).await.unwrap();

        assert_eq!(store.require(&command.command_id).await.unwrap(), command);
        assert!(matches!(store.create(&command).await, Err(CommandError::AlreadyExists(_))));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_refuses_regression() {
        let store = store();
        let command = stop("R-1");
        store.create(&command).await.unwrap();
        let id = &command.command_id;

        assert!(store.transition(id, CommandStatus::Success, Some(json!({"response": "success"}))).await.unwrap().is_applied());
        let outcome = store.transition(id, CommandStatus::Processing, None).await.unwrap();
        assert_eq!(outcome, Transition::Refused { current: CommandStatus::Success });

        let stored = store.require(id).await.unwrap();
        assert_eq!(stored.status, CommandStatus::Success);
        assert!(stored.executed_at.is_some());
        assert_eq!(stored.response, Some(json!({"response": "success"})));
    }

    #[tokio::test]
    async fn test_transition_missing_command() {
        let store = store();
        assert!(matches!(
            store.transition("nope", CommandStatus::Success, None).await,
            Err(CommandError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_only_once() {
        let store = store();
        let command = stop("R-1");
        store.create(&command).await.unwrap();

        assert!(store.claim(&command.command_id).await.unwrap());
        assert!(!store.claim(&command.command_id).await.unwrap());
        assert_eq!(store.status_of(&command.command_id).await.unwrap(), CommandStatus::Processing);
    }

    #[tokio::test]
    async fn test_find_next_eligible_ordering() {
        let store = store();
        let now = Utc::now();
        let secs = chrono::Duration::seconds;

        let low_early = stop("R-1").with_priority(CommandPriority::Low).with_execute_at(now - secs(60));
        let high_late = stop("R-2").with_priority(CommandPriority::High).with_execute_at(now - secs(5));
        let high_early = stop("R-3").with_priority(CommandPriority::High).with_execute_at(now - secs(30));
        let high_future = stop("R-4").with_priority(CommandPriority::High).with_execute_at(now + secs(30));
        let immediate = stop("R-5").with_priority(CommandPriority::High);

        store
            .insert_many(&[low_early.clone(), high_late.clone(), high_early.clone(), high_future, immediate])
            .await
            .unwrap();

        let next = store.find_next_eligible(now).await.unwrap().unwrap();
        assert_eq!(next.command_id, high_early.command_id);

        store.claim(&high_early.command_id).await.unwrap();
        let next = store.find_next_eligible(now).await.unwrap().unwrap();
        assert_eq!(next.command_id, high_late.command_id);

        store.claim(&high_late.command_id).await.unwrap();
        let next = store.find_next_eligible(now).await.unwrap().unwrap();
        assert_eq!(next.command_id, low_early.command_id);

        store.claim(&low_early.command_id).await.unwrap();
        assert!(store.find_next_eligible(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_device_newest_first() {
        let store = store();
        let mut first = stop("R-1");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = stop("R-1");
        store.insert_many(&[first.clone(), second.clone(), stop("R-2")]).await.unwrap();

        let listed = store.list_by_device("R-1", 10).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|c| c.command_id.as_str()).collect();
        assert_eq!(ids, vec![second.command_id.as_str(), first.command_id.as_str()]);
        assert_eq!(store.list_by_device("R-1", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = store();
        let a = stop("R-1");
        store.insert_many(&[a.clone(), stop("R-2")]).await.unwrap();
        store.transition(&a.command_id, CommandStatus::Error, None).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get(&CommandStatus::Error), Some(&1));
        assert_eq!(stats.by_status.get(&CommandStatus::Pending), Some(&1));
    }
}
