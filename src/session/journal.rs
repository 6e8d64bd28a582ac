use crate::connection::Connection;
use crate::core::Result;
use crate::index::IndexCommand;

/// Ordered list of pending index commands, drained into the open
/// transaction at commit time.
#[derive(Default)]
pub(crate) struct CommandJournal {
    commands: Vec<IndexCommand>,
}

impl CommandJournal {
    pub fn append(&mut self, command: IndexCommand) {
        self.commands.push(command);
    }

    /// Executes in insertion order; stops at the first failure and
    /// propagates it (rollback is the caller's disposition step).
    pub async fn drain(&mut self, conn: &mut dyn Connection) -> Result<usize> {
        let commands = std::mem::take(&mut self.commands);
        for command in &commands {
            command.execute(conn).await?;
        }
        Ok(commands.len())
    }

    #[cfg(test)]
    pub fn commands(&self) -> &[IndexCommand] {
        &self.commands
    }
}
