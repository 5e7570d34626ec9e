use anyhow::Result;

use super::{year_or_current, App, Command};
use crate::cli::SequenceArgs;
use crate::sequence::RecordKind;

pub struct SequencePeekCommand {
    pub target: SequenceArgs,
}

impl Command for SequencePeekCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let kind = RecordKind::new(&self.target.kind)?;
        let suggestion = app
            .allocator
            .suggest(&kind, &self.target.scope, year_or_current(self.target.year))
            .await?;
        println!("{suggestion}");
        Ok(())
    }
}

pub struct SequenceNextCommand {
    pub target: SequenceArgs,
}

impl Command for SequenceNextCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let kind = RecordKind::new(&self.target.kind)?;
        let allocated = app
            .allocator
            .allocate(&kind, &self.target.scope, year_or_current(self.target.year))
            .await?;
        println!("{allocated}");
        Ok(())
    }
}
