use anyhow::Result;

use super::{App, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Reopen,
    Close,
    Submit,
    Approve,
    Reject,
    Confirm,
}

/// Record-level transitions that carry no stage content
pub struct LifecycleCommand {
    pub record: String,
    pub action: LifecycleAction,
}

impl Command for LifecycleCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let mut instance = app.find_record(&self.record).await?;
        let coordinator = &app.coordinator;

        match self.action {
            LifecycleAction::Reopen => coordinator.reopen(&mut instance).await?,
            LifecycleAction::Close => coordinator.close_reopen(&mut instance).await?,
            LifecycleAction::Submit => coordinator.submit_for_approval(&mut instance).await?,
            LifecycleAction::Approve => coordinator.approve(&mut instance).await?,
            LifecycleAction::Reject => coordinator.reject(&mut instance).await?,
            LifecycleAction::Confirm => coordinator.confirm_completion(&mut instance).await?,
        }

        println!(
            "✅ {} is {} ({})",
            instance.protocol,
            instance.status,
            coordinator.phase(&instance)
        );
        Ok(())
    }
}
