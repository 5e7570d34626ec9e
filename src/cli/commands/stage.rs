use anyhow::Result;

use super::{App, Command};
use crate::cli::{ContentArgs, ContextArg};
use crate::workflow::ViewContext;

pub struct ViewCommand {
    pub record: String,
    pub stage: usize,
    pub context: ContextArg,
}

impl Command for ViewCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let mut instance = app.find_record(&self.record).await?;
        let view = app
            .coordinator
            .view_stage(&mut instance, self.stage, self.context.into())?;

        let state = if view.read_only { "read-only" } else { "editable" };
        println!("📄 [{}] {} ({state})", view.index, view.label);
        if view.verified {
            println!("   🔐 Signature verified");
        }
        if view.content.body.is_empty() {
            println!("   (empty)");
        } else {
            println!("{}", view.content.body);
        }
        if !view.content.signer.is_blank() {
            println!("   ✍️  {} ({})", view.content.signer.name, view.content.signer.role);
        }
        for co in &view.content.co_signatures {
            println!("   ✍️  {} ({})", co.name, co.role);
        }
        Ok(())
    }
}

pub struct SaveCommand {
    pub record: String,
    pub stage: Option<usize>,
    pub content: ContentArgs,
}

impl Command for SaveCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let mut instance = app.find_record(&self.record).await?;
        if let Some(stage) = self.stage {
            app.coordinator
                .view_stage(&mut instance, stage, ViewContext::Editor)?;
        }

        app.coordinator
            .save(&mut instance, self.content.to_content())
            .await?;
        println!(
            "💾 Saved stage {} of {}",
            instance.viewing_stage_index, instance.protocol
        );
        Ok(())
    }
}
