use anyhow::Result;

use super::{print_record_summary, year_or_current, App, Command};
use crate::sequence::RecordKind;
use crate::workflow::NewInstance;

pub struct NewCommand {
    pub title: String,
    pub scope: String,
    pub year: Option<i32>,
    pub kind: String,
    pub digital_signature: bool,
}

impl Command for NewCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let request = NewInstance {
            title: self.title.clone(),
            kind: RecordKind::new(&self.kind)?,
            scope_id: self.scope.clone(),
            year: year_or_current(self.year),
            digital_signature: self.digital_signature,
        };
        let instance = app.coordinator.create_instance(request).await?;

        println!("✅ Created record {}", instance.protocol);
        print_record_summary(app, &instance);
        if instance.digital_signature {
            println!("   🔐 First advance requires signer verification");
        }
        Ok(())
    }
}

pub struct ListCommand;

impl Command for ListCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let ids = app.coordinator.list().await?;
        if ids.is_empty() {
            println!("📋 No records found");
            println!("   💡 Create one with: stagegate new --title 'Your record' --scope <sector>");
            return Ok(());
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(app.coordinator.load(&id).await?);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        for instance in &records {
            println!(
                "{:<16} {:<18} {:<24} {}",
                instance.protocol,
                instance.status.as_str(),
                app.coordinator.phase(instance).to_string(),
                instance.title
            );
        }
        Ok(())
    }
}

pub struct ShowCommand {
    pub record: String,
}

impl Command for ShowCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let instance = app.find_record(&self.record).await?;
        print_record_summary(app, &instance);
        println!();

        for (index, snapshot) in instance.stage_history.iter().enumerate() {
            let mark = if snapshot.verification.is_some() {
                "🔐"
            } else if snapshot.identity_override.is_some() {
                "⚠️ "
            } else {
                "🔒"
            };
            println!("{mark} [{index}] {}", snapshot.label);
            println!("      {}", snapshot.body);
            if !snapshot.signer.is_blank() {
                println!("      ✍️  {} ({})", snapshot.signer.name, snapshot.signer.role);
            }
            if let Some(stamp) = &snapshot.verification {
                println!("      verified by {} at {}", stamp.method, stamp.verified_at);
            }
            if let Some(ov) = &snapshot.identity_override {
                println!("      unverified, confirmed by {}: {}", ov.confirmed_by, ov.reason);
            }
            if let Some(revised) = snapshot.revised_at {
                println!("      revised {revised}");
            }
        }

        if let Some(draft) = &instance.active_draft {
            println!("📝 [{}] {} (draft)", instance.current_stage_index, draft.label);
            println!("      {}", draft.body);
        }
        Ok(())
    }
}
