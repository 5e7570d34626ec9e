use anyhow::{anyhow, Result};
use chrono::{Datelike, Utc};
use std::sync::Arc;

use crate::config::StageGateConfig;
use crate::database::open_backends;
use crate::gating::{GatingAuthority, InMemoryDirectory};
use crate::sequence::{ProtocolId, SequenceAllocator};
use crate::workflow::types::WorkflowInstance;
use crate::workflow::{CoordinatorSettings, WorkflowCoordinator};

pub mod lifecycle;
pub mod record;
pub mod sequence;
pub mod stage;
pub mod transition;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, app: &App) -> Result<()>;
}

/// Everything a command needs, built once per invocation from configuration
pub struct App {
    pub config: StageGateConfig,
    pub coordinator: WorkflowCoordinator,
    pub allocator: SequenceAllocator,
}

impl App {
    pub async fn build(config: StageGateConfig) -> Result<Self> {
        let backends = open_backends(&config).await?;
        let directory = InMemoryDirectory::load(&config.storage.directory_file)?;
        let authority = GatingAuthority::new(Arc::new(directory), config.gating.totp_params());
        let allocator = SequenceAllocator::new(backends.sequences.clone());

        let coordinator = WorkflowCoordinator::new(
            CoordinatorSettings::from_config(&config),
            backends.gateway,
            SequenceAllocator::new(backends.sequences),
            authority,
        );

        Ok(Self {
            config,
            coordinator,
            allocator,
        })
    }

    /// Look a record up by id, falling back to its protocol identifier
    pub async fn find_record(&self, reference: &str) -> Result<WorkflowInstance> {
        if let Ok(id) = reference.parse() {
            return Ok(self.coordinator.load(&id).await?);
        }

        let wanted = ProtocolId::parse(reference.trim())
            .ok_or_else(|| anyhow!("'{reference}' is neither a record id nor a protocol"))?
            .to_string();
        for id in self.coordinator.list().await? {
            let instance = self.coordinator.load(&id).await?;
            if instance.protocol == wanted {
                return Ok(instance);
            }
        }
        Err(anyhow!("no record with protocol {wanted}"))
    }
}

pub fn year_or_current(year: Option<i32>) -> i32 {
    year.unwrap_or_else(|| Utc::now().year())
}

pub fn print_record_summary(app: &App, instance: &WorkflowInstance) {
    let phase = app.coordinator.phase(instance);
    println!("📋 {} {}", instance.protocol, instance.title);
    println!("   🆔 {}", instance.id);
    println!("   🏷️  Status: {} ({})", instance.status, phase);
    if instance.current_stage_index < crate::workflow::STAGE_COUNT {
        println!(
            "   📍 Active stage: {} {}",
            instance.current_stage_index,
            app.coordinator.labels().label(instance.current_stage_index)
        );
    }
}
